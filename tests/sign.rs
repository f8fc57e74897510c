pub mod common;

use common::MockLookup;
use postdkim::{header::MessageFormatError, sign, verify, SignerError, VerifyOutcome};

#[test]
fn signing_options_defaults() {
    let options = postdkim::SigningOptions::default();

    assert_eq!(options.algorithm, "rsa-sha256");
    assert_eq!(options.canonicalization, "simple/simple");
    assert_eq!(options.headers, ["from"]);
    assert_eq!(options.query_methods, ["dns/txt"]);
}

#[test]
fn sign_config_validation_order() {
    let mut message = common::sample_message();

    let mut options = postdkim::SigningOptions::default();
    assert_eq!(
        sign(&mut message, &options),
        Err(SignerError::MissingPrivateKey)
    );

    options.private_key = "not a pem document".into();
    assert_eq!(
        sign(&mut message, &options),
        Err(SignerError::InvalidPrivateKey)
    );

    options.private_key = common::PRIVATE_KEY_PEM.into();
    assert_eq!(sign(&mut message, &options), Err(SignerError::MissingDomain));

    options.domain = "example.org".into();
    assert_eq!(
        sign(&mut message, &options),
        Err(SignerError::MissingSelector)
    );

    options.selector = "default".into();
    assert_eq!(sign(&mut common::sample_message(), &options), Ok(()));

    options.canonicalization = "simple/relaxed/simple".into();
    assert_eq!(
        sign(&mut message, &options),
        Err(SignerError::UnsupportedCanonicalization)
    );

    options.canonicalization = "simple/relax".into();
    assert_eq!(
        sign(&mut message, &options),
        Err(SignerError::UnsupportedCanonicalization)
    );

    // a single algorithm name and mixed case are fine
    options.canonicalization = "relaxed".into();
    assert_eq!(sign(&mut common::sample_message(), &options), Ok(()));

    options.canonicalization = "SiMple/relAxed".into();
    assert_eq!(sign(&mut common::sample_message(), &options), Ok(()));

    options.algorithm = "rsa-md5".into();
    assert_eq!(
        sign(&mut message, &options),
        Err(SignerError::UnsupportedAlgorithm)
    );

    options.algorithm = "rsa-sha1".into();
    options.headers = vec!["toto".into()];
    assert_eq!(
        sign(&mut message, &options),
        Err(SignerError::FromHeaderNotSigned)
    );

    options.headers = vec!["To".into(), "From".into()];
    assert_eq!(sign(&mut common::sample_message(), &options), Ok(()));
}

#[test]
fn sign_requires_well_formed_message() {
    let mut message = b"From: a@x\r\nno body separator".to_vec();

    assert_eq!(
        sign(&mut message, &common::signing_options()),
        Err(SignerError::MessageFormat(
            MessageFormatError::MissingBodySeparator
        ))
    );
}

#[test]
fn sign_produces_deterministic_header() {
    let original = b"From: joe@football.example.com\r\n\r\nHello\r\n".to_vec();
    let mut message = original.clone();

    sign(&mut message, &common::signing_options()).unwrap();

    // body hash of "Hello\r\n", independent of any timestamp
    let expected_base = "DKIM-Signature: v=1; a=rsa-sha256; q=dns/txt; c=simple/simple;\r\n \
         s=brisbane; d=football.example.com; h=from;\r\n \
         bh=Ba3gj8+xBPQLJTahTfzW6RbWQ/XPgESxkCi2B66PSQg=;\r\n \
         b=";

    assert!(message.starts_with(expected_base.as_bytes()));

    // the message itself is untouched below the new header field
    assert!(message.ends_with(&original));

    // signing is deterministic for a fixed configuration
    let mut again = original.clone();
    sign(&mut again, &common::signing_options()).unwrap();
    assert_eq!(message, again);
}

#[test]
fn sign_emits_optional_tags() {
    let mut message = common::sample_message();

    let mut options = common::signing_options();
    options.auid = format!("@{}", common::DOMAIN);
    options.add_signature_timestamp = true;
    options.signature_expire_in = 3600;
    options.body_length = 5;

    sign(&mut message, &options).unwrap();

    let header_end = message
        .windows(4)
        .position(|w| w == b"\r\nRe")
        .unwrap();
    let header = std::str::from_utf8(&message[..header_end]).unwrap();

    assert!(header.contains(" i=@football.example.com;"));
    assert!(header.contains(" t="));
    assert!(header.contains(" x="));
    assert!(header.contains(" l=5;"));
}

#[test]
fn sign_rejects_body_length_beyond_body() {
    let mut message = b"From: joe@football.example.com\r\n\r\nHello\r\n".to_vec();

    let mut options = common::signing_options();
    options.body_length = 9999;

    assert_eq!(sign(&mut message, &options), Err(SignerError::BodyTooShort));
}

#[tokio::test]
async fn sign_then_verify_simple() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut message = b"From: joe@football.example.com\r\n\r\nHello\r\n".to_vec();

    sign(&mut message, &common::signing_options()).unwrap();

    let resolver = MockLookup::serving_test_key();

    let result = verify(&resolver, &message).await;

    assert_eq!(result.outcome, VerifyOutcome::Success);
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn sign_then_verify_relaxed_with_repeated_headers() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut message = common::sample_message();

    let mut options = common::signing_options();
    options.canonicalization = "relaxed/relaxed".into();
    options.auid = format!("@{}", common::DOMAIN);
    options.add_signature_timestamp = true;
    options.signature_expire_in = 3600;
    options.headers = vec![
        "from".into(),
        "date".into(),
        "mime-version".into(),
        "received".into(),
        "received".into(),
        "in-reply-to".into(),
    ];

    sign(&mut message, &options).unwrap();

    let resolver = MockLookup::serving_test_key();

    let result = verify(&resolver, &message).await;

    assert_eq!(result.outcome, VerifyOutcome::Success);
    assert_eq!(result.error, None);
}

#[tokio::test]
async fn sign_then_verify_mixed_canonicalization() {
    let _ = tracing_subscriber::fmt::try_init();

    let resolver = MockLookup::serving_test_key();

    for canonicalization in ["simple/relaxed", "relaxed/simple"] {
        let mut message = common::sample_message();

        let mut options = common::signing_options();
        options.canonicalization = canonicalization.into();
        options.headers = vec!["from".into(), "to".into(), "subject".into()];

        sign(&mut message, &options).unwrap();

        let result = verify(&resolver, &message).await;

        assert_eq!(result.outcome, VerifyOutcome::Success, "{canonicalization}");
    }
}

#[tokio::test]
async fn sign_then_verify_rsa_sha1() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut message = common::sample_message();

    let mut options = common::signing_options();
    options.algorithm = "rsa-sha1".into();

    sign(&mut message, &options).unwrap();

    let resolver = MockLookup::serving_test_key();

    let result = verify(&resolver, &message).await;

    assert_eq!(result.outcome, VerifyOutcome::Success);
}

#[tokio::test]
async fn sign_then_verify_with_body_length_limit() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut message = common::sample_message();

    let mut options = common::signing_options();
    options.body_length = 13; // "Hello world\r\n"

    sign(&mut message, &options).unwrap();

    // content past the signed length does not break verification
    message.extend_from_slice(b"-- trailing content, ignored --\r\n");

    let resolver = MockLookup::serving_test_key();

    let result = verify(&resolver, &message).await;

    assert_eq!(result.outcome, VerifyOutcome::Success);
}
