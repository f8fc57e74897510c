pub mod common;

use common::MockLookup;
use postdkim::{
    header::MessageFormatError,
    record::KeyRecordError,
    sign, verify,
    signature::DkimSignatureError,
    VerifierError, VerifyOutcome,
};
use std::io;

fn signed_message() -> Vec<u8> {
    let mut message = common::sample_message();
    sign(&mut message, &common::signing_options()).unwrap();
    message
}

#[tokio::test]
async fn verify_not_signed() {
    let resolver = MockLookup::serving_test_key();

    let result = verify(&resolver, &common::sample_message()).await;

    assert_eq!(result.outcome, VerifyOutcome::NotSigned);
    assert_eq!(result.error, Some(VerifierError::SignatureHeaderNotFound));
}

#[tokio::test]
async fn verify_bad_mail_format() {
    let resolver = MockLookup::serving_test_key();

    let result = verify(&resolver, b"From: a@x\r\nno body separator").await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(
        result.error,
        Some(VerifierError::MessageFormat(
            MessageFormatError::MissingBodySeparator
        ))
    );
}

#[tokio::test]
async fn verify_tampered_body() {
    let resolver = MockLookup::serving_test_key();

    let mut message = signed_message();
    let position = message.len() - 4;
    message[position] ^= 0x01;

    let result = verify(&resolver, &message).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(result.error, Some(VerifierError::BodyHashMismatch));
}

#[tokio::test]
async fn verify_tampered_signed_header() {
    let resolver = MockLookup::serving_test_key();

    let mut message = signed_message();
    let position = message.windows(4).position(|w| w == b"From").unwrap();
    message[position + 6] ^= 0x01;

    let result = verify(&resolver, &message).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(result.error, Some(VerifierError::SignatureMismatch));
}

#[tokio::test]
async fn verify_missing_required_tag() {
    let resolver = MockLookup::serving_test_key();

    let message = b"DKIM-Signature: v=1; a=rsa-sha256; d=football.example.com; h=from;\r\n \
         s=brisbane; bh=MTIz\r\n\
         From: joe@football.example.com\r\n\r\nHello\r\n";

    let result = verify(&resolver, message).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(
        result.error,
        Some(VerifierError::SignatureHeaderFormat(
            DkimSignatureError::MissingRequiredTag("b")
        ))
    );
}

#[tokio::test]
async fn verify_expired_signature() {
    let resolver = MockLookup::serving_test_key();

    let message = b"DKIM-Signature: v=1; a=rsa-sha256; d=football.example.com; h=from;\r\n \
         s=brisbane; x=5; bh=MTIz; b=MTIz\r\n\
         From: joe@football.example.com\r\n\r\nHello\r\n";

    let result = verify(&resolver, message).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(result.error, Some(VerifierError::SignatureExpired));
}

#[tokio::test]
async fn verify_key_record_not_found() {
    // NXDOMAIN everywhere
    let resolver = MockLookup::new(|_| {
        Box::pin(async { Err(io::ErrorKind::NotFound.into()) })
    });

    let result = verify(&resolver, &signed_message()).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(result.error, Some(VerifierError::NoKeyForSignature));
}

#[tokio::test]
async fn verify_key_lookup_transient_failure() {
    let resolver = MockLookup::new(|_| {
        Box::pin(async { Err(io::ErrorKind::TimedOut.into()) })
    });

    let result = verify(&resolver, &signed_message()).await;

    assert_eq!(result.outcome, VerifyOutcome::Tempfail);
    assert_eq!(result.error, Some(VerifierError::KeyUnavailable));
}

#[tokio::test]
async fn verify_empty_answer() {
    let resolver = MockLookup::new(|_| Box::pin(async { Ok(vec![]) }));

    let result = verify(&resolver, &signed_message()).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(result.error, Some(VerifierError::NoKey));
}

#[tokio::test]
async fn verify_record_without_key_data() {
    let resolver = MockLookup::serving_record("v=DKIM1".into());

    let result = verify(&resolver, &signed_message()).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(result.error, Some(VerifierError::NoKey));
}

#[tokio::test]
async fn verify_revoked_key() {
    // distinguishable from the no-key case
    let resolver = MockLookup::serving_record("v=DKIM1; p=".into());

    let result = verify(&resolver, &signed_message()).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(
        result.error,
        Some(VerifierError::KeyRecordFormat(KeyRecordError::RevokedKey))
    );
}

#[tokio::test]
async fn verify_version_tag_not_first() {
    let record = format!("p={}; v=DKIM1", common::PUBLIC_KEY_BASE64);
    let resolver = MockLookup::serving_record(record);

    let result = verify(&resolver, &signed_message()).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(
        result.error,
        Some(VerifierError::KeyRecordFormat(
            KeyRecordError::MisplacedVersionTag
        ))
    );
}

#[tokio::test]
async fn verify_record_rejects_hash_algorithm() {
    let record = format!("v=DKIM1; h=sha1; p={}", common::PUBLIC_KEY_BASE64);
    let resolver = MockLookup::serving_record(record);

    let result = verify(&resolver, &signed_message()).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(
        result.error,
        Some(VerifierError::InappropriateHashAlgorithm)
    );
}

#[tokio::test]
async fn verify_strict_identity() {
    let record = format!("v=DKIM1; t=s; p={}", common::PUBLIC_KEY_BASE64);

    let mut options = common::signing_options();
    options.auid = "@elsewhere.example".into();

    let mut message = common::sample_message();
    sign(&mut message, &options).unwrap();

    let resolver = MockLookup::serving_record(record.clone());
    let result = verify(&resolver, &message).await;

    assert_eq!(result.outcome, VerifyOutcome::Permfail);
    assert_eq!(result.error, Some(VerifierError::IdentityMismatch));

    // an AUID under the signing domain passes
    let mut options = common::signing_options();
    options.auid = format!("@{}", common::DOMAIN);

    let mut message = common::sample_message();
    sign(&mut message, &options).unwrap();

    let resolver = MockLookup::serving_record(record);
    let result = verify(&resolver, &message).await;

    assert_eq!(result.outcome, VerifyOutcome::Success);
}

#[tokio::test]
async fn verify_inspects_only_the_first_signature_header() {
    let resolver = MockLookup::serving_test_key();

    let mut message = signed_message();

    // splice a second, nonsensical signature header below the first one
    let first_header_end = message.windows(4).position(|w| w == b"\r\nRe").unwrap() + 2;
    let bogus = b"DKIM-Signature: v=1; nonsense\r\n".to_vec();
    message.splice(first_header_end..first_header_end, bogus);

    let result = verify(&resolver, &message).await;

    assert_eq!(result.outcome, VerifyOutcome::Success);
}

#[tokio::test]
async fn verify_multiple_txt_strings_uses_the_first() {
    let record = format!("v=DKIM1; k=rsa; p={}", common::PUBLIC_KEY_BASE64);
    let resolver = MockLookup::new(move |name| {
        let result = if name == "brisbane._domainkey.football.example.com" {
            Ok(vec![
                Ok(record.clone().into_bytes()),
                Ok(b"v=DKIM1; p=".to_vec()),
            ])
        } else {
            Err(io::ErrorKind::NotFound.into())
        };
        Box::pin(async move { result })
    });

    let result = verify(&resolver, &signed_message()).await;

    assert_eq!(result.outcome, VerifyOutcome::Success);
}
