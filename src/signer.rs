// postdkim – signing and verification of DKIM signatures
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Signer and supporting types.

use crate::{
    canonicalize, crypto,
    header::MessageFormatError,
    signature::{self, Canonicalization, SignatureAlgorithm, UnsignedDkimSignature},
    util,
};
use rsa::RsaPrivateKey;
use std::fmt::{self, Display, Formatter};
use tracing::{debug, trace};

/// Options controlling signature production.
#[derive(Clone, Debug)]
pub struct SigningOptions {
    /// PEM-encoded RSA private key used for signing (required).
    pub private_key: String,
    /// The signing domain, the d= tag (required).
    pub domain: String,
    /// The selector subdividing the domain namespace, the s= tag (required).
    pub selector: String,
    /// The agent or user identifier, the i= tag (empty: tag omitted).
    pub auid: String,
    /// Header/body canonicalization as `"<header>/<body>"`. A single
    /// algorithm name leaves the body canonicalization at `simple`.
    pub canonicalization: String,
    /// The signature algorithm, `rsa-sha256` or the historic `rsa-sha1`.
    pub algorithm: String,
    /// Names of the header fields to sign, in order. Must include `From`.
    pub headers: Vec<String>,
    /// Number of body octets to sign (0: the entire body, no l= tag).
    pub body_length: u64,
    /// Query methods for key retrieval, the q= tag.
    pub query_methods: Vec<String>,
    /// Whether to record the signing time in the t= tag.
    pub add_signature_timestamp: bool,
    /// Seconds until the signature expires, the x= tag (0: never).
    pub signature_expire_in: u64,
}

impl Default for SigningOptions {
    fn default() -> Self {
        Self {
            private_key: String::new(),
            domain: String::new(),
            selector: String::new(),
            auid: String::new(),
            canonicalization: "simple/simple".into(),
            algorithm: "rsa-sha256".into(),
            headers: vec!["from".into()],
            body_length: 0,
            query_methods: vec!["dns/txt".into()],
            add_signature_timestamp: false,
            signature_expire_in: 0,
        }
    }
}

/// An error produced when validating signing options or signing a message.
#[derive(Debug, Eq, PartialEq)]
pub enum SignerError {
    MissingPrivateKey,
    InvalidPrivateKey,
    MissingDomain,
    MissingSelector,
    UnsupportedCanonicalization,
    UnsupportedAlgorithm,
    FromHeaderNotSigned,
    MessageFormat(MessageFormatError),
    BodyTooShort,
    SigningFailure,
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrivateKey => write!(f, "private key required"),
            Self::InvalidPrivateKey => write!(f, "private key unusable"),
            Self::MissingDomain => write!(f, "domain required"),
            Self::MissingSelector => write!(f, "selector required"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported signature algorithm"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::MessageFormat(error) => error.fmt(f),
            Self::BodyTooShort => write!(f, "body length limit exceeds body"),
            Self::SigningFailure => write!(f, "signing failed"),
        }
    }
}

impl std::error::Error for SignerError {}

impl From<MessageFormatError> for SignerError {
    fn from(error: MessageFormatError) -> Self {
        Self::MessageFormat(error)
    }
}

/// Signs a message, prepending the finished `DKIM-Signature` header field to
/// the buffer in place. The message is not modified otherwise.
///
/// The configuration is validated up front; every configuration error is
/// deterministic and caller-fixable.
pub fn sign(message: &mut Vec<u8>, options: &SigningOptions) -> Result<(), SignerError> {
    // validate and normalize the configuration; the first failing check wins
    if options.private_key.is_empty() {
        return Err(SignerError::MissingPrivateKey);
    }
    let private_key = crypto::read_rsa_private_key(&options.private_key)
        .map_err(|_| SignerError::InvalidPrivateKey)?;

    if options.domain.is_empty() {
        return Err(SignerError::MissingDomain);
    }
    if options.selector.is_empty() {
        return Err(SignerError::MissingSelector);
    }

    let canonicalization: Canonicalization = options
        .canonicalization
        .parse()
        .map_err(|_| SignerError::UnsupportedCanonicalization)?;

    let algorithm: SignatureAlgorithm = options
        .algorithm
        .parse()
        .map_err(|_| SignerError::UnsupportedAlgorithm)?;

    let signed_headers: Vec<String> = options
        .headers
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();
    if !signed_headers.iter().any(|name| name == "from") {
        return Err(SignerError::FromHeaderNotSigned);
    }

    let header_text = build_signature_header(
        message,
        options,
        &private_key,
        canonicalization,
        algorithm,
        signed_headers,
    )?;

    debug!(domain = %options.domain, selector = %options.selector, "message signed");

    let mut signed = Vec::with_capacity(header_text.len() + message.len());
    signed.extend_from_slice(header_text.as_bytes());
    signed.append(message);
    *message = signed;

    Ok(())
}

fn build_signature_header(
    message: &[u8],
    options: &SigningOptions,
    private_key: &RsaPrivateKey,
    canonicalization: Canonicalization,
    algorithm: SignatureAlgorithm,
    signed_headers: Vec<String>,
) -> Result<String, SignerError> {
    let (mut canonical_headers, canonical_body) =
        canonicalize::canonicalize(message, canonicalization, &signed_headers)?;

    let hash_algorithm = algorithm.hash_algorithm();

    let body_length = (options.body_length > 0).then_some(options.body_length);
    let body_hash = crypto::body_hash(hash_algorithm, &canonical_body, body_length)
        .map_err(|_| SignerError::BodyTooShort)?;

    let timestamp = options.add_signature_timestamp.then(util::now_unix_secs);
    let expiration = (options.signature_expire_in > 0)
        .then(|| util::now_unix_secs().saturating_add(options.signature_expire_in));

    let unsigned = UnsignedDkimSignature {
        algorithm,
        canonicalization,
        domain: options.domain.clone(),
        selector: options.selector.clone(),
        signed_headers,
        auid: (!options.auid.is_empty()).then(|| options.auid.clone()),
        body_length,
        query_methods: options.query_methods.clone(),
        timestamp,
        expiration,
    };

    let mut header_text = unsigned.format_header_base(&util::encode_base64(&body_hash));

    // the header field being created terminates its own signing input,
    // canonicalized like any other field and trimmed of trailing CRLF/space
    canonicalize::canonicalize_header(
        &mut canonical_headers,
        canonicalization.header,
        header_text.as_bytes(),
    )?;
    canonicalize::trim_signing_input(&mut canonical_headers);

    let data_hash = crypto::digest_data(hash_algorithm, &canonical_headers);

    let signature_data = crypto::sign_rsa(hash_algorithm, private_key, &data_hash)
        .map_err(|_| SignerError::SigningFailure)?;

    trace!("RSA signing successful");

    signature::append_signature_data(&mut header_text, &util::encode_base64(&signature_data));

    Ok(header_text)
}
