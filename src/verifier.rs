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

//! Verifier and supporting types.

use crate::{
    canonicalize, crypto,
    header::{self, MessageFormatError},
    record::KeyRecordError,
    resolver::{self, KeyLookupError, LookupTxt},
    signature::{self, DkimSignature, DkimSignatureError},
    util::{self, CanonicalStr},
};
use std::{
    fmt::{self, Display, Formatter},
    str,
};
use tracing::{debug, trace};

/// The trust classification of a verification.
///
/// `Permfail` is final: the signature must not be accepted and the
/// verification must not be retried. `Tempfail` is reserved for transient
/// key-retrieval failures; a caller may retry it with backoff. `NotSigned`
/// means the message carries no `DKIM-Signature` header field at all.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerifyOutcome {
    Success,
    Permfail,
    Tempfail,
    NotSigned,
}

impl CanonicalStr for VerifyOutcome {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Permfail => "permfail",
            Self::Tempfail => "tempfail",
            Self::NotSigned => "notsigned",
        }
    }
}

impl Display for VerifyOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

/// An error describing why a verification did not succeed.
#[derive(Debug, Eq, PartialEq)]
pub enum VerifierError {
    /// No `DKIM-Signature` header field in the message.
    SignatureHeaderNotFound,
    /// The message itself is structurally invalid.
    MessageFormat(MessageFormatError),
    /// The signature header field is unusable.
    SignatureHeaderFormat(DkimSignatureError),
    /// The signature's x= tag lies in the past.
    SignatureExpired,
    /// The signature's l= tag exceeds the canonical body length.
    BodyTooShort,
    /// The recomputed body hash does not match the bh= tag.
    BodyHashMismatch,
    /// The key record name does not exist.
    NoKeyForSignature,
    /// The key record could not be retrieved; retrying may help.
    KeyUnavailable,
    /// The answer or the record carries no key.
    NoKey,
    /// The key record is unusable.
    KeyRecordFormat(KeyRecordError),
    /// The key record does not accept the signature's hash algorithm.
    InappropriateHashAlgorithm,
    /// The record demands i= and d= domains to match, and they do not.
    IdentityMismatch,
    /// The signature does not verify against the public key.
    SignatureMismatch,
}

impl Display for VerifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureHeaderNotFound => write!(f, "no DKIM-Signature header field"),
            Self::MessageFormat(error) => error.fmt(f),
            Self::SignatureHeaderFormat(error) => error.fmt(f),
            Self::SignatureExpired => write!(f, "signature has expired"),
            Self::BodyTooShort => write!(f, "body length limit exceeds body"),
            Self::BodyHashMismatch => write!(f, "body hash mismatch"),
            Self::NoKeyForSignature => write!(f, "no key for signature"),
            Self::KeyUnavailable => write!(f, "key unavailable"),
            Self::NoKey => write!(f, "no key record"),
            Self::KeyRecordFormat(error) => error.fmt(f),
            Self::InappropriateHashAlgorithm => {
                write!(f, "hash algorithm not accepted by key record")
            }
            Self::IdentityMismatch => write!(f, "i= domain does not match d= domain"),
            Self::SignatureMismatch => write!(f, "signature does not verify"),
        }
    }
}

impl std::error::Error for VerifierError {}

/// The result of verifying a message: the trust outcome together with the
/// specific error that produced it.
#[derive(Debug, Eq, PartialEq)]
pub struct VerificationResult {
    pub outcome: VerifyOutcome,
    pub error: Option<VerifierError>,
}

impl VerificationResult {
    pub fn is_success(&self) -> bool {
        self.outcome == VerifyOutcome::Success
    }
}

type Failed = (VerifyOutcome, VerifierError);

fn permfail(error: VerifierError) -> Failed {
    (VerifyOutcome::Permfail, error)
}

/// Verifies the first `DKIM-Signature` header field of a message.
///
/// Re-computation uses the canonicalization and header selection declared in
/// the signature itself; the injected `resolver` supplies the public key
/// record. The body hash is checked before any lookup, so a tampered body is
/// detected without network traffic.
///
/// When several signature headers are present only the first one is
/// inspected; evaluating all of them independently is left to a future
/// revision.
pub async fn verify<T: LookupTxt>(resolver: &T, message: &[u8]) -> VerificationResult {
    match run_verify(resolver, message).await {
        Ok(()) => VerificationResult {
            outcome: VerifyOutcome::Success,
            error: None,
        },
        Err((outcome, error)) => VerificationResult {
            outcome,
            error: Some(error),
        },
    }
}

async fn run_verify<T: LookupTxt>(resolver: &T, message: &[u8]) -> Result<(), Failed> {
    // locate the signature header field
    let (header_block, _) = header::split_message(message)
        .map_err(|e| permfail(VerifierError::MessageFormat(e)))?;
    let fields = header::parse_header_block(header_block)
        .map_err(|e| permfail(VerifierError::MessageFormat(e)))?;

    let field = fields
        .iter()
        .find(|f| f.is_named(signature::DKIM_SIGNATURE_NAME))
        .copied()
        .ok_or((
            VerifyOutcome::NotSigned,
            VerifierError::SignatureHeaderNotFound,
        ))?;

    let raw = field.raw();
    let value_start = raw.iter().position(|&b| b == b':').map_or(0, |i| i + 1);
    let value = str::from_utf8(&raw[value_start..]).map_err(|_| {
        permfail(VerifierError::SignatureHeaderFormat(
            DkimSignatureError::InvalidTagList,
        ))
    })?;

    let sig: DkimSignature = value
        .parse()
        .map_err(|e| permfail(VerifierError::SignatureHeaderFormat(e)))?;

    trace!(domain = %sig.domain, selector = %sig.selector, "found signature header");

    // an expired signature fails before any hashing or lookup
    if let Some(expiration) = sig.expiration {
        if expiration < util::now_unix_secs() {
            return Err(permfail(VerifierError::SignatureExpired));
        }
    }

    // re-derive the canonical form declared by the signer
    let (mut canonical_headers, canonical_body) =
        canonicalize::canonicalize(message, sig.canonicalization, &sig.signed_headers)
            .map_err(|e| permfail(VerifierError::MessageFormat(e)))?;

    let hash_algorithm = sig.algorithm.hash_algorithm();

    // the body hash is checked before any network traffic
    let body_hash = crypto::body_hash(hash_algorithm, &canonical_body, sig.body_length)
        .map_err(|_| permfail(VerifierError::BodyTooShort))?;
    if body_hash != sig.body_hash {
        debug!("body hash mismatch");
        return Err(permfail(VerifierError::BodyHashMismatch));
    }

    // resolve the public key
    let record = resolver::look_up_key_record(resolver, &sig.selector, &sig.domain)
        .await
        .map_err(|e| match e {
            KeyLookupError::NoRecord => permfail(VerifierError::NoKeyForSignature),
            KeyLookupError::Unavailable => {
                (VerifyOutcome::Tempfail, VerifierError::KeyUnavailable)
            }
            KeyLookupError::EmptyAnswer => permfail(VerifierError::NoKey),
            KeyLookupError::InvalidRecord(KeyRecordError::NoKey) => {
                permfail(VerifierError::NoKey)
            }
            KeyLookupError::InvalidRecord(error) => {
                permfail(VerifierError::KeyRecordFormat(error))
            }
        })?;

    // the record's h= filter gates the signature's hash algorithm
    if !record.hash_algorithms.contains(&hash_algorithm) {
        return Err(permfail(VerifierError::InappropriateHashAlgorithm));
    }

    // t=s: the AUID must be under the signing domain itself
    if record.strict_identity {
        if let Some(auid) = &sig.auid {
            let auid_domain = auid.rsplit('@').next().unwrap_or("");
            if !auid_domain.eq_ignore_ascii_case(&sig.domain) {
                return Err(permfail(VerifierError::IdentityMismatch));
            }
        }
    }

    // recompute the header hash over the signature's own header field with
    // the b= value removed
    let stripped = signature::strip_signature_data(raw);
    canonicalize::canonicalize_header(
        &mut canonical_headers,
        sig.canonicalization.header,
        &stripped,
    )
    .map_err(|e| permfail(VerifierError::MessageFormat(e)))?;
    canonicalize::trim_signing_input(&mut canonical_headers);

    let data_hash = crypto::digest_data(hash_algorithm, &canonical_headers);

    crypto::verify_rsa(
        hash_algorithm,
        &record.public_key,
        &data_hash,
        &sig.signature_data,
    )
    .map_err(|_| permfail(VerifierError::SignatureMismatch))?;

    trace!("signature verified");

    Ok(())
}
