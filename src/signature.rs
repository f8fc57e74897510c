//! The `DKIM-Signature` header field.
//!
//! This module provides both directions of the tag codec for the signature
//! header: parsing the wire form into a structured [`DkimSignature`], and
//! producing the folded header text when signing.

use crate::{
    crypto::HashAlgorithm,
    tag_list::{parse_base64_value, parse_colon_separated, TagList, TagSpec},
    util::CanonicalStr,
};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

/// Maximum length of a generated header line.
pub const MAX_HEADER_LINE_LENGTH: usize = 70;

const CRLF: &str = "\r\n";
const FWS: &str = "\r\n ";

/// A signature algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    /// The historic *rsa-sha1* signature algorithm.
    RsaSha1,
    /// The *rsa-sha256* signature algorithm.
    RsaSha256,
}

impl SignatureAlgorithm {
    /// Returns this signature algorithm's hash algorithm.
    pub fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            Self::RsaSha1 => HashAlgorithm::Sha1,
            Self::RsaSha256 => HashAlgorithm::Sha256,
        }
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("rsa-sha256") {
            Ok(Self::RsaSha256)
        } else if s.eq_ignore_ascii_case("rsa-sha1") {
            Ok(Self::RsaSha1)
        } else {
            Err("unknown signature algorithm")
        }
    }
}

/// A canonicalization algorithm.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    /// The *simple* canonicalization algorithm.
    #[default]
    Simple,
    /// The *relaxed* canonicalization algorithm.
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl Display for CanonicalizationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for CanonicalizationAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("simple") {
            Ok(Self::Simple)
        } else if s.eq_ignore_ascii_case("relaxed") {
            Ok(Self::Relaxed)
        } else {
            Err("unknown canonicalization algorithm")
        }
    }
}

/// A pair of header/body canonicalization algorithms.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    /// The header canonicalization.
    pub header: CanonicalizationAlgorithm,
    /// The body canonicalization.
    pub body: CanonicalizationAlgorithm,
}

impl CanonicalStr for Canonicalization {
    fn canonical_str(&self) -> &'static str {
        use CanonicalizationAlgorithm::*;

        match (self.header, self.body) {
            (Simple, Simple) => "simple/simple",
            (Simple, Relaxed) => "simple/relaxed",
            (Relaxed, Simple) => "relaxed/simple",
            (Relaxed, Relaxed) => "relaxed/relaxed",
        }
    }
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for Canonicalization {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if let Some((header, body)) = s.split_once('/') {
            Self {
                header: header.parse()?,
                body: body.parse()?,
            }
        } else {
            // a single algorithm name leaves the body algorithm at "simple"
            Self {
                header: s.parse()?,
                body: Default::default(),
            }
        })
    }
}

/// An error describing an unusable `DKIM-Signature` header field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DkimSignatureError {
    InvalidTagList,
    MissingRequiredTag(&'static str),
    UnsupportedVersion,
    UnsupportedAlgorithm,
    UnsupportedCanonicalization,
    FromHeaderNotSigned,
    InvalidBodyLength,
    InvalidTimestamp,
    InvalidExpiration,
    InvalidBase64,
    QueryMethodsNotSupported,
}

impl Display for DkimSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTagList => write!(f, "invalid tag-list"),
            Self::MissingRequiredTag(name) => write!(f, "{name}= tag missing"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::InvalidBodyLength => write!(f, "invalid body length"),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::InvalidExpiration => write!(f, "invalid expiration"),
            Self::InvalidBase64 => write!(f, "invalid Base64 string"),
            Self::QueryMethodsNotSupported => write!(f, "query methods not supported"),
        }
    }
}

impl std::error::Error for DkimSignatureError {}

/// A DKIM signature as encoded in a `DKIM-Signature` header field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub canonicalization: Canonicalization,
    pub domain: String,
    pub selector: String,
    /// Signed header names, in signing order; duplicates are meaningful.
    pub signed_headers: Vec<String>,
    pub auid: Option<String>,
    pub body_length: Option<u64>,
    pub query_methods: Vec<String>,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
    pub body_hash: Box<[u8]>,
    pub signature_data: Box<[u8]>,
    /// Copied header fields from the z= tag, for diagnostic use only.
    pub copied_headers: Option<Vec<String>>,
}

impl DkimSignature {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimSignatureError> {
        let mut version = None;
        let mut algorithm = None;
        let mut signature_data = None;
        let mut body_hash = None;
        let mut canonicalization = None;
        let mut domain = None;
        let mut signed_headers = None;
        let mut auid = None;
        let mut body_length = None;
        let mut query_methods = None;
        let mut selector = None;
        let mut timestamp = None;
        let mut expiration = None;
        let mut copied_headers = None;

        // later occurrences of a tag override earlier ones
        for &TagSpec { name, value } in tag_list.as_ref() {
            match name {
                "v" => {
                    version = Some(value);
                }
                "a" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureError::UnsupportedAlgorithm)?;
                    algorithm = Some(value);
                }
                "b" => {
                    let value = parse_base64_value(value)
                        .map_err(|_| DkimSignatureError::InvalidBase64)?;
                    signature_data = Some(value.into());
                }
                "bh" => {
                    let value = parse_base64_value(value)
                        .map_err(|_| DkimSignatureError::InvalidBase64)?;
                    body_hash = Some(value.into());
                }
                "c" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureError::UnsupportedCanonicalization)?;
                    canonicalization = Some(value);
                }
                "d" => {
                    domain = Some(value.to_owned());
                }
                "h" => {
                    let names: Vec<String> = parse_colon_separated(value)
                        .into_iter()
                        .map(str::to_owned)
                        .collect();
                    signed_headers = Some(names);
                }
                "i" => {
                    auid = Some(value.to_owned());
                }
                "l" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureError::InvalidBodyLength)?;
                    body_length = Some(value);
                }
                "q" => {
                    let methods: Vec<String> = parse_colon_separated(value)
                        .into_iter()
                        .map(str::to_owned)
                        .collect();
                    query_methods = Some(methods);
                }
                "s" => {
                    selector = Some(value.to_owned());
                }
                "t" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureError::InvalidTimestamp)?;
                    timestamp = Some(value);
                }
                "x" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureError::InvalidExpiration)?;
                    expiration = Some(value);
                }
                "z" => {
                    let fields: Vec<String> = value
                        .split('|')
                        .map(|s| s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
                        .map(str::to_owned)
                        .collect();
                    copied_headers = Some(fields);
                }
                // unrecognized tags must be ignored
                _ => {}
            }
        }

        // required tags, checked in one place
        let version = version.ok_or(DkimSignatureError::MissingRequiredTag("v"))?;
        if version != "1" {
            return Err(DkimSignatureError::UnsupportedVersion);
        }
        let algorithm = algorithm.ok_or(DkimSignatureError::MissingRequiredTag("a"))?;
        let signature_data = signature_data.ok_or(DkimSignatureError::MissingRequiredTag("b"))?;
        let body_hash = body_hash.ok_or(DkimSignatureError::MissingRequiredTag("bh"))?;
        let domain = domain.ok_or(DkimSignatureError::MissingRequiredTag("d"))?;
        let signed_headers = signed_headers.ok_or(DkimSignatureError::MissingRequiredTag("h"))?;
        let selector = selector.ok_or(DkimSignatureError::MissingRequiredTag("s"))?;

        if !signed_headers.iter().any(|h| h.eq_ignore_ascii_case("from")) {
            return Err(DkimSignatureError::FromHeaderNotSigned);
        }

        let query_methods =
            query_methods.unwrap_or_else(|| vec!["dns/txt".to_owned()]);
        if !query_methods.iter().any(|q| q.eq_ignore_ascii_case("dns/txt")) {
            return Err(DkimSignatureError::QueryMethodsNotSupported);
        }

        Ok(Self {
            algorithm,
            canonicalization: canonicalization.unwrap_or_default(),
            domain,
            selector,
            signed_headers,
            auid,
            body_length,
            query_methods,
            timestamp,
            expiration,
            body_hash,
            signature_data,
            copied_headers,
        })
    }
}

impl FromStr for DkimSignature {
    type Err = DkimSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = TagList::parse(s).map_err(|_| DkimSignatureError::InvalidTagList)?;

        Self::from_tag_list(&tag_list)
    }
}

/// Returns a copy of a raw `DKIM-Signature` header field with the b= tag
/// value removed: the form of the field over which the signature is
/// computed. All other bytes are preserved exactly.
pub fn strip_signature_data(raw: &[u8]) -> Vec<u8> {
    let value_start = raw.iter().position(|&b| b == b':').map_or(0, |i| i + 1);
    let mut result = raw[..value_start].to_vec();

    for (i, segment) in raw[value_start..].split(|&b| b == b';').enumerate() {
        if i > 0 {
            result.push(b';');
        }
        if tag_name(segment) == b"b" {
            match segment.iter().position(|&b| b == b'=') {
                Some(eq) => result.extend_from_slice(&segment[..=eq]),
                None => result.extend_from_slice(segment),
            }
        } else {
            result.extend_from_slice(segment);
        }
    }

    result
}

fn tag_name(segment: &[u8]) -> &[u8] {
    let start = segment
        .iter()
        .position(|&b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .unwrap_or(segment.len());
    let rest = &segment[start..];
    let end = rest
        .iter()
        .position(|&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'='))
        .unwrap_or(rest.len());
    &rest[..end]
}

/// The field values of a `DKIM-Signature` header under construction, before
/// the signature itself exists.
#[derive(Debug)]
pub(crate) struct UnsignedDkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub canonicalization: Canonicalization,
    pub domain: String,
    pub selector: String,
    pub signed_headers: Vec<String>,
    pub auid: Option<String>,
    pub body_length: Option<u64>,
    pub query_methods: Vec<String>,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl UnsignedDkimSignature {
    /// Formats the base header text: every tag except the signature data,
    /// folded at the line-length limit, ending with the b= placeholder.
    ///
    /// Folds are placed only between tags, between h= names, or within the
    /// Base64 bh= value, never inside another token.
    pub(crate) fn format_header_base(&self, body_hash_base64: &str) -> String {
        let mut header = format!(
            "{DKIM_SIGNATURE_NAME}: v=1; a={}; q={}; c={};{CRLF} ",
            self.algorithm,
            self.query_methods.join(":"),
            self.canonicalization,
        );

        let mut line = format!("s={};", self.selector);

        if line.len() + self.domain.len() + 4 > MAX_HEADER_LINE_LENGTH {
            fold(&mut header, &mut line);
        }
        line.push_str(" d=");
        line.push_str(&self.domain);
        line.push(';');

        if let Some(auid) = &self.auid {
            if line.len() + auid.len() + 4 > MAX_HEADER_LINE_LENGTH {
                fold(&mut header, &mut line);
            }
            line.push_str(" i=");
            line.push_str(auid);
            line.push(';');
        }

        if let Some(timestamp) = self.timestamp {
            if line.len() + 14 > MAX_HEADER_LINE_LENGTH {
                fold(&mut header, &mut line);
            }
            line.push_str(&format!(" t={timestamp};"));
        }

        if let Some(expiration) = self.expiration {
            if line.len() + 14 > MAX_HEADER_LINE_LENGTH {
                fold(&mut header, &mut line);
            }
            line.push_str(&format!(" x={expiration};"));
        }

        if let Some(body_length) = self.body_length {
            if line.len() + 14 > MAX_HEADER_LINE_LENGTH {
                fold(&mut header, &mut line);
            }
            line.push_str(&format!(" l={body_length};"));
        }

        if line.len() + 4 > MAX_HEADER_LINE_LENGTH {
            fold(&mut header, &mut line);
        }
        line.push_str(" h=");
        for name in &self.signed_headers {
            if line.len() + name.len() + 1 > MAX_HEADER_LINE_LENGTH {
                fold(&mut header, &mut line);
            }
            line.push_str(name);
            line.push(':');
        }
        line.pop();
        line.push(';');

        if line.len() + 5 + body_hash_base64.len() > MAX_HEADER_LINE_LENGTH {
            fold(&mut header, &mut line);
        } else {
            line.push(' ');
        }
        line.push_str("bh=");
        let mut len = line.len();
        for c in body_hash_base64.chars() {
            line.push(c);
            len += 1;
            if len >= MAX_HEADER_LINE_LENGTH {
                fold(&mut header, &mut line);
                len = 0;
            }
        }

        header.push_str(&line);
        header.push(';');
        header.push_str(FWS);
        header.push_str("b=");
        header
    }
}

fn fold(header: &mut String, line: &mut String) {
    header.push_str(line);
    header.push_str(FWS);
    line.clear();
}

/// Appends the Base64 signature to a base header ending in `b=`, folding at
/// the line-length limit, and terminates the header with a CRLF.
pub(crate) fn append_signature_data(header: &mut String, signature_base64: &str) {
    let mut line = String::new();
    let mut len = 0;

    for c in signature_base64.chars() {
        line.push(c);
        len += 1;
        if len >= MAX_HEADER_LINE_LENGTH {
            header.push_str(&line);
            header.push_str(FWS);
            line.clear();
            len = 0;
        }
    }

    header.push_str(&line);
    header.push_str(CRLF);
}
