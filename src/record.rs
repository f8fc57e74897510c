//! DKIM public key records.

use crate::{
    crypto::{self, HashAlgorithm, KeyType},
    tag_list::{self, parse_base64_value, parse_colon_separated, TagList, TagSpec},
};
use rsa::RsaPublicKey;
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// A service type advertised in the s= tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceType {
    All,
    Email,
}

/// An error describing an unusable public key record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyRecordError {
    /// Fundamental syntax problems, such as non-UTF-8 record data.
    RecordSyntax,
    /// A v= tag that is not the first tag of the record.
    MisplacedVersionTag,
    /// A version other than `DKIM1`.
    UnsupportedVersion,
    /// A key type other than `rsa`.
    UnsupportedKeyType,
    /// No p= tag: the record carries no key.
    NoKey,
    /// An empty p= tag: the key has been revoked.
    RevokedKey,
    /// A p= tag that does not decode to an RSA public key.
    BadKey,
}

impl Display for KeyRecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordSyntax => write!(f, "ill-formed key record"),
            Self::MisplacedVersionTag => write!(f, "v= tag not initial"),
            Self::UnsupportedVersion => write!(f, "version must be DKIM1"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::NoKey => write!(f, "no key in key record"),
            Self::RevokedKey => write!(f, "key revoked"),
            Self::BadKey => write!(f, "invalid key data"),
        }
    }
}

impl std::error::Error for KeyRecordError {}

/// A validated DKIM public key record, as published in the `_domainkey` DNS
/// TXT record of the signing domain.
///
/// A record is constructed fresh from the TXT answer for every verification;
/// no caching happens at this layer.
#[derive(Clone, Debug, PartialEq)]
pub struct PublicKeyRecord {
    /// Accepted hash algorithms (h= tag; never empty).
    pub hash_algorithms: Vec<HashAlgorithm>,
    pub key_type: KeyType,
    /// Notes for humans (n= tag), quoted-printable decoded.
    pub notes: Option<String>,
    /// The decoded RSA public key from the p= tag.
    pub public_key: RsaPublicKey,
    /// Service types (s= tag; never empty).
    pub service_types: Vec<ServiceType>,
    /// The t=y flag: this domain is testing DKIM.
    pub testing: bool,
    /// The t=s flag: the i= domain must match the d= domain exactly.
    pub strict_identity: bool,
}

impl PublicKeyRecord {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, KeyRecordError> {
        let mut version = None;
        let mut hash_filter = None;
        let mut key_type_tag = None;
        let mut notes_tag = None;
        let mut key_data = None;
        let mut service_filter = None;
        let mut flags = None;

        for (i, &TagSpec { name, value }) in tag_list.as_ref().iter().enumerate() {
            match name {
                "v" => version = Some((i, value)),
                "h" => hash_filter = Some(value),
                "k" => key_type_tag = Some(value),
                "n" => notes_tag = Some(value),
                "p" => key_data = Some(value),
                "s" => service_filter = Some(value),
                "t" => flags = Some(value),
                // other tags must be ignored
                _ => {}
            }
        }

        // the v= tag, if present at all, must lead the record
        if let Some((i, value)) = version {
            if i != 0 {
                return Err(KeyRecordError::MisplacedVersionTag);
            }
            if value != "DKIM1" {
                return Err(KeyRecordError::UnsupportedVersion);
            }
        }

        if let Some(value) = key_type_tag {
            if !value.eq_ignore_ascii_case("rsa") {
                return Err(KeyRecordError::UnsupportedKeyType);
            }
        }

        let public_key = match key_data {
            None => return Err(KeyRecordError::NoKey),
            Some("") => return Err(KeyRecordError::RevokedKey),
            Some(value) => {
                let data = parse_base64_value(value).map_err(|_| KeyRecordError::BadKey)?;
                crypto::read_rsa_public_key(&data).map_err(|_| KeyRecordError::BadKey)?
            }
        };

        // h= and s= refine their defaults; a filter leaving nothing
        // recognized reverts to the default
        let mut hash_algorithms = HashAlgorithm::all();
        if let Some(value) = hash_filter {
            let filtered: Vec<_> = parse_colon_separated(value)
                .into_iter()
                .filter_map(|s| {
                    if s.eq_ignore_ascii_case("sha1") {
                        Some(HashAlgorithm::Sha1)
                    } else if s.eq_ignore_ascii_case("sha256") {
                        Some(HashAlgorithm::Sha256)
                    } else {
                        None
                    }
                })
                .collect();
            if !filtered.is_empty() {
                hash_algorithms = filtered;
            }
        }

        let mut service_types = vec![ServiceType::All];
        if let Some(value) = service_filter {
            let filtered: Vec<_> = parse_colon_separated(value)
                .into_iter()
                .filter_map(|s| {
                    if s == "*" {
                        Some(ServiceType::All)
                    } else if s.eq_ignore_ascii_case("email") {
                        Some(ServiceType::Email)
                    } else {
                        None
                    }
                })
                .collect();
            if !filtered.is_empty() {
                service_types = filtered;
            }
        }

        let mut testing = false;
        let mut strict_identity = false;
        if let Some(value) = flags {
            for flag in parse_colon_separated(value) {
                if flag.eq_ignore_ascii_case("y") {
                    testing = true;
                } else if flag.eq_ignore_ascii_case("s") {
                    strict_identity = true;
                }
            }
        }

        let notes = notes_tag.map(decode_notes).filter(|s| !s.is_empty());

        Ok(Self {
            hash_algorithms,
            key_type: KeyType::Rsa,
            notes,
            public_key,
            service_types,
            testing,
            strict_identity,
        })
    }
}

// Notes are meant for humans; decode quoted-printable, falling back to the
// raw text when the encoding is invalid.
fn decode_notes(value: &str) -> String {
    match tag_list::parse_qp_section(value) {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => value.to_owned(),
    }
}

impl FromStr for PublicKeyRecord {
    type Err = KeyRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // an entirely blank TXT string carries no key, rather than being a
        // syntax error
        if s.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n')) {
            return Err(KeyRecordError::NoKey);
        }

        let tag_list = TagList::parse(s).map_err(|_| KeyRecordError::RecordSyntax)?;

        Self::from_tag_list(&tag_list)
    }
}
