//! Tag-list parsing.
//!
//! The semicolon-delimited `tag=value` grammar defined in RFC 6376, section
//! 3.2 is shared by the `DKIM-Signature` header field and the DNS public key
//! record.

use base64ct::{Base64, Encoding};
use std::fmt::{self, Display, Formatter};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TagListParseError;

impl Display for TagListParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ill-formed tag-list")
    }
}

impl std::error::Error for TagListParseError {}

/// A single `name=value` pair of a tag-list.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TagSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// An ordered list of tags, as parsed from a header field or record value.
///
/// Duplicate tag names are retained in order; consumers that iterate the list
/// front to back and assign as they go end up with the last occurrence of a
/// name, which is the behaviour required here.
#[derive(Debug, PartialEq, Eq)]
pub struct TagList<'a>(Vec<TagSpec<'a>>);

impl<'a> AsRef<[TagSpec<'a>]> for TagList<'a> {
    fn as_ref(&self) -> &[TagSpec<'a>] {
        &self.0
    }
}

impl<'a> TagList<'a> {
    pub fn parse(val: &'a str) -> Result<Self, TagListParseError> {
        let (mut s, t) = parse_tag_spec(val).ok_or(TagListParseError)?;

        let mut tags = vec![t];

        while let Some((snext, t)) = s.strip_prefix(';').and_then(parse_tag_spec) {
            s = snext;
            tags.push(t);
        }

        let s = s.strip_prefix(';').unwrap_or(s);

        if !s.chars().all(is_fws_char) {
            return Err(TagListParseError);
        }

        Ok(TagList(tags))
    }
}

fn parse_tag_spec(val: &str) -> Option<(&str, TagSpec<'_>)> {
    let s = strip_fws(val).unwrap_or(val);

    let (s, name) = parse_tag_name(s)?;

    let s = strip_fws(s).unwrap_or(s);

    let s = s.strip_prefix('=')?;

    let s = strip_fws(s).unwrap_or(s);

    let (s, value) = match parse_tag_value(s) {
        Some((s, value)) => {
            let s = strip_fws(s).unwrap_or(s);
            (s, value)
        }
        None => (s, Default::default()),
    };

    Some((s, TagSpec { name, value }))
}

fn parse_tag_name(value: &str) -> Option<(&str, &str)> {
    let s = value
        .strip_prefix(|c: char| c.is_ascii_alphabetic())?
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_');
    Some((s, strip_suffix(value, s)))
}

// Note erratum 5070 in the tag-value ABNF
fn parse_tag_value(value: &str) -> Option<(&str, &str)> {
    fn strip_tval(s: &str) -> Option<&str> {
        s.strip_prefix(is_tval_char)
            .map(|s| s.trim_start_matches(is_tval_char))
    }

    let mut s = strip_tval(value)?;

    while let Some(snext) = strip_fws(s).and_then(strip_tval) {
        s = snext;
    }

    Some((s, strip_suffix(value, s)))
}

fn is_tval_char(c: char) -> bool {
    // printable ASCII w/o ; or non-ASCII UTF-8
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}

fn strip_suffix<'a>(s: &'a str, suffix: &str) -> &'a str {
    debug_assert!(s.ends_with(suffix));
    &s[..(s.len() - suffix.len())]
}

// FWS = ([*WSP CRLF] 1*WSP)

/// Strips one occurrence of folding whitespace.
fn strip_fws(input: &str) -> Option<&str> {
    if let Some(s) = strip_wsp(input) {
        s.strip_prefix("\r\n").and_then(strip_wsp).or(Some(s))
    } else {
        input.strip_prefix("\r\n").and_then(strip_wsp)
    }
}

fn strip_wsp(input: &str) -> Option<&str> {
    input
        .strip_prefix(is_wsp)
        .map(|s| s.trim_start_matches(is_wsp))
}

fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t')
}

fn is_fws_char(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Splits a colon-separated tag value into items, trimming surrounding
/// folding whitespace from each item.
pub fn parse_colon_separated(value: &str) -> Vec<&str> {
    value.split(':').map(|s| s.trim_matches(is_fws_char)).collect()
}

/// Decodes a Base64 tag value.
///
/// Folding whitespace may be inserted at arbitrary places in Base64 tag
/// values and is ignored.
pub fn parse_base64_value(value: &str) -> Result<Vec<u8>, TagListParseError> {
    let value = strip_whitespace(value);
    Base64::decode_vec(&value).map_err(|_| TagListParseError)
}

pub fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|&c| !is_fws_char(c)).collect()
}

/// Decodes a quoted-printable section (RFC 2045 `qp-section`), as used by
/// the key record n= tag. Returns `None` for invalid input.
pub fn parse_qp_section(value: &str) -> Option<Vec<u8>> {
    let bytes = value.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' {
            let hi = char::from(*bytes.get(i + 1)?).to_digit(16)?;
            let lo = char::from(*bytes.get(i + 2)?).to_digit(16)?;
            result.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            result.push(bytes[i]);
            i += 1;
        }
    }

    Some(result)
}
