//! Message structure: header/body splitting and logical header fields.

use bstr::ByteSlice;
use std::fmt::{self, Display, Formatter};

/// An error describing a structurally invalid message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageFormatError {
    /// The message has no CRLFCRLF header/body separator.
    MissingBodySeparator,
    /// A folded continuation line appears before any header field.
    UnexpectedContinuationLine,
    /// A header field has no colon separating name and value.
    HeaderWithoutColon,
}

impl Display for MessageFormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingBodySeparator => write!(f, "no header/body separator"),
            Self::UnexpectedContinuationLine => {
                write!(f, "continuation line without a preceding header field")
            }
            Self::HeaderWithoutColon => write!(f, "header field without a colon"),
        }
    }
}

impl std::error::Error for MessageFormatError {}

/// Splits a raw message at the first empty line.
///
/// The returned header block keeps its final CRLF; the body starts right
/// after the empty line.
pub fn split_message(message: &[u8]) -> Result<(&[u8], &[u8]), MessageFormatError> {
    match message.find(b"\r\n\r\n") {
        Some(i) => Ok((&message[..i + 2], &message[i + 4..])),
        None => Err(MessageFormatError::MissingBodySeparator),
    }
}

/// One logical header field: the raw bytes of a header line including any
/// folded continuation lines and the final CRLF.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderField<'a> {
    raw: &'a [u8],
}

impl<'a> HeaderField<'a> {
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// The field name: the bytes before the first colon.
    pub fn name(&self) -> &'a [u8] {
        match self.raw.find_byte(b':') {
            Some(i) => &self.raw[..i],
            None => self.raw,
        }
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.as_bytes())
    }
}

/// Parses a header block into logical header fields, folding continuation
/// lines (lines starting with space or tab) onto the preceding field.
pub fn parse_header_block(block: &[u8]) -> Result<Vec<HeaderField<'_>>, MessageFormatError> {
    let mut fields = vec![];
    let mut current: Option<(usize, usize)> = None;

    let mut offset = 0;
    for line in block.lines_with_terminator() {
        let start = offset;
        offset += line.len();

        if matches!(line.first(), Some(b' ' | b'\t')) {
            match current.as_mut() {
                Some((_, end)) => *end = offset,
                None => return Err(MessageFormatError::UnexpectedContinuationLine),
            }
        } else {
            if let Some((s, e)) = current.take() {
                fields.push(HeaderField { raw: &block[s..e] });
            }
            current = Some((start, offset));
        }
    }

    if let Some((s, e)) = current {
        fields.push(HeaderField { raw: &block[s..e] });
    }

    Ok(fields)
}

/// A pool of header fields supporting the bottom-up, consume-once selection
/// used when signing and verifying repeated fields.
///
/// Entries are marked consumed rather than removed, so that selection is an
/// index operation over an unchanging list.
#[derive(Debug)]
pub struct HeaderPool<'a> {
    fields: Vec<HeaderField<'a>>,
    consumed: Vec<bool>,
}

impl<'a> HeaderPool<'a> {
    pub fn new(fields: Vec<HeaderField<'a>>) -> Self {
        let consumed = vec![false; fields.len()];
        Self { fields, consumed }
    }

    /// Takes the bottom-most not-yet-consumed field with the given name.
    pub fn take_last_named(&mut self, name: &str) -> Option<HeaderField<'a>> {
        let mut found = None;
        for (i, field) in self.fields.iter().enumerate() {
            if !self.consumed[i] && field.is_named(name) {
                found = Some(i);
            }
        }
        let i = found?;
        self.consumed[i] = true;
        Some(self.fields[i])
    }
}
