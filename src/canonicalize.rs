//! Canonicalization of header and body content.

use crate::{
    header::{self, HeaderPool, MessageFormatError},
    signature::{Canonicalization, CanonicalizationAlgorithm},
};
use bstr::ByteSlice;

const CRLF: &[u8] = b"\r\n";

/// Produces the canonical header and body bytes for a message.
///
/// `selected_headers` names the header fields to keep, in signing order; a
/// name with no remaining match in the message contributes a synthetic empty
/// field (nonexistent header fields are null input, not an omission).
pub fn canonicalize<S: AsRef<str>>(
    message: &[u8],
    canonicalization: Canonicalization,
    selected_headers: &[S],
) -> Result<(Vec<u8>, Vec<u8>), MessageFormatError> {
    let (header_block, body) = header::split_message(message)?;
    let fields = header::parse_header_block(header_block)?;
    let mut pool = HeaderPool::new(fields);

    let headers = canonicalize_headers(canonicalization.header, &mut pool, selected_headers)?;
    let body = canonicalize_body(canonicalization.body, body);

    Ok((headers, body))
}

/// Selects and canonicalizes header fields in signing order.
///
/// Each name consumes the bottom-most still-unconsumed match, so that
/// repeated instances of a field are signed bottom-up, each at most once.
pub fn canonicalize_headers<S: AsRef<str>>(
    algorithm: CanonicalizationAlgorithm,
    pool: &mut HeaderPool<'_>,
    selected_headers: &[S],
) -> Result<Vec<u8>, MessageFormatError> {
    let mut result = vec![];

    for name in selected_headers {
        let name = name.as_ref();
        match pool.take_last_named(name) {
            Some(field) => canonicalize_header(&mut result, algorithm, field.raw())?,
            None => {
                let mut synthetic = Vec::with_capacity(name.len() + 3);
                synthetic.extend(name.bytes());
                synthetic.extend_from_slice(b":\r\n");
                canonicalize_header(&mut result, algorithm, &synthetic)?;
            }
        }
    }

    Ok(result)
}

/// Canonicalizes one logical header field into `result`.
///
/// "simple" is a byte-identical passthrough. "relaxed" lowercases the field
/// name, unfolds continuation lines, compresses whitespace runs to a single
/// space, trims around the colon and terminates the field with exactly one
/// CRLF.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    raw: &[u8],
) -> Result<(), MessageFormatError> {
    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend_from_slice(raw);
        }
        CanonicalizationAlgorithm::Relaxed => {
            let colon = raw
                .find_byte(b':')
                .ok_or(MessageFormatError::HeaderWithoutColon)?;

            let name = raw[..colon].trim_with(|c| matches!(c, ' ' | '\t' | '\r' | '\n'));
            result.extend(name.iter().map(u8::to_ascii_lowercase));
            result.push(b':');

            let mut pending_space = false;
            let mut at_start = true;
            for &b in &raw[colon + 1..] {
                match b {
                    // unfold: line terminators vanish
                    b'\r' | b'\n' => {}
                    b' ' | b'\t' => pending_space = true,
                    _ => {
                        if pending_space && !at_start {
                            result.push(b' ');
                        }
                        pending_space = false;
                        at_start = false;
                        result.push(b);
                    }
                }
            }

            result.extend_from_slice(CRLF);
        }
    }

    Ok(())
}

/// Canonicalizes a message body.
///
/// "simple" reduces trailing CRLFs to a single CRLF (an empty body becomes a
/// lone CRLF). "relaxed" additionally compresses whitespace runs within each
/// line to one space, strips trailing whitespace per line and drops trailing
/// empty lines.
pub fn canonicalize_body(algorithm: CanonicalizationAlgorithm, body: &[u8]) -> Vec<u8> {
    // a missing body is processed as a lone CRLF
    let body: &[u8] = if body.is_empty() { CRLF } else { body };

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            let mut result = body.to_vec();
            while result.ends_with(CRLF) {
                result.truncate(result.len() - 2);
            }
            result.extend_from_slice(CRLF);
            result
        }
        CanonicalizationAlgorithm::Relaxed => {
            let mut result = vec![];
            let mut empty_lines = 0usize;

            for line in body.lines_with_terminator() {
                let line = line.trim_end_with(|c| matches!(c, ' ' | '\t' | '\r' | '\n'));

                if line.is_empty() {
                    empty_lines += 1;
                    continue;
                }

                // interior empty lines survive, trailing ones do not
                for _ in 0..empty_lines {
                    result.extend_from_slice(CRLF);
                }
                empty_lines = 0;

                let mut pending_space = false;
                for &b in line {
                    if matches!(b, b' ' | b'\t') {
                        pending_space = true;
                    } else {
                        if pending_space {
                            result.push(b' ');
                        }
                        pending_space = false;
                        result.push(b);
                    }
                }
                result.extend_from_slice(CRLF);
            }

            result
        }
    }
}

// The final header-hash input drops trailing whitespace and line breaks.
pub(crate) fn trim_signing_input(bytes: &mut Vec<u8>) {
    while matches!(bytes.last(), Some(b' ' | b'\r' | b'\n')) {
        bytes.pop();
    }
}
