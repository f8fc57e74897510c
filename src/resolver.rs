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

//! Public key retrieval through an injected DNS TXT lookup.

use crate::record::{KeyRecordError, PublicKeyRecord};
use std::{
    fmt::{self, Display, Formatter},
    future::Future,
    io::{self, ErrorKind},
};
use tracing::trace;

/// A trait for looking up DNS TXT records containing DKIM public key
/// records.
///
/// The error type used here is `std::io::Error`. `ErrorKind::NotFound` on
/// the query is understood as "no such record", a permanent condition; every
/// other error is a transient resolution failure that a caller may retry.
///
/// Implementations are free to resolve blocking or asynchronously, and are
/// responsible for any timeout policy of their own; a reported timeout is
/// treated as transient.
pub trait LookupTxt: Send + Sync {
    /// The answer consisting of the TXT records found.
    type Answer: IntoIterator<Item = io::Result<Vec<u8>>>;
    /// The future resolving to the query's answer.
    type Query<'a>: Future<Output = io::Result<Self::Answer>> + Send + 'a
    where
        Self: 'a;

    /// Looks up the domain's TXT records in DNS.
    fn lookup_txt(&self, domain: &str) -> Self::Query<'_>;
}

/// A failed key record retrieval.
#[derive(Debug, Eq, PartialEq)]
pub enum KeyLookupError {
    /// The record name does not exist (permanent).
    NoRecord,
    /// The lookup failed for a transient reason and may be retried.
    Unavailable,
    /// The name resolved, but the answer contains no TXT strings.
    EmptyAnswer,
    /// The TXT record does not parse or validate as a key record.
    InvalidRecord(KeyRecordError),
}

impl Display for KeyLookupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRecord => write!(f, "no key record for signature"),
            Self::Unavailable => write!(f, "key record unavailable"),
            Self::EmptyAnswer => write!(f, "empty key record answer"),
            Self::InvalidRecord(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for KeyLookupError {}

/// Fetches and validates the public key record for a selector/domain pair.
///
/// The record is looked up at `<selector>._domainkey.<domain>`. When the
/// name resolves to more than one TXT string, only the first one is
/// consulted; multi-string answers are a known limitation of this
/// implementation.
pub async fn look_up_key_record<T: LookupTxt>(
    resolver: &T,
    selector: &str,
    domain: &str,
) -> Result<PublicKeyRecord, KeyLookupError> {
    let name = format!("{selector}._domainkey.{domain}");

    trace!(%name, "looking up key record");

    let answer = resolver.lookup_txt(&name).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            KeyLookupError::NoRecord
        } else {
            KeyLookupError::Unavailable
        }
    })?;

    let txt = match answer.into_iter().next() {
        Some(Ok(txt)) => txt,
        Some(Err(_)) => return Err(KeyLookupError::Unavailable),
        None => return Err(KeyLookupError::EmptyAnswer),
    };

    let txt = String::from_utf8(txt)
        .map_err(|_| KeyLookupError::InvalidRecord(KeyRecordError::RecordSyntax))?;

    txt.parse().map_err(KeyLookupError::InvalidRecord)
}
