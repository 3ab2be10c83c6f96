//! Entity identifiers and the generator that mints them.
//!
//! Identifiers are 32 lowercase hex characters: a 48-bit big-endian
//! millisecond timestamp followed by 80 random bits. Comparing two ids as
//! strings orders them by creation time.

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Typed identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// Identifier of a [`KeyType`](crate::KeyType).
    KeyTypeId
}

string_id! {
    /// Identifier of a [`CryptoKey`](crate::CryptoKey).
    CryptoKeyId
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Source of unique, sortable identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

const TIMESTAMP_BYTES: usize = 6;
const RANDOM_BYTES: usize = 10;

/// Timestamp-prefixed random ids, strictly increasing within one process.
///
/// When two ids are requested within the same millisecond the random tail
/// of the previous id is incremented instead of drawing a fresh one.
pub struct SortableIdGenerator {
    last: Mutex<Option<(u64, [u8; RANDOM_BYTES])>>,
}

impl SortableIdGenerator {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    fn encode(millis: u64, tail: &[u8; RANDOM_BYTES]) -> String {
        let mut bytes = [0u8; TIMESTAMP_BYTES + RANDOM_BYTES];
        bytes[..TIMESTAMP_BYTES].copy_from_slice(&millis.to_be_bytes()[8 - TIMESTAMP_BYTES..]);
        bytes[TIMESTAMP_BYTES..].copy_from_slice(tail);
        hex::encode(bytes)
    }
}

impl Default for SortableIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SortableIdGenerator {
    fn next_id(&self) -> String {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last.lock();

        let (millis, tail) = match *last {
            Some((prev_millis, mut prev_tail)) if now <= prev_millis => {
                if increment(&mut prev_tail) {
                    (prev_millis, prev_tail)
                } else {
                    // Tail overflowed: borrow the next millisecond.
                    let mut fresh = [0u8; RANDOM_BYTES];
                    OsRng.fill_bytes(&mut fresh);
                    (prev_millis + 1, fresh)
                }
            }
            _ => {
                let mut fresh = [0u8; RANDOM_BYTES];
                OsRng.fill_bytes(&mut fresh);
                (now, fresh)
            }
        };

        *last = Some((millis, tail));
        Self::encode(millis, &tail)
    }
}

/// Big-endian increment. Returns false on overflow.
fn increment(bytes: &mut [u8]) -> bool {
    for byte in bytes.iter_mut().rev() {
        if *byte == u8::MAX {
            *byte = 0;
        } else {
            *byte += 1;
            return true;
        }
    }
    false
}

/// Deterministic ids (`<prefix>-000001`, ...) for tests and fixtures.
pub struct SequentialIdGenerator {
    prefix: String,
    counter: Mutex<u64>,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Mutex::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        let mut counter = self.counter.lock();
        *counter += 1;
        format!("{}-{:06}", self.prefix, *counter)
    }
}
