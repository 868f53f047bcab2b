//! Nullable transaction parser. Derives hashes from payload bytes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use blake2::{Blake2b512, Digest};
use tangle_protocol::{ParseError, ParsedTransaction, TransactionParser};
use tangle_types::{Hash, HASH_LENGTH};

/// A deterministic [`TransactionParser`].
///
/// The hash of a payload is the first 49 bytes of its Blake2b-512 digest.
/// Timestamp and weight magnitude are the same for every payload and can be
/// changed at any time; individual payloads can be marked as invalid.
pub struct NullParser {
    timestamp: AtomicU64,
    weight_magnitude: AtomicU8,
    rejected: Mutex<HashSet<Vec<u8>>>,
}

impl NullParser {
    /// A parser stamping every transaction with the current time and a
    /// weight magnitude of 81 (the maximum).
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            timestamp: AtomicU64::new(now),
            weight_magnitude: AtomicU8::new(81),
            rejected: Mutex::new(HashSet::new()),
        }
    }

    /// The hash this parser assigns to `payload`.
    pub fn hash_of(payload: &[u8]) -> Hash {
        let digest = Blake2b512::digest(payload);
        let mut bytes = [0u8; HASH_LENGTH];
        bytes.copy_from_slice(&digest[..HASH_LENGTH]);
        Hash::new(bytes)
    }

    pub fn set_timestamp(&self, secs: u64) {
        self.timestamp.store(secs, Ordering::SeqCst);
    }

    pub fn set_weight_magnitude(&self, weight: u8) {
        self.weight_magnitude.store(weight, Ordering::SeqCst);
    }

    /// Make every future parse of `payload` fail.
    pub fn reject(&self, payload: &[u8]) {
        self.rejected.lock().unwrap().insert(payload.to_vec());
    }
}

impl Default for NullParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionParser for NullParser {
    fn parse(&self, payload: &[u8]) -> Result<ParsedTransaction, ParseError> {
        if payload.is_empty() {
            return Err(ParseError::InvalidPayload("empty payload".into()));
        }
        if self.rejected.lock().unwrap().contains(payload) {
            return Err(ParseError::InvalidPayload("rejected payload".into()));
        }
        Ok(ParsedTransaction {
            hash: Self::hash_of(payload),
            timestamp: self.timestamp.load(Ordering::SeqCst),
            weight_magnitude: self.weight_magnitude.load(Ordering::SeqCst),
            raw_bytes: payload.to_vec(),
        })
    }
}
