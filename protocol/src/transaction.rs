//! Transaction payload parsing seam.
//!
//! Decompressing, hashing and proof-of-work evaluation of transaction
//! payloads live outside the gossip layer. The processor only needs the
//! outcome, which a [`TransactionParser`] provides.

use tangle_types::Hash;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid transaction payload: {0}")]
    InvalidPayload(String),
}

/// The parts of a decoded transaction the gossip layer acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedTransaction {
    pub hash: Hash,
    /// Attachment timestamp in seconds since the Unix epoch.
    pub timestamp: u64,
    /// Number of trailing zero trits of the hash, i.e. the work done.
    pub weight_magnitude: u8,
    /// The payload as received.
    pub raw_bytes: Vec<u8>,
}

pub trait TransactionParser: Send + Sync {
    fn parse(&self, payload: &[u8]) -> Result<ParsedTransaction, ParseError>;
}
