//! Protocol-wide constants.

/// Length in bytes of a byte-encoded transaction hash or address.
pub const HASH_LENGTH: usize = 49;

/// Total number of tokens in existence. No address balance may exceed it.
pub const TOTAL_SUPPLY: u64 = 2_779_530_283_277_761;

/// Length in bytes of a truncated (non-zero prefix) transaction payload.
pub const MIN_TRANSACTION_SIZE: usize = 292;

/// Length in bytes of a full, uncompressed transaction payload.
pub const MAX_TRANSACTION_SIZE: usize = 1604;
