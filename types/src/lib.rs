//! Fundamental types for the Tangle node.
//!
//! This crate defines the types shared across every other crate in the
//! workspace: transaction hashes, ledger addresses, milestone indices and
//! the protocol-wide constants.

pub mod address;
pub mod error;
pub mod hash;
pub mod milestone;
pub mod params;

pub use address::Address;
pub use error::TangleError;
pub use hash::Hash;
pub use milestone::MilestoneIndex;
pub use params::{HASH_LENGTH, TOTAL_SUPPLY};
