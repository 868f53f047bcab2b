//! Nullable infrastructure for deterministic testing.
//!
//! External collaborators (ledger storage, transaction decoding) are
//! abstracted behind traits. This crate provides test-friendly
//! implementations that:
//! - Return deterministic values
//! - Can be controlled programmatically
//! - Never touch the filesystem or network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod parser;
pub mod store;

pub use parser::NullParser;
pub use store::NullStore;
