//! Abstract storage traits for the Tangle node.
//!
//! The gossip and confirmation layers never own ledger data; they look it up
//! through these traits. Every backend (persistent, or in-memory for testing)
//! implements them, and the rest of the codebase depends only on the traits.
//!
//! Lookups hand out `Arc` handles. A handle stays valid for as long as the
//! caller holds it and is released when it goes out of scope.

pub mod bundle;
pub mod error;
pub mod ledger;
pub mod milestone;
pub mod transaction;

pub use bundle::{Bundle, BundleStore};
pub use error::StoreError;
pub use ledger::LedgerStore;
pub use milestone::MilestoneStore;
pub use transaction::{StoredTransaction, TransactionStore};

/// Everything the node needs from its storage backend.
pub trait TangleStore:
    TransactionStore + BundleStore + LedgerStore + MilestoneStore + Send + Sync
{
}

impl<T> TangleStore for T where
    T: TransactionStore + BundleStore + LedgerStore + MilestoneStore + Send + Sync
{
}
