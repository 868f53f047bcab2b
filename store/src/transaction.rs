//! Transaction storage trait.

use std::sync::Arc;

use crate::StoreError;
use tangle_types::{Hash, MilestoneIndex};

/// A transaction as kept by the storage backend, together with the metadata
/// the gossip and confirmation layers consult.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredTransaction {
    pub hash: Hash,
    pub trunk: Hash,
    pub branch: Hash,
    /// Hash of the bundle this transaction belongs to.
    pub bundle: Hash,
    /// Whether this transaction is the tail (index 0) of its bundle.
    pub is_tail: bool,
    /// Attachment timestamp in seconds since the Unix epoch.
    pub timestamp: u64,
    /// Truncated wire representation, as sent to peers.
    pub raw_bytes: Vec<u8>,
    /// Index of the milestone that confirmed this transaction, if any.
    pub confirmed_by: Option<MilestoneIndex>,
}

impl StoredTransaction {
    /// Whether a milestone other than `index` already confirmed this transaction.
    pub fn confirmed_by_other_than(&self, index: MilestoneIndex) -> bool {
        matches!(self.confirmed_by, Some(confirmed) if confirmed != index)
    }
}

/// Trait for transaction lookups.
pub trait TransactionStore {
    /// Retrieve a transaction by hash. `Ok(None)` if it is not stored.
    fn get_transaction(&self, hash: &Hash) -> Result<Option<Arc<StoredTransaction>>, StoreError>;

    /// Check if a transaction exists.
    fn contains_transaction(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.get_transaction(hash)?.is_some())
    }
}
