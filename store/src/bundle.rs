//! Bundle storage trait and model.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::StoreError;
use tangle_types::{Address, Hash};

/// A bundle of transactions, reduced to what confirmation needs.
///
/// Structural and signature validation happen in the storage layer; only
/// their outcome is recorded here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bundle {
    /// The bundle hash shared by all its transactions.
    pub hash: Hash,
    /// Hash of the tail transaction (index 0).
    pub tail: Hash,
    /// Hash of the head transaction (last index).
    pub head: Hash,
    /// Trunk reference of the head transaction.
    pub head_trunk: Hash,
    /// Branch reference of the head transaction.
    pub head_branch: Hash,
    /// Outcome of the structural and signature validation.
    pub valid: bool,
    /// Outcome of the strict semantics check (e.g. no reused spent addresses).
    pub valid_strict_semantics: bool,
    /// Net balance change per address. Empty for zero-value bundles.
    pub ledger_changes: BTreeMap<Address, i64>,
}

impl Bundle {
    /// A bundle that moves no value (every delta is zero) is value spam.
    pub fn is_value_spam(&self) -> bool {
        self.ledger_changes.values().all(|delta| *delta == 0)
    }
}

/// Trait for bundle lookups.
pub trait BundleStore {
    /// Retrieve the bundle whose tail transaction is `tail`.
    fn get_bundle_by_tail(&self, tail: &Hash) -> Result<Option<Arc<Bundle>>, StoreError>;
}
