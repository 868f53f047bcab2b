//! Nullable store: thread-safe in-memory Tangle storage for testing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tangle_store::{
    Bundle, BundleStore, LedgerStore, MilestoneStore, StoreError, StoredTransaction,
    TransactionStore,
};
use tangle_types::{Address, Hash, MilestoneIndex};

/// An in-memory transaction, bundle, balance and milestone store.
/// Thread-safe for use with tokio's multi-threaded runtime.
pub struct NullStore {
    transactions: Mutex<HashMap<Hash, Arc<StoredTransaction>>>,
    bundles: Mutex<HashMap<Hash, Arc<Bundle>>>,
    balances: Mutex<HashMap<Address, u64>>,
    solid_entry_points: Mutex<HashSet<Hash>>,
    milestones: Mutex<BTreeMap<MilestoneIndex, Vec<Hash>>>,
    latest_milestone: AtomicU32,
    solid_milestone: AtomicU32,
    pruned_milestone: AtomicU32,
    snapshot_timestamp: AtomicU64,
}

impl NullStore {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
            bundles: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            solid_entry_points: Mutex::new(HashSet::new()),
            milestones: Mutex::new(BTreeMap::new()),
            latest_milestone: AtomicU32::new(0),
            solid_milestone: AtomicU32::new(0),
            pruned_milestone: AtomicU32::new(0),
            snapshot_timestamp: AtomicU64::new(0),
        }
    }

    /// A store that already holds the genesis transaction under [`Hash::NULL`].
    pub fn with_genesis() -> Self {
        let store = Self::new();
        store.insert_transaction(StoredTransaction {
            hash: Hash::NULL,
            trunk: Hash::NULL,
            branch: Hash::NULL,
            bundle: Hash::NULL,
            is_tail: true,
            timestamp: 0,
            raw_bytes: vec![0u8; tangle_types::params::MIN_TRANSACTION_SIZE],
            confirmed_by: None,
        });
        store
    }

    pub fn insert_transaction(&self, tx: StoredTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.hash, Arc::new(tx));
    }

    pub fn remove_transaction(&self, hash: &Hash) {
        self.transactions.lock().unwrap().remove(hash);
    }

    /// Register a bundle under its tail hash.
    pub fn insert_bundle(&self, bundle: Bundle) {
        self.bundles
            .lock()
            .unwrap()
            .insert(bundle.tail, Arc::new(bundle));
    }

    pub fn set_balance(&self, address: Address, balance: u64) {
        self.balances.lock().unwrap().insert(address, balance);
    }

    pub fn add_solid_entry_point(&self, hash: Hash) {
        self.solid_entry_points.lock().unwrap().insert(hash);
    }

    /// Record the transactions of milestone `index` and bump the latest index.
    pub fn add_milestone(&self, index: MilestoneIndex, transactions: Vec<Hash>) {
        self.milestones.lock().unwrap().insert(index, transactions);
        self.latest_milestone
            .fetch_max(index.as_u32(), Ordering::SeqCst);
    }

    pub fn set_solid_milestone_index(&self, index: MilestoneIndex) {
        self.solid_milestone.store(index.as_u32(), Ordering::SeqCst);
    }

    pub fn set_pruned_milestone_index(&self, index: MilestoneIndex) {
        self.pruned_milestone.store(index.as_u32(), Ordering::SeqCst);
    }

    pub fn set_snapshot_timestamp(&self, secs: u64) {
        self.snapshot_timestamp.store(secs, Ordering::SeqCst);
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionStore for NullStore {
    fn get_transaction(&self, hash: &Hash) -> Result<Option<Arc<StoredTransaction>>, StoreError> {
        Ok(self.transactions.lock().unwrap().get(hash).cloned())
    }
}

impl BundleStore for NullStore {
    fn get_bundle_by_tail(&self, tail: &Hash) -> Result<Option<Arc<Bundle>>, StoreError> {
        Ok(self.bundles.lock().unwrap().get(tail).cloned())
    }
}

impl LedgerStore for NullStore {
    fn get_balance(&self, address: &Address) -> Result<u64, StoreError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0))
    }
}

impl MilestoneStore for NullStore {
    fn is_solid_entry_point(&self, hash: &Hash) -> bool {
        self.solid_entry_points.lock().unwrap().contains(hash)
    }

    fn latest_milestone_index(&self) -> MilestoneIndex {
        MilestoneIndex(self.latest_milestone.load(Ordering::SeqCst))
    }

    fn solid_milestone_index(&self) -> MilestoneIndex {
        MilestoneIndex(self.solid_milestone.load(Ordering::SeqCst))
    }

    fn pruned_milestone_index(&self) -> MilestoneIndex {
        MilestoneIndex(self.pruned_milestone.load(Ordering::SeqCst))
    }

    fn get_milestone_transactions(
        &self,
        index: MilestoneIndex,
    ) -> Result<Option<Vec<Arc<StoredTransaction>>>, StoreError> {
        let hashes = match self.milestones.lock().unwrap().get(&index) {
            Some(hashes) => hashes.clone(),
            None => return Ok(None),
        };
        let transactions = self.transactions.lock().unwrap();
        hashes
            .iter()
            .map(|hash| {
                transactions
                    .get(hash)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(hash.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn snapshot_timestamp(&self) -> u64 {
        self.snapshot_timestamp.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tangle_types::HASH_LENGTH;

    #[test]
    fn genesis_is_present() {
        let store = NullStore::with_genesis();
        assert!(store.contains_transaction(&Hash::NULL).unwrap());
        assert_eq!(store.transaction_count(), 1);
    }

    #[test]
    fn unknown_address_has_zero_balance() {
        let store = NullStore::new();
        assert_eq!(store.get_balance(&Address::new([1u8; HASH_LENGTH])).unwrap(), 0);
    }

    #[test]
    fn milestone_lookup_returns_transactions() {
        let store = NullStore::with_genesis();
        store.add_milestone(MilestoneIndex(3), vec![Hash::NULL]);
        let txs = store
            .get_milestone_transactions(MilestoneIndex(3))
            .unwrap()
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(store.latest_milestone_index(), MilestoneIndex(3));
        assert!(store
            .get_milestone_transactions(MilestoneIndex(4))
            .unwrap()
            .is_none());
    }
}
