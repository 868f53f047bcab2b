//! Milestone and snapshot storage trait.

use std::sync::Arc;

use crate::{StoreError, StoredTransaction};
use tangle_types::{Hash, MilestoneIndex};

/// Trait for milestone and snapshot metadata.
pub trait MilestoneStore {
    /// Whether `hash` is a solid entry point of the current snapshot. Solid
    /// entry points are treated as already confirmed history.
    fn is_solid_entry_point(&self, hash: &Hash) -> bool;

    /// Index of the latest known milestone.
    fn latest_milestone_index(&self) -> MilestoneIndex;

    /// Index of the newest milestone whose whole past cone is stored.
    fn solid_milestone_index(&self) -> MilestoneIndex;

    /// Index of the newest milestone whose data was pruned, zero if none.
    fn pruned_milestone_index(&self) -> MilestoneIndex;

    /// Every transaction of the milestone bundle with the given index.
    fn get_milestone_transactions(
        &self,
        index: MilestoneIndex,
    ) -> Result<Option<Vec<Arc<StoredTransaction>>>, StoreError>;

    /// Timestamp (seconds) of the snapshot the node started from.
    fn snapshot_timestamp(&self) -> u64;
}
