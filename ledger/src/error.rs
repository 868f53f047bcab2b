use tangle_types::Hash;
use thiserror::Error;

/// Fatal errors of a milestone traversal. No partial result is produced.
#[derive(Debug, Error)]
pub enum WhiteFlagError {
    #[error("milestone approved invalid bundle at {tail}: {reason}")]
    MilestoneApprovedInvalidBundle { tail: Hash, reason: String },

    #[error("transaction {0} is missing from storage")]
    MissingTransaction(Hash),

    #[error("bundle with tail {0} is missing from storage")]
    MissingBundle(Hash),

    #[error("storage error: {0}")]
    Storage(#[from] tangle_store::StoreError),
}
