//! Ledger state storage trait.

use crate::StoreError;
use tangle_types::Address;

/// Trait for committed address balances.
pub trait LedgerStore {
    /// Balance of `address` as of the last committed milestone. Unknown
    /// addresses have a balance of zero.
    fn get_balance(&self, address: &Address) -> Result<u64, StoreError>;
}
