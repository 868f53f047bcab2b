//! Milestone confirmation.
//!
//! Every milestone references a cone of not yet confirmed history. The
//! White-Flag traversal walks that cone in a fixed order and applies each
//! bundle's balance changes, skipping bundles that would overdraw an address.
//! All honest nodes starting from the same ledger state produce the same
//! ordered list of applied tails and the same balance map.

pub mod error;
pub mod white_flag;

pub use error::WhiteFlagError;
pub use white_flag::{compute_white_flag_mutations, WhiteFlagConfirmation};
