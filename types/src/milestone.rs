//! Milestone index type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence number of a coordinator-issued milestone.
///
/// Index `0` is never issued; it stands for "no milestone" in wire messages
/// (e.g. a milestone request for index `0` asks for the latest one).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MilestoneIndex(pub u32);

impl MilestoneIndex {
    pub const ZERO: Self = Self(0);

    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for MilestoneIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl fmt::Display for MilestoneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
