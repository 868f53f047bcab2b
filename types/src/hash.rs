//! Transaction hash type.

use std::fmt;

use crate::params::HASH_LENGTH;
use crate::TangleError;

/// A byte-encoded 49-byte transaction hash.
///
/// The all-zero hash ([`Hash::NULL`]) identifies the genesis transaction,
/// which every node keeps around as the root of the Tangle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_LENGTH]);

impl Hash {
    pub const NULL: Self = Self([0u8; HASH_LENGTH]);

    pub fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Build a hash from a slice that must be exactly [`HASH_LENGTH`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TangleError> {
        let array: [u8; HASH_LENGTH] =
            bytes.try_into().map_err(|_| TangleError::InvalidLength {
                expected: HASH_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    pub fn from_hex(s: &str) -> Result<Self, TangleError> {
        let bytes = hex::decode(s).map_err(|e| TangleError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::NULL
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
