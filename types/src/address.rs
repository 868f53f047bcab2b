//! Ledger address type.

use std::fmt;

use crate::params::HASH_LENGTH;
use crate::TangleError;

/// A byte-encoded 49-byte ledger address.
///
/// Addresses are ordered bytewise; the confirmation engine relies on that
/// order to produce identical balance maps on every node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; HASH_LENGTH]);

impl Address {
    pub fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

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
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_order_bytewise() {
        let mut low = [0u8; HASH_LENGTH];
        low[48] = 1;
        let mut high = [0u8; HASH_LENGTH];
        high[0] = 1;
        assert!(Address::new(low) < Address::new(high));
    }
}
