//! Protocol versions and feature-set negotiation.
//!
//! A feature set is a little-endian bitmask: bit `j` of byte `i` denotes
//! protocol version `8 * i + j + 1`.

use crate::ProtocolError;

/// Version 1: the legacy "transaction + request" gossip.
pub const LEGACY_GOSSIP_VERSION: u16 = 1;

/// Version 2: STING, with separate transaction, request and heartbeat messages.
pub const STING_VERSION: u16 = 2;

/// Feature set advertised by this node: legacy gossip and STING.
pub const SUPPORTED_FEATURE_SET: &[u8] = &[0b0000_0011];

/// Maximum number of bytes a feature set may occupy on the wire.
pub const MAX_FEATURE_SET_LENGTH: usize = 32;

/// Highest protocol version present in both feature sets.
///
/// Fails with the highest version the peer advertises when the sets don't
/// overlap.
pub fn negotiate_version(own: &[u8], theirs: &[u8]) -> Result<u16, ProtocolError> {
    let mut highest_common = None;
    let mut highest_theirs = 0;

    for (i, byte) in theirs.iter().enumerate() {
        for bit in 0..8u16 {
            let mask = 1u8 << bit;
            if byte & mask == 0 {
                continue;
            }
            let version = i as u16 * 8 + bit + 1;
            highest_theirs = version;
            if own.get(i).is_some_and(|own_byte| own_byte & mask != 0) {
                highest_common = Some(version);
            }
        }
    }

    highest_common.ok_or(ProtocolError::UnsupportedVersion(highest_theirs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_versions_negotiate_sting() {
        assert_eq!(negotiate_version(SUPPORTED_FEATURE_SET, &[0b11]), Ok(STING_VERSION));
    }

    #[test]
    fn legacy_only_peer_negotiates_legacy() {
        assert_eq!(
            negotiate_version(SUPPORTED_FEATURE_SET, &[0b01]),
            Ok(LEGACY_GOSSIP_VERSION)
        );
    }

    #[test]
    fn newer_peer_falls_back_to_common_version() {
        // Peer supports versions 2 and 9.
        assert_eq!(
            negotiate_version(SUPPORTED_FEATURE_SET, &[0b10, 0b01]),
            Ok(STING_VERSION)
        );
    }

    #[test]
    fn disjoint_sets_report_peer_highest() {
        // Peer supports only versions 3 and 10.
        assert_eq!(
            negotiate_version(SUPPORTED_FEATURE_SET, &[0b100, 0b10]),
            Err(ProtocolError::UnsupportedVersion(10))
        );
    }

    #[test]
    fn empty_peer_set_is_unsupported() {
        assert_eq!(
            negotiate_version(SUPPORTED_FEATURE_SET, &[0]),
            Err(ProtocolError::UnsupportedVersion(0))
        );
    }
}
