//! Handshake message codec.
//!
//! Body layout, integers big-endian:
//!
//! | field              | bytes  |
//! |--------------------|--------|
//! | server socket port | 2      |
//! | sent timestamp, ms | 8      |
//! | coordinator        | 49     |
//! | MWM                | 1      |
//! | feature set        | 1..=32 |

use std::time::{SystemTime, UNIX_EPOCH};

use tangle_types::{Address, HASH_LENGTH};

use crate::message::MessageType;
use crate::tlv::build_message;
use crate::version::{negotiate_version, MAX_FEATURE_SET_LENGTH, SUPPORTED_FEATURE_SET};
use crate::ProtocolError;

const PORT_OFFSET: usize = 0;
const TIMESTAMP_OFFSET: usize = PORT_OFFSET + 2;
const COORDINATOR_OFFSET: usize = TIMESTAMP_OFFSET + 8;
const MWM_OFFSET: usize = COORDINATOR_OFFSET + HASH_LENGTH;
const FEATURE_SET_OFFSET: usize = MWM_OFFSET + 1;

/// Smallest valid handshake body: a one-byte feature set.
pub const HANDSHAKE_MIN_LENGTH: usize = FEATURE_SET_OFFSET + 1;

/// The first message on every connection, sent by both sides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handshake {
    /// Port the sender accepts gossip connections on.
    pub server_port: u16,
    /// Milliseconds since the Unix epoch when the handshake was built.
    pub sent_timestamp_ms: u64,
    pub coordinator: Address,
    /// Minimum weight magnitude the sender enforces.
    pub mwm: u8,
    pub feature_set: Vec<u8>,
}

impl Handshake {
    /// Our own handshake, advertising [`SUPPORTED_FEATURE_SET`].
    pub fn new(server_port: u16, coordinator: Address, mwm: u8) -> Self {
        let sent_timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            server_port,
            sent_timestamp_ms,
            coordinator,
            mwm,
            feature_set: SUPPORTED_FEATURE_SET.to_vec(),
        }
    }

    /// Encode the handshake body (without TLV header).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FEATURE_SET_OFFSET + self.feature_set.len());
        buf.extend_from_slice(&self.server_port.to_be_bytes());
        buf.extend_from_slice(&self.sent_timestamp_ms.to_be_bytes());
        buf.extend_from_slice(self.coordinator.as_bytes());
        buf.push(self.mwm);
        buf.extend_from_slice(&self.feature_set);
        buf
    }

    /// Encode the full wire message.
    pub fn to_message(&self) -> Result<Vec<u8>, ProtocolError> {
        build_message(MessageType::Handshake, &self.to_bytes())
    }

    /// Decode a handshake body as delivered by the framer.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() < HANDSHAKE_MIN_LENGTH {
            return Err(ProtocolError::Malformed(format!(
                "handshake too short: {} bytes",
                body.len()
            )));
        }
        let feature_set = &body[FEATURE_SET_OFFSET..];
        if feature_set.len() > MAX_FEATURE_SET_LENGTH {
            return Err(ProtocolError::Malformed(format!(
                "feature set too long: {} bytes",
                feature_set.len()
            )));
        }

        let server_port = u16::from_be_bytes([body[PORT_OFFSET], body[PORT_OFFSET + 1]]);
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&body[TIMESTAMP_OFFSET..COORDINATOR_OFFSET]);
        let coordinator = Address::from_slice(&body[COORDINATOR_OFFSET..MWM_OFFSET])
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        Ok(Self {
            server_port,
            sent_timestamp_ms: u64::from_be_bytes(timestamp),
            coordinator,
            mwm: body[MWM_OFFSET],
            feature_set: feature_set.to_vec(),
        })
    }

    /// Highest protocol version both we and the sender support.
    pub fn negotiate_version(&self) -> Result<u16, ProtocolError> {
        negotiate_version(SUPPORTED_FEATURE_SET, &self.feature_set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Framer;

    fn coordinator() -> Address {
        Address::new([0x5a; HASH_LENGTH])
    }

    #[test]
    fn encode_then_frame_then_parse() {
        let ours = Handshake::new(15600, coordinator(), 14);
        let wire = ours.to_message().unwrap();

        let mut framer = Framer::new();
        let messages = framer.feed(&wire).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, MessageType::Handshake);

        let parsed = Handshake::parse(&messages[0].body).unwrap();
        assert_eq!(parsed, ours);
    }

    #[test]
    fn port_is_big_endian() {
        let bytes = Handshake::new(0x3cf0, coordinator(), 14).to_bytes();
        assert_eq!(&bytes[..2], &[0x3c, 0xf0]);
        assert_eq!(bytes.len(), HANDSHAKE_MIN_LENGTH);
    }

    #[test]
    fn rejects_short_body() {
        assert!(matches!(
            Handshake::parse(&[0u8; HANDSHAKE_MIN_LENGTH - 1]),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_oversized_feature_set() {
        let mut body = Handshake::new(1, coordinator(), 14).to_bytes();
        body.truncate(FEATURE_SET_OFFSET);
        body.extend_from_slice(&[0u8; 33]);
        assert!(Handshake::parse(&body).is_err());
    }

    #[test]
    fn negotiates_with_own_feature_set() {
        let handshake = Handshake::new(1, coordinator(), 14);
        assert_eq!(handshake.negotiate_version(), Ok(crate::STING_VERSION));
    }
}
