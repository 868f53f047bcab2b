//! Message types and the static message registry.

use tangle_types::params::MAX_TRANSACTION_SIZE;
use tangle_types::HASH_LENGTH;

/// Maximum handshake body: port (2) + timestamp (8) + coordinator (49) +
/// MWM (1) + feature set (up to 32).
pub const HANDSHAKE_MAX_LENGTH: u16 = 92;

/// Legacy transaction + request: a full transaction followed by a hash.
pub const LEGACY_TRANSACTION_AND_REQUEST_MAX_LENGTH: u16 =
    (MAX_TRANSACTION_SIZE + HASH_LENGTH) as u16;

/// A milestone request carries one big-endian `u32` index.
pub const MILESTONE_REQUEST_LENGTH: u16 = 4;

pub const TRANSACTION_MAX_LENGTH: u16 = MAX_TRANSACTION_SIZE as u16;

pub const TRANSACTION_REQUEST_LENGTH: u16 = HASH_LENGTH as u16;

/// Three milestone indices (`u32`) plus connected and synced neighbor counts.
pub const HEARTBEAT_LENGTH: u16 = 4 + 4 + 4 + 1 + 1;

/// Every message type this node understands, by wire id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 1,
    LegacyTransactionAndRequest = 2,
    MilestoneRequest = 3,
    Transaction = 4,
    TransactionRequest = 5,
    Heartbeat = 6,
}

impl MessageType {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        definition(id).map(|d| d.message_type)
    }

    pub fn definition(self) -> &'static MessageDefinition {
        &DEFINITIONS[self as usize - 1]
    }
}

/// Length constraints of a registered message type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageDefinition {
    pub message_type: MessageType,
    /// Exact length for fixed-size messages, upper bound otherwise.
    pub max_bytes_length: u16,
    pub variable_length: bool,
}

impl MessageDefinition {
    /// Whether a body of `length` bytes is acceptable for this type.
    pub fn accepts_length(&self, length: usize) -> bool {
        let max = self.max_bytes_length as usize;
        if self.variable_length {
            length <= max
        } else {
            length == max
        }
    }
}

static DEFINITIONS: [MessageDefinition; 6] = [
    MessageDefinition {
        message_type: MessageType::Handshake,
        max_bytes_length: HANDSHAKE_MAX_LENGTH,
        variable_length: true,
    },
    MessageDefinition {
        message_type: MessageType::LegacyTransactionAndRequest,
        max_bytes_length: LEGACY_TRANSACTION_AND_REQUEST_MAX_LENGTH,
        variable_length: true,
    },
    MessageDefinition {
        message_type: MessageType::MilestoneRequest,
        max_bytes_length: MILESTONE_REQUEST_LENGTH,
        variable_length: false,
    },
    MessageDefinition {
        message_type: MessageType::Transaction,
        max_bytes_length: TRANSACTION_MAX_LENGTH,
        variable_length: true,
    },
    MessageDefinition {
        message_type: MessageType::TransactionRequest,
        max_bytes_length: TRANSACTION_REQUEST_LENGTH,
        variable_length: false,
    },
    MessageDefinition {
        message_type: MessageType::Heartbeat,
        max_bytes_length: HEARTBEAT_LENGTH,
        variable_length: false,
    },
];

/// Look up the definition registered for a wire type id.
pub fn definition(id: u8) -> Option<&'static MessageDefinition> {
    match id {
        1..=6 => Some(&DEFINITIONS[id as usize - 1]),
        _ => None,
    }
}

/// A complete, length-validated message as produced by the framer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_ids_match_types() {
        for id in 1..=6u8 {
            let def = definition(id).unwrap();
            assert_eq!(def.message_type.id(), id);
            assert_eq!(def.message_type.definition(), def);
        }
    }

    #[test]
    fn unknown_ids_have_no_definition() {
        assert!(definition(0).is_none());
        assert!(definition(7).is_none());
        assert!(definition(255).is_none());
        assert_eq!(MessageType::from_id(42), None);
    }

    #[test]
    fn registered_lengths() {
        assert_eq!(MessageType::Handshake.definition().max_bytes_length, 92);
        assert_eq!(
            MessageType::LegacyTransactionAndRequest.definition().max_bytes_length,
            1653
        );
        assert_eq!(MessageType::Transaction.definition().max_bytes_length, 1604);
        assert_eq!(MessageType::TransactionRequest.definition().max_bytes_length, 49);
        assert_eq!(MessageType::MilestoneRequest.definition().max_bytes_length, 4);
        assert_eq!(MessageType::Heartbeat.definition().max_bytes_length, 14);
    }

    #[test]
    fn fixed_length_requires_exact_match() {
        let def = MessageType::TransactionRequest.definition();
        assert!(def.accepts_length(49));
        assert!(!def.accepts_length(48));
        assert!(!def.accepts_length(50));
    }

    #[test]
    fn variable_length_accepts_up_to_max() {
        let def = MessageType::Transaction.definition();
        assert!(def.accepts_length(0));
        assert!(def.accepts_length(292));
        assert!(def.accepts_length(1604));
        assert!(!def.accepts_length(1605));
    }
}
