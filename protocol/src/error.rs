use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("invalid length {length} for message type {message_type} (max {max})")]
    InvalidMessageLength {
        message_type: u8,
        length: usize,
        max: u16,
    },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("no common protocol version, peer supports up to version {0}")]
    UnsupportedVersion(u16),
}
