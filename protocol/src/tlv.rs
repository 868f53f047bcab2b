//! Type-length-value message header.
//!
//! `[type id: u8][body length: u16 little-endian][body]`

use crate::message::{definition, MessageDefinition, MessageType};
use crate::ProtocolError;

pub const HEADER_LENGTH: usize = 3;

/// Validate a header against the registry.
///
/// Returns the message definition and the announced body length.
pub fn parse_header(
    header: &[u8; HEADER_LENGTH],
) -> Result<(&'static MessageDefinition, usize), ProtocolError> {
    let id = header[0];
    let def = definition(id).ok_or(ProtocolError::UnknownMessageType(id))?;
    let length = u16::from_le_bytes([header[1], header[2]]) as usize;

    if !def.accepts_length(length) {
        return Err(ProtocolError::InvalidMessageLength {
            message_type: id,
            length,
            max: def.max_bytes_length,
        });
    }

    Ok((def, length))
}

/// Prefix `body` with its TLV header.
pub fn build_message(message_type: MessageType, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let def = message_type.definition();
    if !def.accepts_length(body.len()) {
        return Err(ProtocolError::InvalidMessageLength {
            message_type: message_type.id(),
            length: body.len(),
            max: def.max_bytes_length,
        });
    }

    let mut buf = Vec::with_capacity(HEADER_LENGTH + body.len());
    buf.push(message_type.id());
    buf.extend_from_slice(&(body.len() as u16).to_le_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}
