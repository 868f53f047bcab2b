//! Legacy gossip: a transaction followed by the hash of a transaction the
//! sender wants in return.

use tangle_types::{Hash, HASH_LENGTH};

use crate::message::MessageType;
use crate::tlv::build_message;
use crate::ProtocolError;

/// Build a legacy "transaction + request" message.
pub fn build_transaction_and_request(
    transaction: &[u8],
    requested: &Hash,
) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::with_capacity(transaction.len() + HASH_LENGTH);
    body.extend_from_slice(transaction);
    body.extend_from_slice(requested.as_bytes());
    build_message(MessageType::LegacyTransactionAndRequest, &body)
}

/// Split a legacy body into the transaction payload and the requested hash.
pub fn split_transaction_and_request(body: &[u8]) -> Result<(&[u8], Hash), ProtocolError> {
    if body.len() <= HASH_LENGTH {
        return Err(ProtocolError::Malformed(format!(
            "legacy message too short: {} bytes",
            body.len()
        )));
    }
    let (transaction, requested) = body.split_at(body.len() - HASH_LENGTH);
    let requested = Hash::from_slice(requested).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    Ok((transaction, requested))
}
