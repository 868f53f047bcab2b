//! STING messages: transaction, transaction request, milestone request and
//! heartbeat.

use tangle_types::{Hash, MilestoneIndex};

use crate::message::{MessageType, HEARTBEAT_LENGTH, MILESTONE_REQUEST_LENGTH};
use crate::tlv::build_message;
use crate::ProtocolError;

pub fn build_transaction(transaction: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    build_message(MessageType::Transaction, transaction)
}

pub fn build_transaction_request(hash: &Hash) -> Result<Vec<u8>, ProtocolError> {
    build_message(MessageType::TransactionRequest, hash.as_bytes())
}

pub fn parse_transaction_request(body: &[u8]) -> Result<Hash, ProtocolError> {
    Hash::from_slice(body).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Request the milestone with `index`; [`MilestoneIndex::ZERO`] asks for the latest.
pub fn build_milestone_request(index: MilestoneIndex) -> Result<Vec<u8>, ProtocolError> {
    build_message(MessageType::MilestoneRequest, &index.as_u32().to_be_bytes())
}

pub fn parse_milestone_request(body: &[u8]) -> Result<MilestoneIndex, ProtocolError> {
    let bytes: [u8; MILESTONE_REQUEST_LENGTH as usize] = body
        .try_into()
        .map_err(|_| ProtocolError::Malformed(format!("milestone request of {} bytes", body.len())))?;
    Ok(MilestoneIndex(u32::from_be_bytes(bytes)))
}

/// Periodic status a STING peer announces about itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Heartbeat {
    pub solid_milestone_index: MilestoneIndex,
    pub pruned_milestone_index: MilestoneIndex,
    pub latest_milestone_index: MilestoneIndex,
    pub connected_neighbors: u8,
    pub synced_neighbors: u8,
}

impl Heartbeat {
    pub fn to_message(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut body = Vec::with_capacity(HEARTBEAT_LENGTH as usize);
        body.extend_from_slice(&self.solid_milestone_index.as_u32().to_be_bytes());
        body.extend_from_slice(&self.pruned_milestone_index.as_u32().to_be_bytes());
        body.extend_from_slice(&self.latest_milestone_index.as_u32().to_be_bytes());
        body.push(self.connected_neighbors);
        body.push(self.synced_neighbors);
        build_message(MessageType::Heartbeat, &body)
    }

    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() != HEARTBEAT_LENGTH as usize {
            return Err(ProtocolError::Malformed(format!(
                "heartbeat of {} bytes",
                body.len()
            )));
        }
        let index_at = |offset: usize| {
            MilestoneIndex(u32::from_be_bytes([
                body[offset],
                body[offset + 1],
                body[offset + 2],
                body[offset + 3],
            ]))
        };
        Ok(Self {
            solid_milestone_index: index_at(0),
            pruned_milestone_index: index_at(4),
            latest_milestone_index: index_at(8),
            connected_neighbors: body[12],
            synced_neighbors: body[13],
        })
    }
}
