//! Requests and status announcements sent to STING neighbors.
//!
//! Legacy neighbors get our requests piggy-backed on the transactions we
//! send them. STING neighbors get explicit transaction requests instead,
//! but only for milestones their latest heartbeat says they still hold.

use std::sync::Arc;
use std::time::Duration;

use tangle_protocol::{sting, Heartbeat};
use tangle_store::TangleStore;
use tangle_types::MilestoneIndex;
use tokio_util::sync::CancellationToken;

use crate::peer::Peer;
use crate::peer_manager::PeeringManager;
use crate::request_queue::{Request, RequestQueue};

/// Requests sent to one peer per pass of [`run_requester`].
pub const MAX_REQUESTS_PER_PEER: usize = 64;

/// Our status as announced in heartbeats.
pub fn own_heartbeat(store: &dyn TangleStore, peering: &PeeringManager) -> Heartbeat {
    let latest = store.latest_milestone_index();
    let peers = peering.connected_peers();
    let synced = peers
        .iter()
        .filter(|p| {
            p.latest_heartbeat()
                .is_some_and(|hb| hb.solid_milestone_index >= latest)
        })
        .count();
    Heartbeat {
        solid_milestone_index: store.solid_milestone_index(),
        pruned_milestone_index: store.pruned_milestone_index(),
        latest_milestone_index: latest,
        connected_neighbors: saturating_u8(peers.len()),
        synced_neighbors: saturating_u8(synced),
    }
}

fn saturating_u8(count: usize) -> u8 {
    u8::try_from(count).unwrap_or(u8::MAX)
}

/// Queue `heartbeat` for a STING peer. Legacy peers do not understand
/// heartbeats and are skipped.
pub fn send_heartbeat(peer: &Peer, heartbeat: &Heartbeat) -> bool {
    if !peer.supports_sting() {
        return false;
    }
    match heartbeat.to_message() {
        Ok(message) => peer.enqueue_for_sending(message),
        Err(e) => {
            tracing::warn!(peer = %peer.id(), error = %e, "cannot build heartbeat");
            false
        }
    }
}

/// Announce our current status to every connected STING peer. Returns the
/// number of peers the heartbeat was queued for.
pub fn broadcast_heartbeat(peering: &PeeringManager, store: &dyn TangleStore) -> usize {
    let heartbeat = own_heartbeat(store, peering);
    let mut sent = 0;
    peering.for_each_connected(|peer| {
        if send_heartbeat(peer, &heartbeat) {
            sent += 1;
        }
    });
    sent
}

/// Ask a STING peer for its latest milestone.
pub fn send_latest_milestone_request(peer: &Peer) -> bool {
    if !peer.supports_sting() {
        return false;
    }
    match sting::build_milestone_request(MilestoneIndex::ZERO) {
        Ok(message) => peer.enqueue_for_sending(message),
        Err(e) => {
            tracing::warn!(peer = %peer.id(), error = %e, "cannot build milestone request");
            false
        }
    }
}

/// Take our lowest queued request that `peer` can answer and send it as a
/// transaction request.
///
/// A peer can answer requests for milestones above its pruning index and up
/// to its solid index, as announced in its latest heartbeat. Without a
/// heartbeat nothing is sent. The returned request is pending; if the send
/// queue was full the sweeper puts it back.
pub fn send_transaction_request(peer: &Peer, request_queue: &RequestQueue) -> Option<Request> {
    if !peer.supports_sting() {
        return None;
    }
    let heartbeat = peer.latest_heartbeat()?;
    let lowest = MilestoneIndex(heartbeat.pruned_milestone_index.as_u32().saturating_add(1));
    let request = request_queue.next_in_range(lowest, heartbeat.solid_milestone_index)?;

    match sting::build_transaction_request(&request.hash) {
        Ok(message) => {
            peer.enqueue_for_sending(message);
        }
        Err(e) => tracing::warn!(hash = %request.hash, error = %e, "cannot build transaction request"),
    }
    Some(request)
}

/// Hand queued requests to every connected STING peer, at most
/// [`MAX_REQUESTS_PER_PEER`] each. Returns the number of requests sent.
pub fn request_from_neighbors(peering: &PeeringManager, request_queue: &RequestQueue) -> usize {
    let mut sent = 0;
    peering.for_each_connected(|peer| {
        for _ in 0..MAX_REQUESTS_PER_PEER {
            if send_transaction_request(peer, request_queue).is_none() {
                break;
            }
            sent += 1;
        }
    });
    sent
}

/// Periodically drain the request queue towards STING neighbors until
/// `cancel` fires.
pub async fn run_requester(
    peering: Arc<PeeringManager>,
    request_queue: Arc<RequestQueue>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let sent = request_from_neighbors(&peering, &request_queue);
                if sent > 0 {
                    tracing::trace!(sent, "sent transaction requests");
                }
            }
        }
    }
}
