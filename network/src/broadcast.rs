//! Broadcast queue: fan-out of new transactions to every neighbor.
//!
//! Producers push [`Broadcast`]s onto a bounded channel and wait when it is
//! full. A single consumer loop drains it and queues one message per
//! connected peer, in the format the peer negotiated.

use std::collections::HashSet;
use std::sync::Arc;

use tangle_protocol::{legacy, sting};
use tangle_types::Hash;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::peer::{Peer, PeerId};
use crate::peer_manager::PeeringManager;
use crate::request_queue::RequestQueue;
use crate::NetworkError;

pub const DEFAULT_BROADCAST_QUEUE_CAPACITY: usize = 1000;

/// A transaction to send to every neighbor except those that already have it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Broadcast {
    pub payload: Vec<u8>,
    /// Hash legacy peers get asked for when we have no request of our own.
    pub requested_hash: Option<Hash>,
    pub exclude: HashSet<PeerId>,
}

/// Outcome of fanning out one broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Number of peers the message was queued for.
    pub sent: usize,
    /// Number of peers whose send queue rejected the message.
    pub failed: usize,
    /// Number of peers excluded or without a usable message.
    pub skipped: usize,
}

/// Producer handle of the broadcast queue.
#[derive(Clone)]
pub struct BroadcastQueue {
    tx: mpsc::Sender<Broadcast>,
}

impl BroadcastQueue {
    /// Create a queue holding at most `capacity` broadcasts.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Broadcast>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a broadcast, waiting for room when the queue is full.
    pub async fn enqueue_for_broadcast(&self, broadcast: Broadcast) -> Result<(), NetworkError> {
        self.tx
            .send(broadcast)
            .await
            .map_err(|_| NetworkError::BroadcastQueueClosed)
    }

    /// Free slots left in the queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Queue `broadcast` for every connected peer not excluded by it.
///
/// STING peers get a plain transaction message. Legacy peers get the
/// transaction plus a request: our next pending request if we have one,
/// else the broadcast's own hash.
pub fn fan_out(
    broadcast: &Broadcast,
    peering: &PeeringManager,
    request_queue: &RequestQueue,
) -> BroadcastResult {
    let mut result = BroadcastResult::default();

    peering.for_each_connected(|peer| {
        if broadcast.exclude.contains(&peer.id()) {
            result.skipped += 1;
            return;
        }

        let Some(message) = message_for(peer, broadcast, request_queue) else {
            result.skipped += 1;
            return;
        };

        if peer.enqueue_for_sending(message) {
            result.sent += 1;
        } else {
            result.failed += 1;
        }
    });

    result
}

fn message_for(peer: &Peer, broadcast: &Broadcast, request_queue: &RequestQueue) -> Option<Vec<u8>> {
    let built = if peer.supports_sting() {
        sting::build_transaction(&broadcast.payload)
    } else {
        let requested = request_queue
            .next()
            .map(|r| r.hash)
            .or(broadcast.requested_hash)?;
        legacy::build_transaction_and_request(&broadcast.payload, &requested)
    };

    match built {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(peer = %peer.id(), error = %e, "cannot build broadcast message");
            None
        }
    }
}

/// The single consumer of the broadcast queue. Runs until `cancel` fires or
/// every producer handle is dropped.
pub async fn run_broadcast_queue(
    mut rx: mpsc::Receiver<Broadcast>,
    peering: Arc<PeeringManager>,
    request_queue: Arc<RequestQueue>,
    cancel: CancellationToken,
) {
    loop {
        let broadcast = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("broadcast queue shutting down");
                break;
            }
            broadcast = rx.recv() => match broadcast {
                Some(b) => b,
                None => break,
            },
        };

        let result = fan_out(&broadcast, &peering, &request_queue);
        tracing::trace!(
            sent = result.sent,
            failed = result.failed,
            skipped = result.skipped,
            "broadcast fanned out"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
