//! Message processor: validates received transactions, answers requests
//! and hands new transactions to the rest of the node.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tangle_protocol::{legacy, sting, Heartbeat, Message, MessageType, ParsedTransaction};
use tangle_protocol::TransactionParser;
use tangle_store::TangleStore;
use tangle_types::{Hash, MilestoneIndex};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastQueue;
use crate::metrics::ServerMetrics;
use crate::peer::{Peer, PeerId, PeerMetrics};
use crate::request_queue::{Request, RequestQueue};
use crate::requester;
use crate::work_unit::{WorkUnitCache, WorkUnitState};

/// Transactions timestamped further ahead than this are rejected.
pub const MAX_FUTURE_DRIFT_SECS: u64 = 10 * 60;

/// Transactions older than this are stored but not gossiped on.
pub const MAX_BROADCAST_AGE_SECS: u64 = 10 * 60;

/// Capacity of the processed-transaction channel.
pub const PROCESSED_CHANNEL_CAPACITY: usize = 10_000;

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Minimum weight magnitude of unrequested transactions.
    pub mwm: u8,
    /// Maximum number of messages processed concurrently.
    pub workers: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { mwm: 14, workers: 4 }
    }
}

/// A message read from a peer, on its way to the processor.
#[derive(Debug)]
pub struct InboundMessage {
    pub peer: Arc<Peer>,
    pub message: Message,
}

/// A transaction that passed validation.
#[derive(Clone, Debug)]
pub struct ProcessedTransaction {
    pub transaction: Arc<ParsedTransaction>,
    /// Our request it fulfilled, if we asked for it.
    pub request: Option<Request>,
    /// The peer that delivered it first.
    pub peer: Option<PeerId>,
}

pub struct Processor {
    config: ProcessorConfig,
    store: Arc<dyn TangleStore>,
    parser: Arc<dyn TransactionParser>,
    request_queue: Arc<RequestQueue>,
    work_units: Arc<WorkUnitCache>,
    broadcast_queue: BroadcastQueue,
    processed: mpsc::Sender<ProcessedTransaction>,
    metrics: Arc<ServerMetrics>,
}

impl Processor {
    pub fn new(
        config: ProcessorConfig,
        store: Arc<dyn TangleStore>,
        parser: Arc<dyn TransactionParser>,
        request_queue: Arc<RequestQueue>,
        broadcast_queue: BroadcastQueue,
        metrics: Arc<ServerMetrics>,
    ) -> (Self, mpsc::Receiver<ProcessedTransaction>) {
        let (processed, rx) = mpsc::channel(PROCESSED_CHANNEL_CAPACITY);
        let processor = Self {
            config,
            store,
            parser,
            request_queue,
            work_units: WorkUnitCache::new(),
            broadcast_queue,
            processed,
            metrics,
        };
        (processor, rx)
    }

    pub fn work_units(&self) -> &Arc<WorkUnitCache> {
        &self.work_units
    }

    /// Handle one message from a handshaked peer.
    pub async fn process(&self, peer: &Arc<Peer>, message: Message) {
        ServerMetrics::incr(&self.metrics.received_messages);
        PeerMetrics::incr(&peer.metrics.received_messages);

        match message.message_type {
            MessageType::Transaction => {
                self.process_transaction(peer, &message.body, None).await;
            }
            MessageType::LegacyTransactionAndRequest => {
                match legacy::split_transaction_and_request(&message.body) {
                    Ok((payload, requested)) => {
                        self.process_transaction(peer, payload, Some(requested)).await;
                    }
                    Err(e) => {
                        tracing::debug!(peer = %peer.id(), error = %e, "malformed legacy message");
                        ServerMetrics::incr(&self.metrics.invalid_transactions);
                        PeerMetrics::incr(&peer.metrics.invalid_transactions);
                    }
                }
            }
            MessageType::TransactionRequest => self.process_transaction_request(peer, &message.body),
            MessageType::MilestoneRequest => self.process_milestone_request(peer, &message.body),
            MessageType::Heartbeat => self.process_heartbeat(peer, &message.body),
            MessageType::Handshake => {
                tracing::debug!(peer = %peer.id(), "ignoring repeated handshake");
            }
        }

        // Every packet from a STING neighbor is a chance to ask it for more.
        requester::send_transaction_request(peer, &self.request_queue);
    }

    async fn process_transaction(&self, peer: &Arc<Peer>, payload: &[u8], requested: Option<Hash>) {
        ServerMetrics::incr(&self.metrics.all_transactions);

        let unit = self.work_units.acquire(payload);
        // Record the delivery first so a concurrent hasher answers it.
        unit.add_request(Arc::clone(peer), requested);

        match unit.begin_hashing() {
            Ok(()) => {}
            Err(WorkUnitState::Hashing) => return,
            Err(WorkUnitState::Invalid) => {
                ServerMetrics::incr(&self.metrics.invalid_transactions);
                PeerMetrics::incr(&peer.metrics.invalid_transactions);
                tracing::debug!(peer = %peer.id(), "peer resent an invalid transaction, dropping it");
                peer.disconnect();
                return;
            }
            Err(WorkUnitState::Hashed) => {
                if let Some(transaction) = unit.transaction() {
                    match self.request_queue.received(&transaction.hash) {
                        Some(request) => self.emit(transaction, Some(request), peer),
                        None => {
                            ServerMetrics::incr(&self.metrics.known_transactions);
                            PeerMetrics::incr(&peer.metrics.known_transactions);
                        }
                    }
                }
                unit.reply_to_all_requests(&self.request_queue, self.store.as_ref());
                return;
            }
        }

        let transaction = match self.parser.parse(payload) {
            Ok(tx) => Arc::new(tx),
            Err(e) => {
                tracing::debug!(peer = %peer.id(), error = %e, "invalid transaction");
                self.mark_invalid(&unit);
                return;
            }
        };

        let request = self.request_queue.received(&transaction.hash);
        if request.is_none() && transaction.weight_magnitude < self.config.mwm {
            tracing::debug!(
                peer = %peer.id(),
                hash = %transaction.hash,
                weight = transaction.weight_magnitude,
                "transaction below minimum weight magnitude"
            );
            self.mark_invalid(&unit);
            return;
        }

        let (valid_timestamp, broadcast_worthy) = self.check_timestamp(&transaction);
        unit.set_hashed(Arc::clone(&transaction));

        if request.is_none() && !valid_timestamp {
            tracing::trace!(hash = %transaction.hash, "stale transaction");
            ServerMetrics::incr(&self.metrics.stale_transactions);
            unit.stale();
            unit.reply_to_all_requests(&self.request_queue, self.store.as_ref());
            return;
        }

        let already_stored = match self.store.contains_transaction(&transaction.hash) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(hash = %transaction.hash, error = %e, "storage lookup failed");
                false
            }
        };
        if already_stored {
            ServerMetrics::incr(&self.metrics.known_transactions);
            PeerMetrics::incr(&peer.metrics.known_transactions);
        } else {
            ServerMetrics::incr(&self.metrics.new_transactions);
            PeerMetrics::incr(&peer.metrics.new_transactions);
        }

        let unrequested = request.is_none();
        self.emit(Arc::clone(&transaction), request, peer);

        if unrequested && broadcast_worthy && !already_stored {
            if let Err(e) = self.broadcast_queue.enqueue_for_broadcast(unit.broadcast()).await {
                tracing::warn!(hash = %transaction.hash, error = %e, "cannot queue broadcast");
            }
        }

        unit.reply_to_all_requests(&self.request_queue, self.store.as_ref());
    }

    fn mark_invalid(&self, unit: &crate::work_unit::WorkUnit) {
        unit.update_state(WorkUnitState::Invalid);
        ServerMetrics::incr(&self.metrics.invalid_transactions);
        unit.punish();
    }

    /// `(accepted, broadcast worthy)` for the transaction's timestamp.
    fn check_timestamp(&self, transaction: &ParsedTransaction) -> (bool, bool) {
        if self.store.is_solid_entry_point(&transaction.hash) {
            return (true, false);
        }
        let now = unix_now();
        let snapshot = self.store.snapshot_timestamp();
        let ts = transaction.timestamp;
        let valid = ts >= snapshot && ts <= now.saturating_add(MAX_FUTURE_DRIFT_SECS);
        let recent = ts >= now.saturating_sub(MAX_BROADCAST_AGE_SECS);
        (valid, valid && recent)
    }

    /// Hand a validated transaction to the consumer. Never waits: when
    /// nobody drains the channel the transaction is dropped and counted.
    fn emit(&self, transaction: Arc<ParsedTransaction>, request: Option<Request>, peer: &Peer) {
        let processed = ProcessedTransaction {
            transaction,
            request,
            peer: Some(peer.id()),
        };
        match self.processed.try_send(processed) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(tx)) => {
                ServerMetrics::incr(&self.metrics.dropped_processed_transactions);
                tracing::trace!(hash = %tx.transaction.hash, "processed channel full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                ServerMetrics::incr(&self.metrics.dropped_processed_transactions);
            }
        }
    }

    fn process_transaction_request(&self, peer: &Peer, body: &[u8]) {
        ServerMetrics::incr(&self.metrics.received_transaction_requests);
        let hash = match sting::parse_transaction_request(body) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::debug!(peer = %peer.id(), error = %e, "malformed transaction request");
                ServerMetrics::incr(&self.metrics.invalid_requests);
                PeerMetrics::incr(&peer.metrics.invalid_requests);
                return;
            }
        };

        let transaction = match self.store.get_transaction(&hash) {
            Ok(Some(tx)) => tx,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(%hash, error = %e, "storage lookup failed");
                return;
            }
        };

        match sting::build_transaction(&transaction.raw_bytes) {
            Ok(message) => {
                peer.enqueue_for_sending(message);
            }
            Err(e) => tracing::warn!(%hash, error = %e, "cannot build transaction reply"),
        }
    }

    fn process_milestone_request(&self, peer: &Peer, body: &[u8]) {
        ServerMetrics::incr(&self.metrics.received_milestone_requests);
        let requested = match sting::parse_milestone_request(body) {
            Ok(index) => index,
            Err(e) => {
                tracing::debug!(peer = %peer.id(), error = %e, "malformed milestone request, dropping peer");
                ServerMetrics::incr(&self.metrics.invalid_requests);
                PeerMetrics::incr(&peer.metrics.invalid_requests);
                peer.disconnect();
                return;
            }
        };
        let index = if requested == MilestoneIndex::ZERO {
            self.store.latest_milestone_index()
        } else {
            requested
        };

        let transactions = match self.store.get_milestone_transactions(index) {
            Ok(Some(txs)) => txs,
            Ok(None) => {
                tracing::trace!(peer = %peer.id(), %index, "requested milestone not found");
                return;
            }
            Err(e) => {
                tracing::warn!(%index, error = %e, "storage lookup failed");
                return;
            }
        };

        for transaction in transactions {
            match sting::build_transaction(&transaction.raw_bytes) {
                Ok(message) => {
                    peer.enqueue_for_sending(message);
                }
                Err(e) => {
                    tracing::warn!(hash = %transaction.hash, error = %e, "cannot build milestone reply");
                }
            }
        }
    }

    fn process_heartbeat(&self, peer: &Peer, body: &[u8]) {
        match Heartbeat::parse(body) {
            Ok(heartbeat) => {
                ServerMetrics::incr(&self.metrics.received_heartbeats);
                tracing::trace!(peer = %peer.id(), latest = %heartbeat.latest_milestone_index, "heartbeat");
                peer.set_heartbeat(heartbeat);
            }
            Err(e) => tracing::debug!(peer = %peer.id(), error = %e, "malformed heartbeat"),
        }
    }

    /// Consume inbound messages until `cancel` fires or every connection
    /// dropped its sender. At most `workers` messages are in flight.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<InboundMessage>,
        cancel: CancellationToken,
    ) {
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        loop {
            let inbound = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("message processor shutting down");
                    break;
                }
                inbound = inbound.recv() => match inbound {
                    Some(m) => m,
                    None => break,
                },
            };

            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let processor = Arc::clone(&self);
            tokio::spawn(async move {
                processor.process(&inbound.peer, inbound.message).await;
                drop(permit);
            });
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcast;
    use crate::peer::PeerOrigin;
    use tangle_nullables::{NullParser, NullStore};
    use tangle_protocol::tlv::build_message;
    use tangle_protocol::Framer;
    use tangle_store::StoredTransaction;
    use tangle_types::HASH_LENGTH;

    struct Harness {
        processor: Processor,
        store: Arc<NullStore>,
        parser: Arc<NullParser>,
        request_queue: Arc<RequestQueue>,
        metrics: Arc<ServerMetrics>,
        processed: mpsc::Receiver<ProcessedTransaction>,
        broadcasts: mpsc::Receiver<Broadcast>,
    }

    fn harness() -> Harness {
        let store = Arc::new(NullStore::with_genesis());
        let parser = Arc::new(NullParser::new());
        let request_queue = Arc::new(RequestQueue::new());
        let metrics = Arc::new(ServerMetrics::new());
        let (broadcast_queue, broadcasts) = BroadcastQueue::new(16);
        let (processor, processed) = Processor::new(
            ProcessorConfig::default(),
            Arc::clone(&store) as Arc<dyn TangleStore>,
            Arc::clone(&parser) as Arc<dyn TransactionParser>,
            Arc::clone(&request_queue),
            broadcast_queue,
            Arc::clone(&metrics),
        );
        Harness {
            processor,
            store,
            parser,
            request_queue,
            metrics,
            processed,
            broadcasts,
        }
    }

    fn peer(addr: &str) -> (Arc<Peer>, mpsc::Receiver<Vec<u8>>) {
        let (peer, rx) = Peer::new(1, PeerOrigin::Outbound, addr.parse().unwrap());
        (Arc::new(peer), rx)
    }

    fn transaction_message(payload: &[u8]) -> Message {
        Message {
            message_type: MessageType::Transaction,
            body: payload.to_vec(),
        }
    }

    fn decode(bytes: &[u8]) -> Message {
        Framer::new().feed(bytes).unwrap().remove(0)
    }

    #[tokio::test]
    async fn new_transaction_is_emitted_and_broadcast() {
        let mut h = harness();
        let (p, _rx) = peer("10.0.0.1:15600");
        let payload = vec![5u8; 300];

        h.processor.process(&p, transaction_message(&payload)).await;

        let processed = h.processed.try_recv().unwrap();
        assert_eq!(processed.transaction.hash, NullParser::hash_of(&payload));
        assert!(processed.request.is_none());
        assert_eq!(processed.peer, Some(p.id()));

        let broadcast = h.broadcasts.try_recv().unwrap();
        assert_eq!(broadcast.payload, payload);
        assert!(broadcast.exclude.contains(&p.id()));
        assert_eq!(h.metrics.snapshot().new_transactions, 1);
    }

    #[tokio::test]
    async fn requested_transaction_is_not_broadcast() {
        let mut h = harness();
        let (p, _rx) = peer("10.0.0.1:15600");
        let payload = vec![5u8; 300];
        let hash = NullParser::hash_of(&payload);
        h.request_queue.enqueue(Request::new(hash, MilestoneIndex(3)));
        h.request_queue.next();

        h.processor.process(&p, transaction_message(&payload)).await;

        let processed = h.processed.try_recv().unwrap();
        assert_eq!(processed.request.map(|r| r.hash), Some(hash));
        assert!(h.broadcasts.try_recv().is_err());
        assert!(h.request_queue.is_empty());
    }

    #[tokio::test]
    async fn low_weight_transaction_is_invalid_and_punished() {
        let mut h = harness();
        let (p, _rx) = peer("10.0.0.1:15600");
        h.parser.set_weight_magnitude(3);

        h.processor.process(&p, transaction_message(&[5u8; 300])).await;

        assert!(h.processed.try_recv().is_err());
        assert_eq!(PeerMetrics::get(&p.metrics.invalid_transactions), 1);
        assert_eq!(h.metrics.snapshot().invalid_transactions, 1);
    }

    #[tokio::test]
    async fn unparsable_transaction_is_punished() {
        let h = harness();
        let (p, _rx) = peer("10.0.0.1:15600");
        let payload = vec![6u8; 300];
        h.parser.reject(&payload);

        h.processor.process(&p, transaction_message(&payload)).await;
        assert_eq!(PeerMetrics::get(&p.metrics.invalid_transactions), 1);
    }

    #[tokio::test]
    async fn old_unrequested_transaction_is_stale() {
        let mut h = harness();
        let (p, _rx) = peer("10.0.0.1:15600");
        h.store.set_snapshot_timestamp(1_000_000);
        h.parser.set_timestamp(10);

        h.processor.process(&p, transaction_message(&[5u8; 300])).await;

        assert!(h.processed.try_recv().is_err());
        assert!(h.broadcasts.try_recv().is_err());
        assert_eq!(PeerMetrics::get(&p.metrics.stale_transactions), 1);
        assert_eq!(h.metrics.snapshot().stale_transactions, 1);
    }

    #[tokio::test]
    async fn valid_but_old_transaction_is_not_broadcast() {
        let mut h = harness();
        let (p, _rx) = peer("10.0.0.1:15600");
        h.parser.set_timestamp(unix_now() - 2 * MAX_BROADCAST_AGE_SECS);

        h.processor.process(&p, transaction_message(&[5u8; 300])).await;

        assert!(h.processed.try_recv().is_ok());
        assert!(h.broadcasts.try_recv().is_err());
    }

    #[tokio::test]
    async fn legacy_message_gets_requested_transaction_back() {
        let h = harness();
        let (p, mut rx) = peer("10.0.0.1:15600");
        let wanted = Hash::new([9u8; HASH_LENGTH]);
        h.store.insert_transaction(StoredTransaction {
            hash: wanted,
            trunk: Hash::NULL,
            branch: Hash::NULL,
            bundle: wanted,
            is_tail: true,
            timestamp: 0,
            raw_bytes: vec![0x99; 292],
            confirmed_by: None,
        });

        let body = {
            let mut b = vec![5u8; 300];
            b.extend_from_slice(wanted.as_bytes());
            b
        };
        let message = Message {
            message_type: MessageType::LegacyTransactionAndRequest,
            body,
        };
        h.processor.process(&p, message).await;

        let reply = decode(&rx.try_recv().unwrap());
        assert_eq!(reply.message_type, MessageType::LegacyTransactionAndRequest);
        let (tx, _) = legacy::split_transaction_and_request(&reply.body).unwrap();
        assert_eq!(tx, &[0x99; 292][..]);
    }

    #[tokio::test]
    async fn resent_invalid_transaction_drops_peer() {
        let h = harness();
        let (a, _rx_a) = peer("10.0.0.1:15600");
        let (b, _rx_b) = peer("10.0.0.2:15600");
        let payload = vec![6u8; 300];
        h.parser.reject(&payload);

        let unit = h.processor.work_units().acquire(&payload);
        h.processor.process(&a, transaction_message(&payload)).await;
        assert!(unit.is(WorkUnitState::Invalid));

        h.processor.process(&b, transaction_message(&payload)).await;
        assert!(b.disconnect_token().is_cancelled());
    }

    #[tokio::test]
    async fn transaction_request_is_answered_from_storage() {
        let h = harness();
        let (p, mut rx) = peer("10.0.0.1:15600");
        let bytes = sting::build_transaction_request(&Hash::NULL).unwrap();

        h.processor.process(&p, decode(&bytes)).await;

        let reply = decode(&rx.try_recv().unwrap());
        assert_eq!(reply.message_type, MessageType::Transaction);
        assert_eq!(reply.body, vec![0u8; 292]);
    }

    #[tokio::test]
    async fn unknown_transaction_request_is_ignored() {
        let h = harness();
        let (p, mut rx) = peer("10.0.0.1:15600");
        let bytes = sting::build_transaction_request(&Hash::new([3u8; HASH_LENGTH])).unwrap();

        h.processor.process(&p, decode(&bytes)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(PeerMetrics::get(&p.metrics.invalid_requests), 0);
    }

    #[tokio::test]
    async fn milestone_request_zero_means_latest() {
        let h = harness();
        let (p, mut rx) = peer("10.0.0.1:15600");
        h.store.add_milestone(MilestoneIndex(7), vec![Hash::NULL]);

        let bytes = sting::build_milestone_request(MilestoneIndex::ZERO).unwrap();
        h.processor.process(&p, decode(&bytes)).await;

        let reply = decode(&rx.try_recv().unwrap());
        assert_eq!(reply.message_type, MessageType::Transaction);
    }

    #[tokio::test]
    async fn malformed_milestone_request_drops_peer() {
        let h = harness();
        let (p, _rx) = peer("10.0.0.1:15600");
        let message = Message {
            message_type: MessageType::MilestoneRequest,
            body: vec![1, 2],
        };
        h.processor.process(&p, message).await;
        assert!(p.disconnect_token().is_cancelled());
    }

    #[tokio::test]
    async fn heartbeat_is_recorded() {
        let h = harness();
        let (p, _rx) = peer("10.0.0.1:15600");
        let heartbeat = Heartbeat {
            solid_milestone_index: MilestoneIndex(10),
            pruned_milestone_index: MilestoneIndex(2),
            latest_milestone_index: MilestoneIndex(12),
            connected_neighbors: 3,
            synced_neighbors: 2,
        };
        h.processor
            .process(&p, decode(&heartbeat.to_message().unwrap()))
            .await;
        assert_eq!(p.latest_heartbeat(), Some(heartbeat));
        assert_eq!(h.metrics.snapshot().received_heartbeats, 1);
    }

    #[tokio::test]
    async fn undrained_processed_channel_does_not_stall() {
        let mut h = harness();
        let (p, _rx) = peer("10.0.0.1:15600");
        // Old enough to skip the broadcast queue.
        h.parser.set_timestamp(unix_now() - 2 * MAX_BROADCAST_AGE_SECS);

        let total = PROCESSED_CHANNEL_CAPACITY + 5;
        tokio::time::timeout(std::time::Duration::from_secs(30), async {
            for i in 0..total {
                let mut payload = vec![0u8; 300];
                payload[..8].copy_from_slice(&(i as u64).to_be_bytes());
                h.processor.process(&p, transaction_message(&payload)).await;
            }
        })
        .await
        .expect("processor stalled on a full processed channel");

        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.new_transactions, total as u64);
        assert_eq!(snapshot.dropped_processed_transactions, 5);
        assert!(h.processed.try_recv().is_ok());
        assert!(h.broadcasts.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_loop_stops_on_cancel() {
        let h = harness();
        let processor = Arc::new(h.processor);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&processor).run(rx, cancel.clone()));

        let (p, _rx) = peer("10.0.0.1:15600");
        let message = decode(&build_message(MessageType::Transaction, &[5u8; 300]).unwrap());
        tx.send(InboundMessage { peer: p, message }).await.unwrap();

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
