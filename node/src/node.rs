//! The gossip node: wires peering, the request and broadcast queues, the
//! message processor and milestone confirmation together.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tangle_ledger::{compute_white_flag_mutations, WhiteFlagConfirmation};
use tangle_network::{
    broadcast_heartbeat, own_heartbeat, run_broadcast_queue, run_connection, run_requester,
    send_heartbeat, send_latest_milestone_request, Broadcast, BroadcastQueue, ConnectionContext,
    InboundMessage, Peer, PeerId, PeerOrigin, PeeringConfig, PeeringEvent, PeeringManager,
    ProcessedTransaction, Processor, ProcessorConfig, Request, RequestQueue, ServerMetrics,
};
use tangle_protocol::{Handshake, TransactionParser};
use tangle_store::TangleStore;
use tangle_types::{Hash, MilestoneIndex};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::metrics::NodeMetrics;
use crate::shutdown::ShutdownController;

/// Capacity of the channel between connections and the processor.
const INBOUND_CHANNEL_CAPACITY: usize = 4096;
/// How often Prometheus gauges are refreshed.
const METRICS_INTERVAL: Duration = Duration::from_secs(1);
/// Timeout for dialing a known peer.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for waiting on background tasks during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receivers handed to the background loops on start.
struct Startup {
    broadcast_rx: mpsc::Receiver<Broadcast>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
}

pub struct GossipNode {
    config: NodeConfig,
    store: Arc<dyn TangleStore>,
    peering: Arc<PeeringManager>,
    request_queue: Arc<RequestQueue>,
    broadcast_queue: BroadcastQueue,
    processor: Arc<Processor>,
    server_metrics: Arc<ServerMetrics>,
    metrics: Arc<NodeMetrics>,
    shutdown: ShutdownController,
    inbound_tx: mpsc::Sender<InboundMessage>,
    startup: StdMutex<Option<Startup>>,
    processed: StdMutex<Option<mpsc::Receiver<ProcessedTransaction>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GossipNode {
    pub fn new(
        config: NodeConfig,
        store: Arc<dyn TangleStore>,
        parser: Arc<dyn TransactionParser>,
    ) -> Result<Self, NodeError> {
        config.validate()?;

        let peering = Arc::new(PeeringManager::new(PeeringConfig {
            coordinator: config.coordinator()?,
            mwm: config.mwm,
            max_peers: config.max_peers,
            accept_any_peer: config.accept_any_peer,
        }));
        let request_queue = Arc::new(RequestQueue::new());
        let (broadcast_queue, broadcast_rx) = BroadcastQueue::new(config.broadcast_queue_capacity);
        let server_metrics = Arc::new(ServerMetrics::new());
        let (processor, processed) = Processor::new(
            ProcessorConfig {
                mwm: config.mwm,
                workers: config.processor_workers,
            },
            Arc::clone(&store),
            parser,
            Arc::clone(&request_queue),
            broadcast_queue.clone(),
            Arc::clone(&server_metrics),
        );
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            store,
            peering,
            request_queue,
            broadcast_queue,
            processor: Arc::new(processor),
            server_metrics,
            metrics: Arc::new(NodeMetrics::new()),
            shutdown: ShutdownController::new(),
            inbound_tx,
            startup: StdMutex::new(Some(Startup {
                broadcast_rx,
                inbound_rx,
            })),
            processed: StdMutex::new(Some(processed)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peering(&self) -> &Arc<PeeringManager> {
        &self.peering
    }

    pub fn request_queue(&self) -> &Arc<RequestQueue> {
        &self.request_queue
    }

    pub fn broadcast_queue(&self) -> &BroadcastQueue {
        &self.broadcast_queue
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.metrics
    }

    pub fn server_metrics(&self) -> &Arc<ServerMetrics> {
        &self.server_metrics
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// The stream of validated transactions. Can be taken once.
    pub fn take_processed(&self) -> Option<mpsc::Receiver<ProcessedTransaction>> {
        self.processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Ask neighbors for a transaction we are missing.
    pub fn request_transaction(&self, hash: Hash, milestone_index: MilestoneIndex) -> bool {
        self.request_queue.enqueue(Request::new(hash, milestone_index))
    }

    /// Bind the gossip listener and start every background loop. Returns the
    /// address the listener is bound to.
    pub async fn start(&self) -> Result<SocketAddr, NodeError> {
        let startup = self
            .startup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        let listener = TcpListener::bind(self.config.bind_socket_address()?).await?;
        let local_addr = listener.local_addr()?;

        let handshake = Handshake::new(
            local_addr.port(),
            self.config.coordinator()?,
            self.config.mwm,
        )
        .to_message()
        .map_err(tangle_network::NetworkError::from)?;
        let ctx = ConnectionContext {
            peering: Arc::clone(&self.peering),
            inbound: self.inbound_tx.clone(),
            handshake: Arc::new(handshake),
            metrics: Arc::clone(&self.server_metrics),
        };

        let mut tasks = self.tasks.lock().await;

        tasks.push(tokio::spawn(run_broadcast_queue(
            startup.broadcast_rx,
            Arc::clone(&self.peering),
            Arc::clone(&self.request_queue),
            self.shutdown.token(),
        )));

        tasks.push(tokio::spawn(
            Arc::clone(&self.processor).run(startup.inbound_rx, self.shutdown.token()),
        ));

        tasks.push(tokio::spawn(run_requester(
            Arc::clone(&self.peering),
            Arc::clone(&self.request_queue),
            self.config.request_interval(),
            self.shutdown.token(),
        )));

        tasks.push(tokio::spawn(run_peering_events(
            self.peering.subscribe(),
            Arc::clone(&self.peering),
            Arc::clone(&self.store),
            self.shutdown.token(),
        )));

        tasks.push(tokio::spawn(run_request_sweeper(
            Arc::clone(&self.request_queue),
            self.config.request_sweep_interval(),
            self.config.request_discard_older_than(),
            self.shutdown.token(),
        )));

        if self.config.enable_metrics {
            tasks.push(tokio::spawn(run_metrics_updater(
                Arc::clone(&self.metrics),
                Arc::clone(&self.server_metrics),
                Arc::clone(&self.request_queue),
                Arc::clone(&self.peering),
                self.shutdown.token(),
            )));
        }

        tasks.push(tokio::spawn(run_listener(
            listener,
            ctx.clone(),
            self.shutdown.token(),
        )));

        if !self.config.known_peers.is_empty() {
            tasks.push(tokio::spawn(run_dialer(
                self.config.known_peers.clone(),
                self.config.reconnect_interval(),
                ctx,
                self.shutdown.token(),
            )));
        }

        tracing::info!(
            address = %local_addr,
            known_peers = self.config.known_peers.len(),
            accept_any_peer = self.config.accept_any_peer,
            "gossip node started"
        );
        Ok(local_addr)
    }

    /// Compute and record the ledger mutations of one milestone.
    pub fn confirm_milestone(
        &self,
        milestone_index: MilestoneIndex,
        milestone_tail: Hash,
    ) -> Result<WhiteFlagConfirmation, NodeError> {
        let started = Instant::now();
        let confirmation =
            compute_white_flag_mutations(self.store.as_ref(), milestone_index, milestone_tail)?;
        let elapsed = started.elapsed();

        self.metrics
            .white_flag_time_ms
            .observe(elapsed.as_secs_f64() * 1000.0);
        self.metrics.milestones_confirmed.inc();
        self.metrics
            .confirmed_bundles
            .inc_by(confirmation.tails.len() as u64);
        tracing::info!(
            index = %milestone_index,
            bundles = confirmation.tails.len(),
            addresses = confirmation.new_address_state.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "milestone confirmed"
        );
        self.announce_status();
        Ok(confirmation)
    }

    /// Send our current milestone indexes to every STING neighbor. Returns
    /// the number of neighbors the heartbeat was queued for.
    pub fn announce_status(&self) -> usize {
        broadcast_heartbeat(&self.peering, self.store.as_ref())
    }

    /// Stop every loop, close every connection and wait for the tasks.
    pub async fn stop(&self) {
        tracing::info!("stopping gossip node");
        self.peering.shutdown();
        self.shutdown.shutdown();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                tracing::warn!("background task did not stop in time");
            }
        }
    }
}

fn spawn_connection(
    stream: TcpStream,
    origin: PeerOrigin,
    remote: SocketAddr,
    ctx: ConnectionContext,
    cancel: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%remote, error = %e, "cannot set TCP_NODELAY");
    }
    let (reader, writer) = stream.into_split();
    let (peer, outbound) = Peer::new(ctx.peering.next_connection_id(), origin, remote);
    let peer = Arc::new(peer);

    tokio::spawn(async move {
        if let Err(e) = run_connection(reader, writer, Arc::clone(&peer), outbound, ctx, cancel).await {
            tracing::debug!(peer = %peer.id(), error = %e, "connection ended");
        }
    });
}

async fn run_listener(listener: TcpListener, ctx: ConnectionContext, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote)) => {
                if ctx.peering.is_blacklisted(&remote.ip()) {
                    tracing::debug!(%remote, "refusing blacklisted peer");
                    continue;
                }
                tracing::debug!(%remote, "accepted connection");
                spawn_connection(stream, PeerOrigin::Inbound, remote, ctx.clone(), cancel.clone());
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Resolve every known peer, whitelist it and keep a connection to it.
async fn run_dialer(
    known_peers: Vec<String>,
    reconnect_interval: Duration,
    ctx: ConnectionContext,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(reconnect_interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        for known in &known_peers {
            let addr = match tokio::net::lookup_host(known.as_str()).await {
                Ok(mut addrs) => match addrs.next() {
                    Some(addr) => addr,
                    None => continue,
                },
                Err(e) => {
                    tracing::warn!(peer = %known, error = %e, "cannot resolve known peer");
                    continue;
                }
            };

            let id = PeerId::from(addr);
            if !ctx.peering.is_whitelisted(&id) {
                ctx.peering.whitelist(id.clone(), None);
            }
            if ctx.peering.is_connected(&id) || ctx.peering.is_shut_down() {
                continue;
            }

            match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    tracing::debug!(peer = %id, "dialed known peer");
                    spawn_connection(stream, PeerOrigin::Outbound, addr, ctx.clone(), cancel.clone());
                }
                Ok(Err(e)) => tracing::debug!(peer = %id, error = %e, "dial failed"),
                Err(_) => tracing::debug!(peer = %id, "dial timed out"),
            }
        }
    }
}

/// Greet every new STING neighbor with our status and ask for its latest
/// milestone.
async fn run_peering_events(
    mut events: broadcast::Receiver<PeeringEvent>,
    peering: Arc<PeeringManager>,
    store: Arc<dyn TangleStore>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(PeeringEvent::PeerConnected(peer)) => {
                if !peer.supports_sting() {
                    continue;
                }
                send_heartbeat(&peer, &own_heartbeat(store.as_ref(), &peering));
                send_latest_milestone_request(&peer);
                tracing::debug!(peer = %peer.id(), "greeted STING neighbor");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "peering events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Re-queue unanswered requests, dropping those older than `discard`.
async fn run_request_sweeper(
    request_queue: Arc<RequestQueue>,
    every: Duration,
    discard: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let requeued = request_queue.enqueue_pending(discard);
                if requeued > 0 {
                    tracing::debug!(requeued, "re-queued unanswered requests");
                }
            }
        }
    }
}

async fn run_metrics_updater(
    metrics: Arc<NodeMetrics>,
    server: Arc<ServerMetrics>,
    request_queue: Arc<RequestQueue>,
    peering: Arc<PeeringManager>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                metrics.observe(&server.snapshot(), &request_queue, &peering);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tangle_nullables::{NullParser, NullStore};

    fn node(config: NodeConfig) -> GossipNode {
        GossipNode::new(
            config,
            Arc::new(NullStore::with_genesis()),
            Arc::new(NullParser::new()),
        )
        .unwrap()
    }

    fn local_config() -> NodeConfig {
        NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..NodeConfig::default()
        }
    }

    #[tokio::test]
    async fn starts_once_and_stops() {
        let node = node(local_config());
        let addr = node.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));

        node.stop().await;
        assert!(node.peering().is_shut_down());
    }

    #[tokio::test]
    async fn processed_stream_is_taken_once() {
        let node = node(local_config());
        assert!(node.take_processed().is_some());
        assert!(node.take_processed().is_none());
    }

    #[test]
    fn rejects_invalid_coordinator() {
        let config = NodeConfig {
            coordinator_address: "xyz".to_string(),
            ..NodeConfig::default()
        };
        let result = GossipNode::new(
            config,
            Arc::new(NullStore::new()),
            Arc::new(NullParser::new()),
        );
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn request_transaction_enqueues_once() {
        let node = node(local_config());
        assert!(node.request_transaction(Hash::NULL, MilestoneIndex(1)));
        assert!(!node.request_transaction(Hash::NULL, MilestoneIndex(1)));
        assert_eq!(node.request_queue().size(), (1, 0));
    }
}
