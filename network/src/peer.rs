//! A single gossip neighbor and its outbound queue.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};

use tangle_protocol::{Heartbeat, STING_VERSION};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of a peer's outbound message queue.
pub const SEND_QUEUE_CAPACITY: usize = 1000;

/// Handshake steps: ours written, theirs verified.
const HANDSHAKE_STEPS: u8 = 2;

/// Identity of a peer: the IP it connects from and the port it listens on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side opened the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerOrigin {
    Inbound,
    Outbound,
}

/// Metadata of a neighbor found through autopeering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AutopeeringInfo {
    pub identity: String,
}

/// Per-peer counters.
#[derive(Debug, Default)]
pub struct PeerMetrics {
    pub new_transactions: AtomicU64,
    pub known_transactions: AtomicU64,
    pub stale_transactions: AtomicU64,
    pub invalid_transactions: AtomicU64,
    pub invalid_requests: AtomicU64,
    pub received_messages: AtomicU64,
    pub sent_packets: AtomicU64,
    pub dropped_send_packets: AtomicU64,
}

impl PeerMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct PeerState {
    id: PeerId,
    /// Port the peer accepts connections on, known after its handshake.
    server_port: Option<u16>,
    protocol_version: u16,
    autopeering: Option<AutopeeringInfo>,
    latest_heartbeat: Option<Heartbeat>,
}

/// A connected (or connecting) neighbor.
///
/// Messages for the peer are queued with [`Peer::enqueue_for_sending`] and
/// written by the connection's writer task.
pub struct Peer {
    connection_id: u64,
    origin: PeerOrigin,
    remote: SocketAddr,
    state: RwLock<PeerState>,
    handshake_steps: AtomicU8,
    outbound: mpsc::Sender<Vec<u8>>,
    disconnect: CancellationToken,
    pub metrics: PeerMetrics,
}

impl Peer {
    /// Create a peer for a connection with `remote`, returning the receiving
    /// end of its outbound queue for the writer task.
    pub fn new(
        connection_id: u64,
        origin: PeerOrigin,
        remote: SocketAddr,
    ) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (outbound, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let peer = Self {
            connection_id,
            origin,
            remote,
            state: RwLock::new(PeerState {
                id: PeerId::from(remote),
                server_port: None,
                protocol_version: 0,
                autopeering: None,
                latest_heartbeat: None,
            }),
            handshake_steps: AtomicU8::new(0),
            outbound,
            disconnect: CancellationToken::new(),
            metrics: PeerMetrics::default(),
        };
        (peer, rx)
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn origin(&self) -> PeerOrigin {
        self.origin
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.remote
    }

    pub fn ip(&self) -> IpAddr {
        self.remote.ip()
    }

    /// The port we connected to, for outbound peers.
    pub fn dialed_port(&self) -> Option<u16> {
        match self.origin {
            PeerOrigin::Outbound => Some(self.remote.port()),
            PeerOrigin::Inbound => None,
        }
    }

    pub fn id(&self) -> PeerId {
        self.read_state().id.clone()
    }

    pub fn server_port(&self) -> Option<u16> {
        self.read_state().server_port
    }

    pub fn protocol_version(&self) -> u16 {
        self.read_state().protocol_version
    }

    /// Whether the negotiated protocol is STING rather than legacy gossip.
    pub fn supports_sting(&self) -> bool {
        self.protocol_version() >= STING_VERSION
    }

    pub fn autopeering(&self) -> Option<AutopeeringInfo> {
        self.read_state().autopeering.clone()
    }

    pub fn latest_heartbeat(&self) -> Option<Heartbeat> {
        self.read_state().latest_heartbeat
    }

    pub(crate) fn set_identity(&self, id: PeerId, server_port: u16) {
        let mut state = self.write_state();
        state.id = id;
        state.server_port = Some(server_port);
    }

    pub(crate) fn set_server_port(&self, server_port: u16) {
        self.write_state().server_port = Some(server_port);
    }

    pub(crate) fn set_protocol_version(&self, version: u16) {
        self.write_state().protocol_version = version;
    }

    pub(crate) fn set_autopeering(&self, info: AutopeeringInfo) {
        self.write_state().autopeering = Some(info);
    }

    pub fn set_heartbeat(&self, heartbeat: Heartbeat) {
        self.write_state().latest_heartbeat = Some(heartbeat);
    }

    /// Record one handshake step. Returns `true` exactly once, when both our
    /// handshake was sent and theirs was verified.
    pub(crate) fn handshake_step(&self) -> bool {
        self.handshake_steps.fetch_add(1, Ordering::SeqCst) + 1 == HANDSHAKE_STEPS
    }

    pub fn is_handshaked(&self) -> bool {
        self.handshake_steps.load(Ordering::SeqCst) >= HANDSHAKE_STEPS
    }

    /// Queue `data` for the writer task. Drops the message (and counts the
    /// drop) when the queue is full or the connection is gone.
    pub fn enqueue_for_sending(&self, data: Vec<u8>) -> bool {
        match self.outbound.try_send(data) {
            Ok(()) => true,
            Err(e) => {
                PeerMetrics::incr(&self.metrics.dropped_send_packets);
                tracing::debug!(peer = %self.id(), error = %e, "dropping outbound message");
                false
            }
        }
    }

    /// Ask the connection tasks to close this connection.
    pub fn disconnect(&self) {
        self.disconnect.cancel();
    }

    pub fn disconnect_token(&self) -> CancellationToken {
        self.disconnect.clone()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, PeerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, PeerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("connection_id", &self.connection_id)
            .field("origin", &self.origin)
            .field("id", &self.id())
            .field("handshaked", &self.is_handshaked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn handshake_completes_after_two_steps() {
        let (peer, _rx) = Peer::new(1, PeerOrigin::Inbound, addr("10.0.0.1:40000"));
        assert!(!peer.is_handshaked());
        assert!(!peer.handshake_step());
        assert!(peer.handshake_step());
        assert!(peer.is_handshaked());
        assert!(!peer.handshake_step());
    }

    #[test]
    fn identity_follows_advertised_port() {
        let (peer, _rx) = Peer::new(1, PeerOrigin::Inbound, addr("10.0.0.1:40000"));
        assert_eq!(peer.id().as_str(), "10.0.0.1:40000");
        assert_eq!(peer.dialed_port(), None);
        peer.set_identity(PeerId::new(peer.ip(), 15600), 15600);
        assert_eq!(peer.id().as_str(), "10.0.0.1:15600");
    }

    #[test]
    fn outbound_remembers_dialed_port() {
        let (peer, _rx) = Peer::new(1, PeerOrigin::Outbound, addr("10.0.0.2:15600"));
        assert_eq!(peer.dialed_port(), Some(15600));
    }

    #[test]
    fn sting_support_depends_on_negotiated_version() {
        let (peer, _rx) = Peer::new(1, PeerOrigin::Outbound, addr("10.0.0.2:15600"));
        peer.set_protocol_version(1);
        assert!(!peer.supports_sting());
        peer.set_protocol_version(2);
        assert!(peer.supports_sting());
    }

    #[tokio::test]
    async fn full_send_queue_counts_drops() {
        let (peer, mut rx) = Peer::new(1, PeerOrigin::Outbound, addr("10.0.0.2:15600"));
        for _ in 0..SEND_QUEUE_CAPACITY {
            assert!(peer.enqueue_for_sending(vec![1]));
        }
        assert!(!peer.enqueue_for_sending(vec![2]));
        assert_eq!(PeerMetrics::get(&peer.metrics.dropped_send_packets), 1);
        assert_eq!(rx.recv().await, Some(vec![1]));
    }
}
