//! Peer registry, handshake admission and peering events.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tangle_protocol::Handshake;
use tangle_types::Address;
use tokio::sync::broadcast;

use crate::peer::{AutopeeringInfo, Peer, PeerId, PeerOrigin};
use crate::HandshakeError;

/// Capacity of the peering event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Admission parameters every neighbor has to agree with.
#[derive(Clone, Debug)]
pub struct PeeringConfig {
    pub coordinator: Address,
    pub mwm: u8,
    /// Maximum number of connected neighbors.
    pub max_peers: usize,
    /// Accept unknown peers instead of only whitelisted ones.
    pub accept_any_peer: bool,
}

/// Lifecycle notifications for other subsystems.
#[derive(Clone, Debug)]
pub enum PeeringEvent {
    /// Both handshakes of a connection went through.
    HandshakeCompleted(PeerId),
    /// The peer is connected and may receive gossip.
    PeerConnected(Arc<Peer>),
    /// An inbound peer turned out to be a whitelisted autopeering neighbor.
    ConnectedAutopeered(Arc<Peer>),
    PeerDisconnected(PeerId),
}

// ---------------------------------------------------------------------------
// Peering manager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PeerSets {
    /// Outbound peers from the moment they are dialed, inbound ones once
    /// their handshake is verified. Keyed by connection id.
    connected: HashMap<u64, Arc<Peer>>,
    /// Inbound peers whose handshake has not been verified yet.
    in_flight: HashMap<u64, Arc<Peer>>,
}

/// Central registry of neighbors.
///
/// Handshake verification runs under one manager-wide lock so that two
/// connections from the same peer cannot both be admitted.
pub struct PeeringManager {
    config: PeeringConfig,
    shutdown: AtomicBool,
    handshake_lock: Mutex<()>,
    peers: RwLock<PeerSets>,
    whitelist: RwLock<HashMap<PeerId, Option<AutopeeringInfo>>>,
    blacklist: RwLock<HashSet<IpAddr>>,
    events: broadcast::Sender<PeeringEvent>,
    next_connection_id: AtomicU64,
}

impl PeeringManager {
    pub fn new(config: PeeringConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            shutdown: AtomicBool::new(false),
            handshake_lock: Mutex::new(()),
            peers: RwLock::new(PeerSets::default()),
            whitelist: RwLock::new(HashMap::new()),
            blacklist: RwLock::new(HashSet::new()),
            events,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PeeringConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeeringEvent> {
        self.events.subscribe()
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    // -- Whitelist / blacklist ----------------------------------------------

    pub fn whitelist(&self, id: PeerId, autopeering: Option<AutopeeringInfo>) {
        self.whitelist
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, autopeering);
    }

    pub fn is_whitelisted(&self, id: &PeerId) -> bool {
        self.whitelist
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn blacklist(&self, ip: IpAddr) {
        tracing::info!(%ip, "blacklisting address");
        self.blacklist
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ip);
    }

    pub fn is_blacklisted(&self, ip: &IpAddr) -> bool {
        self.blacklist
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(ip)
    }

    // -- Connections ----------------------------------------------------------

    /// Track a new connection. Outbound peers count as connected right away;
    /// inbound peers wait for their handshake.
    pub fn register(&self, peer: Arc<Peer>) {
        let mut sets = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        match peer.origin() {
            PeerOrigin::Outbound => sets.connected.insert(peer.connection_id(), peer),
            PeerOrigin::Inbound => sets.in_flight.insert(peer.connection_id(), peer),
        };
    }

    /// Forget a connection and close it.
    pub fn remove(&self, peer: &Peer) {
        let was_connected = {
            let mut sets = self.peers.write().unwrap_or_else(PoisonError::into_inner);
            sets.in_flight.remove(&peer.connection_id());
            sets.connected.remove(&peer.connection_id()).is_some()
        };
        peer.disconnect();

        if was_connected && peer.is_handshaked() {
            tracing::info!(peer = %peer.id(), "peer disconnected");
            let _ = self.events.send(PeeringEvent::PeerDisconnected(peer.id()));
        }
    }

    /// Snapshot of every connected peer that completed its handshake.
    pub fn connected_peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
            .values()
            .filter(|p| p.is_handshaked())
            .cloned()
            .collect()
    }

    /// Run `f` for every connected, handshaked peer. The registry lock is
    /// not held while `f` runs.
    pub fn for_each_connected(&self, mut f: impl FnMut(&Arc<Peer>)) {
        for peer in self.connected_peers() {
            f(&peer);
        }
    }

    pub fn connected_count(&self) -> usize {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
            .len()
    }

    pub fn slots_filled(&self) -> bool {
        self.connected_count() >= self.config.max_peers
    }

    pub fn is_connected(&self, id: &PeerId) -> bool {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
            .values()
            .any(|p| &p.id() == id)
    }

    // -- Shutdown -------------------------------------------------------------

    /// Refuse further handshakes and close every connection.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let peers: Vec<Arc<Peer>> = {
            let sets = self.peers.read().unwrap_or_else(PoisonError::into_inner);
            sets.connected
                .values()
                .chain(sets.in_flight.values())
                .cloned()
                .collect()
        };
        for peer in peers {
            peer.disconnect();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    // -- Handshake ------------------------------------------------------------

    /// Our handshake was written to the peer.
    pub fn handshake_sent(&self, peer: &Arc<Peer>) {
        self.handshake_step(peer);
    }

    /// Admit or refuse a peer based on its handshake.
    pub fn verify_handshake(
        &self,
        peer: &Arc<Peer>,
        handshake: &Handshake,
    ) -> Result<(), HandshakeError> {
        let _guard = self
            .handshake_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.is_shut_down() {
            return Err(HandshakeError::Shutdown);
        }
        if peer.protocol_version() != 0 {
            return Err(HandshakeError::DuplicateHandshake(peer.id()));
        }
        if self.config.accept_any_peer && self.free_slots_exhausted(peer) {
            return Err(HandshakeError::SlotsFilled);
        }
        if handshake.mwm != self.config.mwm {
            return Err(HandshakeError::MwmMismatch {
                ours: self.config.mwm,
                theirs: handshake.mwm,
            });
        }
        if handshake.coordinator != self.config.coordinator {
            return Err(HandshakeError::CoordinatorMismatch);
        }
        let version = handshake.negotiate_version().map_err(|e| match e {
            tangle_protocol::ProtocolError::UnsupportedVersion(v) => {
                HandshakeError::UnsupportedVersion(v)
            }
            _ => HandshakeError::UnsupportedVersion(0),
        })?;

        match peer.origin() {
            PeerOrigin::Inbound => {
                let id = PeerId::new(peer.ip(), handshake.server_port);
                peer.set_identity(id.clone(), handshake.server_port);

                let autopeering = self
                    .whitelist
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&id)
                    .cloned()
                    .flatten();
                if let Some(info) = autopeering {
                    peer.set_autopeering(info);
                    let _ = self
                        .events
                        .send(PeeringEvent::ConnectedAutopeered(Arc::clone(peer)));
                }
            }
            PeerOrigin::Outbound => {
                let dialed = peer.dialed_port().unwrap_or_default();
                if dialed != handshake.server_port {
                    return Err(HandshakeError::PortMismatch {
                        dialed,
                        advertised: handshake.server_port,
                    });
                }
                peer.set_server_port(handshake.server_port);
            }
        }

        if self.is_duplicate(peer, handshake.server_port) {
            return Err(HandshakeError::AlreadyConnected(peer.id()));
        }

        let id = peer.id();
        if !self.config.accept_any_peer && !self.is_whitelisted(&id) {
            self.blacklist(peer.ip());
            return Err(HandshakeError::NotWhitelisted(id));
        }

        peer.set_protocol_version(version);
        if peer.origin() == PeerOrigin::Inbound {
            let mut sets = self.peers.write().unwrap_or_else(PoisonError::into_inner);
            sets.in_flight.remove(&peer.connection_id());
            sets.connected.insert(peer.connection_id(), Arc::clone(peer));
        }

        tracing::debug!(peer = %id, version, "handshake verified");
        self.handshake_step(peer);
        Ok(())
    }

    /// Connected peers, excluding `peer` itself, fill every slot.
    fn free_slots_exhausted(&self, peer: &Peer) -> bool {
        let sets = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let others = sets
            .connected
            .keys()
            .filter(|id| **id != peer.connection_id())
            .count();
        others >= self.config.max_peers
    }

    /// Another connection already links us to the same IP and server port.
    fn is_duplicate(&self, peer: &Peer, server_port: u16) -> bool {
        let sets = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        sets.connected.values().any(|other| {
            other.connection_id() != peer.connection_id()
                && other.ip() == peer.ip()
                && other.server_port() == Some(server_port)
        })
    }

    fn handshake_step(&self, peer: &Arc<Peer>) {
        if !peer.handshake_step() {
            return;
        }
        let id = peer.id();
        tracing::info!(peer = %id, sting = peer.supports_sting(), "handshake completed");
        let _ = self.events.send(PeeringEvent::HandshakeCompleted(id));
        if !self.is_shut_down() {
            let _ = self
                .events
                .send(PeeringEvent::PeerConnected(Arc::clone(peer)));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
