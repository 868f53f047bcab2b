use thiserror::Error;

use crate::peer::PeerId;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("peer {0} closed the connection")]
    ConnectionClosed(PeerId),

    #[error("peer {peer} sent {message} before completing the handshake")]
    UnexpectedMessage { peer: PeerId, message: String },

    #[error("handshake rejected: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("protocol error: {0}")]
    Protocol(#[from] tangle_protocol::ProtocolError),

    #[error("broadcast queue is closed")]
    BroadcastQueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a handshake is refused. Each one closes the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("node is shutting down")]
    Shutdown,

    #[error("all peering slots are filled")]
    SlotsFilled,

    #[error("minimum weight magnitude mismatch: ours {ours}, theirs {theirs}")]
    MwmMismatch { ours: u8, theirs: u8 },

    #[error("coordinator address mismatch")]
    CoordinatorMismatch,

    #[error("no common protocol version, peer supports up to version {0}")]
    UnsupportedVersion(u16),

    #[error("peer advertised port {advertised} but was dialed on {dialed}")]
    PortMismatch { dialed: u16, advertised: u16 },

    #[error("peer {0} is already connected")]
    AlreadyConnected(PeerId),

    #[error("peer {0} is not whitelisted")]
    NotWhitelisted(PeerId),

    #[error("duplicate handshake from {0}")]
    DuplicateHandshake(PeerId),
}
