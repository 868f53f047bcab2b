//! Gossip layer of the Tangle node.
//!
//! Admits neighbors through the handshake verifier, drives their
//! connections, tracks which transactions we still need (the request queue),
//! deduplicates and validates received transactions (work units and the
//! processor), fans new transactions out to every neighbor (the broadcast
//! queue) and asks STING neighbors for what we miss (the requester).

pub mod broadcast;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod peer;
pub mod peer_manager;
pub mod processor;
pub mod request_queue;
pub mod requester;
pub mod work_unit;

pub use broadcast::{run_broadcast_queue, Broadcast, BroadcastQueue, BroadcastResult};
pub use connection::{run_connection, ConnectionContext};
pub use error::{HandshakeError, NetworkError};
pub use metrics::{ServerMetrics, ServerMetricsSnapshot};
pub use peer::{AutopeeringInfo, Peer, PeerId, PeerMetrics, PeerOrigin};
pub use peer_manager::{PeeringConfig, PeeringEvent, PeeringManager};
pub use processor::{InboundMessage, ProcessedTransaction, Processor, ProcessorConfig};
pub use request_queue::{Request, RequestQueue};
pub use requester::{
    broadcast_heartbeat, own_heartbeat, request_from_neighbors, run_requester, send_heartbeat,
    send_latest_milestone_request, send_transaction_request,
};
pub use work_unit::{CachedWorkUnit, WorkUnit, WorkUnitCache, WorkUnitState};
