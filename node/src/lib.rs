//! Tangle node core.
//!
//! Assembles the gossip layer and milestone confirmation into a running
//! node:
//! - Loads configuration and installs structured logging
//! - Listens for neighbors and keeps connections to known peers
//! - Runs the message processor, the broadcast fan-out and the request sweeper
//! - Confirms milestones with White-Flag and exports Prometheus metrics

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod node;
pub mod shutdown;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use metrics::NodeMetrics;
pub use node::GossipNode;
pub use shutdown::ShutdownController;
