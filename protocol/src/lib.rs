//! Wire protocol: TLV framing, the message registry, the handshake codec,
//! feature-set negotiation and the legacy and STING message builders.
//!
//! Every message on the wire is a 3-byte header (type id + little-endian
//! body length) followed by the body. The [`Framer`] turns an arbitrarily
//! fragmented byte stream back into [`Message`]s.

pub mod error;
pub mod framer;
pub mod handshake;
pub mod legacy;
pub mod message;
pub mod sting;
pub mod tlv;
pub mod transaction;
pub mod version;

pub use error::ProtocolError;
pub use framer::Framer;
pub use handshake::Handshake;
pub use message::{Message, MessageDefinition, MessageType};
pub use sting::Heartbeat;
pub use transaction::{ParseError, ParsedTransaction, TransactionParser};
pub use version::{negotiate_version, LEGACY_GOSSIP_VERSION, STING_VERSION, SUPPORTED_FEATURE_SET};
