//! Chat transport boundary.
//!
//! The relay never speaks the messaging protocol itself: a bridge process owns the
//! connection and exchanges normalized messages, replies and presence updates with us.

mod bridge;
mod inbound;
mod transport;

pub use bridge::{BridgeEvent, BridgeTransport, HttpMedia, BRIDGE_TIMEOUT, MAX_MEDIA_BYTES, MEDIA_TIMEOUT};
pub use inbound::{InboundMessage, MediaDescriptor, MediaError, MediaSource, MessageKind};
pub use transport::{Presence, Transport, TransportError};
