//! Gateway: HTTP surface of the relay.
//!
//! Single port serves the health probe, the bridge's inbound event webhook and the REST
//! send endpoint used by external systems to push a message into a conversation.

mod protocol;
mod server;

pub use protocol::{InboundAck, SendTextRequest, SendTextResponse};
pub use server::{router, run_gateway, GatewayState};
