//! Outbound capabilities the relay needs from the chat transport.

use async_trait::async_trait;

/// Presence signal shown to the other side of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Composing,
    Paused,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Presence::Composing => "composing",
            Presence::Paused => "paused",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not configured")]
    NotConfigured,
    #[error("transport request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transport rejected request: {0}")]
    Rejected(String),
}

/// Send text and presence to a conversation. Both are best-effort from the relay's point of view:
/// callers log and drop errors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport id (e.g. "bridge").
    fn id(&self) -> &str;
    /// Send a text message to a conversation.
    async fn send_text(&self, key: &str, text: &str) -> Result<(), TransportError>;
    /// Update the presence shown in a conversation.
    async fn set_presence(&self, key: &str, presence: Presence) -> Result<(), TransportError>;
}
