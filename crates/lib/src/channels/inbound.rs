//! Normalized inbound message handed from the transport adapter to the relay core.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// What the message carries; decides how text is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Audio,
    Unknown,
}

impl MessageKind {
    /// Map a bridge message type (`chat`, `audioMessage`, ...) to a kind.
    pub fn from_bridge_type(typ: &str) -> Self {
        match typ.trim() {
            "chat" | "text" | "conversation" | "extendedTextMessage" => MessageKind::Text,
            "audio" | "audioMessage" | "ptt" | "voice" => MessageKind::Audio,
            _ => MessageKind::Unknown,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media download failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("media download returned status {0}")]
    Status(u16),
    #[error("media unavailable: {0}")]
    Unavailable(String),
}

/// Lazy byte-fetch capability for a message's attachment.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, MediaError>;
}

/// Attachment metadata plus the capability to download it on demand.
#[derive(Clone)]
pub struct MediaDescriptor {
    pub mimetype: String,
    source: Arc<dyn MediaSource>,
}

impl MediaDescriptor {
    pub fn new(mimetype: impl Into<String>, source: Arc<dyn MediaSource>) -> Self {
        Self {
            mimetype: mimetype.into(),
            source,
        }
    }

    pub async fn fetch(&self) -> Result<Bytes, MediaError> {
        self.source.fetch().await
    }
}

impl fmt::Debug for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaDescriptor")
            .field("mimetype", &self.mimetype)
            .finish_non_exhaustive()
    }
}

/// A message from the transport, keyed by conversation. Consumed once by the processor.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Conversation key: selects the dispatch queue and the typing target.
    pub key: String,
    pub kind: MessageKind,
    pub body: Option<String>,
    pub media: Option<MediaDescriptor>,
}

impl InboundMessage {
    pub fn text(key: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: MessageKind::Text,
            body: Some(body.into()),
            media: None,
        }
    }

    pub fn audio(key: impl Into<String>, media: MediaDescriptor) -> Self {
        Self {
            key: key.into(),
            kind: MessageKind::Audio,
            body: None,
            media: Some(media),
        }
    }
}
