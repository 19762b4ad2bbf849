//! HTTP bridge transport: a sidecar owns the chat connection; we POST replies and presence to it
//! and it POSTs normalized events to the gateway's `/inbound` route.

use crate::channels::inbound::{InboundMessage, MediaDescriptor, MediaError, MediaSource, MessageKind};
use crate::channels::transport::{Presence, Transport, TransportError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Largest attachment we download; matches the transcription API's upload limit.
pub const MAX_MEDIA_BYTES: usize = 25 * 1024 * 1024;

/// Ceiling for one attachment download, body included.
pub const MEDIA_TIMEOUT: Duration = Duration::from_secs(30);

/// Ceiling for one `/send-text` or `/presence` call.
pub const BRIDGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Event payload POSTed by the bridge for every incoming chat message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    /// Conversation key (remote chat id).
    #[serde(default)]
    pub from: Option<String>,
    /// Message type as reported by the bridge (`chat`, `audio`, `audioMessage`, ...).
    #[serde(rename = "type", default)]
    pub typ: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    /// Where the bridge serves the decrypted attachment, fetched only when needed.
    #[serde(default)]
    pub media_url: Option<String>,
    /// Messages we sent ourselves are echoed by some bridges.
    #[serde(default)]
    pub from_me: bool,
}

impl BridgeEvent {
    /// Normalize into an inbound message. `None` when the event has no sender.
    pub fn into_inbound(self, client: &reqwest::Client) -> Option<InboundMessage> {
        let key = self.from.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
        let kind = MessageKind::from_bridge_type(&self.typ);
        let media = self.media_url.filter(|u| !u.trim().is_empty()).map(|url| {
            let mimetype = self
                .mimetype
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let source: Arc<dyn MediaSource> = Arc::new(HttpMedia::new(client.clone(), url));
            MediaDescriptor::new(mimetype, source)
        });
        Some(InboundMessage {
            key,
            kind,
            body: self.body,
            media,
        })
    }
}

/// Attachment served over HTTP by the bridge.
pub struct HttpMedia {
    client: reqwest::Client,
    url: String,
    max_bytes: usize,
    timeout: Duration,
}

impl HttpMedia {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            max_bytes: MAX_MEDIA_BYTES,
            timeout: MEDIA_TIMEOUT,
        }
    }

    pub fn with_limit(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MediaSource for HttpMedia {
    async fn fetch(&self) -> Result<Bytes, MediaError> {
        let res = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(MediaError::Status(res.status().as_u16()));
        }
        let mut buf = BytesMut::new();
        let mut chunks = res.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > self.max_bytes {
                return Err(MediaError::Unavailable(format!(
                    "attachment larger than {} bytes",
                    self.max_bytes
                )));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

/// Transport that forwards sends and presence updates to the bridge over HTTP.
pub struct BridgeTransport {
    id: String,
    base_url: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl BridgeTransport {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            id: "bridge".to_string(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            client: reqwest::Client::new(),
            timeout: BRIDGE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// HTTP client shared with lazily fetched media.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), TransportError> {
        let base = self.base_url.as_ref().ok_or(TransportError::NotConfigured)?;
        let url = format!("{}{}", base, path);
        let res = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TransportError::Rejected(format!("{} {} {}", path, status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_text(&self, key: &str, text: &str) -> Result<(), TransportError> {
        log::info!("sending text to {} ({} chars)", key, text.chars().count());
        self.post("/send-text", serde_json::json!({ "to": key, "text": text }))
            .await
    }

    async fn set_presence(&self, key: &str, presence: Presence) -> Result<(), TransportError> {
        self.post(
            "/presence",
            serde_json::json!({ "to": key, "state": presence.as_str() }),
        )
        .await
    }
}
