//! Gateway HTTP payloads.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/enviar-mensagem`: push `text` to conversation `from`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendTextRequest {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl SendTextRequest {
    /// Conversation key and text, both trimmed-non-empty.
    pub fn validated(&self) -> Option<(&str, &str)> {
        let from = self.from.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let text = self.text.as_deref().filter(|s| !s.trim().is_empty())?;
        Some((from, text))
    }
}

/// Response of `POST /api/enviar-mensagem`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTextResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendTextResponse {
    pub fn ok() -> Self {
        Self { ok: true, error: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
        }
    }
}

/// Response of `POST /inbound`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundAck {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
