//! Whisper-compatible transcription over multipart HTTP.

use crate::config::{self, Config};
use crate::transcribe::{TranscribeError, Transcriber, TRANSCRIPTION_TIMEOUT};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[derive(Clone)]
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WhisperTranscriber {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key,
            model: model.into(),
            timeout: TRANSCRIPTION_TIMEOUT,
        }
    }

    /// Per-request ceiling, connect through end of body.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint, key, model and timeout from config (env overrides included).
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config::resolve_transcription_url(config),
            config::resolve_transcription_key(config),
            config.transcription.model.clone(),
        )
        .with_timeout(config.transcription_timeout())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// File extension the API uses to sniff the container; parameters after `;` are ignored.
fn file_extension(mimetype: &str) -> &'static str {
    let base = mimetype.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match base.as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/webm" | "video/webm" => "webm",
        _ => "ogg",
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: Bytes, mimetype: &str) -> Result<String, TranscribeError> {
        let api_key = self.api_key.as_ref().ok_or(TranscribeError::NotConfigured)?;
        let filename = format!("audio.{}", file_extension(mimetype));
        let essence = mimetype.split(';').next().unwrap_or("").trim();
        let mut part = Part::bytes(audio.to_vec()).file_name(filename);
        if !essence.is_empty() {
            part = part.mime_str(essence)?;
        }
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let res = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TranscribeError::Api(format!("{} {}", status, body)));
        }
        let parsed: TranscriptionResponse = res.json().await?;
        log::debug!("transcribed {} chars from {}", parsed.text.len(), mimetype);
        Ok(parsed.text)
    }
}
