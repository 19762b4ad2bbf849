//! Speech-to-text behind a bounded pool.
//!
//! `TranscriptionBridge` caps how many transcriptions run at once across all conversations and
//! turns every provider failure into empty text, so callers only have to handle "no text".

mod whisper;

pub use whisper::WhisperTranscriber;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Default ceiling for one transcription, pool wait excluded.
pub const TRANSCRIPTION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("transcription provider not configured")]
    NotConfigured,
    #[error("transcription request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transcription api error: {0}")]
    Api(String),
}

/// A speech-to-text provider.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Bytes, mimetype: &str) -> Result<String, TranscribeError>;
}

/// Shared, concurrency-limited front for a `Transcriber`.
#[derive(Clone)]
pub struct TranscriptionBridge {
    inner: Arc<dyn Transcriber>,
    permits: Arc<Semaphore>,
    limit: usize,
    timeout: Duration,
}

impl TranscriptionBridge {
    pub fn new(inner: Arc<dyn Transcriber>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            inner,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
            timeout: TRANSCRIPTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Free pool slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Transcribe `audio`; empty string when there is nothing usable.
    pub async fn transcribe(&self, audio: Bytes, mimetype: &str) -> String {
        if audio.is_empty() {
            log::warn!("transcription skipped: empty {} payload", mimetype);
            return String::new();
        }
        let _permit = match self.permits.acquire().await {
            Ok(p) => p,
            Err(_) => {
                log::warn!("transcription pool closed");
                return String::new();
            }
        };
        match tokio::time::timeout(self.timeout, self.inner.transcribe(audio, mimetype)).await {
            Ok(Ok(text)) => text.trim().to_string(),
            Ok(Err(e)) => {
                log::warn!("transcription failed ({}): {}", mimetype, e);
                String::new()
            }
            Err(_) => {
                log::warn!(
                    "transcription timed out after {} ms ({})",
                    self.timeout.as_millis(),
                    mimetype
                );
                String::new()
            }
        }
    }
}
