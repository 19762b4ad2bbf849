//! Test doubles shared by unit tests.

use crate::channels::{Presence, Transport, TransportError};
use crate::transcribe::{TranscribeError, Transcriber};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Transport that records every call; optionally fails them all, or never answers presence.
#[derive(Default)]
pub struct RecordingTransport {
    fail: bool,
    hang: bool,
    texts: Mutex<Vec<(String, String)>>,
    presence: Mutex<Vec<(String, Presence)>>,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<(String, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn presence_for(&self, key: &str) -> Vec<Presence> {
        self.presence
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, p)| *p)
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn id(&self) -> &str {
        "recording"
    }

    async fn send_text(&self, key: &str, text: &str) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Rejected("send-text 503".to_string()));
        }
        self.texts
            .lock()
            .unwrap()
            .push((key.to_string(), text.to_string()));
        Ok(())
    }

    async fn set_presence(&self, key: &str, presence: Presence) -> Result<(), TransportError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail {
            return Err(TransportError::Rejected("presence 503".to_string()));
        }
        self.presence
            .lock()
            .unwrap()
            .push((key.to_string(), presence));
        Ok(())
    }
}

/// Transcriber returning a fixed result and counting calls.
pub struct FixedTranscriber {
    text: Option<String>,
    calls: AtomicUsize,
}

impl FixedTranscriber {
    pub fn returning(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _audio: Bytes, _mimetype: &str) -> Result<String, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.text
            .clone()
            .ok_or_else(|| TranscribeError::Api("400 unsupported audio".to_string()))
    }
}
