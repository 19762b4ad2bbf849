//! Shared helpers for integration tests: throwaway HTTP servers and recording fakes.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use relay::channels::{MediaError, MediaSource, Presence, Transport, TransportError};
use relay::transcribe::{TranscribeError, Transcriber};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

/// Serve `app` on an ephemeral port; returns `http://127.0.0.1:PORT`. The server task is left
/// running when the test ends.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

/// One scripted backend response.
#[derive(Debug, Clone)]
pub struct Step {
    pub status: u16,
    pub body: Option<Value>,
    pub delay: Duration,
    pub request_id: Option<&'static str>,
}

impl Step {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: None,
            delay: Duration::ZERO,
            request_id: None,
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::status(status)
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_request_id(mut self, id: &'static str) -> Self {
        self.request_id = Some(id);
        self
    }
}

#[derive(Default)]
struct BackendState {
    script: Vec<Step>,
    hits: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
}

/// Fake backend at `{url}` answering POSTs with a script; the last step repeats.
pub struct Backend {
    pub url: String,
    state: Arc<BackendState>,
}

impl Backend {
    pub async fn start(script: Vec<Step>) -> Self {
        assert!(!script.is_empty(), "backend script needs at least one step");
        let state = Arc::new(BackendState {
            script,
            ..BackendState::default()
        });
        let app = Router::new()
            .route("/webhook", post(backend_handler))
            .with_state(state.clone());
        let base = serve(app).await;
        Self {
            url: format!("{}/webhook", base),
            state,
        }
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.state.bodies.lock().unwrap().clone()
    }
}

async fn backend_handler(State(state): State<Arc<BackendState>>, Json(body): Json<Value>) -> Response {
    let n = state.hits.fetch_add(1, Ordering::SeqCst);
    state.bodies.lock().unwrap().push(body);
    let step = state.script[n.min(state.script.len() - 1)].clone();
    if !step.delay.is_zero() {
        tokio::time::sleep(step.delay).await;
    }
    let mut res = match step.body {
        Some(b) => Json(b).into_response(),
        None => ().into_response(),
    };
    *res.status_mut() = StatusCode::from_u16(step.status).unwrap();
    if let Some(id) = step.request_id {
        res.headers_mut()
            .insert("x-request-id", HeaderValue::from_static(id));
    }
    res
}

#[derive(Default)]
struct BridgeState {
    sent: Mutex<Vec<(String, String)>>,
    presence: Mutex<Vec<(String, String)>>,
}

/// Fake chat bridge: records `/send-text` and `/presence`, serves `/media/:id` as fixed bytes.
/// `/media/slow` and the `/slow/...` routes answer only after two seconds.
pub struct FakeBridge {
    pub url: String,
    state: Arc<BridgeState>,
}

impl FakeBridge {
    pub async fn start() -> Self {
        let state = Arc::new(BridgeState::default());
        let app = Router::new()
            .route("/send-text", post(bridge_send_text))
            .route("/presence", post(bridge_presence))
            .route("/media/:id", get(bridge_media))
            .route("/slow/send-text", post(bridge_stall))
            .route("/slow/presence", post(bridge_stall))
            .with_state(state.clone());
        Self {
            url: serve(app).await,
            state,
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn presence_for(&self, key: &str) -> Vec<String> {
        self.state
            .presence
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// Poll until `n` texts were sent or `within` elapses.
    pub async fn wait_for_sent(&self, n: usize, within: Duration) -> Vec<(String, String)> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let sent = self.sent();
            if sent.len() >= n || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn field(body: &Value, name: &str) -> String {
    body.get(name).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

async fn bridge_send_text(State(state): State<Arc<BridgeState>>, Json(body): Json<Value>) -> StatusCode {
    state
        .sent
        .lock()
        .unwrap()
        .push((field(&body, "to"), field(&body, "text")));
    StatusCode::OK
}

async fn bridge_presence(State(state): State<Arc<BridgeState>>, Json(body): Json<Value>) -> StatusCode {
    state
        .presence
        .lock()
        .unwrap()
        .push((field(&body, "to"), field(&body, "state")));
    StatusCode::OK
}

async fn bridge_stall() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(2)).await;
    StatusCode::OK
}

async fn bridge_media(Path(id): Path<String>) -> Response {
    if id == "missing" {
        return StatusCode::NOT_FOUND.into_response();
    }
    if id == "slow" {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    Bytes::from_static(b"OggS\0fake-opus").into_response()
}

/// Transport that records every call.
#[derive(Default)]
pub struct RecordingTransport {
    texts: Mutex<Vec<(String, String)>>,
    presence: Mutex<Vec<(String, Presence)>>,
}

impl RecordingTransport {
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
        self.texts
            .lock()
            .unwrap()
            .push((key.to_string(), text.to_string()));
        Ok(())
    }

    async fn set_presence(&self, key: &str, presence: Presence) -> Result<(), TransportError> {
        self.presence
            .lock()
            .unwrap()
            .push((key.to_string(), presence));
        Ok(())
    }
}

/// Transcriber returning fixed text and counting calls.
pub struct FixedTranscriber {
    text: String,
    calls: AtomicUsize,
}

impl FixedTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
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
        Ok(self.text.clone())
    }
}

/// In-memory attachment.
pub struct StaticMedia(pub &'static [u8]);

#[async_trait]
impl MediaSource for StaticMedia {
    async fn fetch(&self) -> Result<Bytes, MediaError> {
        Ok(Bytes::from_static(self.0))
    }
}
