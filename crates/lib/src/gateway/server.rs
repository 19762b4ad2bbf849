//! Gateway server: HTTP on a single port.

use crate::channels::{BridgeEvent, BridgeTransport, Transport};
use crate::config::Config;
use crate::gateway::protocol::{InboundAck, SendTextRequest, SendTextResponse};
use crate::processor::Relay;
use crate::transcribe::{Transcriber, WhisperTranscriber};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Shared state for all routes.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub relay: Arc<Relay>,
    pub transport: Arc<dyn Transport>,
    /// Used by inbound messages to fetch their media lazily.
    pub media_client: reqwest::Client,
}

impl GatewayState {
    pub fn new(config: Config, transport: Arc<dyn Transport>, transcriber: Arc<dyn Transcriber>) -> Self {
        let relay = Relay::from_config(&config, transport.clone(), transcriber);
        Self {
            config: Arc::new(config),
            relay: Arc::new(relay),
            transport,
            media_client: reqwest::Client::new(),
        }
    }
}

/// All gateway routes bound to `state`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/inbound", post(inbound_event))
        .route("/api/enviar-mensagem", post(send_text))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// The chat bridge and the transcription provider are built from config; missing pieces are
/// logged and the server starts anyway. Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    if config.backend.url.is_none() {
        log::warn!("backend url not configured (backend.url or WEBHOOK_URL); every message will get a busy reply");
    }
    if config.transport.bridge_url.is_none() {
        log::warn!("bridge url not configured (transport.bridgeUrl or RELAY_BRIDGE_URL); replies cannot be sent");
    }
    let whisper = WhisperTranscriber::from_config(&config);
    if !whisper.is_configured() {
        log::warn!("transcription api key not configured (OPENAI_API_KEY); audio messages will be asked to repeat");
    }
    let bridge = BridgeTransport::new(config.transport.bridge_url.clone());
    let media_client = bridge.client().clone();
    let transport: Arc<dyn Transport> = Arc::new(bridge);

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let mut state = GatewayState::new(config, transport, Arc::new(whisper));
    state.media_client = media_client;
    log::info!(
        "relay ready: spacing {} ms, backend timeout {} ms, {} attempts, transcription pool {}",
        state.config.dispatch.spacing_ms,
        state.config.backend.timeout_ms,
        state.config.retry_policy().max_attempts,
        state.config.transcription_concurrency()
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Queued conversations are dropped with the runtime; they are in-memory only.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
    }))
}

fn ack(accepted: bool, reason: Option<&str>) -> Json<InboundAck> {
    Json(InboundAck {
        accepted,
        reason: reason.map(str::to_string),
    })
}

/// POST /inbound: bridge event for one chat message. Accepted events are queued on the
/// sender's conversation and answered asynchronously.
async fn inbound_event(State(state): State<GatewayState>, body: Bytes) -> (StatusCode, Json<InboundAck>) {
    let event: BridgeEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("inbound: bad event: {}", e);
            return (StatusCode::BAD_REQUEST, ack(false, Some("invalid event")));
        }
    };
    if event.from_me {
        return (StatusCode::OK, ack(false, Some("own message")));
    }
    let Some(msg) = event.into_inbound(&state.media_client) else {
        return (StatusCode::BAD_REQUEST, ack(false, Some("missing sender")));
    };
    log::info!("inbound: {:?} message from {}", msg.kind, msg.key);
    state.relay.on_message(msg).await;
    (StatusCode::ACCEPTED, ack(true, None))
}

/// POST /api/enviar-mensagem: send text straight to a conversation, bypassing the backend.
async fn send_text(
    State(state): State<GatewayState>,
    body: Bytes,
) -> (StatusCode, Json<SendTextResponse>) {
    let request: SendTextRequest = serde_json::from_slice(&body).unwrap_or_default();
    let Some((to, text)) = request.validated() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(SendTextResponse::error("both from and text are required")),
        );
    };
    match state.transport.send_text(to, text).await {
        Ok(()) => {
            log::info!("api: message sent to {}", to);
            (StatusCode::OK, Json(SendTextResponse::ok()))
        }
        Err(e) => {
            log::warn!("api: send to {} failed: {}", to, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SendTextResponse::error(e.to_string())),
            )
        }
    }
}
