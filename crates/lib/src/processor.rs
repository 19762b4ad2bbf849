//! Message processor: turns one inbound message into at most one reply.
//!
//! Per message, inside a typing session: resolve text (transcribing audio), deliver it to the
//! backend, then send the backend's reply, stay silent, or send a busy placeholder carrying a
//! correlation id. `Relay` is the entry point the transport adapter calls; it routes every
//! message through the per-key dispatcher.

use crate::channels::{InboundMessage, MessageKind, Transport};
use crate::config::{Config, RepliesConfig};
use crate::delivery::{classify_failure, correlation_id, BusyReason, DeliveryClient, DeliveryFailure, DeliveryResult};
use crate::dispatch::Dispatcher;
use crate::transcribe::{Transcriber, TranscriptionBridge};
use crate::typing::{TypingController, TypingError};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Body POSTed to the backend for every resolved message.
#[derive(Debug, Serialize)]
pub struct BackendRequest<'a> {
    pub from: &'a str,
    pub text: &'a str,
}

/// What happened to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Backend answered and the reply was sent.
    Replied,
    /// Backend accepted the message and chose not to answer.
    Silent,
    /// Audio could not be turned into text; the user was asked to repeat.
    AskedToRepeat,
    /// No text at all; the user was asked to clarify.
    Clarified,
    /// Delivery failed and a busy reply was sent.
    Busy { reason: BusyReason, event_id: String },
    /// Delivery failed but the busy reply was withheld.
    Suppressed { reason: BusyReason, event_id: String },
}

impl Outcome {
    /// True when the message was dealt with on purpose rather than lost to a failure.
    pub fn handled(&self) -> bool {
        !matches!(self, Outcome::Busy { .. } | Outcome::Suppressed { .. })
    }
}

enum ResolvedText {
    Text(String),
    PleaseRepeat,
    Clarify,
}

/// Processor knobs that come from config.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub endpoint: Option<String>,
    pub timeout: Duration,
    pub typing_max: Duration,
    pub replies: RepliesConfig,
}

impl ProcessorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.backend.url.clone(),
            timeout: config.delivery_timeout(),
            typing_max: config.typing_settings().max,
            replies: config.replies.clone(),
        }
    }
}

pub struct Processor {
    transport: Arc<dyn Transport>,
    delivery: DeliveryClient,
    typing: TypingController,
    transcription: TranscriptionBridge,
    options: ProcessorOptions,
}

impl Processor {
    pub fn new(
        transport: Arc<dyn Transport>,
        delivery: DeliveryClient,
        typing: TypingController,
        transcription: TranscriptionBridge,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            transport,
            delivery,
            typing,
            transcription,
            options,
        }
    }

    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        let typing = TypingController::new(transport.clone(), config.typing_settings().heartbeat);
        Self::new(
            transport,
            DeliveryClient::new(config.retry_policy()),
            typing,
            TranscriptionBridge::new(transcriber, config.transcription_concurrency())
                .with_timeout(config.transcription_timeout()),
            ProcessorOptions::from_config(config),
        )
    }

    /// Handle `msg` inside a typing session bounded by the fail-safe ceiling.
    pub async fn process(self: &Arc<Self>, msg: InboundMessage) -> Result<Outcome, TypingError> {
        let key = msg.key.clone();
        let this = Arc::clone(self);
        self.typing
            .run_with_typing(&key, async move { this.handle(msg).await }, self.options.typing_max)
            .await
    }

    async fn handle(&self, msg: InboundMessage) -> Outcome {
        let text = match self.resolve_text(&msg).await {
            ResolvedText::Text(t) => t,
            ResolvedText::PleaseRepeat => {
                self.reply(&msg.key, &self.options.replies.please_repeat).await;
                return Outcome::AskedToRepeat;
            }
            ResolvedText::Clarify => {
                self.reply(&msg.key, &self.options.replies.clarification).await;
                return Outcome::Clarified;
            }
        };

        let request = BackendRequest {
            from: &msg.key,
            text: &text,
        };
        let result = self
            .delivery
            .send(self.options.endpoint.as_deref(), &request, self.options.timeout)
            .await;
        match result {
            DeliveryResult::Success(ok) => match ok.reply() {
                Some(reply) => {
                    self.reply(&msg.key, reply).await;
                    Outcome::Replied
                }
                None => {
                    log::info!(
                        "processor[{}]: backend handled message without reply (status {})",
                        msg.key,
                        ok.status
                    );
                    Outcome::Silent
                }
            },
            DeliveryResult::Failure(failure) => self.busy(&msg.key, &failure).await,
        }
    }

    async fn resolve_text(&self, msg: &InboundMessage) -> ResolvedText {
        match msg.kind {
            MessageKind::Text => match msg.body.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
                Some(body) => ResolvedText::Text(body.to_string()),
                None => ResolvedText::Clarify,
            },
            MessageKind::Audio => {
                let Some(media) = msg.media.as_ref() else {
                    log::warn!("processor[{}]: audio message without media", msg.key);
                    return ResolvedText::Clarify;
                };
                let audio = match media.fetch().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!("processor[{}]: {}", msg.key, e);
                        return ResolvedText::PleaseRepeat;
                    }
                };
                let text = self.transcription.transcribe(audio, &media.mimetype).await;
                if text.is_empty() {
                    ResolvedText::PleaseRepeat
                } else {
                    log::info!("processor[{}]: transcribed audio ({} chars)", msg.key, text.chars().count());
                    ResolvedText::Text(text)
                }
            }
            MessageKind::Unknown => ResolvedText::Clarify,
        }
    }

    async fn busy(&self, key: &str, failure: &DeliveryFailure) -> Outcome {
        let reason = classify_failure(failure);
        let event_id = correlation_id();
        let suppressed = reason.suppresses_reply();
        log::warn!(
            "{}",
            json!({
                "msg": "busy",
                "eventId": event_id,
                "reason": reason,
                "key": key,
                "attempts": failure.attempts,
                "elapsedMs": failure.elapsed_ms,
                "status": failure.status,
                "errorCode": failure.error_code.map(|c| c.as_str()),
                "requestId": failure.request_id,
                "cause": failure.cause(),
                "suppressed": suppressed,
            })
        );
        if suppressed {
            return Outcome::Suppressed { reason, event_id };
        }
        self.reply(key, &self.options.replies.busy_with_id(&event_id)).await;
        Outcome::Busy { reason, event_id }
    }

    async fn reply(&self, key: &str, text: &str) {
        if let Err(e) = self.transport.send_text(key, text).await {
            log::warn!("processor[{}]: send via {} failed: {}", key, self.transport.id(), e);
        }
    }
}

/// Entry point for the transport adapter: one call per inbound message.
pub struct Relay {
    dispatcher: Dispatcher,
    processor: Arc<Processor>,
}

impl Relay {
    pub fn new(dispatcher: Dispatcher, processor: Arc<Processor>) -> Self {
        Self {
            dispatcher,
            processor,
        }
    }

    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self::new(
            Dispatcher::new(config.dispatch_settings()),
            Arc::new(Processor::from_config(config, transport, transcriber)),
        )
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Queue `msg` behind earlier messages of the same conversation. Returns once queued.
    pub async fn on_message(&self, msg: InboundMessage) {
        let key = msg.key.clone();
        let processor = Arc::clone(&self.processor);
        let label = key.clone();
        self.dispatcher
            .submit(&key, async move {
                let outcome = processor.process(msg).await?;
                log::debug!("relay[{}]: {:?}", label, outcome);
                Ok(())
            })
            .await;
    }
}
