//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Every option has a default; the backend URL is the only one without a usable fallback,
//! and its absence is reported per message (see `delivery`) rather than at startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::DispatchSettings;
use crate::delivery::RetryPolicy;
use crate::typing::{TypingSettings, MIN_HEARTBEAT};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP gateway settings (inbound webhook, REST send, health).
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Per-conversation queue settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Backend ("brain") endpoint and retry policy.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Typing indicator timings.
    #[serde(default)]
    pub typing: TypingConfig,

    /// Speech-to-text provider and pool size.
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Chat transport bridge.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Fixed user-visible replies.
    #[serde(default)]
    pub replies: RepliesConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 3000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Minimum pause between two messages of the same conversation (default 1000).
    #[serde(default = "default_spacing_ms")]
    pub spacing_ms: u64,
}

fn default_spacing_ms() -> u64 {
    1000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            spacing_ms: default_spacing_ms(),
        }
    }
}

/// Backend endpoint. Overridden by WEBHOOK_* env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Endpoint that receives `{from, text}` and answers `{reply}`.
    #[serde(default)]
    pub url: Option<String>,
    /// Per-attempt timeout (default 90000).
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts per message, first one included (default 3).
    #[serde(default = "default_backend_max_retries")]
    pub max_retries: u32,
    /// Base of the exponential backoff (default 600).
    #[serde(default = "default_backend_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_backend_timeout_ms() -> u64 {
    90_000
}

fn default_backend_max_retries() -> u32 {
    3
}

fn default_backend_initial_backoff_ms() -> u64 {
    600
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_backend_timeout_ms(),
            max_retries: default_backend_max_retries(),
            initial_backoff_ms: default_backend_initial_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingConfig {
    /// Interval between "composing" refreshes (default 4500).
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Fail-safe ceiling for one wrapped task (default 120000).
    #[serde(default = "default_typing_max_ms")]
    pub max_ms: u64,
}

fn default_heartbeat_ms() -> u64 {
    4_500
}

fn default_typing_max_ms() -> u64 {
    120_000
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: default_heartbeat_ms(),
            max_ms: default_typing_max_ms(),
        }
    }
}

/// Whisper-compatible transcription endpoint. Overridden by OPENAI_API_URL / OPENAI_API_KEY.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_transcription_model")]
    pub model: String,
    /// Max concurrent transcriptions. Defaults to half of the logical cores.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Ceiling for one transcription request (default 60000).
    #[serde(default = "default_transcription_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_transcription_api_url() -> String {
    "https://api.openai.com/v1/audio/transcriptions".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_transcription_timeout_ms() -> u64 {
    60_000
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_url: default_transcription_api_url(),
            api_key: None,
            model: default_transcription_model(),
            concurrency: None,
            timeout_ms: default_transcription_timeout_ms(),
        }
    }
}

/// Chat transport bridge (the sidecar that owns the messaging protocol).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Base URL of the bridge. Overridden by RELAY_BRIDGE_URL.
    #[serde(default)]
    pub bridge_url: Option<String>,
}

/// Fixed replies sent to the user when no backend answer is available.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepliesConfig {
    /// Busy message; `{id}` is replaced by the correlation id.
    #[serde(default = "default_busy_reply")]
    pub busy: String,
    /// Sent when an audio message could not be transcribed.
    #[serde(default = "default_please_repeat_reply")]
    pub please_repeat: String,
    /// Sent when no text could be extracted from the message.
    #[serde(default = "default_clarification_reply")]
    pub clarification: String,
}

fn default_busy_reply() -> String {
    "Estou um pouco ocupada agora. Por favor, tente novamente em instantes. (id {id})".to_string()
}

fn default_please_repeat_reply() -> String {
    "Desculpe, não consegui entender o áudio. Pode repetir?".to_string()
}

fn default_clarification_reply() -> String {
    "Desculpe, não consegui entender sua mensagem. Poderia repetir?".to_string()
}

impl Default for RepliesConfig {
    fn default() -> Self {
        Self {
            busy: default_busy_reply(),
            please_repeat: default_please_repeat_reply(),
            clarification: default_clarification_reply(),
        }
    }
}

impl RepliesConfig {
    /// Busy reply with the correlation id filled in.
    pub fn busy_with_id(&self, event_id: &str) -> String {
        if self.busy.contains("{id}") {
            self.busy.replace("{id}", event_id)
        } else {
            format!("{} (id {})", self.busy, event_id)
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a number", name, raw);
            None
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the backend URL: env WEBHOOK_URL overrides config.
pub fn resolve_backend_url(config: &Config) -> Option<String> {
    env_string("WEBHOOK_URL").or_else(|| non_empty(config.backend.url.as_ref()))
}

/// Resolve the transcription API key: env OPENAI_API_KEY overrides config.
pub fn resolve_transcription_key(config: &Config) -> Option<String> {
    env_string("OPENAI_API_KEY").or_else(|| non_empty(config.transcription.api_key.as_ref()))
}

/// Resolve the transcription endpoint: env OPENAI_API_URL overrides config.
pub fn resolve_transcription_url(config: &Config) -> String {
    env_string("OPENAI_API_URL").unwrap_or_else(|| config.transcription.api_url.clone())
}

/// Resolve the bridge base URL: env RELAY_BRIDGE_URL overrides config.
pub fn resolve_bridge_url(config: &Config) -> Option<String> {
    env_string("RELAY_BRIDGE_URL").or_else(|| non_empty(config.transport.bridge_url.as_ref()))
}

/// Apply env overrides in place (URL, key and the numeric WEBHOOK_* knobs).
pub fn apply_env_overrides(config: &mut Config) {
    config.backend.url = resolve_backend_url(config);
    if let Some(v) = env_number("WEBHOOK_TIMEOUT") {
        config.backend.timeout_ms = v;
    }
    if let Some(v) = env_number("WEBHOOK_MAX_RETRIES") {
        config.backend.max_retries = v;
    }
    if let Some(v) = env_number("WEBHOOK_INITIAL_BACKOFF_MS") {
        config.backend.initial_backoff_ms = v;
    }
    config.transcription.api_url = resolve_transcription_url(config);
    config.transcription.api_key = resolve_transcription_key(config);
    config.transport.bridge_url = resolve_bridge_url(config);
}

/// Half of the logical cores, at least one.
pub fn default_transcription_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1)
}

impl Config {
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            spacing: Duration::from_millis(self.dispatch.spacing_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.backend.max_retries.max(1),
            initial_backoff: Duration::from_millis(self.backend.initial_backoff_ms),
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.timeout_ms)
    }

    pub fn typing_settings(&self) -> TypingSettings {
        TypingSettings {
            heartbeat: Duration::from_millis(self.typing.heartbeat_ms).max(MIN_HEARTBEAT),
            max: Duration::from_millis(self.typing.max_ms),
        }
    }

    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_millis(self.transcription.timeout_ms.max(1))
    }

    pub fn transcription_concurrency(&self) -> usize {
        self.transcription
            .concurrency
            .filter(|n| *n > 0)
            .unwrap_or_else(default_transcription_concurrency)
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or RELAY_CONFIG_PATH). Missing file => default config.
/// Env overrides are applied after parsing. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_env_overrides(&mut config);
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.gateway.port, 3000);
        assert_eq!(c.gateway.bind, "127.0.0.1");
        assert_eq!(c.backend.timeout_ms, 90_000);
        assert_eq!(c.backend.max_retries, 3);
        assert_eq!(c.backend.initial_backoff_ms, 600);
        assert_eq!(c.typing.heartbeat_ms, 4_500);
        assert_eq!(c.typing.max_ms, 120_000);
        assert!(c.backend.url.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: Config = serde_json::from_str(
            r#"{"backend":{"url":"http://brain/webhook","maxRetries":5},"typing":{"maxMs":1000}}"#,
        )
        .unwrap();
        assert_eq!(c.backend.url.as_deref(), Some("http://brain/webhook"));
        assert_eq!(c.backend.max_retries, 5);
        assert_eq!(c.backend.timeout_ms, 90_000);
        assert_eq!(c.typing.max_ms, 1000);
        assert_eq!(c.typing.heartbeat_ms, 4_500);
    }

    #[test]
    fn retry_policy_never_allows_zero_attempts() {
        let mut c = Config::default();
        c.backend.max_retries = 0;
        assert_eq!(c.retry_policy().max_attempts, 1);
    }

    #[test]
    fn zero_heartbeat_is_raised_to_minimum() {
        let c: Config = serde_json::from_str(r#"{"typing":{"heartbeatMs":0}}"#).unwrap();
        assert_eq!(c.typing_settings().heartbeat, MIN_HEARTBEAT);
        let c: Config = serde_json::from_str(r#"{"typing":{"heartbeatMs":2000}}"#).unwrap();
        assert_eq!(c.typing_settings().heartbeat, Duration::from_millis(2_000));
    }

    #[test]
    fn transcription_timeout_defaults_to_a_minute() {
        let c = Config::default();
        assert_eq!(c.transcription_timeout(), Duration::from_secs(60));
        let c: Config =
            serde_json::from_str(r#"{"transcription":{"timeoutMs":1500}}"#).unwrap();
        assert_eq!(c.transcription_timeout(), Duration::from_millis(1_500));
    }

    #[test]
    fn transcription_concurrency_override_and_default() {
        let mut c = Config::default();
        assert!(c.transcription_concurrency() >= 1);
        c.transcription.concurrency = Some(3);
        assert_eq!(c.transcription_concurrency(), 3);
        c.transcription.concurrency = Some(0);
        assert_eq!(c.transcription_concurrency(), default_transcription_concurrency());
    }

    #[test]
    fn busy_reply_fills_correlation_id() {
        let r = RepliesConfig::default();
        let text = r.busy_with_id("busy_123");
        assert!(text.ends_with("(id busy_123)"));
        let custom = RepliesConfig {
            busy: "busy right now".to_string(),
            ..RepliesConfig::default()
        };
        assert_eq!(custom.busy_with_id("x"), "busy right now (id x)");
    }

    #[test]
    fn load_config_reads_file_and_reports_path() {
        let dir = std::env::temp_dir().join(format!("relay-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"dispatch":{"spacingMs":250},"gateway":{"port":4100}}"#).unwrap();

        let (c, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(c.dispatch_settings().spacing, Duration::from_millis(250));
        assert_eq!(c.gateway.port, 4100);

        std::fs::write(&path, "{not json").unwrap();
        assert!(load_config(Some(path)).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("relay-missing-{}.json", uuid::Uuid::new_v4()));
        let (c, _) = load_config(Some(path)).unwrap();
        assert_eq!(c.dispatch.spacing_ms, 1000);
    }
}
