//! Backend HTTP client with per-attempt timeout, retry/backoff and failure classification.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::error::Error as _;
use std::time::{Duration, Instant};

/// Response header carrying the backend's request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Cap on the backoff exponent so very large attempt counts cannot overflow.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// How many attempts to make and how long to wait between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(600),
        }
    }
}

impl RetryPolicy {
    /// Base delay after failed attempt `attempt` (1-based): `initial * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.initial_backoff.saturating_mul(1u32 << shift)
    }
}

/// Spread `base` uniformly over ±20%.
pub fn with_jitter(base: Duration) -> Duration {
    let factor: f64 = rand::rng().random_range(0.8..=1.2);
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(base)
}

/// Transport-level failure codes, named after the socket errors they correspond to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    DnsFailure,
    /// Other connect/transfer failure.
    Network,
    /// Request could not be built or its response decoded; retrying will not help.
    Request,
    /// Endpoint missing or not a valid URL; no request was made.
    InvalidEndpoint,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnectionReset => "ECONNRESET",
            ErrorCode::ConnectionRefused => "ECONNREFUSED",
            ErrorCode::DnsFailure => "ENOTFOUND",
            ErrorCode::Network => "ENETWORK",
            ErrorCode::Request => "EREQUEST",
            ErrorCode::InvalidEndpoint => "EINVALIDURL",
        }
    }

    /// Socket-level failures other than timeouts.
    pub fn is_network(self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionReset
                | ErrorCode::ConnectionRefused
                | ErrorCode::DnsFailure
                | ErrorCode::Network
        )
    }

    pub fn is_retryable(self) -> bool {
        self == ErrorCode::Timeout || self.is_network()
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return ErrorCode::Timeout;
        }
        if err.is_builder() || err.is_redirect() || err.is_decode() {
            return ErrorCode::Request;
        }
        match io_error_kind(err) {
            Some(std::io::ErrorKind::TimedOut) => return ErrorCode::Timeout,
            Some(std::io::ErrorKind::ConnectionRefused) => return ErrorCode::ConnectionRefused,
            Some(
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof,
            ) => return ErrorCode::ConnectionReset,
            _ => {}
        }
        if err.is_connect() && chain_mentions(err, "dns error") {
            return ErrorCode::DnsFailure;
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return ErrorCode::Network;
        }
        ErrorCode::Request
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn io_error_kind(err: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = e.source();
    }
    None
}

fn chain_mentions(err: &reqwest::Error, needle: &str) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        if e.to_string().to_lowercase().contains(needle) {
            return true;
        }
        source = e.source();
    }
    false
}

/// One attempt of a logical send, kept for logs and diagnostics.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub status: Option<u16>,
    pub error_code: Option<ErrorCode>,
    pub elapsed_ms: u64,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeliverySuccess {
    /// 2xx status.
    pub status: u16,
    /// Parsed JSON body; non-JSON bodies are kept as a string, empty bodies as `null`.
    pub body: Value,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub request_id: Option<String>,
    pub history: Vec<AttemptRecord>,
}

impl DeliverySuccess {
    /// Non-blank `reply` (or `replyText`) field of the body.
    pub fn reply(&self) -> Option<&str> {
        ["reply", "replyText"]
            .iter()
            .filter_map(|field| self.body.get(*field).and_then(Value::as_str))
            .find(|text| !text.trim().is_empty())
    }

    /// The backend answered "204 No Content": handled on purpose, nothing to send.
    pub fn is_no_content(&self) -> bool {
        self.status == 204
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeliveryFailure {
    /// HTTP status of the last attempt, when one was received.
    pub status: Option<u16>,
    /// Transport error of the last attempt, when no response was received.
    pub error_code: Option<ErrorCode>,
    pub body: Option<Value>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub error_message: Option<String>,
    pub request_id: Option<String>,
    /// Still retryable when the attempt budget ran out (only set when retries were allowed).
    pub retries_exhausted: bool,
    pub history: Vec<AttemptRecord>,
}

impl DeliveryFailure {
    /// Status or error code of the last attempt, for log lines.
    pub fn cause(&self) -> String {
        match (self.status, self.error_code) {
            (Some(status), _) => status.to_string(),
            (None, Some(code)) => code.to_string(),
            (None, None) => "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DeliveryResult {
    Success(DeliverySuccess),
    Failure(DeliveryFailure),
}

impl DeliveryResult {
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryResult::Success(s) => s.attempts,
            DeliveryResult::Failure(f) => f.attempts,
        }
    }
}

/// Outcome of a single HTTP attempt.
enum AttemptOutcome {
    Response {
        status: u16,
        body: Value,
        request_id: Option<String>,
    },
    Transport {
        code: ErrorCode,
        message: String,
    },
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Client for the backend endpoint.
#[derive(Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl DeliveryClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// POST `payload` as JSON to `endpoint`. Every HTTP status is treated as data; 429, 5xx and
    /// network failures are retried until the attempt budget is spent.
    pub async fn send<P>(&self, endpoint: Option<&str>, payload: &P, timeout: Duration) -> DeliveryResult
    where
        P: Serialize + ?Sized,
    {
        let started = Instant::now();
        let url = match endpoint.map(str::trim).filter(|u| !u.is_empty()) {
            Some(u) => u,
            None => return self.invalid_endpoint("(missing endpoint)", "backend endpoint not configured"),
        };
        if let Err(e) = reqwest::Url::parse(url) {
            return self.invalid_endpoint(url, &format!("invalid backend endpoint: {}", e));
        }

        let mut history = Vec::new();
        let mut attempt: u32 = 1;
        loop {
            let started_at = Utc::now();
            let attempt_start = Instant::now();
            let outcome = self.attempt(url, payload, timeout).await;
            let (status, error_code, request_id) = match &outcome {
                AttemptOutcome::Response {
                    status, request_id, ..
                } => (Some(*status), None, request_id.clone()),
                AttemptOutcome::Transport { code, .. } => (None, Some(*code), None),
            };
            history.push(AttemptRecord {
                attempt,
                started_at,
                status,
                error_code,
                elapsed_ms: millis(attempt_start.elapsed()),
                request_id,
            });

            let outcome = match outcome {
                AttemptOutcome::Response {
                    status,
                    body,
                    request_id,
                } if (200..300).contains(&status) => {
                    return self.succeed(url, status, body, request_id, attempt, started, history);
                }
                other => other,
            };
            let retryable = match &outcome {
                AttemptOutcome::Response { status, .. } => is_retryable_status(*status),
                AttemptOutcome::Transport { code, .. } => code.is_retryable(),
            };
            if !retryable || attempt >= self.policy.max_attempts {
                let exhausted = retryable && self.policy.max_attempts > 1;
                return self.fail(url, outcome, attempt, started, history, exhausted);
            }

            let wait = with_jitter(self.policy.backoff(attempt));
            log::info!(
                "{}",
                json!({
                    "msg": "retrying delivery",
                    "attempt": attempt,
                    "waitMs": millis(wait),
                    "status": status,
                    "code": error_code.map(ErrorCode::as_str),
                    "url": url,
                })
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    async fn attempt<P>(&self, url: &str, payload: &P, timeout: Duration) -> AttemptOutcome
    where
        P: Serialize + ?Sized,
    {
        let res = match self
            .client
            .post(url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return AttemptOutcome::Transport {
                    code: ErrorCode::from_reqwest(&e),
                    message: e.to_string(),
                }
            }
        };
        let status = res.status().as_u16();
        let request_id = res
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        match res.text().await {
            Ok(text) => AttemptOutcome::Response {
                status,
                body: parse_body(&text),
                request_id,
            },
            Err(e) => AttemptOutcome::Transport {
                code: ErrorCode::from_reqwest(&e),
                message: e.to_string(),
            },
        }
    }

    fn invalid_endpoint(&self, url: &str, message: &str) -> DeliveryResult {
        log::warn!(
            "{}",
            json!({
                "msg": "delivery skipped",
                "code": ErrorCode::InvalidEndpoint.as_str(),
                "url": url,
                "error": message,
            })
        );
        DeliveryResult::Failure(DeliveryFailure {
            error_code: Some(ErrorCode::InvalidEndpoint),
            error_message: Some(message.to_string()),
            ..DeliveryFailure::default()
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn succeed(
        &self,
        url: &str,
        status: u16,
        body: Value,
        request_id: Option<String>,
        attempts: u32,
        started: Instant,
        history: Vec<AttemptRecord>,
    ) -> DeliveryResult {
        let elapsed_ms = millis(started.elapsed());
        log::info!(
            "{}",
            json!({
                "msg": "delivery succeeded",
                "status": status,
                "attempts": attempts,
                "elapsedMs": elapsed_ms,
                "requestId": request_id,
                "url": url,
            })
        );
        DeliveryResult::Success(DeliverySuccess {
            status,
            body,
            attempts,
            elapsed_ms,
            request_id,
            history,
        })
    }

    fn fail(
        &self,
        url: &str,
        outcome: AttemptOutcome,
        attempts: u32,
        started: Instant,
        history: Vec<AttemptRecord>,
        retries_exhausted: bool,
    ) -> DeliveryResult {
        let elapsed_ms = millis(started.elapsed());
        let failure = match outcome {
            AttemptOutcome::Response {
                status,
                body,
                request_id,
            } => DeliveryFailure {
                status: Some(status),
                body: Some(body),
                request_id,
                ..DeliveryFailure::default()
            },
            AttemptOutcome::Transport { code, message } => DeliveryFailure {
                error_code: Some(code),
                error_message: Some(message),
                ..DeliveryFailure::default()
            },
        };
        let failure = DeliveryFailure {
            attempts,
            elapsed_ms,
            retries_exhausted,
            history,
            ..failure
        };
        log::warn!(
            "{}",
            json!({
                "msg": "delivery failed",
                "status": failure.status,
                "code": failure.error_code.map(ErrorCode::as_str),
                "retriesExhausted": retries_exhausted,
                "attempts": attempts,
                "elapsedMs": elapsed_ms,
                "requestId": failure.request_id,
                "error": failure.error_message,
                "url": url,
            })
        );
        DeliveryResult::Failure(failure)
    }
}
