//! Why no real reply could be produced, in one place.

use crate::delivery::client::{DeliveryFailure, DeliveryResult, ErrorCode};
use serde::Serialize;
use std::fmt;

/// Classification attached to every busy reply (and every suppressed one) for log tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusyReason {
    RateLimited,
    ServerError,
    NetworkError,
    Timeout,
    RetriesExhausted,
    CircuitOpen,
    QueueOverflow,
    InvalidPayload,
    Unknown,
}

impl BusyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BusyReason::RateLimited => "RATE_LIMITED",
            BusyReason::ServerError => "SERVER_ERROR",
            BusyReason::NetworkError => "NETWORK_ERROR",
            BusyReason::Timeout => "TIMEOUT",
            BusyReason::RetriesExhausted => "RETRIES_EXHAUSTED",
            BusyReason::CircuitOpen => "CIRCUIT_OPEN",
            BusyReason::QueueOverflow => "QUEUE_OVERFLOW",
            BusyReason::InvalidPayload => "INVALID_PAYLOAD",
            BusyReason::Unknown => "UNKNOWN",
        }
    }

    /// Timeouts are answered with silence; every other reason gets the busy reply.
    pub fn suppresses_reply(self) -> bool {
        self == BusyReason::Timeout
    }
}

impl fmt::Display for BusyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Busy reason for a result; `None` for a success.
pub fn classify(result: &DeliveryResult) -> Option<BusyReason> {
    match result {
        DeliveryResult::Success(_) => None,
        DeliveryResult::Failure(f) => Some(classify_failure(f)),
    }
}

/// Precedence: invalid endpoint, then a timeout on the last attempt, then exhaustion, then the
/// last status, then network codes.
pub fn classify_failure(failure: &DeliveryFailure) -> BusyReason {
    match failure.error_code {
        Some(ErrorCode::InvalidEndpoint) => return BusyReason::InvalidPayload,
        Some(ErrorCode::Timeout) => return BusyReason::Timeout,
        _ => {}
    }
    if failure.retries_exhausted {
        return BusyReason::RetriesExhausted;
    }
    match (failure.status, failure.error_code) {
        (Some(429), _) => BusyReason::RateLimited,
        (Some(s), _) if (500..600).contains(&s) => BusyReason::ServerError,
        (None, Some(code)) if code.is_network() => BusyReason::NetworkError,
        _ => BusyReason::Unknown,
    }
}

/// Correlation id quoted in the busy reply and its log record.
pub fn correlation_id() -> String {
    format!("busy_{}", uuid::Uuid::new_v4())
}
