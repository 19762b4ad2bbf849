//! Delivery of conversation text to the backend ("brain") endpoint.
//!
//! `DeliveryClient::send` never fails: transient problems are retried with exponential
//! backoff and jitter, and whatever happens ends up in a `DeliveryResult`. `classify` turns a
//! failed result into the `BusyReason` that is logged next to the user-facing busy reply.

mod classify;
mod client;

pub use classify::{classify, classify_failure, correlation_id, BusyReason};
pub use client::{
    with_jitter, AttemptRecord, DeliveryClient, DeliveryFailure, DeliveryResult, DeliverySuccess,
    ErrorCode, RetryPolicy, REQUEST_ID_HEADER,
};
