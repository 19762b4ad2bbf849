//! Integration tests: `DeliveryClient` against a scripted backend on a free port.

mod common;

use common::{free_port, Backend, Step};
use relay::delivery::{classify, BusyReason, DeliveryClient, DeliveryResult, ErrorCode, RetryPolicy};
use serde_json::json;
use std::time::Duration;

fn client() -> DeliveryClient {
    DeliveryClient::new(RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
    })
}

fn payload() -> serde_json::Value {
    json!({ "from": "u1", "text": "hello" })
}

const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn server_errors_are_retried_until_exhausted() {
    let backend = Backend::start(vec![Step::status(500)]).await;
    let result = client().send(Some(&backend.url), &payload(), TIMEOUT).await;
    let DeliveryResult::Failure(failure) = &result else {
        panic!("expected failure, got {:?}", result);
    };
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.status, Some(500));
    assert!(failure.retries_exhausted);
    assert_eq!(failure.history.len(), 3);
    assert_eq!(backend.hits(), 3);
    assert_eq!(classify(&result), Some(BusyReason::RetriesExhausted));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let backend = Backend::start(vec![Step::json(404, json!({ "error": "no route" }))]).await;
    let result = client().send(Some(&backend.url), &payload(), TIMEOUT).await;
    let DeliveryResult::Failure(failure) = &result else {
        panic!("expected failure, got {:?}", result);
    };
    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.status, Some(404));
    assert_eq!(failure.body, Some(json!({ "error": "no route" })));
    assert!(!failure.retries_exhausted);
    assert_eq!(backend.hits(), 1);
    assert_eq!(classify(&result), Some(BusyReason::Unknown));
}

#[tokio::test]
async fn rate_limit_then_success() {
    let backend = Backend::start(vec![
        Step::status(429),
        Step::json(200, json!({ "reply": "hi!" })).with_request_id("req-42"),
    ])
    .await;
    let result = client().send(Some(&backend.url), &payload(), TIMEOUT).await;
    let DeliveryResult::Success(ok) = &result else {
        panic!("expected success, got {:?}", result);
    };
    assert_eq!(ok.attempts, 2);
    assert_eq!(ok.reply(), Some("hi!"));
    assert_eq!(ok.request_id.as_deref(), Some("req-42"));
    let statuses: Vec<_> = ok.history.iter().map(|a| a.status).collect();
    assert_eq!(statuses, vec![Some(429), Some(200)]);
    assert_eq!(backend.bodies(), vec![payload(), payload()]);
    assert_eq!(classify(&result), None);
}

#[tokio::test]
async fn slow_backend_times_out_on_every_attempt() {
    let backend = Backend::start(vec![
        Step::json(200, json!({ "reply": "late" })).delayed(Duration::from_millis(500))
    ])
    .await;
    let result = client()
        .send(Some(&backend.url), &payload(), Duration::from_millis(100))
        .await;
    let DeliveryResult::Failure(failure) = &result else {
        panic!("expected failure, got {:?}", result);
    };
    assert_eq!(failure.attempts, 3);
    assert_eq!(failure.error_code, Some(ErrorCode::Timeout));
    assert!(failure.history.iter().all(|a| a.error_code == Some(ErrorCode::Timeout)));
    let reason = classify(&result).unwrap();
    assert_eq!(reason, BusyReason::Timeout);
    assert!(reason.suppresses_reply());
}

#[tokio::test]
async fn unreachable_backend_is_a_network_failure() {
    let url = format!("http://127.0.0.1:{}/webhook", free_port());
    let result = client().send(Some(&url), &payload(), TIMEOUT).await;
    let DeliveryResult::Failure(failure) = &result else {
        panic!("expected failure, got {:?}", result);
    };
    assert_eq!(failure.attempts, 3);
    assert!(failure.status.is_none());
    assert!(failure.error_code.map(ErrorCode::is_network).unwrap_or(false), "{:?}", failure.error_code);
    assert_eq!(classify(&result), Some(BusyReason::RetriesExhausted));
}

#[tokio::test]
async fn no_content_is_a_success_without_reply() {
    let backend = Backend::start(vec![Step::status(204)]).await;
    let result = client().send(Some(&backend.url), &payload(), TIMEOUT).await;
    let DeliveryResult::Success(ok) = &result else {
        panic!("expected success, got {:?}", result);
    };
    assert!(ok.is_no_content());
    assert_eq!(ok.reply(), None);
    assert_eq!(ok.attempts, 1);
}

#[tokio::test]
async fn single_attempt_policy_reports_the_status() {
    let backend = Backend::start(vec![Step::status(503)]).await;
    let single = DeliveryClient::new(RetryPolicy {
        max_attempts: 1,
        initial_backoff: Duration::from_millis(10),
    });
    let result = single.send(Some(&backend.url), &payload(), TIMEOUT).await;
    assert_eq!(result.attempts(), 1);
    assert_eq!(classify(&result), Some(BusyReason::ServerError));
    assert_eq!(backend.hits(), 1);
}
