//! Tests for the retry orchestrator, driven on a paused tokio clock.

use pacer_error::{
    PacerErrorKind, PacerResult, RateLimitErrorKind, RateLimitReason, UpstreamError,
    UpstreamErrorKind,
};
use pacer_rate_limit::{
    HEADER_GLOBAL, MonotonicClock, Provider, ProviderProfile, RateLimitHeaders, RateLimitResource,
    RateLimitStore, RetryConfig, RetryConfigBuilder, RetryOrchestrator, UpstreamResponse,
};
use pacer_storage::MemoryStore;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use std::collections::VecDeque;
use std::future::{Ready, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

fn response(status: u16, headers: &[(&'static str, &str)], body: &str) -> UpstreamResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(*name, HeaderValue::from_str(value).unwrap());
    }
    UpstreamResponse::new(StatusCode::from_u16(status).unwrap(), map, body.to_string())
}

fn ok() -> PacerResult<UpstreamResponse> {
    Ok(response(200, &[], r#"{"success":true}"#))
}

fn throttled() -> PacerResult<UpstreamResponse> {
    Ok(response(429, &[("x-ratelimit-reset-after", "0.2")], "{}"))
}

/// Operation answering from `script`, then from `fallback` forever.
fn scripted(
    script: Vec<PacerResult<UpstreamResponse>>,
    fallback: fn() -> PacerResult<UpstreamResponse>,
) -> (
    Arc<AtomicUsize>,
    impl FnMut() -> Ready<PacerResult<UpstreamResponse>>,
) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut script = VecDeque::from(script);
    let operation = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        ready(script.pop_front().unwrap_or_else(fallback))
    };
    (calls, operation)
}

fn retry(max_retries: u32) -> RetryConfig {
    RetryConfigBuilder::default()
        .max_retries(max_retries)
        .base_delay_ms(100)
        .max_delay_ms(5_000)
        .jitter_ms(0)
        .build()
        .unwrap()
}

async fn orchestrator() -> RetryOrchestrator {
    let store = RateLimitStore::open(
        Arc::new(MemoryStore::new()),
        Arc::new(MonotonicClock::new()),
    )
    .await;
    RetryOrchestrator::new(store)
}

fn absorbing(provider: Provider) -> ProviderProfile {
    ProviderProfile::new(provider, retry(3))
}

fn returning(provider: Provider) -> ProviderProfile {
    ProviderProfile::new(provider, retry(3)).with_return_on_local_denial(true)
}

#[tokio::test(start_paused = true)]
async fn test_success_records_fresh_headers() {
    let orchestrator = orchestrator().await;
    let (calls, operation) = scripted(
        vec![Ok(response(
            200,
            &[
                ("x-ratelimit-limit", "60"),
                ("x-ratelimit-remaining", "59"),
                ("x-ratelimit-reset-after", "60"),
            ],
            "{}",
        ))],
        ok,
    );

    let result = orchestrator
        .execute_with_retry(&RateLimitResource::paced(), &absorbing(Provider::Paced), operation)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let entry = orchestrator.store().snapshot().await.paced().clone().unwrap();
    assert_eq!(*entry.remaining(), 59);
    assert_eq!(*entry.limit(), 60);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_absorbed_then_success() {
    let orchestrator = orchestrator().await;
    let (calls, operation) = scripted(
        vec![Ok(response(429, &[("x-ratelimit-reset-after", "1.0")], "{}"))],
        ok,
    );
    let started = Instant::now();

    let result = orchestrator
        .execute_with_retry(&RateLimitResource::paced(), &absorbing(Provider::Paced), operation)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_millis(1_100));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_after_budget() {
    let orchestrator = orchestrator().await;
    let (calls, operation) = scripted(Vec::new(), throttled);

    let err = orchestrator
        .execute_with_retry(&RateLimitResource::paced(), &absorbing(Provider::Paced), operation)
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    match err.kind() {
        PacerErrorKind::RateLimit(e) => match &e.kind {
            RateLimitErrorKind::RetriesExhausted {
                retries, reason, ..
            } => {
                assert_eq!(*retries, 3);
                assert_eq!(*reason, RateLimitReason::Bucket);
            }
            other => panic!("unexpected rate limit error: {other}"),
        },
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_global_body_updates_global_entry_and_gates_other_routes() {
    let orchestrator = orchestrator().await;
    let profile = returning(Provider::Bucketed);
    let (calls, operation) = scripted(
        vec![Ok(response(
            429,
            &[("x-ratelimit-reset-after", "2")],
            r#"{"message":"You are being rate limited.","retry_after":2.0,"global":true}"#,
        ))],
        ok,
    );

    let first = orchestrator
        .execute_with_retry(&RateLimitResource::bucketed("files"), &profile, operation)
        .await
        .unwrap();
    assert!(first.is_rate_limited());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(orchestrator.store().snapshot().await.bucketed().global().is_some());

    let (second_calls, second_operation) = scripted(Vec::new(), ok);
    let second = orchestrator
        .execute_with_retry(
            &RateLimitResource::bucketed("collections"),
            &profile,
            second_operation,
        )
        .await
        .unwrap();

    assert!(second.is_rate_limited());
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        second.headers().get(HEADER_GLOBAL).and_then(|v| v.to_str().ok()),
        Some("true")
    );
    let parsed: RateLimitHeaders = second.rate_limit_headers();
    assert_eq!(parsed.remaining, Some(0));
    assert!(parsed.reset.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_hint_overrides_body() {
    let orchestrator = orchestrator().await;
    let throttle = response(
        429,
        &[
            ("x-ratelimit-reset-after", "3"),
            ("x-ratelimit-bucket", "b1"),
        ],
        r#"{"message":"global rate limit","global":true}"#,
    )
    .with_global_hint(false);
    let (_, operation) = scripted(vec![Ok(throttle)], ok);

    orchestrator
        .execute_with_retry(
            &RateLimitResource::bucketed("files"),
            &returning(Provider::Bucketed),
            operation,
        )
        .await
        .unwrap();

    let state = orchestrator.store().snapshot().await;
    assert!(state.bucketed().global().is_none());
    assert!(state.bucketed().buckets().contains_key("b1"));
    assert_eq!(
        state.bucketed().routes().get("files").map(String::as_str),
        Some("b1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_local_denial_absorbed_until_budget_runs_out() {
    let orchestrator = orchestrator().await;
    let headers = RateLimitHeaders {
        reset_after: Some(120.0),
        ..Default::default()
    };
    orchestrator
        .store()
        .record_throttle(&RateLimitResource::paced(), &headers, false)
        .await
        .unwrap();
    let profile = ProviderProfile::new(
        Provider::Paced,
        RetryConfigBuilder::default()
            .max_retries(2)
            .base_delay_ms(100)
            .max_delay_ms(1_000)
            .jitter_ms(0)
            .build()
            .unwrap(),
    );
    let (calls, operation) = scripted(Vec::new(), ok);

    let err = orchestrator
        .execute_with_retry(&RateLimitResource::paced(), &profile, operation)
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(matches!(
        err.kind(),
        PacerErrorKind::RateLimit(e) if matches!(e.kind, RateLimitErrorKind::LimitExceeded { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_untracked_provider_backs_off_without_state() {
    let orchestrator = orchestrator().await;
    let profile = absorbing(Provider::Passthrough).with_track_limits(false);
    let (calls, operation) = scripted(vec![Ok(response(429, &[], ""))], ok);
    let started = Instant::now();

    let result = orchestrator
        .execute_with_retry(&RateLimitResource::passthrough(), &profile, operation)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // Plain backoff, not a full default window
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(orchestrator.store().snapshot().await.is_unconstrained());
}

#[tokio::test(start_paused = true)]
async fn test_transient_error_retried_after_fixed_delay() {
    let orchestrator = orchestrator().await;
    let profile = absorbing(Provider::Paced).with_transient_delay_ms(750);
    let (calls, operation) = scripted(
        vec![Err(UpstreamError::new(UpstreamErrorKind::Transient(
            "connection reset".to_string(),
        ))
        .into())],
        ok,
    );
    let started = Instant::now();

    let result = orchestrator
        .execute_with_retry(&RateLimitResource::paced(), &profile, operation)
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_millis(750));
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_response_not_retried() {
    let orchestrator = orchestrator().await;
    let (calls, operation) = scripted(
        vec![Ok(response(401, &[], r#"{"error":"invalid token"}"#))],
        ok,
    );

    let result = orchestrator
        .execute_with_retry(&RateLimitResource::paced(), &absorbing(Provider::Paced), operation)
        .await
        .unwrap();

    assert_eq!(*result.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_propagates_immediately() {
    let orchestrator = orchestrator().await;
    let (calls, operation) = scripted(
        vec![Err(UpstreamError::new(UpstreamErrorKind::Unauthorized(
            "no credential configured".to_string(),
        ))
        .into())],
        ok,
    );

    let err = orchestrator
        .execute_with_retry(&RateLimitResource::paced(), &absorbing(Provider::Paced), operation)
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(err.kind(), PacerErrorKind::Upstream(_)));
}
