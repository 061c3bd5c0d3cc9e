//! Raw upstream responses as seen by the orchestrator.

use crate::{
    HEADER_BUCKET, HEADER_GLOBAL, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RESET_AFTER, RateLimitCheckResult, RateLimitHeaders, parse_headers,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use pacer_error::{JsonError, PacerResult, RateLimitReason};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde_json::json;

/// One HTTP attempt's outcome: status, headers, body, and an optional
/// explicit global-throttle flag set by the operation itself.
#[derive(Debug, Clone, Getters)]
pub struct UpstreamResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    global_hint: Option<bool>,
}

impl UpstreamResponse {
    /// Wrap a raw response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            global_hint: None,
        }
    }

    /// Mark this response as (not) an account-wide throttle, overriding
    /// header and body inspection.
    pub fn with_global_hint(mut self, global: bool) -> Self {
        self.global_hint = Some(global);
        self
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 429 status.
    pub fn is_rate_limited(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS
    }

    /// Rate-limit signals carried by this response.
    pub fn rate_limit_headers(&self) -> RateLimitHeaders {
        parse_headers(&self.headers)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> PacerResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            JsonError::new(format!("Failed to decode upstream body: {}", e)).into()
        })
    }

    /// Body as lossy UTF-8, truncated for log and error messages.
    pub fn body_excerpt(&self, max_chars: usize) -> String {
        String::from_utf8_lossy(&self.body).chars().take(max_chars).collect()
    }

    /// Copy every `x-ratelimit-*` header from `other` that this response lacks.
    pub fn inherit_rate_limit_headers(&mut self, other: &HeaderMap) {
        for name in RATE_LIMIT_HEADERS {
            if self.headers.contains_key(&name) {
                continue;
            }
            if let Some(value) = other.get(&name) {
                self.headers.insert(name, value.clone());
            }
        }
    }

    /// The `x-ratelimit-*` headers of this response.
    pub fn rate_limit_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for name in RATE_LIMIT_HEADERS {
            if let Some(value) = self.headers.get(&name) {
                map.insert(name, value.clone());
            }
        }
        map
    }

    /// A 429 built from a local pre-flight denial, so callers that pace
    /// themselves see the same shape as an upstream throttle.
    pub fn local_throttle(check: &RateLimitCheckResult, now: DateTime<Utc>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, HeaderValue::from(0u32));

        let reset_at = (*check.reset_at())
            .unwrap_or_else(|| now + chrono::TimeDelta::milliseconds(*check.wait_ms() as i64));
        headers.insert(HEADER_RESET, HeaderValue::from(reset_at.timestamp()));

        let wait_secs = *check.wait_ms() as f64 / 1000.0;
        if let Ok(value) = HeaderValue::from_str(&format!("{wait_secs:.3}")) {
            headers.insert(HEADER_RESET_AFTER, value);
        }
        headers.insert(RETRY_AFTER, HeaderValue::from(check.wait_ms().div_ceil(1000)));

        if let Some(limit) = check.limit() {
            headers.insert(HEADER_LIMIT, HeaderValue::from(*limit));
        }
        let global = *check.reason() == RateLimitReason::Global;
        if global {
            headers.insert(HEADER_GLOBAL, HeaderValue::from_static("true"));
        } else if let Some(value) = check
            .bucket()
            .as_deref()
            .and_then(|b| HeaderValue::from_str(b).ok())
        {
            headers.insert(HEADER_BUCKET, value);
        }

        let body = json!({
            "message": "Rate limited locally; retry after the reset time.",
            "retry_after": wait_secs,
            "global": global,
            "reason": check.reason().as_ref(),
            "bucket": check.bucket(),
        });

        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            headers,
            Bytes::from(body.to_string()),
        )
    }
}

const RATE_LIMIT_HEADERS: [HeaderName; 6] = [
    HeaderName::from_static(HEADER_LIMIT),
    HeaderName::from_static(HEADER_REMAINING),
    HeaderName::from_static(HEADER_RESET),
    HeaderName::from_static(HEADER_RESET_AFTER),
    HeaderName::from_static(HEADER_BUCKET),
    HeaderName::from_static(HEADER_GLOBAL),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllRateLimits, RateLimitEntry, RateLimitPolicy, RateLimitResource};

    #[test]
    fn test_local_throttle_carries_global_headers() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut state = AllRateLimits::default();
        *state.bucketed_mut().global_mut() = Some(RateLimitEntry::exhausted(
            50,
            now,
            now + chrono::TimeDelta::seconds(2),
        ));
        let check = RateLimitPolicy::new().check_allowed(
            &state,
            &RateLimitResource::bucketed("files"),
            1,
            now,
        );

        let response = UpstreamResponse::local_throttle(&check, now);

        assert!(response.is_rate_limited());
        let parsed = response.rate_limit_headers();
        assert_eq!(parsed.remaining, Some(0));
        assert_eq!(parsed.limit, Some(50));
        assert_eq!(parsed.reset, Some(1_700_000_002));
        assert!(parsed.global);
        assert_eq!(parsed.bucket, None);
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["global"], true);
    }

    #[test]
    fn test_local_throttle_carries_bucket() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut state = AllRateLimits::default();
        state.bucketed_mut().buckets_mut().insert(
            "b1".into(),
            RateLimitEntry::exhausted(5, now, now + chrono::TimeDelta::seconds(4)),
        );
        let check = RateLimitPolicy::new().check_allowed(
            &state,
            &RateLimitResource::bucketed("files").with_bucket("b1"),
            1,
            now,
        );

        let parsed = UpstreamResponse::local_throttle(&check, now).rate_limit_headers();
        assert_eq!(parsed.bucket.as_deref(), Some("b1"));
        assert!(!parsed.global);
        assert_eq!(*check.reason(), RateLimitReason::Bucket);
    }

    #[test]
    fn test_inherit_only_fills_missing() {
        let mut earlier = HeaderMap::new();
        earlier.insert(HEADER_REMAINING, HeaderValue::from(3u32));
        earlier.insert(HEADER_LIMIT, HeaderValue::from(60u32));
        let mut latest = HeaderMap::new();
        latest.insert(HEADER_REMAINING, HeaderValue::from(2u32));

        let mut response = UpstreamResponse::new(StatusCode::OK, latest, Bytes::new());
        response.inherit_rate_limit_headers(&earlier);

        let parsed = response.rate_limit_headers();
        assert_eq!(parsed.remaining, Some(2));
        assert_eq!(parsed.limit, Some(60));
    }
}
