//! Extraction of rate-limit signals from upstream responses.
//!
//! Every provider's response is reduced to one canonical [`RateLimitHeaders`]
//! shape before any shared logic runs. Throttle bodies are decoded through a
//! per-provider [`ThrottleBody`] step, because not every provider sets the
//! global-scope header on every global throttle.
//!
//! Header reference:
//! - `x-ratelimit-limit`: calls allowed in the window
//! - `x-ratelimit-remaining`: calls left in the window
//! - `x-ratelimit-reset`: window end, epoch seconds
//! - `x-ratelimit-reset-after`: seconds until window end (float)
//! - `x-ratelimit-bucket`: opaque bucket id
//! - `x-ratelimit-global`: present (or `true`) on account-wide throttles

use crate::Provider;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, instrument};

/// Calls allowed in the current window.
pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
/// Calls left in the current window.
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
/// Window end, epoch seconds.
pub const HEADER_RESET: &str = "x-ratelimit-reset";
/// Seconds until the window ends.
pub const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
/// Opaque bucket id.
pub const HEADER_BUCKET: &str = "x-ratelimit-bucket";
/// Marks an account-wide throttle.
pub const HEADER_GLOBAL: &str = "x-ratelimit-global";

/// Added to every computed wait so we never wake up a hair too early.
pub const SAFETY_MARGIN_MS: u64 = 100;

/// Wait used when the provider gave no timing hint at all.
const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Longest window any hint is trusted to describe (one day).
pub const MAX_WINDOW_MS: u64 = 86_400_000;

/// Bucket id reported when the global scope denies a call.
pub const GLOBAL_BUCKET: &str = "global";

/// Provider error codes that mean "account-wide throttle".
pub const GLOBAL_THROTTLE_CODES: &[i64] = &[40062];

const GLOBAL_MESSAGE_MARKERS: &[&str] = &["global rate limit", "globally rate limited"];

/// Canonical rate-limit signals. Absent headers stay `None`, so "unknown"
/// is never confused with zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Calls allowed per window
    pub limit: Option<u32>,
    /// Calls left in the window
    pub remaining: Option<u32>,
    /// Window end, epoch seconds
    pub reset: Option<i64>,
    /// Seconds until the window ends
    pub reset_after: Option<f64>,
    /// Opaque bucket id
    pub bucket: Option<String>,
    /// The response flagged an account-wide throttle
    pub global: bool,
}

impl RateLimitHeaders {
    /// True when any timing hint is present.
    pub fn has_reset_hint(&self) -> bool {
        self.reset.is_some() || self.reset_after.is_some()
    }

    /// Absolute end of the window these headers describe, without the
    /// safety margin. `None` when no usable hint is present.
    ///
    /// Hints further out than [`MAX_WINDOW_MS`] are capped to it.
    pub fn window_end(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let cap = now.checked_add_signed(TimeDelta::milliseconds(MAX_WINDOW_MS as i64))?;
        if let Some(after) = self.reset_after {
            let ms = reset_after_ms(after) as i64;
            return Some(now.checked_add_signed(TimeDelta::milliseconds(ms)).unwrap_or(cap));
        }
        self.reset
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .filter(|reset| *reset > now)
            .map(|reset| reset.min(cap))
    }

    /// True when the response carried no rate-limit header.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Extract rate-limit signals from response headers.
///
/// # Example
///
/// ```
/// use pacer_rate_limit::parse_headers;
/// use reqwest::header::{HeaderMap, HeaderValue};
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-ratelimit-remaining", HeaderValue::from_static("4"));
/// headers.insert("x-ratelimit-reset-after", HeaderValue::from_static("1.5"));
///
/// let parsed = parse_headers(&headers);
/// assert_eq!(parsed.remaining, Some(4));
/// assert_eq!(parsed.reset_after, Some(1.5));
/// assert_eq!(parsed.limit, None);
/// ```
pub fn parse_headers(headers: &HeaderMap) -> RateLimitHeaders {
    RateLimitHeaders {
        limit: parse_header(headers, HEADER_LIMIT),
        remaining: parse_header(headers, HEADER_REMAINING),
        // Some providers send fractional epoch seconds; the window granularity is seconds.
        reset: parse_header::<f64>(headers, HEADER_RESET).map(|secs| secs.trunc() as i64),
        reset_after: parse_header::<f64>(headers, HEADER_RESET_AFTER)
            .filter(|secs| secs.is_finite()),
        bucket: header_str(headers, HEADER_BUCKET)
            .filter(|b| !b.is_empty())
            .map(str::to_string),
        global: header_str(headers, HEADER_GLOBAL)
            .is_some_and(|v| v.is_empty() || v.eq_ignore_ascii_case("true")),
    }
}

/// Decide whether a throttle response is account-wide.
///
/// The explicit header wins; otherwise the body is decoded with the
/// provider's throttle shape. Unparseable or silent bodies count as
/// bucket-scoped.
#[instrument(skip(status, headers, body), fields(status = status.as_u16(), body_len = body.len()))]
pub fn classify_throttle(
    provider: Provider,
    status: StatusCode,
    headers: &RateLimitHeaders,
    body: &[u8],
) -> bool {
    if status != StatusCode::TOO_MANY_REQUESTS {
        return false;
    }
    if headers.global {
        return true;
    }
    let decoded = ThrottleBody::decode(provider, body);
    let global = decoded.is_global();
    debug!(?decoded, global, "Classified throttle from body");
    global
}

/// How long to wait before the throttled resource is usable again.
///
/// Prefers `reset_after`, then a future `reset`, then a full default window.
/// Every branch adds [`SAFETY_MARGIN_MS`]; hints are capped at
/// [`MAX_WINDOW_MS`].
///
/// # Example
///
/// ```
/// use pacer_rate_limit::{RateLimitHeaders, compute_wait_ms};
///
/// let headers = RateLimitHeaders {
///     reset_after: Some(30.0),
///     ..Default::default()
/// };
/// assert_eq!(compute_wait_ms(&headers, chrono::Utc::now()), 30_100);
/// assert_eq!(compute_wait_ms(&RateLimitHeaders::default(), chrono::Utc::now()), 60_100);
/// ```
pub fn compute_wait_ms(headers: &RateLimitHeaders, now: DateTime<Utc>) -> u64 {
    if let Some(after) = headers.reset_after {
        return reset_after_ms(after).saturating_add(SAFETY_MARGIN_MS);
    }
    if let Some(reset) = headers.reset {
        let reset_ms = reset.saturating_mul(1000);
        let now_ms = now.timestamp_millis();
        if reset_ms > now_ms {
            let wait = reset_ms.saturating_sub(now_ms).unsigned_abs().min(MAX_WINDOW_MS);
            return wait.saturating_add(SAFETY_MARGIN_MS);
        }
    }
    DEFAULT_WINDOW_MS + SAFETY_MARGIN_MS
}

/// `reset_after` seconds as whole milliseconds, rounded up, within `0..=MAX_WINDOW_MS`.
fn reset_after_ms(after: f64) -> u64 {
    let ms = (after.max(0.0) * 1000.0).ceil();
    if ms >= MAX_WINDOW_MS as f64 {
        MAX_WINDOW_MS
    } else {
        ms as u64
    }
}

/// Throttle body decoded with the provider's error shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleBody {
    /// `{"global": bool, "code": int, "message": str, "retry_after": float}`
    Bucketed {
        /// Explicit global flag in the body
        global: bool,
        /// Provider error code
        code: Option<i64>,
        /// Human readable message
        message: Option<String>,
    },
    /// `{"data": {"error": ...}}` or `{"error": ...}`
    Message(Option<String>),
    /// Body was not JSON or had an unexpected shape
    Unrecognized,
}

#[derive(Deserialize)]
struct BucketedThrottleBody {
    #[serde(default)]
    global: bool,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct MessageThrottleBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<MessageThrottleData>,
}

#[derive(Deserialize)]
struct MessageThrottleData {
    #[serde(default)]
    error: Option<serde_json::Value>,
}

fn error_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

impl ThrottleBody {
    /// Decode a throttle body using the provider's shape.
    pub fn decode(provider: Provider, body: &[u8]) -> Self {
        match provider {
            Provider::Bucketed => match serde_json::from_slice::<BucketedThrottleBody>(body) {
                Ok(b) => ThrottleBody::Bucketed {
                    global: b.global,
                    code: b.code,
                    message: b.message,
                },
                Err(_) => ThrottleBody::Unrecognized,
            },
            Provider::Paced | Provider::Passthrough => {
                match serde_json::from_slice::<MessageThrottleBody>(body) {
                    Ok(b) => ThrottleBody::Message(
                        b.data
                            .and_then(|d| d.error)
                            .or(b.error)
                            .map(error_text)
                            .or(b.message),
                    ),
                    Err(_) => ThrottleBody::Unrecognized,
                }
            }
        }
    }

    /// True when the body identifies an account-wide throttle.
    pub fn is_global(&self) -> bool {
        match self {
            ThrottleBody::Bucketed {
                global,
                code,
                message,
            } => {
                *global
                    || code.is_some_and(|c| GLOBAL_THROTTLE_CODES.contains(&c))
                    || message.as_deref().is_some_and(mentions_global)
            }
            ThrottleBody::Message(message) => message.as_deref().is_some_and(mentions_global),
            ThrottleBody::Unrecognized => false,
        }
    }
}

fn mentions_global(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    GLOBAL_MESSAGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Helper to read a header as a trimmed string.
fn header_str<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key)?.to_str().ok().map(str::trim)
}

/// Helper to parse a header value.
fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, key: &str) -> Option<T> {
    header_str(headers, key)?.parse().ok()
}
