//! Rate-limit window records and the full tracked state.

use chrono::{DateTime, TimeDelta, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Upstream image hosts the relay forwards to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Provider {
    /// Unthrottled host; only exponential backoff on 429
    Passthrough,
    /// Host with a global window plus per-bucket windows
    Bucketed,
    /// Host with one provider-wide window and chunked posts
    Paced,
}

/// Known state of one throttled resource.
///
/// Invariants: `remaining <= limit` and `reset_at > window_start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct RateLimitEntry {
    limit: u32,
    remaining: u32,
    reset_at: DateTime<Utc>,
    window_start: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl RateLimitEntry {
    /// Create an entry for the window `[window_start, reset_at)`.
    ///
    /// `remaining` is clamped to `limit`, and a `reset_at` at or before
    /// `window_start` is pushed one millisecond past it.
    pub fn new(
        limit: u32,
        remaining: u32,
        window_start: DateTime<Utc>,
        reset_at: DateTime<Utc>,
    ) -> Self {
        let reset_at = if reset_at > window_start {
            reset_at
        } else {
            window_start + TimeDelta::milliseconds(1)
        };
        Self {
            limit,
            remaining: remaining.min(limit),
            reset_at,
            window_start,
            last_updated: window_start,
        }
    }

    /// Entry describing an exhausted window.
    pub fn exhausted(limit: u32, now: DateTime<Utc>, reset_at: DateTime<Utc>) -> Self {
        Self::new(limit, 0, now, reset_at)
    }

    /// True iff `now >= reset_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }

    /// True when at least `cost` calls are left in the window.
    pub fn has_capacity(&self, cost: u32) -> bool {
        self.remaining >= cost
    }

    /// Optimistically count one call against the window.
    pub fn consume(&mut self, cost: u32, now: DateTime<Utc>) {
        self.remaining = self.remaining.saturating_sub(cost);
        self.last_updated = now;
    }
}

/// State of the dual-scoped provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct BucketedLimits {
    /// Account-wide window; supersedes every bucket.
    #[serde(default)]
    global: Option<RateLimitEntry>,
    /// Windows keyed by the provider's opaque bucket id.
    #[serde(default)]
    buckets: HashMap<String, RateLimitEntry>,
    /// Bucket id last reported for each route.
    #[serde(default)]
    routes: HashMap<String, String>,
}

impl BucketedLimits {
    /// Bucket for a call: the explicit one, else the one learned for its route.
    pub fn resolve_bucket(&self, resource: &RateLimitResource) -> Option<String> {
        resource.bucket().clone().or_else(|| {
            resource
                .route()
                .as_ref()
                .and_then(|route| self.routes.get(route).cloned())
        })
    }

    pub(crate) fn global_mut(&mut self) -> &mut Option<RateLimitEntry> {
        &mut self.global
    }

    pub(crate) fn buckets_mut(&mut self) -> &mut HashMap<String, RateLimitEntry> {
        &mut self.buckets
    }

    pub(crate) fn learn_route(&mut self, route: &str, bucket: &str) {
        self.routes.insert(route.to_string(), bucket.to_string());
    }

    fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        if self.global.as_ref().is_some_and(|e| e.is_expired(now)) {
            self.global = None;
            removed += 1;
        }
        let expired: Vec<String> = self
            .buckets
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(bucket, _)| bucket.clone())
            .collect();
        for bucket in &expired {
            self.buckets.remove(bucket);
        }
        self.routes.retain(|_, bucket| !expired.contains(bucket));
        removed + expired.len()
    }
}

/// Full tracked state, partitioned by provider.
///
/// `Default` is the fully unconstrained state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct AllRateLimits {
    #[serde(default)]
    passthrough: Option<RateLimitEntry>,
    #[serde(default)]
    bucketed: BucketedLimits,
    #[serde(default)]
    paced: Option<RateLimitEntry>,
}

impl AllRateLimits {
    /// Drop every entry whose window has ended. Returns how many were removed.
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for slot in [&mut self.passthrough, &mut self.paced] {
            if slot.as_ref().is_some_and(|e| e.is_expired(now)) {
                *slot = None;
                removed += 1;
            }
        }
        removed + self.bucketed.cleanup_expired(now)
    }

    /// True when nothing is tracked.
    pub fn is_unconstrained(&self) -> bool {
        self.passthrough.is_none()
            && self.paced.is_none()
            && self.bucketed.global.is_none()
            && self.bucketed.buckets.is_empty()
    }

    pub(crate) fn single_slot_mut(&mut self, provider: Provider) -> Option<&mut Option<RateLimitEntry>> {
        match provider {
            Provider::Passthrough => Some(&mut self.passthrough),
            Provider::Paced => Some(&mut self.paced),
            Provider::Bucketed => None,
        }
    }

    pub(crate) fn single_slot(&self, provider: Provider) -> Option<&Option<RateLimitEntry>> {
        match provider {
            Provider::Passthrough => Some(&self.passthrough),
            Provider::Paced => Some(&self.paced),
            Provider::Bucketed => None,
        }
    }

    pub(crate) fn bucketed_mut(&mut self) -> &mut BucketedLimits {
        &mut self.bucketed
    }
}

/// Identity of the limited resource a call is made against.
///
/// # Example
///
/// ```
/// use pacer_rate_limit::{Provider, RateLimitResource};
///
/// let files = RateLimitResource::bucketed("files").with_bucket("abcd1234");
/// assert_eq!(*files.provider(), Provider::Bucketed);
/// assert_eq!(files.bucket().as_deref(), Some("abcd1234"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters)]
pub struct RateLimitResource {
    provider: Provider,
    route: Option<String>,
    bucket: Option<String>,
}

impl RateLimitResource {
    /// The passthrough provider.
    pub fn passthrough() -> Self {
        Self {
            provider: Provider::Passthrough,
            route: None,
            bucket: None,
        }
    }

    /// The paced provider's single window.
    pub fn paced() -> Self {
        Self {
            provider: Provider::Paced,
            route: None,
            bucket: None,
        }
    }

    /// A route on the bucketed provider. Its bucket is learned from responses.
    pub fn bucketed(route: impl Into<String>) -> Self {
        Self {
            provider: Provider::Bucketed,
            route: Some(route.into()),
            bucket: None,
        }
    }

    /// Pin the call to a bucket the caller already knows.
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }
}
