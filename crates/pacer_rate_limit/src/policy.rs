//! Pre-flight decisions against the tracked state.

use crate::{AllRateLimits, GLOBAL_BUCKET, Provider, RateLimitEntry, RateLimitResource, SAFETY_MARGIN_MS};
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use pacer_error::RateLimitReason;
use serde::Serialize;

/// Cost of one upstream call.
pub const DEFAULT_COST: u32 = 1;

/// Outcome of a pre-flight check. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Getters)]
pub struct RateLimitCheckResult {
    allowed: bool,
    wait_ms: u64,
    reason: RateLimitReason,
    bucket: Option<String>,
    reset_at: Option<DateTime<Utc>>,
    limit: Option<u32>,
}

impl RateLimitCheckResult {
    /// The call may proceed now.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            wait_ms: 0,
            reason: RateLimitReason::Unknown,
            bucket: None,
            reset_at: None,
            limit: None,
        }
    }

    fn deny(
        entry: &RateLimitEntry,
        reason: RateLimitReason,
        bucket: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let until_reset = (*entry.reset_at() - now).num_milliseconds().max(0) as u64;
        Self {
            allowed: false,
            wait_ms: (until_reset + SAFETY_MARGIN_MS).max(SAFETY_MARGIN_MS),
            reason,
            bucket,
            reset_at: Some(*entry.reset_at()),
            limit: Some(*entry.limit()),
        }
    }
}

/// Decides whether a prospective call of a given cost may go out now.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitPolicy;

impl RateLimitPolicy {
    /// Create the policy.
    pub fn new() -> Self {
        Self
    }

    /// Check `resource` against `state`.
    ///
    /// The caller is expected to have swept expired entries already; expired
    /// entries found here are still treated as absent.
    ///
    /// For the bucketed provider the global scope is checked first and a
    /// global denial returns immediately, since it supersedes every bucket.
    ///
    /// # Example
    ///
    /// ```
    /// use pacer_rate_limit::{AllRateLimits, RateLimitPolicy, RateLimitResource};
    ///
    /// let check = RateLimitPolicy::new().check_allowed(
    ///     &AllRateLimits::default(),
    ///     &RateLimitResource::paced(),
    ///     1,
    ///     chrono::Utc::now(),
    /// );
    /// assert!(*check.allowed());
    /// assert_eq!(*check.wait_ms(), 0);
    /// ```
    pub fn check_allowed(
        &self,
        state: &AllRateLimits,
        resource: &RateLimitResource,
        cost: u32,
        now: DateTime<Utc>,
    ) -> RateLimitCheckResult {
        match resource.provider() {
            Provider::Passthrough | Provider::Paced => {
                let entry = state.single_slot(*resource.provider()).and_then(Option::as_ref);
                match blocking(entry, cost, now) {
                    Some(entry) => {
                        RateLimitCheckResult::deny(entry, RateLimitReason::Bucket, None, now)
                    }
                    None => RateLimitCheckResult::allow(),
                }
            }
            Provider::Bucketed => {
                let bucketed = state.bucketed();
                if let Some(global) = blocking(bucketed.global().as_ref(), cost, now) {
                    return RateLimitCheckResult::deny(
                        global,
                        RateLimitReason::Global,
                        Some(GLOBAL_BUCKET.to_string()),
                        now,
                    );
                }
                let Some(bucket) = bucketed.resolve_bucket(resource) else {
                    return RateLimitCheckResult::allow();
                };
                match blocking(bucketed.buckets().get(&bucket), cost, now) {
                    Some(entry) => RateLimitCheckResult::deny(
                        entry,
                        RateLimitReason::Bucket,
                        Some(bucket),
                        now,
                    ),
                    None => RateLimitCheckResult::allow(),
                }
            }
        }
    }
}

/// The entry, if it exists, is live, and lacks capacity for `cost`.
fn blocking(entry: Option<&RateLimitEntry>, cost: u32, now: DateTime<Utc>) -> Option<&RateLimitEntry> {
    entry.filter(|e| !e.is_expired(now) && !e.has_capacity(cost))
}
