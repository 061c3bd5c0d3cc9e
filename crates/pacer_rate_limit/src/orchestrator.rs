//! Pre-flight, execute, interpret, retry.

use crate::{
    DEFAULT_COST, Provider, ProviderConfig, RateLimitHeaders, RateLimitResource, RateLimitStore,
    RetryConfig, UpstreamResponse, classify_throttle, compute_wait_ms,
};
use derive_getters::Getters;
use pacer_error::{
    PacerResult, RateLimitError, RateLimitErrorKind, RateLimitReason, RetryableError,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// How the orchestrator treats one provider.
#[derive(Debug, Clone, PartialEq, Eq, Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct ProviderProfile {
    #[setters(skip)]
    provider: Provider,
    /// Backoff and retry budget
    retry: RetryConfig,
    /// Return a synthesized 429 on local denial instead of waiting
    return_on_local_denial: bool,
    /// Consult and update the store; off means backoff only
    track_limits: bool,
    /// Fixed wait before retrying a transient failure
    transient_delay_ms: u64,
}

impl ProviderProfile {
    /// Defaults: absorb local denials, track limits, 1s transient delay.
    pub fn new(provider: Provider, retry: RetryConfig) -> Self {
        Self {
            provider,
            retry,
            return_on_local_denial: false,
            track_limits: true,
            transient_delay_ms: 1000,
        }
    }

    /// Profile for `provider` as configured.
    pub fn from_config(provider: Provider, config: &ProviderConfig) -> Self {
        Self {
            provider,
            retry: config.retry.clone(),
            return_on_local_denial: config.return_on_local_denial,
            track_limits: config.track_limits,
            transient_delay_ms: config.transient_delay_ms,
        }
    }
}

/// Drives one logical upstream call through bounded retries.
///
/// Each attempt is checked against the tracked state first. Throttles update
/// the store and are either handed back to the caller or waited out,
/// depending on the provider profile.
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    store: RateLimitStore,
}

impl RetryOrchestrator {
    /// Orchestrator over a shared store.
    pub fn new(store: RateLimitStore) -> Self {
        Self { store }
    }

    /// The shared store.
    pub fn store(&self) -> &RateLimitStore {
        &self.store
    }

    /// Execute `operation` with pre-flight checks, throttle tracking and retries.
    ///
    /// `operation` performs exactly one HTTP attempt per invocation. Attempts
    /// are numbered `0..=max_retries`. Only errors reporting
    /// [`RetryableError::is_retryable`] are retried; everything else
    /// propagates at once. Non-429 responses, including 401/403, are
    /// returned as-is.
    ///
    /// # Errors
    ///
    /// - `RateLimitError::LimitExceeded` when local denials outlast the budget
    /// - `RateLimitError::RetriesExhausted` when upstream 429s outlast it
    /// - the operation's own error when permanent or on the last attempt
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let response = orchestrator
    ///     .execute_with_retry(&RateLimitResource::paced(), &profile, || async {
    ///         client.post(&payload).await
    ///     })
    ///     .await?;
    /// ```
    #[instrument(
        skip(self, profile, operation),
        fields(provider = %resource.provider(), route = ?resource.route())
    )]
    pub async fn execute_with_retry<F, Fut>(
        &self,
        resource: &RateLimitResource,
        profile: &ProviderProfile,
        mut operation: F,
    ) -> PacerResult<UpstreamResponse>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PacerResult<UpstreamResponse>>,
    {
        let retry = profile.retry();
        let max_retries = *retry.max_retries();
        let mut attempt: u32 = 0;

        loop {
            if profile.track_limits {
                let check = self.store.check(resource, DEFAULT_COST).await;
                if !check.allowed() {
                    if profile.return_on_local_denial {
                        info!(
                            reason = %check.reason(),
                            wait_ms = check.wait_ms(),
                            "Local rate limit, returning 429 to caller"
                        );
                        return Ok(UpstreamResponse::local_throttle(&check, self.store.now()));
                    }
                    if attempt >= max_retries {
                        return Err(RateLimitError::new(RateLimitErrorKind::LimitExceeded {
                            reason: *check.reason(),
                            reset_at: check.reset_at().as_ref().map(|t| t.timestamp()),
                        })
                        .into());
                    }
                    let delay = retry.delay_for(*check.wait_ms(), attempt);
                    warn!(
                        attempt,
                        reason = %check.reason(),
                        delay_ms = delay.as_millis() as u64,
                        "Local rate limit, waiting before next attempt"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
            }

            debug!(attempt, "Executing upstream attempt");
            let response = match operation().await {
                Ok(response) => response,
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    warn!(
                        attempt,
                        error = %e,
                        delay_ms = profile.transient_delay_ms,
                        "Transient upstream failure, waiting before retry"
                    );
                    tokio::time::sleep(Duration::from_millis(profile.transient_delay_ms)).await;
                    attempt += 1;
                    continue;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Upstream attempt failed permanently");
                    return Err(e);
                }
            };

            let headers = response.rate_limit_headers();

            if !response.is_rate_limited() {
                if profile.track_limits {
                    self.track(self.store.record_success(resource, &headers).await);
                }
                debug!(attempt, status = response.status().as_u16(), "Upstream attempt finished");
                return Ok(response);
            }

            let is_global = (*response.global_hint()).unwrap_or_else(|| {
                classify_throttle(
                    *resource.provider(),
                    *response.status(),
                    &headers,
                    response.body(),
                )
            });
            let reason = if is_global {
                RateLimitReason::Global
            } else {
                RateLimitReason::Bucket
            };

            if profile.track_limits {
                self.track(self.store.record_throttle(resource, &headers, is_global).await);
                if profile.return_on_local_denial {
                    info!(%reason, "Upstream throttled, returning 429 to caller");
                    return Ok(response);
                }
            }

            let now = self.store.now();
            if attempt >= max_retries {
                warn!(attempt, %reason, "Retries exhausted on upstream throttle");
                return Err(RateLimitError::new(RateLimitErrorKind::RetriesExhausted {
                    retries: max_retries,
                    reason,
                    reset_at: headers.window_end(now).map(|t| t.timestamp()),
                })
                .into());
            }

            let hinted_ms = hinted_wait_ms(profile, &headers, now);
            let delay = retry.delay_for(hinted_ms, attempt);
            warn!(
                attempt,
                %reason,
                delay_ms = delay.as_millis() as u64,
                "Upstream throttled, waiting before retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// A failed state write must not fail the call it describes.
    fn track(&self, result: PacerResult<()>) {
        if let Err(e) = result {
            error!(error = %e, "Failed to persist rate-limit state");
        }
    }
}

/// Untracked providers only honor an explicit reset hint.
fn hinted_wait_ms(
    profile: &ProviderProfile,
    headers: &RateLimitHeaders,
    now: chrono::DateTime<chrono::Utc>,
) -> u64 {
    if profile.track_limits || headers.has_reset_hint() {
        compute_wait_ms(headers, now)
    } else {
        0
    }
}
