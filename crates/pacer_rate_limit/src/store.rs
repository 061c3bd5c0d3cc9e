//! Owner of the tracked rate-limit state.
//!
//! The store is the only state shared between concurrent uploads. Every
//! read-modify-write, including the write-through to the persistence
//! backend, happens under one async mutex so `remaining`/`reset_at` updates
//! are never lost.

use crate::{
    AllRateLimits, Clock, DEFAULT_COST, Provider, RateLimitCheckResult, RateLimitEntry,
    RateLimitHeaders, RateLimitPolicy, RateLimitResource,
};
use chrono::{DateTime, TimeDelta, Utc};
use pacer_error::{PacerResult, StorageError, StorageErrorKind};
use pacer_storage::KeyValueStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Key the serialized state is persisted under.
pub const STATE_KEY: &str = "rate_limits";

/// Window assumed when a throttle or header set gives no reset hint.
const FALLBACK_WINDOW: TimeDelta = TimeDelta::seconds(60);

/// Bucket used when the bucketed provider throttles without naming one.
const FALLBACK_BUCKET: &str = "default";

/// Injected, persisted owner of [`AllRateLimits`].
///
/// # Example
///
/// ```rust
/// use pacer_rate_limit::{MonotonicClock, RateLimitResource, RateLimitStore};
/// use pacer_storage::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() {
/// let store = RateLimitStore::open(
///     Arc::new(MemoryStore::new()),
///     Arc::new(MonotonicClock::new()),
/// )
/// .await;
/// let check = store.check(&RateLimitResource::paced(), 1).await;
/// assert!(*check.allowed());
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimitStore {
    state: Arc<Mutex<AllRateLimits>>,
    backend: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
}

impl std::fmt::Debug for RateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitStore")
            .field("backend", &self.backend)
            .field("clock", &self.clock)
            .finish()
    }
}

impl RateLimitStore {
    /// Create a store with the unconstrained state. Call [`load`](Self::load)
    /// to pick up persisted state.
    pub fn new(backend: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(AllRateLimits::default())),
            backend,
            clock,
            policy: RateLimitPolicy::new(),
        }
    }

    /// Create a store and load persisted state.
    pub async fn open(backend: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let store = Self::new(backend, clock);
        store.load().await;
        store
    }

    /// Time source shared with the orchestrator.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Replace in-memory state with the persisted blob.
    ///
    /// Missing, unreadable or corrupt data resets to the unconstrained
    /// default; this never fails.
    #[instrument(skip(self))]
    pub async fn load(&self) {
        let loaded = match self.backend.get(STATE_KEY).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<AllRateLimits>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "Persisted rate-limit state is corrupt, starting unconstrained");
                    AllRateLimits::default()
                }
            },
            Ok(None) => {
                debug!("No persisted rate-limit state");
                AllRateLimits::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read rate-limit state, starting unconstrained");
                AllRateLimits::default()
            }
        };

        let mut state = self.state.lock().await;
        *state = loaded;
        let removed = state.cleanup_expired(self.clock.now());
        info!(
            removed,
            unconstrained = state.is_unconstrained(),
            "Loaded rate-limit state"
        );
    }

    /// Drop every entry whose window ended at or before `now`.
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let removed = self.state.lock().await.cleanup_expired(now);
        if removed > 0 {
            debug!(removed, "Purged expired rate-limit entries");
        }
        removed
    }

    /// Durably write the current state.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub async fn save(&self) -> PacerResult<()> {
        let mut state = self.state.lock().await;
        self.persist(&mut state).await
    }

    /// Clear to the unconstrained default and drop the persisted blob.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> PacerResult<()> {
        let mut state = self.state.lock().await;
        *state = AllRateLimits::default();
        info!("Reset rate-limit state");
        self.backend.delete(STATE_KEY).await
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> AllRateLimits {
        self.state.lock().await.clone()
    }

    /// Sweep expired entries, then ask the policy about `resource`.
    #[instrument(skip(self), fields(provider = %resource.provider()))]
    pub async fn check(&self, resource: &RateLimitResource, cost: u32) -> RateLimitCheckResult {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.cleanup_expired(now);
        let result = self.policy.check_allowed(&state, resource, cost, now);
        if !result.allowed() {
            debug!(
                reason = %result.reason(),
                wait_ms = result.wait_ms(),
                bucket = ?result.bucket(),
                "Pre-flight check denied"
            );
        }
        result
    }

    /// Record a non-throttled response.
    ///
    /// Fresh `remaining` headers overwrite the entry; otherwise a live entry
    /// is decremented optimistically.
    #[instrument(skip(self, headers), fields(provider = %resource.provider()))]
    pub async fn record_success(
        &self,
        resource: &RateLimitResource,
        headers: &RateLimitHeaders,
    ) -> PacerResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        match *resource.provider() {
            Provider::Bucketed => {
                let bucketed = state.bucketed_mut();
                if let (Some(route), Some(bucket)) = (resource.route(), &headers.bucket) {
                    bucketed.learn_route(route, bucket);
                }
                if headers.global {
                    apply_success(bucketed.global_mut(), headers, now);
                } else if let Some(bucket) = headers
                    .bucket
                    .clone()
                    .or_else(|| bucketed.resolve_bucket(resource))
                {
                    let mut slot = bucketed.buckets_mut().remove(&bucket);
                    apply_success(&mut slot, headers, now);
                    if let Some(entry) = slot {
                        bucketed.buckets_mut().insert(bucket, entry);
                    }
                }
                // The global window counts every call, whatever its bucket.
                if !headers.global {
                    if let Some(global) = bucketed.global_mut().as_mut() {
                        if !global.is_expired(now) {
                            global.consume(DEFAULT_COST, now);
                        }
                    }
                }
            }
            provider => {
                if let Some(slot) = state.single_slot_mut(provider) {
                    apply_success(slot, headers, now);
                }
            }
        }

        self.persist(&mut state).await
    }

    /// Record a 429 against `resource`.
    ///
    /// Creates (or overwrites) an exhausted entry lasting until the window
    /// end the headers describe, or a full fallback window without hints.
    #[instrument(skip(self, headers), fields(provider = %resource.provider()))]
    pub async fn record_throttle(
        &self,
        resource: &RateLimitResource,
        headers: &RateLimitHeaders,
        is_global: bool,
    ) -> PacerResult<()> {
        let now = self.clock.now();
        let reset_at = headers.window_end(now).unwrap_or(now + FALLBACK_WINDOW);
        let mut state = self.state.lock().await;

        match *resource.provider() {
            Provider::Bucketed => {
                let bucketed = state.bucketed_mut();
                if let (Some(route), Some(bucket)) = (resource.route(), &headers.bucket) {
                    bucketed.learn_route(route, bucket);
                }
                if is_global {
                    let limit = limit_for(headers, bucketed.global_mut().as_ref());
                    *bucketed.global_mut() = Some(RateLimitEntry::exhausted(limit, now, reset_at));
                    warn!(%reset_at, "Recorded global throttle");
                } else {
                    let bucket = headers
                        .bucket
                        .clone()
                        .or_else(|| bucketed.resolve_bucket(resource))
                        .or_else(|| resource.route().clone())
                        .unwrap_or_else(|| FALLBACK_BUCKET.to_string());
                    if let Some(route) = resource.route() {
                        bucketed.learn_route(route, &bucket);
                    }
                    let limit = limit_for(headers, bucketed.buckets().get(&bucket));
                    bucketed
                        .buckets_mut()
                        .insert(bucket.clone(), RateLimitEntry::exhausted(limit, now, reset_at));
                    warn!(%bucket, %reset_at, "Recorded bucket throttle");
                }
            }
            provider => {
                if let Some(slot) = state.single_slot_mut(provider) {
                    let limit = limit_for(headers, slot.as_ref());
                    *slot = Some(RateLimitEntry::exhausted(limit, now, reset_at));
                    warn!(%reset_at, "Recorded throttle");
                }
            }
        }

        self.persist(&mut state).await
    }

    /// Sweep, serialize and write `state`. Caller holds the lock.
    async fn persist(&self, state: &mut AllRateLimits) -> PacerResult<()> {
        state.cleanup_expired(self.clock.now());
        let bytes = serde_json::to_vec(&*state)
            .map_err(|e| StorageError::new(StorageErrorKind::Serialize(e.to_string())))?;
        self.backend.put(STATE_KEY, &bytes).await
    }
}

fn limit_for(headers: &RateLimitHeaders, existing: Option<&RateLimitEntry>) -> u32 {
    headers
        .limit
        .or_else(|| existing.map(|e| *e.limit()))
        .unwrap_or(0)
}

fn apply_success(slot: &mut Option<RateLimitEntry>, headers: &RateLimitHeaders, now: DateTime<Utc>) {
    let live = slot.as_ref().filter(|e| !e.is_expired(now));
    match (headers.remaining, live) {
        (Some(remaining), existing) => {
            let limit = headers
                .limit
                .or_else(|| existing.map(|e| *e.limit()))
                .unwrap_or(remaining);
            let reset_at = headers
                .window_end(now)
                .or_else(|| existing.map(|e| *e.reset_at()))
                .unwrap_or(now + FALLBACK_WINDOW);
            *slot = Some(RateLimitEntry::new(limit, remaining, now, reset_at));
        }
        (None, Some(_)) => {
            if let Some(entry) = slot.as_mut() {
                entry.consume(DEFAULT_COST, now);
            }
        }
        (None, None) => {}
    }
}
