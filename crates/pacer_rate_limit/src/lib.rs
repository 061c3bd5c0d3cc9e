//! Rate-limit tracking and retry orchestration for upstream image hosts.
//!
//! This crate is the engine behind the Pacer upload relay. It:
//! - tracks per-provider rate-limit windows in a persisted [`RateLimitStore`],
//! - decides before every call whether it is safe to proceed ([`RateLimitPolicy`]),
//! - interprets upstream responses, including global vs. bucket throttles
//!   ([`parse_headers`], [`classify_throttle`], [`compute_wait_ms`]),
//! - drives each call through bounded retries with backoff ([`RetryOrchestrator`]),
//! - splits oversized uploads into ordered chunks ([`ChunkedUploadCoordinator`]).
//!
//! ## Providers
//!
//! | Provider      | Tracking                      | On local denial        |
//! |---------------|-------------------------------|------------------------|
//! | `passthrough` | none, backoff only            | n/a                    |
//! | `bucketed`    | global entry + per-bucket map | synthesized 429        |
//! | `paced`       | single global entry           | wait and retry         |

#![forbid(unsafe_code)]

mod chunk;
mod clock;
mod config;
mod entry;
mod headers;
mod orchestrator;
mod policy;
mod response;
mod retry;
mod store;

pub use chunk::{Chunk, ChunkReceipt, ChunkTarget, ChunkedUpload, ChunkedUploadCoordinator, plan_chunks};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{PacerConfig, ProviderConfig, ProvidersConfig, ServerSettings};
pub use entry::{AllRateLimits, BucketedLimits, Provider, RateLimitEntry, RateLimitResource};
pub use headers::{
    GLOBAL_BUCKET, GLOBAL_THROTTLE_CODES, HEADER_BUCKET, HEADER_GLOBAL, HEADER_LIMIT,
    HEADER_REMAINING, HEADER_RESET, HEADER_RESET_AFTER, MAX_WINDOW_MS, RateLimitHeaders,
    SAFETY_MARGIN_MS, ThrottleBody, classify_throttle, compute_wait_ms, parse_headers,
};
pub use orchestrator::{ProviderProfile, RetryOrchestrator};
pub use pacer_error::RateLimitReason;
pub use policy::{DEFAULT_COST, RateLimitCheckResult, RateLimitPolicy};
pub use response::UpstreamResponse;
pub use retry::{RetryConfig, RetryConfigBuilder};
pub use store::{RateLimitStore, STATE_KEY};
