//! HTTP relay that forwards image uploads to three rate-limited hosts.
//!
//! Each route runs its upstream call through the shared
//! [`RetryOrchestrator`](pacer_rate_limit::RetryOrchestrator), so every
//! handler sees the same persisted rate-limit state.
//!
//! # Routes
//!
//! | Method | Path                              | Host          |
//! |--------|-----------------------------------|---------------|
//! | POST   | `/upload/passthrough`             | `passthrough` |
//! | POST   | `/upload/bucketed/collections`    | `bucketed`    |
//! | POST   | `/upload/bucketed/files`          | `bucketed`    |
//! | POST   | `/upload/paced/post`              | `paced`       |
//! | POST   | `/upload/paced/post/{id}/add`     | `paced`       |
//! | GET    | `/rate-limits`                    | local         |
//! | DELETE | `/rate-limits`                    | local         |
//! | GET    | `/health`                         | local         |
//!
//! # Example
//!
//! ```no_run
//! use pacer_rate_limit::PacerConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PacerConfig::load()?;
//!     pacer_server::serve(config).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod observability;
mod paced;
mod routes;
mod server;
mod state;

pub use client::{HEADER_SCOPE, UpstreamClient};
pub use error::ApiError;
pub use observability::{DEFAULT_LOG_FILTER, init_tracing};
pub use paced::{AppendItemsRequest, CreatePostRequest, PostMetadata, append_to_post, create_post, resource_id};
pub use routes::{MAX_BODY_BYTES, create_router, forward};
pub use server::{build_state, serve};
pub use state::{AppState, ProviderHandle};
