//! Relay startup and the serve loop.

use crate::{AppState, create_router};
use pacer_error::{PacerError, PacerResult, ServerError, ServerErrorKind};
use pacer_rate_limit::{MonotonicClock, PacerConfig, RateLimitStore};
use pacer_storage::FileSystemStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

/// Build the shared state for `config`, restoring persisted rate limits.
///
/// # Errors
///
/// Fails if the state directory cannot be created or a provider client
/// cannot be built. Unreadable rate-limit state is not an error.
#[instrument(skip(config))]
pub async fn build_state(config: &PacerConfig) -> PacerResult<AppState> {
    let state_dir = config.server.resolved_state_dir();
    let backend = FileSystemStore::new(&state_dir)?;
    info!(state_dir = %state_dir.display(), "Rate-limit state directory ready");

    let store = RateLimitStore::open(Arc::new(backend), Arc::new(MonotonicClock::new())).await;
    AppState::new(config, store)
}

/// Bind the configured address and serve until ctrl-c.
///
/// # Errors
///
/// Returns a server error if binding fails or the serve loop aborts.
#[instrument(skip(config), fields(bind = %config.server.bind))]
pub async fn serve(config: PacerConfig) -> PacerResult<()> {
    let state = build_state(&config).await?;
    let app = create_router(state.clone());

    let listener = TcpListener::bind(&config.server.bind).await.map_err(|e| {
        PacerError::from(ServerError::new(ServerErrorKind::Bind {
            address: config.server.bind.clone(),
            message: e.to_string(),
        }))
    })?;
    info!("Pacer relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| PacerError::from(ServerError::new(ServerErrorKind::Serve(e.to_string()))))?;

    if let Err(e) = state.store().save().await {
        warn!(error = %e, "Failed to flush rate-limit state on shutdown");
    }
    info!("Pacer relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
