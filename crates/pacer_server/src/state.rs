//! Shared application state.

use crate::UpstreamClient;
use derive_getters::Getters;
use pacer_error::PacerResult;
use pacer_rate_limit::{
    PacerConfig, Provider, ProviderConfig, ProviderProfile, RateLimitStore, RetryOrchestrator,
};
use std::sync::Arc;

/// Everything needed to call one provider.
#[derive(Debug, Clone, Getters)]
pub struct ProviderHandle {
    client: UpstreamClient,
    profile: ProviderProfile,
    max_per_request: usize,
}

impl ProviderHandle {
    /// Handle for `provider` as configured.
    pub fn new(
        provider: Provider,
        config: &ProviderConfig,
        require_credential: bool,
    ) -> PacerResult<Self> {
        Ok(Self {
            client: UpstreamClient::new(provider, config, require_credential)?,
            profile: ProviderProfile::from_config(provider, config),
            max_per_request: config.max_per_request,
        })
    }
}

/// State shared by every handler.
///
/// The store inside the orchestrator is the only mutable state; the
/// handles are immutable after startup.
#[derive(Debug, Clone)]
pub struct AppState {
    orchestrator: RetryOrchestrator,
    providers: Arc<Providers>,
}

#[derive(Debug)]
struct Providers {
    passthrough: ProviderHandle,
    bucketed: ProviderHandle,
    paced: ProviderHandle,
}

impl AppState {
    /// Build handles for every configured provider over a shared store.
    ///
    /// The bucketed host refuses anonymous calls; the other two accept them.
    pub fn new(config: &PacerConfig, store: RateLimitStore) -> PacerResult<Self> {
        let providers = &config.providers;
        Ok(Self {
            orchestrator: RetryOrchestrator::new(store),
            providers: Arc::new(Providers {
                passthrough: ProviderHandle::new(
                    Provider::Passthrough,
                    &providers.passthrough,
                    false,
                )?,
                bucketed: ProviderHandle::new(Provider::Bucketed, &providers.bucketed, true)?,
                paced: ProviderHandle::new(Provider::Paced, &providers.paced, false)?,
            }),
        })
    }

    /// The retry orchestrator.
    pub fn orchestrator(&self) -> &RetryOrchestrator {
        &self.orchestrator
    }

    /// The shared rate-limit store.
    pub fn store(&self) -> &RateLimitStore {
        self.orchestrator.store()
    }

    /// Handle for `provider`.
    pub fn provider(&self, provider: Provider) -> &ProviderHandle {
        match provider {
            Provider::Passthrough => &self.providers.passthrough,
            Provider::Bucketed => &self.providers.bucketed,
            Provider::Paced => &self.providers.paced,
        }
    }
}
