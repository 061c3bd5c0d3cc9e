//! Configuration for the relay and its providers.
//!
//! Sources are merged with later ones taking precedence:
//! - Bundled defaults (include_str! from pacer.toml)
//! - `~/.config/pacer/pacer.toml`
//! - `./pacer.toml`
//! - `PACER__*` environment variables (`PACER__SERVER__BIND=0.0.0.0:9000`)

use crate::RetryConfig;
use config::{Config, Environment, File, FileFormat};
use pacer_error::{ConfigError, PacerError, PacerResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, instrument};

/// Bundled default configuration.
const DEFAULT_CONFIG: &str = include_str!("../../../pacer.toml");

/// Settings for one upstream image host.
///
/// # Example
///
/// ```toml
/// [providers.paced]
/// base_url = "https://paced.example/api/v1"
/// api_key_env = "PACER_PACED_CLIENT_ID"
/// max_per_request = 20
///
/// [providers.paced.retry]
/// max_retries = 3
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Base URL every upstream path is joined onto
    pub base_url: String,

    /// Name of the environment variable holding the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Inline credential; wins over `api_key_env`
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Backoff and retry budget
    #[serde(default)]
    pub retry: RetryConfig,

    /// Hand a synthesized 429 back instead of waiting out a local denial
    #[serde(default)]
    pub return_on_local_denial: bool,

    /// Track windows in the store; off means backoff only
    #[serde(default = "default_true")]
    pub track_limits: bool,

    /// Fixed wait before retrying a transient failure
    #[serde(default = "default_transient_delay_ms")]
    pub transient_delay_ms: u64,

    /// Items per upstream request for chunked uploads
    #[serde(default = "default_max_per_request")]
    pub max_per_request: usize,

    /// Per-attempt HTTP timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_transient_delay_ms() -> u64 {
    1000
}

fn default_max_per_request() -> usize {
    20
}

fn default_timeout_secs() -> u64 {
    30
}

impl ProviderConfig {
    /// Config for `base_url` with every other field at its default.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key_env: None,
            api_key: None,
            retry: RetryConfig::default(),
            return_on_local_denial: false,
            track_limits: default_true(),
            transient_delay_ms: default_transient_delay_ms(),
            max_per_request: default_max_per_request(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// The inline credential, else the one in the configured environment
    /// variable. Blank values count as absent.
    pub fn credential(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|name| std::env::var(name).ok())
            })
            .filter(|key| !key.trim().is_empty())
    }

    /// Per-attempt HTTP timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// The three upstream hosts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProvidersConfig {
    /// Unthrottled host
    pub passthrough: ProviderConfig,
    /// Global + per-bucket host
    pub bucketed: ProviderConfig,
    /// Single-window host with chunked posts
    pub paced: ProviderConfig,
}

/// Listener and persistence settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Socket address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Directory for persisted rate-limit state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            state_dir: None,
        }
    }
}

impl ServerSettings {
    /// Configured state directory, else `<data dir>/pacer`, else `./.pacer`.
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("pacer")))
            .unwrap_or_else(|| PathBuf::from(".pacer"))
    }
}

/// Top-level Pacer configuration.
///
/// # Example
///
/// ```no_run
/// use pacer_rate_limit::PacerConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PacerConfig::load()?;
/// println!("Listening on {}", config.server.bind);
/// println!("Paced chunk size: {}", config.providers.paced.max_per_request);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PacerConfig {
    /// Listener and persistence settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Upstream hosts
    pub providers: ProvidersConfig,
}

impl PacerConfig {
    /// Load the bundled defaults overlaid with an explicit file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or does not deserialize.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> PacerResult<Self> {
        debug!("Loading configuration from file");

        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from(path.as_ref()))
            .add_source(env_source())
            .build()
            .map_err(|e| {
                PacerError::from(ConfigError::new(format!(
                    "Failed to read configuration from {}: {}",
                    path.as_ref().display(),
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                PacerError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }

    /// Load with precedence: env > current dir > home dir > bundled defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a present override file is invalid.
    #[instrument]
    pub fn load() -> PacerResult<Self> {
        debug!("Loading configuration with precedence: env > current dir > home dir > bundled defaults");

        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/pacer/pacer.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        builder
            .add_source(File::with_name("pacer").required(false))
            .add_source(env_source())
            .build()
            .map_err(|e| {
                PacerError::from(ConfigError::new(format!(
                    "Failed to build configuration: {}",
                    e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                PacerError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }

    /// Only the bundled defaults.
    pub fn bundled() -> PacerResult<Self> {
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| {
                PacerError::from(ConfigError::new(format!(
                    "Bundled configuration is invalid: {}",
                    e
                )))
            })
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("PACER")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
