//! Failures loading `pacer.toml` and its overrides.

/// Invalid or unreadable configuration.
///
/// Covers a `--config` file that cannot be read and any layer (bundled
/// defaults, home or working directory file, `PACER_*` variables) that does
/// not deserialize into `PacerConfig`.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Configuration Error: {} at line {} in {}", message, line, file)]
pub struct ConfigError {
    /// Which layer or key was rejected, and why
    pub message: String,
    /// Line of the call that raised it
    pub line: u32,
    /// File of the call that raised it
    pub file: &'static str,
}

impl ConfigError {
    /// Reject configuration, capturing the caller's location.
    ///
    /// # Examples
    ///
    /// ```
    /// use pacer_error::ConfigError;
    ///
    /// let err = ConfigError::new("Failed to parse configuration: missing field `base_url`");
    /// assert!(err.to_string().starts_with("Configuration Error: Failed to parse"));
    /// assert!(err.file.ends_with(".rs"));
    /// ```
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: location.line(),
            file: location.file(),
        }
    }
}
