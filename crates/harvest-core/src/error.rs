use thiserror::Error;

/// Application-wide error types for Harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// Page navigation failed (network failure, bad status, renderer error).
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// Page navigation did not finish in time.
    #[error("Navigation timed out after {0} seconds")]
    Timeout(u64),

    /// Checkpoint could not be written. State integrity is no longer guaranteed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Final output (CSV/JSON) could not be written.
    #[error("Output error: {0}")]
    Output(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration (bad URL template, malformed profile).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Browser could not be launched or shut down.
    #[error("Browser error: {0}")]
    Browser(String),

    /// A phase had nothing to work with.
    #[error("No entities: {0}")]
    NoEntities(&'static str),
}

impl AppError {
    /// Convenience constructor for navigation failures.
    pub fn navigation(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AppError::Navigation {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Navigation { .. } | AppError::Timeout(_))
    }

    /// Returns true if the run must stop regardless of the entity failure policy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Checkpoint(_) | AppError::Output(_) | AppError::Config(_)
        )
    }
}
