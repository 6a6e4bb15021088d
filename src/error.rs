//! Centralized error types for the serving plane
//!
//! Control-plane failures (cluster queries, scale calls, configuration)
//! travel as `ServeError`. Failures scoped to a single request never do;
//! they are encoded in the response's [`crate::workload::ResponseStatus`]
//! so that every request still produces exactly one response.

use thiserror::Error;

/// Serving-plane error types
#[derive(Debug, Error)]
pub enum ServeError {
    /// Configuration parsing or validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A cluster-API call failed in a way expected to succeed on retry.
    /// Not retried in the scale path; the next tick produces a fresh decision.
    #[error("Transient cluster error: {0}")]
    TransientCluster(String),

    /// A scale operation was rejected or failed
    #[error("Scaling error: {0}")]
    Scaling(String),

    /// The scale target is being torn down; non-fatal to the autoscaler
    #[error("Target is being deleted: {0}")]
    TargetDeleting(String),

    /// Backing store corruption reported by a scaler implementation; process-fatal
    #[error("Storage corruption: {0}")]
    StorageCorruption(String),

    /// Backend executor construction failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ServeError {
    /// Whether this error must take the process down rather than be logged
    /// and dropped by the control loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServeError::StorageCorruption(_))
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ServeError>;
