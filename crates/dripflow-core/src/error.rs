//! Dripflow error type.

/// Convenience result alias used across all Dripflow crates.
pub type Result<T> = std::result::Result<T, DripflowError>;

/// Unified error for the sequence engine.
#[derive(Debug, thiserror::Error)]
pub enum DripflowError {
    /// Bad or missing configuration (config file, sequence/step definitions).
    #[error("Config error: {0}")]
    Config(String),

    /// Definition or runtime store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Messaging gateway failure (network error or non-2xx response).
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Gateway credential rejected or absent.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A step's delay/weekday/window combination has no valid slot.
    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
