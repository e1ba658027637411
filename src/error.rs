//! Error types for the stock assistant orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    /// Malformed ticker or date input. Recovered by the executor.
    #[error("{0}")]
    Validation(String),

    #[error("unknown capability: {0}")]
    CapabilityNotFound(String),

    #[error("capability already registered: {0}")]
    DuplicateCapability(String),

    /// The remote data source call itself failed (network, status, payload shape).
    #[error("{0}")]
    RemoteSource(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The selection oracle was unavailable or produced nothing usable.
    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteSource(message.into())
    }

    pub fn oracle(message: impl Into<String>) -> Self {
        Self::Oracle(message.into())
    }
}
