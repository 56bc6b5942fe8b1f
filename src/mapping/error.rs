//! Error definitions for the mapping module

use thiserror::Error;

/// Error types for the mapping engine
#[derive(Debug, Error)]
pub enum MappingError {
    /// Invalid bindings or settings
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The engine needs a tokio runtime for its timers
    #[error("Initialization error: {0}")]
    InitializationError(String),
}
