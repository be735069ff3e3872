//! Error types for webticks-core

use thiserror::Error;

/// Main error type for the webticks-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport failure while delivering a batch (network, timeout, TLS)
    #[error("transport error: {0}")]
    Transport(String),

    /// Destination URL could not be parsed or resolved
    #[error("invalid destination {url:?}: {reason}")]
    InvalidDestination { url: String, reason: String },

    /// A history entry point rejected the navigation
    #[error("navigation error: {0}")]
    Navigation(String),

    /// Capability is not available in the current runtime
    #[error("unsupported environment: {0}")]
    Environment(String),
}

/// Result type alias for webticks-core
pub type Result<T> = std::result::Result<T, Error>;
