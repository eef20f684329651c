//! Error types for the application.

use std::time::Duration;

use thiserror::Error;

/// Configuration-related errors. Always fatal at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Errors reported by a bridge connection or one of its operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to connect {account}: {message}")]
    ConnectFailed { account: String, message: String },

    #[error("{account} is not connected")]
    NotConnected { account: String },

    #[error("Invalid channel '{channel}': {message}")]
    InvalidChannel { channel: String, message: String },

    #[error("Rate limited")]
    RateLimited,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Delivery failed: {message}")]
    DeliveryFailed { message: String },

    #[error("Discord error: {0}")]
    Serenity(#[from] serenity::Error),
}

impl BridgeError {
    /// Whether the send path should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout(_) | Self::NotConnected { .. }
        )
    }
}

/// Re-upload cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to open cache at '{path}': {message}")]
    OpenFailed { path: String, message: String },

    #[error("Cache query failed: {message}")]
    QueryFailed { message: String },
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for CacheError {
    fn from(error: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Self::QueryFailed {
            message: error.to_string(),
        }
    }
}

/// External image host errors.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image host answered with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Upload of '{name}' failed: {message}")]
    UploadFailed { name: String, message: String },

    #[error("Download of '{url}' failed: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Re-upload cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Lifecycle supervisor startup failure.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("None of the {attempted} configured bridge(s) could connect")]
    NoneStarted { attempted: usize },
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Result type alias for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
