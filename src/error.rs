//! Error taxonomy for collection cycles
//!
//! Every failure that reaches the collector is one of these kinds. The kind
//! decides what happens next cycle:
//! - `Configuration` is terminal for the aggregation (reported once)
//! - `Connectivity` / `NotFound` leave an uncompiled aggregation pending
//!   so compilation is retried next cycle
//! - `Timeout` / `ResponseShape` only fail the current cycle

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectError {
    /// Invalid or inconsistent aggregation settings
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Store unreachable, TLS failure, or non-success HTTP status
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// Index (or mapping) does not exist on the store
    #[error("not found: {0}")]
    NotFound(String),

    /// Deadline expired before the store answered
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Response did not have the expected structure
    #[error("unexpected response shape: {0}")]
    ResponseShape(String),
}

impl CollectError {
    /// Whether an uncompiled aggregation should try compiling again next cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectError::Connectivity(_) | CollectError::NotFound(_) | CollectError::Timeout(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CollectError::Configuration(_) => "configuration",
            CollectError::Connectivity(_) => "connectivity",
            CollectError::NotFound(_) => "not_found",
            CollectError::Timeout(_) => "timeout",
            CollectError::ResponseShape(_) => "response_shape",
        }
    }
}

impl From<reqwest::Error> for CollectError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollectError::ResponseShape(err.to_string())
        } else if err.is_builder() {
            CollectError::Configuration(err.to_string())
        } else {
            CollectError::Connectivity(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CollectError {
    fn from(err: serde_json::Error) -> Self {
        CollectError::ResponseShape(err.to_string())
    }
}

pub type CollectResult<T> = Result<T, CollectError>;

/// Errors raised while loading the collector configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}
