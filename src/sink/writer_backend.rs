//! Sink trait for collected metrics
//!
//! Defines the interface for writing one cycle's metrics to an output.

use crate::metric::Metric;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

/// Backend trait for writing collected metrics
#[async_trait]
pub trait MetricSink: Send {
    /// Write every metric produced by one cycle
    async fn write_metrics(&mut self, metrics: &[Metric]) -> Result<(), SinkError>;

    /// Flush pending writes
    async fn flush(&mut self) -> Result<(), SinkError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Open an output destination: `-` is stdout, anything else a file opened for append
pub fn open_destination(destination: &str) -> io::Result<Box<dyn Write + Send>> {
    if destination == "-" {
        return Ok(Box::new(io::stdout()));
    }

    let path = Path::new(destination);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    log::info!("📝 Writing metrics to: {}", path.display());
    Ok(Box::new(file))
}
