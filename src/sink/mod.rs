//! Metric output sinks
//!
//! Routes a cycle's metrics to either a JSONL or line protocol backend based
//! on configuration.

pub mod jsonl_writer;
pub mod line_writer;
pub mod writer_backend;

pub use jsonl_writer::JsonlMetricWriter;
pub use line_writer::LineProtocolWriter;
pub use writer_backend::{MetricSink, SinkError};

use crate::config::OutputFormat;
use crate::metric::Metric;

/// Unified writer that routes to the configured backend
pub enum MetricWriter {
    Jsonl(JsonlMetricWriter),
    LineProtocol(LineProtocolWriter),
}

impl MetricWriter {
    /// Create a writer for `format`, writing to `destination` (`-` for stdout)
    pub fn new(format: OutputFormat, destination: &str) -> Result<Self, SinkError> {
        match format {
            OutputFormat::Jsonl => Ok(MetricWriter::Jsonl(JsonlMetricWriter::new(destination)?)),
            OutputFormat::LineProtocol => {
                Ok(MetricWriter::LineProtocol(LineProtocolWriter::new(destination)?))
            }
        }
    }

    fn backend(&mut self) -> &mut dyn MetricSink {
        match self {
            MetricWriter::Jsonl(w) => w,
            MetricWriter::LineProtocol(w) => w,
        }
    }

    pub async fn write_metrics(&mut self, metrics: &[Metric]) -> Result<(), SinkError> {
        self.backend().write_metrics(metrics).await
    }

    pub async fn flush(&mut self) -> Result<(), SinkError> {
        self.backend().flush().await
    }

    pub fn backend_type(&self) -> &'static str {
        match self {
            MetricWriter::Jsonl(w) => w.backend_type(),
            MetricWriter::LineProtocol(w) => w.backend_type(),
        }
    }
}
