//! Line protocol sink

use super::writer_backend::{open_destination, MetricSink, SinkError};
use crate::metric::Metric;
use async_trait::async_trait;
use std::io::{BufWriter, Write};

pub struct LineProtocolWriter {
    writer: BufWriter<Box<dyn Write + Send>>,
    skipped: u64,
}

impl LineProtocolWriter {
    pub fn new(destination: &str) -> std::io::Result<Self> {
        Ok(Self::from_writer(open_destination(destination)?))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: BufWriter::new(writer),
            skipped: 0,
        }
    }

    /// Metrics without fields dropped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn write_metric(&mut self, metric: &Metric) -> std::io::Result<()> {
        // A line protocol record needs at least one field
        if metric.fields.is_empty() {
            log::debug!(
                "Skipping field-less metric '{}' {:?}",
                metric.measurement,
                metric.tags
            );
            self.skipped += 1;
            return Ok(());
        }

        writeln!(self.writer, "{}", metric.to_line_protocol())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for LineProtocolWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[async_trait]
impl MetricSink for LineProtocolWriter {
    async fn write_metrics(&mut self, metrics: &[Metric]) -> Result<(), SinkError> {
        for metric in metrics {
            self.write_metric(metric)?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        LineProtocolWriter::flush(self)?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "LineProtocol"
    }
}
