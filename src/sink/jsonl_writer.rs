//! JSONL sink - one JSON object per metric

use super::writer_backend::{open_destination, MetricSink, SinkError};
use crate::metric::Metric;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};

#[derive(Debug, Serialize)]
struct MetricRecord<'a> {
    measurement: &'a str,
    tags: BTreeMap<&'a str, &'a str>,
    fields: BTreeMap<&'a str, f64>,
    timestamp: DateTime<Utc>,
}

impl<'a> From<&'a Metric> for MetricRecord<'a> {
    fn from(metric: &'a Metric) -> Self {
        Self {
            measurement: &metric.measurement,
            tags: metric.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect(),
            fields: metric.fields.iter().map(|(k, v)| (k.as_str(), *v)).collect(),
            timestamp: metric.timestamp,
        }
    }
}

pub struct JsonlMetricWriter {
    writer: BufWriter<Box<dyn Write + Send>>,
}

impl JsonlMetricWriter {
    pub fn new(destination: &str) -> std::io::Result<Self> {
        Ok(Self::from_writer(open_destination(destination)?))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_metric(&mut self, metric: &Metric) -> Result<(), SinkError> {
        let json = serde_json::to_string(&MetricRecord::from(metric))?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for JsonlMetricWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[async_trait]
impl MetricSink for JsonlMetricWriter {
    async fn write_metrics(&mut self, metrics: &[Metric]) -> Result<(), SinkError> {
        for metric in metrics {
            self.write_metric(metric)?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        JsonlMetricWriter::flush(self)?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}
