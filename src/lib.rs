//! OpenSearch aggregation query collector
//!
//! Periodically turns declarative aggregation settings into OpenSearch
//! search requests and flattens the bucket trees that come back into
//! tagged metrics.

pub mod client;
pub mod collector;
pub mod config;
pub mod error;
pub mod metric;
pub mod query;
pub mod sink;

pub use client::{OpenSearchClient, StoreClient};
pub use collector::{AggregationState, Collector, CycleError, CycleReport};
pub use config::{AggregationConfig, CollectorConfig, OutputFormat};
pub use error::{CollectError, CollectResult, ConfigError};
pub use metric::Metric;
pub use sink::{MetricSink, MetricWriter};
