//! Aggregation spec: the declarative description of one collected measurement

use crate::config::AggregationConfig;
use crate::error::{CollectError, CollectResult};
use std::time::Duration;

/// Metric function applied to every configured metric field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricFunction {
    Avg,
    Sum,
    Min,
    Max,
    /// Number of values (`value_count`)
    Count,
    /// Approximate number of distinct values (`cardinality`)
    DistinctCount,
}

impl MetricFunction {
    pub fn parse(name: &str) -> CollectResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "avg" | "average" | "mean" => Ok(MetricFunction::Avg),
            "sum" => Ok(MetricFunction::Sum),
            "min" => Ok(MetricFunction::Min),
            "max" => Ok(MetricFunction::Max),
            "count" | "value_count" => Ok(MetricFunction::Count),
            "distinct_count" | "cardinality" => Ok(MetricFunction::DistinctCount),
            other => Err(CollectError::Configuration(format!(
                "aggregation function '{}' not supported",
                other
            ))),
        }
    }

    /// Canonical name, used in aggregation keys
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFunction::Avg => "avg",
            MetricFunction::Sum => "sum",
            MetricFunction::Min => "min",
            MetricFunction::Max => "max",
            MetricFunction::Count => "count",
            MetricFunction::DistinctCount => "distinct_count",
        }
    }

    /// Store aggregation type implementing this function
    pub fn store_aggregation(&self) -> &'static str {
        match self {
            MetricFunction::Avg => "avg",
            MetricFunction::Sum => "sum",
            MetricFunction::Min => "min",
            MetricFunction::Max => "max",
            MetricFunction::Count => "value_count",
            MetricFunction::DistinctCount => "cardinality",
        }
    }

    /// Whether the function only makes sense on numeric (or date) fields
    pub fn requires_numeric(&self) -> bool {
        matches!(
            self,
            MetricFunction::Avg | MetricFunction::Sum | MetricFunction::Min | MetricFunction::Max
        )
    }

    /// Value counts always yield a value, even over zero documents
    pub fn always_defined(&self) -> bool {
        matches!(self, MetricFunction::Count)
    }
}

/// What to do with documents lacking a value for a grouping tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingTagPolicy {
    /// Let the store drop such documents (no missing bucket requested)
    Ignore,
    /// Report them, omitting the tag from the emitted metric
    Skip,
    /// Report them with the placeholder as tag value
    Substitute(String),
}

impl MissingTagPolicy {
    pub fn from_config(include_missing_tag: bool, missing_tag_value: &str) -> Self {
        match (include_missing_tag, missing_tag_value.is_empty()) {
            (false, _) => MissingTagPolicy::Ignore,
            (true, true) => MissingTagPolicy::Skip,
            (true, false) => MissingTagPolicy::Substitute(missing_tag_value.to_string()),
        }
    }

    pub fn requests_missing_bucket(&self) -> bool {
        !matches!(self, MissingTagPolicy::Ignore)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSpec {
    pub index: String,
    pub measurement_name: String,
    pub date_field: String,
    pub date_field_custom_format: Option<String>,
    pub query_period: Duration,
    pub filter_query: Option<String>,
    /// Grouping fields, outermost first
    pub tags: Vec<String>,
    pub metric_fields: Vec<String>,
    /// Raw function name; parsed at compile time, empty selects raw documents
    pub metric_function: String,
    pub missing_tag_policy: MissingTagPolicy,
}

impl From<&AggregationConfig> for AggregationSpec {
    fn from(cfg: &AggregationConfig) -> Self {
        Self {
            index: cfg.index.clone(),
            measurement_name: cfg.measurement_name.clone(),
            date_field: cfg.date_field.clone(),
            date_field_custom_format: cfg
                .date_field_custom_format
                .clone()
                .filter(|f| !f.is_empty()),
            query_period: cfg.query_period,
            filter_query: cfg.filter_query.clone().filter(|q| !q.trim().is_empty()),
            tags: cfg.tags.clone(),
            metric_fields: cfg.metric_fields.clone(),
            metric_function: cfg.metric_function.clone(),
            missing_tag_policy: MissingTagPolicy::from_config(
                cfg.include_missing_tag,
                &cfg.missing_tag_value,
            ),
        }
    }
}

impl AggregationSpec {
    /// Minimal spec used by tests and programmatic callers
    pub fn new(index: &str, measurement_name: &str, date_field: &str) -> Self {
        Self {
            index: index.to_string(),
            measurement_name: measurement_name.to_string(),
            date_field: date_field.to_string(),
            date_field_custom_format: None,
            query_period: Duration::from_secs(60),
            filter_query: None,
            tags: Vec::new(),
            metric_fields: Vec::new(),
            metric_function: String::new(),
            missing_tag_policy: MissingTagPolicy::Ignore,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_metrics(mut self, fields: &[&str], function: &str) -> Self {
        self.metric_fields = fields.iter().map(|f| f.to_string()).collect();
        self.metric_function = function.to_string();
        self
    }

    pub fn with_missing_tag_policy(mut self, policy: MissingTagPolicy) -> Self {
        self.missing_tag_policy = policy;
        self
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter_query = Some(filter.to_string());
        self
    }
}
