//! Aggregation query compiler
//!
//! Turns an [`AggregationSpec`] plus its discovered [`FieldCatalog`] into a
//! query document template:
//!
//! ```text
//! query.bool.filter = [ query_string(filter)?, range(date_field: <now-period>..<now>) ]
//! aggs:
//!   <tag0>: terms(tag0)            <tag0>_missing: missing(tag0)   (policy != ignore)
//!     aggs:
//!       <tag1>: terms(tag1) ...
//!         aggs:
//!           <field>_<function>: <function>(field)   (one per metric field)
//! ```
//!
//! With no tags the metric clauses sit directly under `aggs`. With no metric
//! function (and no tags) the document is a plain search returning raw
//! documents. The range bounds are left empty in the template and filled by
//! [`CompiledQuery::render`] at execution time.

use super::catalog::{FieldCatalog, FieldKind, FieldType};
use super::spec::{AggregationSpec, MetricFunction};
use crate::error::{CollectError, CollectResult};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Maximum buckets requested per grouping level
pub const TERMS_SIZE: u64 = 1000;

/// Maximum documents returned by a raw document query
pub const DOCUMENT_LIMIT: u64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
    /// Per-tag grouping (possibly zero levels) with metric functions at the leaves
    Aggregated(MetricFunction),
    /// Matching documents are returned as-is
    Documents,
}

/// One grouping level of the compiled chain
#[derive(Debug, Clone, PartialEq)]
pub struct TagLevel {
    pub field: String,
    /// Name of the `terms` aggregation at this level
    pub agg_name: String,
    /// Name of the companion `missing` aggregation, if requested
    pub missing_agg_name: Option<String>,
}

/// Leaf aggregation key and the metric field it reports
#[derive(Debug, Clone, PartialEq)]
pub struct MetricKey {
    pub key: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub index: String,
    pub mode: QueryMode,
    pub levels: Vec<TagLevel>,
    pub metrics: Vec<MetricKey>,
    /// Validated metric field types from the catalog
    pub field_types: BTreeMap<String, FieldType>,
    template: Value,
    range_pointer: String,
}

impl CompiledQuery {
    pub fn template(&self) -> &Value {
        &self.template
    }

    /// Query document for the window `[now - period, now]`
    pub fn render(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Value {
        let mut body = self.template.clone();
        if let Some(range) = body.pointer_mut(&self.range_pointer) {
            range["gte"] = json!(from.timestamp_millis());
            range["lte"] = json!(to.timestamp_millis());
        }
        body
    }

    pub fn function(&self) -> Option<MetricFunction> {
        match self.mode {
            QueryMode::Aggregated(function) => Some(function),
            QueryMode::Documents => None,
        }
    }

    /// Number of grouping levels (depth of the bucket tree)
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Aggregation names may not contain `.`-separated paths
fn agg_name(field: &str) -> String {
    field.replace('.', "_")
}

fn json_pointer_escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Compile `spec` against the fields discovered for its index
///
/// Pure: never touches the network, and the same inputs always give the
/// same document.
pub fn compile(spec: &AggregationSpec, catalog: &FieldCatalog) -> CollectResult<CompiledQuery> {
    if spec.metric_fields.is_empty() {
        return Err(CollectError::Configuration(format!(
            "no metric fields configured for '{}'",
            spec.measurement_name
        )));
    }

    let mode = if spec.metric_function.trim().is_empty() {
        if !spec.tags.is_empty() {
            return Err(CollectError::Configuration(format!(
                "tags configured without a metric function for '{}'",
                spec.measurement_name
            )));
        }
        QueryMode::Documents
    } else {
        QueryMode::Aggregated(MetricFunction::parse(&spec.metric_function)?)
    };

    let field_types = catalog.validate_fields(&spec.metric_fields)?;

    if let QueryMode::Aggregated(function) = mode {
        if function.requires_numeric() {
            for (field, field_type) in &field_types {
                if !matches!(field_type.kind, FieldKind::Numeric | FieldKind::Date) {
                    return Err(CollectError::Configuration(format!(
                        "metric field '{}' has type '{}', not usable with '{}'",
                        field,
                        field_type.name,
                        function.as_str()
                    )));
                }
            }
        }
    }

    let mut filters = Vec::new();
    if let Some(filter) = &spec.filter_query {
        filters.push(json!({ "query_string": { "query": filter } }));
    }
    let range_index = filters.len();
    filters.push(json!({
        "range": {
            spec.date_field.as_str(): { "gte": Value::Null, "lte": Value::Null, "format": "epoch_millis" }
        }
    }));
    let range_pointer = format!(
        "/query/bool/filter/{}/range/{}",
        range_index,
        json_pointer_escape(&spec.date_field)
    );

    let query = json!({ "bool": { "filter": filters } });

    let (template, levels, metrics) = match mode {
        QueryMode::Documents => {
            let mut source = spec.metric_fields.clone();
            source.push(spec.date_field.clone());
            let body = json!({
                "size": DOCUMENT_LIMIT,
                "query": query,
                "sort": [ { spec.date_field.as_str(): { "order": "desc" } } ],
                "_source": source,
            });
            let metrics = spec
                .metric_fields
                .iter()
                .map(|f| MetricKey { key: f.clone(), field: f.clone() })
                .collect();
            (body, Vec::new(), metrics)
        }
        QueryMode::Aggregated(function) => {
            let metrics = metric_keys(spec, function)?;
            let levels = tag_levels(spec);
            let aggs = build_level(&levels, 0, &metrics, function);
            let body = json!({
                "size": 0,
                "query": query,
                "aggs": aggs,
            });
            (body, levels, metrics)
        }
    };

    Ok(CompiledQuery {
        index: spec.index.clone(),
        mode,
        levels,
        metrics,
        field_types,
        template,
        range_pointer,
    })
}

fn metric_keys(spec: &AggregationSpec, function: MetricFunction) -> CollectResult<Vec<MetricKey>> {
    let mut keys: Vec<MetricKey> = Vec::with_capacity(spec.metric_fields.len());
    for field in &spec.metric_fields {
        let key = format!("{}_{}", agg_name(field), function.as_str());
        if keys.iter().any(|k| k.key == key) {
            return Err(CollectError::Configuration(format!(
                "metric field '{}' collides with another field as '{}'",
                field, key
            )));
        }
        keys.push(MetricKey { key, field: field.clone() });
    }
    Ok(keys)
}

fn tag_levels(spec: &AggregationSpec) -> Vec<TagLevel> {
    let with_missing = spec.missing_tag_policy.requests_missing_bucket();
    spec.tags
        .iter()
        .map(|tag| {
            let name = agg_name(tag);
            TagLevel {
                field: tag.clone(),
                missing_agg_name: with_missing.then(|| format!("{}_missing", name)),
                agg_name: name,
            }
        })
        .collect()
}

/// Aggregations for grouping level `depth`; the last level holds metric clauses
fn build_level(
    levels: &[TagLevel],
    depth: usize,
    metrics: &[MetricKey],
    function: MetricFunction,
) -> Value {
    let mut aggs = Map::new();

    let Some(level) = levels.get(depth) else {
        for metric in metrics {
            aggs.insert(
                metric.key.clone(),
                json!({ function.store_aggregation(): { "field": metric.field } }),
            );
        }
        return Value::Object(aggs);
    };

    let inner = build_level(levels, depth + 1, metrics, function);

    aggs.insert(
        level.agg_name.clone(),
        json!({
            "terms": { "field": level.field, "size": TERMS_SIZE },
            "aggs": inner.clone(),
        }),
    );

    if let Some(missing_name) = &level.missing_agg_name {
        aggs.insert(
            missing_name.clone(),
            json!({
                "missing": { "field": level.field },
                "aggs": inner,
            }),
        );
    }

    Value::Object(aggs)
}
