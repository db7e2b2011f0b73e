//! Result decompiler: store response -> flat metrics
//!
//! Two response shapes are recognized:
//! - **flat**: no `aggregations` object, `hits.hits` holds raw documents;
//!   one metric per document, timestamped from the document's date field
//! - **bucketed**: `aggregations` holds the tree built by the compiler; it is
//!   parsed into [`BucketNode`]s and walked depth-first, one metric per leaf,
//!   all stamped with the cycle's reference time
//!
//! Decompilation is all-or-nothing: any structural problem fails the whole
//! response with [`CollectError::ResponseShape`].

use super::compiler::{CompiledQuery, DOCUMENT_LIMIT, TERMS_SIZE};
use super::spec::{AggregationSpec, MissingTagPolicy};
use crate::error::{CollectError, CollectResult};
use crate::metric::Metric;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Node of the parsed bucket tree
#[derive(Debug, Clone, PartialEq)]
pub struct BucketNode {
    /// Group value at this level; `None` for the root and for missing-value buckets
    pub key: Option<String>,
    pub doc_count: u64,
    pub content: BucketContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BucketContent {
    /// Buckets of the next grouping level
    Group(Vec<BucketNode>),
    /// Metric values keyed by metric field; `None` when the store had no value
    Leaf(Vec<(String, Option<f64>)>),
}

impl BucketNode {
    pub fn leaf_count(&self) -> usize {
        match &self.content {
            BucketContent::Leaf(_) => 1,
            BucketContent::Group(children) => children.iter().map(BucketNode::leaf_count).sum(),
        }
    }
}

/// Convert a raw search response into metrics
pub fn decompile(
    spec: &AggregationSpec,
    compiled: &CompiledQuery,
    response: &Value,
    reference_time: DateTime<Utc>,
) -> CollectResult<Vec<Metric>> {
    match response.get("aggregations") {
        Some(aggregations) => {
            let root = parse_tree(compiled, aggregations, total_hits(response))?;
            let mut metrics = Vec::with_capacity(root.leaf_count());
            let mut tags = Vec::with_capacity(compiled.depth());
            walk(spec, compiled, &root, 0, &mut tags, reference_time, &mut metrics);

            let dropped = truncated_doc_count(compiled, aggregations);
            if dropped > 0 {
                log::warn!(
                    "⚠️  '{}': {} documents fell outside the top {} buckets of a grouping level",
                    spec.measurement_name,
                    dropped,
                    TERMS_SIZE
                );
            }
            log::debug!(
                "Decompiled {} bucket metrics for '{}'",
                metrics.len(),
                spec.measurement_name
            );
            Ok(metrics)
        }
        None if compiled.depth() > 0 => Err(CollectError::ResponseShape(format!(
            "expected {} grouping levels but response has no aggregations",
            compiled.depth()
        ))),
        None => decompile_documents(spec, response),
    }
}

fn total_hits(response: &Value) -> u64 {
    let total = &response["hits"]["total"];
    total
        .get("value")
        .and_then(Value::as_u64)
        .or_else(|| total.as_u64())
        .unwrap_or(0)
}

/// Documents the store left out because a grouping level hit its bucket cap
pub fn truncated_doc_count(compiled: &CompiledQuery, aggregations: &Value) -> u64 {
    truncated_at(compiled, aggregations, 0)
}

fn truncated_at(compiled: &CompiledQuery, container: &Value, depth: usize) -> u64 {
    let Some(level) = compiled.levels.get(depth) else {
        return 0;
    };

    let mut dropped = 0;
    if let Some(agg) = container.get(&level.agg_name) {
        dropped += agg.get("sum_other_doc_count").and_then(Value::as_u64).unwrap_or(0);
        if let Some(buckets) = agg.get("buckets").and_then(Value::as_array) {
            dropped += buckets
                .iter()
                .map(|bucket| truncated_at(compiled, bucket, depth + 1))
                .sum::<u64>();
        }
    }
    if let Some(missing) = level.missing_agg_name.as_ref().and_then(|name| container.get(name)) {
        dropped += truncated_at(compiled, missing, depth + 1);
    }
    dropped
}

/// Parse the `aggregations` object into a typed tree
pub fn parse_tree(
    compiled: &CompiledQuery,
    aggregations: &Value,
    doc_count: u64,
) -> CollectResult<BucketNode> {
    if !aggregations.is_object() {
        return Err(CollectError::ResponseShape("'aggregations' is not an object".to_string()));
    }

    Ok(BucketNode {
        key: None,
        doc_count,
        content: parse_content(compiled, aggregations, 0)?,
    })
}

fn parse_content(compiled: &CompiledQuery, container: &Value, depth: usize) -> CollectResult<BucketContent> {
    let Some(level) = compiled.levels.get(depth) else {
        return parse_leaf(compiled, container).map(BucketContent::Leaf);
    };

    let buckets = container
        .get(&level.agg_name)
        .and_then(|agg| agg.get("buckets"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            CollectError::ResponseShape(format!(
                "grouping aggregation '{}' has no bucket list",
                level.agg_name
            ))
        })?;

    let mut children = Vec::with_capacity(buckets.len() + 1);
    for bucket in buckets {
        children.push(BucketNode {
            key: Some(bucket_key(bucket, &level.agg_name)?),
            doc_count: bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0),
            content: parse_content(compiled, bucket, depth + 1)?,
        });
    }

    if let Some(missing_name) = &level.missing_agg_name {
        match container.get(missing_name) {
            Some(missing) => {
                let doc_count = missing.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
                if doc_count > 0 {
                    children.push(BucketNode {
                        key: None,
                        doc_count,
                        content: parse_content(compiled, missing, depth + 1)?,
                    });
                }
            }
            None => log::debug!("Missing-value aggregation '{}' absent from response", missing_name),
        }
    }

    Ok(BucketContent::Group(children))
}

fn parse_leaf(compiled: &CompiledQuery, container: &Value) -> CollectResult<Vec<(String, Option<f64>)>> {
    let mut values = Vec::with_capacity(compiled.metrics.len());
    for metric in &compiled.metrics {
        let agg = container.get(&metric.key).ok_or_else(|| {
            CollectError::ResponseShape(format!("metric aggregation '{}' not found", metric.key))
        })?;
        let value = agg.get("value").and_then(Value::as_f64).filter(|v| v.is_finite());
        values.push((metric.field.clone(), value));
    }
    Ok(values)
}

fn bucket_key(bucket: &Value, agg_name: &str) -> CollectResult<String> {
    if let Some(formatted) = bucket.get("key_as_string").and_then(Value::as_str) {
        return Ok(formatted.to_string());
    }

    match bucket.get("key") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        _ => Err(CollectError::ResponseShape(format!(
            "bucket in '{}' has no usable key",
            agg_name
        ))),
    }
}

fn walk(
    spec: &AggregationSpec,
    compiled: &CompiledQuery,
    node: &BucketNode,
    depth: usize,
    tags: &mut Vec<(String, String)>,
    reference_time: DateTime<Utc>,
    out: &mut Vec<Metric>,
) {
    match &node.content {
        BucketContent::Leaf(values) => {
            let always_defined = compiled.function().map_or(false, |f| f.always_defined());
            let mut metric = Metric::new(spec.measurement_name.clone(), reference_time);
            metric.tags = tags.clone();
            metric.fields = values
                .iter()
                .filter_map(|(field, value)| match value {
                    Some(v) => Some((field.clone(), *v)),
                    None if always_defined => Some((field.clone(), 0.0)),
                    None => None,
                })
                .collect();
            out.push(metric);
        }
        BucketContent::Group(children) => {
            let tag_name = &compiled.levels[depth].field;
            for child in children {
                let value = match (&child.key, &spec.missing_tag_policy) {
                    (Some(key), _) => Some(key.clone()),
                    (None, MissingTagPolicy::Substitute(placeholder)) => Some(placeholder.clone()),
                    (None, _) => None,
                };

                let pushed = value.is_some();
                if let Some(value) = value {
                    tags.push((tag_name.clone(), value));
                }
                walk(spec, compiled, child, depth + 1, tags, reference_time, out);
                if pushed {
                    tags.pop();
                }
            }
        }
    }
}

fn decompile_documents(spec: &AggregationSpec, response: &Value) -> CollectResult<Vec<Metric>> {
    let hits = response
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .ok_or_else(|| CollectError::ResponseShape("response has neither aggregations nor hits".to_string()))?;

    let omitted = total_hits(response).saturating_sub(hits.len() as u64);
    if omitted > 0 {
        log::warn!(
            "⚠️  '{}': window holds more than {} documents, {} oldest not reported",
            spec.measurement_name,
            DOCUMENT_LIMIT,
            omitted
        );
    }

    let mut metrics = Vec::with_capacity(hits.len());
    for hit in hits {
        let source = hit
            .get("_source")
            .filter(|s| s.is_object())
            .ok_or_else(|| CollectError::ResponseShape("document without _source".to_string()))?;

        let raw_time = lookup(source, &spec.date_field).ok_or_else(|| {
            CollectError::ResponseShape(format!("document lacks date field '{}'", spec.date_field))
        })?;
        let timestamp = parse_timestamp(raw_time, spec.date_field_custom_format.as_deref())?;

        let mut metric = Metric::new(spec.measurement_name.clone(), timestamp);
        for field in &spec.metric_fields {
            if let Some(value) = lookup(source, field).and_then(numeric_value) {
                metric.fields.push((field.clone(), value));
            }
        }
        metrics.push(metric);
    }

    log::debug!("Decompiled {} documents for '{}'", metrics.len(), spec.measurement_name);
    Ok(metrics)
}

/// Find a dotted field path in a document, flattened or nested
fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(v) = source.get(path) {
        return Some(v);
    }

    let (head, rest) = path.split_once('.')?;
    lookup(source.get(head)?, rest)
}

fn numeric_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Parse a document timestamp
///
/// With `custom_format` the value is parsed with that chrono pattern
/// (zoned, then naive UTC, then date-only). Otherwise strings are RFC 3339
/// and numbers are epoch milliseconds.
pub fn parse_timestamp(raw: &Value, custom_format: Option<&str>) -> CollectResult<DateTime<Utc>> {
    let invalid = || CollectError::ResponseShape(format!("unparsable timestamp {}", raw));

    match raw {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).ok_or_else(invalid)?;
            Utc.timestamp_millis_opt(millis).single().ok_or_else(invalid)
        }
        Value::String(s) => {
            if let Some(format) = custom_format {
                if let Ok(dt) = DateTime::parse_from_str(s, format) {
                    return Ok(dt.with_timezone(&Utc));
                }
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Ok(Utc.from_utc_datetime(&naive));
                }
                if let Ok(date) = NaiveDate::parse_from_str(s, format) {
                    return date
                        .and_hms_opt(0, 0, 0)
                        .map(|naive| Utc.from_utc_datetime(&naive))
                        .ok_or_else(invalid);
                }
                return Err(invalid());
            }

            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            let millis: i64 = s.trim().parse().map_err(|_| invalid())?;
            Utc.timestamp_millis_opt(millis).single().ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::catalog::FieldCatalog;
    use crate::query::compiler::compile;
    use serde_json::json;

    fn catalog() -> FieldCatalog {
        let mut catalog = FieldCatalog::default();
        catalog.index = "metrics".to_string();
        for (field, ty) in [
            ("@timestamp", "date"),
            ("cpu", "float"),
            ("mem", "long"),
            ("host", "keyword"),
            ("service", "keyword"),
        ] {
            catalog.insert(field, ty);
        }
        catalog
    }

    fn reference_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_single_tag_scenario() {
        let spec = AggregationSpec::new("metrics", "usage", "@timestamp")
            .with_tags(&["host"])
            .with_metrics(&["cpu"], "average");
        let compiled = compile(&spec, &catalog()).unwrap();

        let response = json!({
            "hits": { "total": { "value": 5 } },
            "aggregations": {
                "host": { "buckets": [
                    { "key": "a", "doc_count": 2, "cpu_avg": { "value": 10.0 } },
                    { "key": "b", "doc_count": 3, "cpu_avg": { "value": 20.0 } }
                ] }
            }
        });

        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].tags, vec![("host".to_string(), "a".to_string())]);
        assert_eq!(metrics[0].fields, vec![("cpu".to_string(), 10.0)]);
        assert_eq!(metrics[1].tags, vec![("host".to_string(), "b".to_string())]);
        assert_eq!(metrics[1].fields, vec![("cpu".to_string(), 20.0)]);
        assert!(metrics.iter().all(|m| m.timestamp == reference_time()));
        assert!(metrics.iter().all(|m| m.measurement == "usage"));
    }

    #[test]
    fn test_nested_tags_emit_one_metric_per_leaf() {
        let spec = AggregationSpec::new("metrics", "usage", "@timestamp")
            .with_tags(&["host", "service"])
            .with_metrics(&["cpu", "mem"], "max");
        let compiled = compile(&spec, &catalog()).unwrap();

        let response = json!({
            "aggregations": {
                "host": { "buckets": [
                    { "key": "a", "doc_count": 3, "service": { "buckets": [
                        { "key": "api", "doc_count": 2, "cpu_max": { "value": 1.0 }, "mem_max": { "value": 100.0 } },
                        { "key": "db", "doc_count": 1, "cpu_max": { "value": 2.0 }, "mem_max": { "value": 200.0 } }
                    ] } },
                    { "key": "b", "doc_count": 1, "service": { "buckets": [
                        { "key": "api", "doc_count": 1, "cpu_max": { "value": 3.0 }, "mem_max": { "value": 300.0 } }
                    ] } },
                    { "key": "c", "doc_count": 0, "service": { "buckets": [] } }
                ] }
            }
        });

        let root = parse_tree(&compiled, &response["aggregations"], 0).unwrap();
        assert_eq!(root.leaf_count(), 3);

        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 3);
        for metric in &metrics {
            let keys: Vec<&str> = metric.tags.iter().map(|(k, _)| k.as_str()).collect();
            assert_eq!(keys, vec!["host", "service"]);
        }
        assert_eq!(metrics[1].tag("host"), Some("a"));
        assert_eq!(metrics[1].tag("service"), Some("db"));
        assert_eq!(metrics[1].field("mem"), Some(200.0));
        assert_eq!(metrics[2].tag("host"), Some("b"));
    }

    #[test]
    fn test_missing_bucket_substitute_and_skip() {
        let response = json!({
            "aggregations": {
                "host": { "buckets": [
                    { "key": "a", "doc_count": 1, "cpu_sum": { "value": 5.0 } }
                ] },
                "host_missing": { "doc_count": 4, "cpu_sum": { "value": 7.0 } }
            }
        });

        let substitute = AggregationSpec::new("metrics", "usage", "@timestamp")
            .with_tags(&["host"])
            .with_metrics(&["cpu"], "sum")
            .with_missing_tag_policy(MissingTagPolicy::Substitute("unknown".to_string()));
        let compiled = compile(&substitute, &catalog()).unwrap();
        let metrics = decompile(&substitute, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1].tags, vec![("host".to_string(), "unknown".to_string())]);
        assert_eq!(metrics[1].field("cpu"), Some(7.0));

        let skip = substitute.clone().with_missing_tag_policy(MissingTagPolicy::Skip);
        let compiled = compile(&skip, &catalog()).unwrap();
        let metrics = decompile(&skip, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].tags.len(), 1);
        assert!(metrics[1].tags.is_empty());
        assert_eq!(metrics[1].field("cpu"), Some(7.0));
    }

    #[test]
    fn test_empty_missing_bucket_is_not_emitted() {
        let spec = AggregationSpec::new("metrics", "usage", "@timestamp")
            .with_tags(&["host"])
            .with_metrics(&["cpu"], "sum")
            .with_missing_tag_policy(MissingTagPolicy::Skip);
        let compiled = compile(&spec, &catalog()).unwrap();
        let response = json!({
            "aggregations": {
                "host": { "buckets": [ { "key": "a", "doc_count": 1, "cpu_sum": { "value": 5.0 } } ] },
                "host_missing": { "doc_count": 0, "cpu_sum": { "value": 0.0 } }
            }
        });

        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 1);
    }

    #[test]
    fn test_null_value_omits_field_except_count() {
        let spec = AggregationSpec::new("metrics", "usage", "@timestamp")
            .with_tags(&["host"])
            .with_metrics(&["cpu", "mem"], "avg");
        let compiled = compile(&spec, &catalog()).unwrap();
        let response = json!({
            "aggregations": { "host": { "buckets": [
                { "key": "a", "doc_count": 1, "cpu_avg": { "value": null }, "mem_avg": { "value": 4.0 } }
            ] } }
        });
        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].fields, vec![("mem".to_string(), 4.0)]);

        let count = spec.clone().with_metrics(&["cpu"], "count");
        let compiled = compile(&count, &catalog()).unwrap();
        let response = json!({
            "aggregations": { "host": { "buckets": [
                { "key": "a", "doc_count": 1, "cpu_count": { "value": null } }
            ] } }
        });
        let metrics = decompile(&count, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics[0].fields, vec![("cpu".to_string(), 0.0)]);
    }

    #[test]
    fn test_null_distinct_count_is_omitted() {
        let spec = AggregationSpec::new("metrics", "usage", "@timestamp")
            .with_tags(&["host"])
            .with_metrics(&["service"], "distinct_count");
        let compiled = compile(&spec, &catalog()).unwrap();
        let response = json!({
            "aggregations": { "host": { "buckets": [
                { "key": "a", "doc_count": 1, "service_distinct_count": { "value": null } }
            ] } }
        });
        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 1);
        assert!(metrics[0].fields.is_empty());
    }

    #[test]
    fn test_truncated_grouping_levels_are_counted() {
        let spec = AggregationSpec::new("metrics", "usage", "@timestamp")
            .with_tags(&["host", "service"])
            .with_metrics(&["cpu"], "sum")
            .with_missing_tag_policy(MissingTagPolicy::Skip);
        let compiled = compile(&spec, &catalog()).unwrap();
        let response = json!({
            "aggregations": {
                "host": { "sum_other_doc_count": 40, "buckets": [
                    { "key": "a", "doc_count": 3, "service": { "sum_other_doc_count": 2, "buckets": [
                        { "key": "api", "doc_count": 1, "cpu_sum": { "value": 1.0 } }
                    ] } }
                ] },
                "host_missing": { "doc_count": 2, "service": { "sum_other_doc_count": 1, "buckets": [
                    { "key": "db", "doc_count": 1, "cpu_sum": { "value": 2.0 } }
                ] } }
            }
        });

        assert_eq!(truncated_doc_count(&compiled, &response["aggregations"]), 43);
        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 2);

        let complete = json!({ "aggregations": { "host": { "buckets": [] } } });
        assert_eq!(truncated_doc_count(&compiled, &complete["aggregations"]), 0);
    }

    #[test]
    fn test_zero_tags_aggregated_single_metric() {
        let spec = AggregationSpec::new("metrics", "usage", "@timestamp").with_metrics(&["cpu"], "min");
        let compiled = compile(&spec, &catalog()).unwrap();
        let response = json!({ "aggregations": { "cpu_min": { "value": 0.5 } } });

        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 1);
        assert!(metrics[0].tags.is_empty());
        assert_eq!(metrics[0].field("cpu"), Some(0.5));
    }

    #[test]
    fn test_numeric_and_formatted_keys() {
        let mut catalog = catalog();
        catalog.insert("status", "long");
        let spec = AggregationSpec::new("metrics", "usage", "@timestamp")
            .with_tags(&["status"])
            .with_metrics(&["cpu"], "sum");
        let compiled = compile(&spec, &catalog).unwrap();
        let response = json!({
            "aggregations": { "status": { "buckets": [
                { "key": 200, "doc_count": 1, "cpu_sum": { "value": 1.0 } },
                { "key": 1, "key_as_string": "true", "doc_count": 1, "cpu_sum": { "value": 2.0 } }
            ] } }
        });
        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics[0].tag("status"), Some("200"));
        assert_eq!(metrics[1].tag("status"), Some("true"));
    }

    #[test]
    fn test_malformed_tree_fails_whole_response() {
        let spec = AggregationSpec::new("metrics", "usage", "@timestamp")
            .with_tags(&["host"])
            .with_metrics(&["cpu"], "sum");
        let compiled = compile(&spec, &catalog()).unwrap();

        let no_buckets = json!({ "aggregations": { "host": { "value": 1 } } });
        assert!(matches!(
            decompile(&spec, &compiled, &no_buckets, reference_time()),
            Err(CollectError::ResponseShape(_))
        ));

        // First bucket fine, second lacks its metric: nothing is emitted
        let partial = json!({ "aggregations": { "host": { "buckets": [
            { "key": "a", "doc_count": 1, "cpu_sum": { "value": 1.0 } },
            { "key": "b", "doc_count": 1 }
        ] } } });
        assert!(matches!(
            decompile(&spec, &compiled, &partial, reference_time()),
            Err(CollectError::ResponseShape(_))
        ));

        let keyless = json!({ "aggregations": { "host": { "buckets": [
            { "doc_count": 1, "cpu_sum": { "value": 1.0 } }
        ] } } });
        assert!(decompile(&spec, &compiled, &keyless, reference_time()).is_err());

        let flat = json!({ "hits": { "hits": [] } });
        assert!(decompile(&spec, &compiled, &flat, reference_time()).is_err());
    }

    #[test]
    fn test_flat_documents_one_metric_each() {
        let spec = AggregationSpec::new("metrics", "raw", "@timestamp").with_metrics(&["cpu", "disk.free"], "");
        let mut catalog = catalog();
        catalog.insert("disk.free", "long");
        let compiled = compile(&spec, &catalog).unwrap();

        let response = json!({
            "hits": { "hits": [
                { "_source": { "@timestamp": "2024-01-01T00:00:00Z", "cpu": 12.5, "disk": { "free": 100 } } },
                { "_source": { "@timestamp": 1704067260000i64, "cpu": "7", "disk.free": 50 } },
                { "_source": { "@timestamp": "2024-01-01T00:02:00+01:00", "cpu": "n/a" } }
            ] }
        });

        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics[0].fields, vec![("cpu".to_string(), 12.5), ("disk.free".to_string(), 100.0)]);
        assert_eq!(metrics[0].timestamp, Utc.timestamp_opt(1_704_067_200, 0).unwrap());
        assert_eq!(metrics[1].fields, vec![("cpu".to_string(), 7.0), ("disk.free".to_string(), 50.0)]);
        assert_eq!(metrics[1].timestamp, Utc.timestamp_opt(1_704_067_260, 0).unwrap());
        assert!(metrics[2].fields.is_empty());
        assert_eq!(metrics[2].timestamp, Utc.timestamp_opt(1_704_063_720, 0).unwrap());
        assert!(metrics.iter().all(|m| m.tags.is_empty()));
    }

    #[test]
    fn test_flat_non_finite_values_are_omitted() {
        let spec = AggregationSpec::new("metrics", "raw", "@timestamp").with_metrics(&["cpu", "mem"], "");
        let compiled = compile(&spec, &catalog()).unwrap();
        let response = json!({
            "hits": { "hits": [
                { "_source": { "@timestamp": "2024-01-01T00:00:00Z", "cpu": "NaN", "mem": 3 } },
                { "_source": { "@timestamp": "2024-01-01T00:00:00Z", "cpu": "inf", "mem": "-infinity" } }
            ] }
        });

        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].fields, vec![("mem".to_string(), 3.0)]);
        assert!(metrics[1].fields.is_empty());
        assert!(!metrics[0].to_line_protocol().contains("NaN"));
    }

    #[test]
    fn test_flat_truncated_window_still_emits_returned_hits() {
        let spec = AggregationSpec::new("metrics", "raw", "@timestamp").with_metrics(&["cpu"], "");
        let compiled = compile(&spec, &catalog()).unwrap();
        let response = json!({
            "hits": {
                "total": { "value": 1500, "relation": "eq" },
                "hits": [
                    { "_source": { "@timestamp": "2024-01-01T00:01:00Z", "cpu": 2 } },
                    { "_source": { "@timestamp": "2024-01-01T00:00:00Z", "cpu": 1 } }
                ]
            }
        });

        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics.len(), 2);
        assert!(metrics[0].timestamp > metrics[1].timestamp);
    }

    #[test]
    fn test_flat_custom_format_and_bad_timestamp() {
        let mut spec = AggregationSpec::new("metrics", "raw", "ts").with_metrics(&["cpu"], "");
        spec.date_field_custom_format = Some("%Y/%m/%d %H:%M:%S".to_string());
        let mut catalog = catalog();
        catalog.insert("ts", "date");
        let compiled = compile(&spec, &catalog).unwrap();

        let response = json!({ "hits": { "hits": [
            { "_source": { "ts": "2024/01/01 00:00:30", "cpu": 1 } }
        ] } });
        let metrics = decompile(&spec, &compiled, &response, reference_time()).unwrap();
        assert_eq!(metrics[0].timestamp, Utc.timestamp_opt(1_704_067_230, 0).unwrap());

        let bad = json!({ "hits": { "hits": [
            { "_source": { "ts": "2024/01/01 00:00:30", "cpu": 1 } },
            { "_source": { "ts": "yesterday", "cpu": 2 } }
        ] } });
        assert!(matches!(
            decompile(&spec, &compiled, &bad, reference_time()),
            Err(CollectError::ResponseShape(_))
        ));
    }

    #[test]
    fn test_parse_timestamp_date_only_format() {
        let ts = parse_timestamp(&json!("2024-02-03"), Some("%Y-%m-%d")).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 2, 3, 0, 0, 0).unwrap());
        assert!(parse_timestamp(&json!(true), None).is_err());
    }
}
