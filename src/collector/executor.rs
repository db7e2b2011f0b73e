//! Single aggregation execution: render, search (bounded), decompile

use crate::client::StoreClient;
use crate::error::{CollectError, CollectResult};
use crate::metric::Metric;
use crate::query::{decompile, AggregationSpec, CompiledQuery};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Issue the compiled query for the window ending at `reference_time`
///
/// One round-trip, failing with `Timeout` once `deadline` expires.
pub async fn execute<C>(
    client: &C,
    spec: &AggregationSpec,
    compiled: &CompiledQuery,
    reference_time: DateTime<Utc>,
    deadline: Duration,
) -> CollectResult<Value>
where
    C: StoreClient + ?Sized,
{
    let window_start = chrono::Duration::from_std(spec.query_period)
        .ok()
        .and_then(|period| reference_time.checked_sub_signed(period))
        .ok_or_else(|| {
            CollectError::Configuration(format!(
                "query_period {:?} is out of range",
                spec.query_period
            ))
        })?;
    let body = compiled.render(window_start, reference_time);

    log::debug!(
        "Querying index '{}' for '{}' (depth {})",
        compiled.index,
        spec.measurement_name,
        compiled.depth()
    );

    match timeout(deadline, client.search(&compiled.index, &body)).await {
        Ok(result) => result,
        Err(_) => Err(CollectError::Timeout(deadline)),
    }
}

/// Full per-aggregation task run by the collector each cycle
pub async fn run_aggregation(
    client: Arc<dyn StoreClient>,
    spec: Arc<AggregationSpec>,
    compiled: Arc<CompiledQuery>,
    deadline: Duration,
) -> CollectResult<Vec<Metric>> {
    let reference_time = Utc::now();
    let response = execute(client.as_ref(), &spec, &compiled, reference_time, deadline).await?;
    decompile(&spec, &compiled, &response, reference_time)
}
