//! Collector - owns the aggregation specs and runs collection cycles
//!
//! Per-aggregation state machine:
//!
//! ```text
//! Unvalidated ──(catalog + compile ok)──→ Compiled ⇄ (executing each cycle)
//!      │  ↑
//!      │  └─ connectivity / not found / timeout: retried next cycle
//!      └──(configuration error)──→ Rejected (reported once)
//! ```
//!
//! Each cycle first compiles pending aggregations sequentially, then spawns
//! one task per compiled aggregation and joins them all. A failing task only
//! produces a [`CycleError`]; its siblings are unaffected.

pub mod executor;

use crate::client::StoreClient;
use crate::config::CollectorConfig;
use crate::error::{CollectError, CollectResult};
use crate::metric::Metric;
use crate::query::{compile, AggregationSpec, CompiledQuery, FieldCatalog};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationState {
    /// Not compiled yet (never tried, or the store was unavailable)
    Unvalidated,
    /// Compiled query cached and reused every cycle
    Compiled(Arc<CompiledQuery>),
    /// Configuration error; never retried
    Rejected(CollectError),
}

struct AggregationSlot {
    spec: Arc<AggregationSpec>,
    state: AggregationState,
}

/// Error attributed to one aggregation during a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleError {
    pub measurement: String,
    pub error: CollectError,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "opensearch query aggregation {}: {}", self.measurement, self.error)
    }
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub metrics: Vec<Metric>,
    pub errors: Vec<CycleError>,
    /// Time spent compiling pending aggregations before execution started
    pub compile_elapsed: Duration,
    pub elapsed: Duration,
}

pub struct Collector {
    client: Arc<dyn StoreClient>,
    slots: Vec<AggregationSlot>,
    timeout: Duration,
}

impl Collector {
    pub fn new(client: Arc<dyn StoreClient>, specs: Vec<AggregationSpec>, timeout: Duration) -> Self {
        let slots = specs
            .into_iter()
            .map(|spec| AggregationSlot {
                spec: Arc::new(spec),
                state: AggregationState::Unvalidated,
            })
            .collect();

        Self { client, slots, timeout }
    }

    pub fn from_config(client: Arc<dyn StoreClient>, config: &CollectorConfig) -> Self {
        let specs = config.aggregations.iter().map(AggregationSpec::from).collect();
        Self::new(client, specs, config.timeout)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<&AggregationState> {
        self.slots.get(index).map(|slot| &slot.state)
    }

    /// Compile every pending aggregation; called at startup and each cycle
    ///
    /// Runs strictly before any concurrent execution.
    pub async fn initialize(&mut self) -> Vec<CycleError> {
        let mut errors = Vec::new();

        for slot in &mut self.slots {
            if !matches!(slot.state, AggregationState::Unvalidated) {
                continue;
            }

            match compile_slot(self.client.as_ref(), &slot.spec, self.timeout).await {
                Ok(compiled) => {
                    log::info!(
                        "✅ Compiled aggregation '{}' (index: {}, fields: {}, tag depth: {})",
                        slot.spec.measurement_name,
                        slot.spec.index,
                        compiled.metrics.len(),
                        compiled.depth()
                    );
                    slot.state = AggregationState::Compiled(Arc::new(compiled));
                }
                Err(e) if e.is_retryable() => {
                    log::warn!(
                        "⚠️  Aggregation '{}' not ready, retrying next cycle: {}",
                        slot.spec.measurement_name,
                        e
                    );
                    errors.push(CycleError {
                        measurement: slot.spec.measurement_name.clone(),
                        error: e,
                    });
                }
                Err(e) => {
                    log::error!(
                        "❌ Aggregation '{}' rejected: {}",
                        slot.spec.measurement_name,
                        e
                    );
                    slot.state = AggregationState::Rejected(e.clone());
                    errors.push(CycleError {
                        measurement: slot.spec.measurement_name.clone(),
                        error: e,
                    });
                }
            }
        }

        errors
    }

    /// Run one collection cycle across all aggregations
    pub async fn gather(&mut self) -> CycleReport {
        let start = Instant::now();
        let pending = self
            .slots
            .iter()
            .filter(|slot| matches!(slot.state, AggregationState::Unvalidated))
            .count();
        let mut report = CycleReport {
            errors: self.initialize().await,
            ..CycleReport::default()
        };
        report.compile_elapsed = start.elapsed();

        // Compilation is sequential, so unreachable indices add up
        if pending > 0 && report.compile_elapsed >= self.timeout {
            log::warn!(
                "⚠️  Compiling {} pending aggregations took {}ms before execution started",
                pending,
                report.compile_elapsed.as_millis()
            );
        }

        let mut handles = Vec::new();
        for slot in &self.slots {
            if let AggregationState::Compiled(compiled) = &slot.state {
                let task = executor::run_aggregation(
                    self.client.clone(),
                    slot.spec.clone(),
                    compiled.clone(),
                    self.timeout,
                );
                handles.push((slot.spec.measurement_name.clone(), tokio::spawn(task)));
            }
        }

        // Tasks already run concurrently; joining in order keeps output stable
        for (measurement, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(CollectError::ResponseShape(format!("collection task aborted: {}", e))),
            };

            match result {
                Ok(metrics) => {
                    log::debug!("Aggregation '{}' produced {} metrics", measurement, metrics.len());
                    report.metrics.extend(metrics);
                }
                Err(error) => {
                    log::warn!("⚠️  Aggregation '{}' failed: {}", measurement, error);
                    report.errors.push(CycleError { measurement, error });
                }
            }
        }

        report.elapsed = start.elapsed();
        report
    }
}

async fn compile_slot(
    client: &dyn StoreClient,
    spec: &AggregationSpec,
    deadline: Duration,
) -> CollectResult<CompiledQuery> {
    let catalog = match timeout(deadline, FieldCatalog::discover(client, &spec.index)).await {
        Ok(result) => result?,
        Err(_) => return Err(CollectError::Timeout(deadline)),
    };
    compile(spec, &catalog)
}
