//! OpenSearch Query Collector
//!
//! Runs the configured aggregations against OpenSearch every `interval` and
//! writes the resulting metrics to stdout or a file.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin opensearch_query -- --config opensearch_query.toml
//! cargo run --release --bin opensearch_query -- --once
//! ```
//!
//! ## Environment Variables
//!
//! - OPENSEARCH_QUERY_CONFIG - Config file path (default: opensearch_query.toml)
//! - OPENSEARCH_URLS - Comma-separated node URLs (overrides config)
//! - OPENSEARCH_USERNAME / OPENSEARCH_PASSWORD - Basic auth credentials
//! - OPENSEARCH_TIMEOUT - Per-request timeout, e.g. `5s`
//! - OPENSEARCH_QUERY_OUTPUT - Output path, `-` for stdout
//! - OPENSEARCH_QUERY_FORMAT - `jsonl` or `line`
//! - RUST_LOG - Logging level (optional, default: info)

use opensearch_query::client::opensearch::ConnectionSettings;
use opensearch_query::config::DEFAULT_CONFIG_PATH;
use opensearch_query::{Collector, CollectorConfig, CycleReport, MetricWriter, OpenSearchClient};
use std::env;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug)]
struct RunArgs {
    config_path: String,
    once: bool,
}

fn parse_args() -> RunArgs {
    let args: Vec<String> = env::args().collect();

    let config_path = args
        .iter()
        .position(|x| x == "--config")
        .and_then(|idx| args.get(idx + 1).cloned())
        .or_else(|| env::var("OPENSEARCH_QUERY_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    RunArgs {
        config_path,
        once: args.contains(&"--once".to_string()),
    }
}

async fn write_cycle(writer: &mut MetricWriter, report: &CycleReport) {
    if let Err(e) = writer.write_metrics(&report.metrics).await {
        log::error!("❌ Failed to write metrics: {}", e);
    }
    if let Err(e) = writer.flush().await {
        log::error!("❌ Failed to flush metrics: {}", e);
    }

    for error in &report.errors {
        log::error!("❌ {} ({})", error, error.error.kind());
    }

    log::info!("📊 Cycle complete");
    log::info!("   ├─ Metrics: {}", report.metrics.len());
    log::info!("   ├─ Errors: {}", report.errors.len());
    log::info!("   ├─ Compile: {}ms", report.compile_elapsed.as_millis());
    log::info!("   └─ Elapsed: {}ms", report.elapsed.as_millis());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = parse_args();
    let config = CollectorConfig::load(&args.config_path)?;

    log::info!("🚀 Starting OpenSearch Query Collector");
    log::info!("   ├─ Config: {}", args.config_path);
    log::info!("   ├─ Nodes: {}", config.urls.join(", "));
    log::info!("   ├─ Aggregations: {}", config.aggregations.len());
    log::info!("   ├─ Interval: {:?}", config.interval);
    log::info!("   ├─ Timeout: {:?}", config.timeout);
    log::info!("   └─ Output: {} ({:?})", config.output, config.output_format);

    let client = OpenSearchClient::new(&ConnectionSettings::from(&config))?;
    let mut collector = Collector::from_config(Arc::new(client), &config);
    let mut writer = MetricWriter::new(config.output_format, &config.output)?;

    log::info!("📊 Backend: {}", writer.backend_type());

    if collector.is_empty() {
        log::warn!("⚠️  No aggregations configured; nothing to collect");
    }

    // Compile up front so configuration problems surface before the first tick
    for error in collector.initialize().await {
        log::error!("❌ {} ({})", error, error.error.kind());
    }

    if args.once {
        let report = collector.gather().await;
        write_cycle(&mut writer, &report).await;
        return Ok(());
    }

    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    log::info!("✅ Collector running");
    log::info!("🔄 Press CTRL+C to shutdown gracefully");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log::info!("⏱️  Running collection cycle...");
                let report = collector.gather().await;
                write_cycle(&mut writer, &report).await;
            }

            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => log::info!("⚠️  Received CTRL+C, shutting down..."),
                    Err(err) => log::error!("❌ Failed to listen for CTRL+C: {}", err),
                }
                break;
            }
        }
    }

    writer.flush().await?;
    log::info!("✅ Collector stopped");
    Ok(())
}
