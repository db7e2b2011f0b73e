//! Collector configuration
//!
//! Loaded from a TOML file (`[[aggregation]]` tables per query) with
//! environment variable overrides for the connection settings.

use crate::error::ConfigError;
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "opensearch_query.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Jsonl,
    #[serde(alias = "line", alias = "influx")]
    LineProtocol,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "jsonl" | "json" => Some(OutputFormat::Jsonl),
            "line" | "line_protocol" | "influx" => Some(OutputFormat::LineProtocol),
            _ => None,
        }
    }
}

/// Top-level collector settings
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub urls: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Accepted for compatibility; node discovery is not performed
    #[serde(default)]
    pub enable_sniffer: bool,

    /// Deadline for every store round-trip
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// How long an unreachable URL is skipped before being tried again
    #[serde(
        default = "default_health_check_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub health_check_interval: Duration,

    /// Collection cycle period
    #[serde(default = "default_interval", deserialize_with = "deserialize_duration")]
    pub interval: Duration,

    #[serde(default)]
    pub insecure_skip_verify: bool,

    #[serde(default)]
    pub tls_ca: Option<PathBuf>,

    #[serde(default)]
    pub tls_cert: Option<PathBuf>,

    #[serde(default)]
    pub tls_key: Option<PathBuf>,

    /// Output destination, `-` for stdout
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,

    #[serde(default, rename = "aggregation")]
    pub aggregations: Vec<AggregationConfig>,
}

/// One `[[aggregation]]` table
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    pub index: String,

    #[serde(default)]
    pub measurement_name: String,

    #[serde(default)]
    pub date_field: String,

    #[serde(default)]
    pub date_field_custom_format: Option<String>,

    /// Lookback window ending at query time
    #[serde(
        default = "default_query_period",
        deserialize_with = "deserialize_duration"
    )]
    pub query_period: Duration,

    #[serde(default)]
    pub filter_query: Option<String>,

    #[serde(default)]
    pub metric_fields: Vec<String>,

    #[serde(default)]
    pub metric_function: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub include_missing_tag: bool,

    #[serde(default)]
    pub missing_tag_value: String,
}

fn default_timeout() -> Duration { Duration::from_secs(5) }
fn default_health_check_interval() -> Duration { Duration::from_secs(10) }
fn default_interval() -> Duration { Duration::from_secs(10) }
fn default_query_period() -> Duration { Duration::from_secs(60) }
fn default_output() -> String { "-".to_string() }
fn default_output_format() -> OutputFormat { OutputFormat::LineProtocol }

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            username: None,
            password: None,
            enable_sniffer: false,
            timeout: default_timeout(),
            health_check_interval: default_health_check_interval(),
            interval: default_interval(),
            insecure_skip_verify: false,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
            output: default_output(),
            output_format: default_output_format(),
            aggregations: Vec::new(),
        }
    }
}

/// Parse durations like `500ms`, `5s`, `1m`, `2h`, `1d`
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (num_str, unit) = input.split_at(split);
    let num: u64 = num_str.parse().ok()?;

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(num),
        "" | "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num.checked_mul(60)?),
        "h" => Duration::from_secs(num.checked_mul(3600)?),
        "d" => Duration::from_secs(num.checked_mul(86400)?),
        _ => return None,
    };

    Some(duration)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationRepr {
        Text(String),
        Secs(u64),
    }

    match DurationRepr::deserialize(deserializer)? {
        DurationRepr::Secs(secs) => Ok(Duration::from_secs(secs)),
        DurationRepr::Text(text) => parse_duration(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration '{}'", text))),
    }
}

impl CollectorConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;

        Self::from_toml(&contents, path)
    }

    /// Load from file, apply environment overrides, then validate
    ///
    /// Environment variables:
    /// - `OPENSEARCH_URLS` (comma-separated)
    /// - `OPENSEARCH_USERNAME` / `OPENSEARCH_PASSWORD`
    /// - `OPENSEARCH_TIMEOUT` (e.g. `5s`)
    /// - `OPENSEARCH_QUERY_OUTPUT` (path or `-`)
    /// - `OPENSEARCH_QUERY_FORMAT` (`jsonl` or `line`)
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(urls) = env::var("OPENSEARCH_URLS") {
            self.urls = urls
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }
        if let Ok(username) = env::var("OPENSEARCH_USERNAME") {
            self.username = Some(username);
        }
        if let Ok(password) = env::var("OPENSEARCH_PASSWORD") {
            self.password = Some(password);
        }
        if let Ok(timeout) = env::var("OPENSEARCH_TIMEOUT") {
            self.timeout = parse_duration(&timeout).ok_or_else(|| {
                ConfigError::InvalidValue(format!("OPENSEARCH_TIMEOUT '{}' is not a duration", timeout))
            })?;
        }
        if let Ok(output) = env::var("OPENSEARCH_QUERY_OUTPUT") {
            self.output = output;
        }
        if let Ok(format) = env::var("OPENSEARCH_QUERY_FORMAT") {
            self.output_format = OutputFormat::from_str(&format).ok_or_else(|| {
                ConfigError::InvalidValue(format!("OPENSEARCH_QUERY_FORMAT '{}' is not supported", format))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::InvalidValue("opensearch urls is not defined".to_string()));
        }

        for url in &self.urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "url '{}' must start with http:// or https://",
                    url
                )));
            }
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue("timeout must be > 0".to_string()));
        }

        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue("interval must be > 0".to_string()));
        }

        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::InvalidValue(
                "tls_cert and tls_key must be set together".to_string(),
            ));
        }

        for agg in &self.aggregations {
            if agg.measurement_name.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "field 'measurement_name' is not set".to_string(),
                ));
            }
            if agg.date_field.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "field 'date_field' is not set ({})",
                    agg.measurement_name
                )));
            }
            if agg.query_period.is_zero() {
                return Err(ConfigError::InvalidValue(format!(
                    "field 'query_period' must be > 0 ({})",
                    agg.measurement_name
                )));
            }
            let window_start = chrono::Duration::from_std(agg.query_period)
                .ok()
                .and_then(|period| Utc::now().checked_sub_signed(period));
            if window_start.is_none() {
                return Err(ConfigError::InvalidValue(format!(
                    "field 'query_period' is out of range ({})",
                    agg.measurement_name
                )));
            }
        }

        Ok(())
    }
}
