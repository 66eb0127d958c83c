//! Analyzer configuration
//!
//! Read from `ANALYZER_*` environment variables, optionally layered over a
//! file named by `ANALYZER_CONFIG`. The TimeGPT key falls back to
//! `NIXTLA_API_KEY`.

use analyzer_lib::forecast::{ForecastConfig, DEFAULT_ENDPOINT, MIN_HISTORY};
use analyzer_lib::scheduler::SchedulerConfig;
use analyzer_lib::source::SourceConfig;
use analyzer_lib::TrackedMetric;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const ENV_PREFIX: &str = "ANALYZER";
const CONFIG_FILE_VAR: &str = "ANALYZER_CONFIG";
const API_KEY_VAR: &str = "NIXTLA_API_KEY";

/// Analyzer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    /// Instance name attached to structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Port for /metrics, /healthz and /readyz
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between analysis cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Prometheus base URL
    #[serde(default = "default_source_url")]
    pub source_url: String,

    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,

    /// History window fetched per metric
    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,

    /// Range query step
    #[serde(default = "default_step")]
    pub step: String,

    /// TimeGPT API base URL
    #[serde(default = "default_forecast_endpoint")]
    pub forecast_endpoint: String,

    #[serde(default = "default_forecast_timeout")]
    pub forecast_timeout_secs: u64,

    /// TimeGPT API key (falls back to NIXTLA_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Forecast horizon in steps
    #[serde(default = "default_horizon")]
    pub horizon: usize,

    /// Series frequency passed to TimeGPT
    #[serde(default = "default_freq")]
    pub freq: String,

    /// Prediction interval level in percent
    #[serde(default = "default_level")]
    pub level: u32,

    #[serde(default = "default_detect_anomalies")]
    pub detect_anomalies: bool,

    #[serde(default = "default_min_history")]
    pub min_history: usize,

    /// Value of the `application` label used by the default queries
    #[serde(default = "default_application")]
    pub application: String,

    /// Tracked metrics; the default set is used when empty
    #[serde(default)]
    pub metrics: Vec<TrackedMetric>,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "timegpt-analyzer".to_string())
}

fn default_api_port() -> u16 {
    8001
}

fn default_interval() -> u64 {
    30
}

fn default_source_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_source_timeout() -> u64 {
    10
}

fn default_lookback() -> u64 {
    60 * 60
}

fn default_step() -> String {
    "15s".to_string()
}

fn default_forecast_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_forecast_timeout() -> u64 {
    30
}

fn default_model() -> String {
    "timegpt-1".to_string()
}

fn default_horizon() -> usize {
    12
}

fn default_freq() -> String {
    "15s".to_string()
}

fn default_level() -> u32 {
    80
}

fn default_detect_anomalies() -> bool {
    true
}

fn default_min_history() -> usize {
    MIN_HISTORY
}

fn default_application() -> String {
    "user-system".to_string()
}

/// Spring Boot service metrics analysed when none are configured
pub fn default_metrics(application: &str) -> Vec<TrackedMetric> {
    vec![
        TrackedMetric::new(
            "latency",
            format!(
                "avg(rate(http_server_requests_seconds_sum{{application=\"{application}\"}}[5m]) \
                 / rate(http_server_requests_seconds_count{{application=\"{application}\"}}[5m]))"
            ),
        ),
        TrackedMetric::new(
            "error_rate",
            format!(
                "rate(http_server_requests_seconds_count{{application=\"{application}\",outcome=\"SERVER_ERROR\"}}[5m])"
            ),
        ),
        TrackedMetric::new(
            "heap_usage",
            format!("jvm_memory_used_bytes{{application=\"{application}\",area=\"heap\"}}"),
        ),
        TrackedMetric::new(
            "gc_pauses",
            format!("rate(jvm_gc_pause_seconds_sum{{application=\"{application}\"}}[5m])"),
        ),
    ]
}

impl AnalyzerConfig {
    /// Load configuration from the process environment and optional config file
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_VAR).ok();
        let fallback_key = std::env::var(API_KEY_VAR).ok();
        Self::load_from(file.as_deref(), None, fallback_key)
    }

    /// Load configuration from explicit sources
    ///
    /// `env` replaces the process environment when given.
    pub fn load_from(
        file: Option<&str>,
        env: Option<HashMap<String, String>>,
        fallback_key: Option<String>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        );

        let mut config: AnalyzerConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if config.api_key.as_deref().map_or(true, str::is_empty) {
            config.api_key = fallback_key;
        }
        if config.metrics.is_empty() {
            config.metrics = default_metrics(&config.application);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            anyhow::bail!("{API_KEY_VAR} environment variable not set");
        }
        if self.interval_secs == 0 {
            anyhow::bail!("interval_secs must be greater than zero");
        }
        if self.horizon == 0 {
            anyhow::bail!("horizon must be at least 1");
        }

        let mut seen = HashSet::new();
        for metric in &self.metrics {
            if metric.name.is_empty() || metric.query.is_empty() {
                anyhow::bail!("tracked metrics need both a name and a query");
            }
            if !seen.insert(metric.name.as_str()) {
                anyhow::bail!("duplicate tracked metric '{}'", metric.name);
            }
        }
        Ok(())
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            base_url: self.source_url.clone(),
            lookback: Duration::from_secs(self.lookback_secs),
            step: self.step.clone(),
            timeout: Duration::from_secs(self.source_timeout_secs),
        }
    }

    pub fn forecast_config(&self) -> ForecastConfig {
        ForecastConfig {
            endpoint: self.forecast_endpoint.clone(),
            api_key: self.api_key.clone().unwrap_or_default(),
            model: self.model.clone(),
            freq: self.freq.clone(),
            level: self.level,
            timeout: Duration::from_secs(self.forecast_timeout_secs),
            detect_anomalies: self.detect_anomalies,
            min_history: self.min_history,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.interval_secs),
            horizon: self.horizon,
            metrics: self.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::load_from(None, env(&[]), Some("key".to_string())).unwrap();

        assert_eq!(config.api_port, 8001);
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.horizon, 12);
        assert_eq!(config.freq, "15s");
        assert_eq!(config.api_key.as_deref(), Some("key"));
        let names: Vec<_> = config.metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["latency", "error_rate", "heap_usage", "gc_pauses"]);
        assert!(config.metrics[2]
            .query
            .contains("application=\"user-system\",area=\"heap\""));
    }

    #[test]
    fn test_environment_overrides() {
        let config = AnalyzerConfig::load_from(
            None,
            env(&[
                ("ANALYZER_API_PORT", "9100"),
                ("ANALYZER_INTERVAL_SECS", "60"),
                ("ANALYZER_DETECT_ANOMALIES", "false"),
                ("ANALYZER_APPLICATION", "billing"),
                ("ANALYZER_API_KEY", "from-env"),
            ]),
            Some("fallback".to_string()),
        )
        .unwrap();

        assert_eq!(config.api_port, 9100);
        assert_eq!(config.scheduler_config().interval, Duration::from_secs(60));
        assert!(!config.forecast_config().detect_anomalies);
        assert_eq!(config.forecast_config().api_key, "from-env");
        assert!(config.metrics[0].query.contains("application=\"billing\""));
    }

    #[test]
    fn test_missing_api_key_fails() {
        let result = AnalyzerConfig::load_from(None, env(&[]), None);
        assert!(result.is_err());

        let result = AnalyzerConfig::load_from(None, env(&[]), Some("  ".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_fails() {
        let result = AnalyzerConfig::load_from(
            None,
            env(&[("ANALYZER_INTERVAL_SECS", "0")]),
            Some("key".to_string()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_default_metric_names_unique() {
        let metrics = default_metrics("user-system");
        let names: HashSet<_> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names.len(), metrics.len());
    }
}
