//! Observability for the analyzer itself
//!
//! Provides:
//! - Prometheus self-metrics (cycle counts, error counts, latencies)
//! - Structured JSON logging with tracing

use crate::models::{DerivedSignal, SignalKind};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use tracing::{info, warn};

/// Histogram buckets for network-bound latencies (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0];

/// Self-metrics for Prometheus exposition
///
/// Cloning is cheap; clones share the same collectors.
#[derive(Clone)]
pub struct AnalyzerMetrics {
    analysis_requests: IntCounter,
    anomaly_count: IntCounterVec,
    anomalies_detected: IntCounterVec,
    source_errors: IntCounterVec,
    forecast_errors: IntCounterVec,
    cycle_duration_seconds: Histogram,
    forecast_latency_seconds: Histogram,
    tracked_metrics: IntGauge,
}

impl AnalyzerMetrics {
    /// Create the collectors and register them into `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            analysis_requests: IntCounter::new(
                "timegpt_analysis_requests_total",
                "Total TimeGPT analysis cycles",
            )?,
            anomaly_count: IntCounterVec::new(
                Opts::new(
                    "timegpt_anomaly_count_total",
                    "Anomalous history samples reported by TimeGPT",
                ),
                &["metric"],
            )?,
            anomalies_detected: IntCounterVec::new(
                Opts::new(
                    "timegpt_anomalies_detected_total",
                    "Cycles in which the latest observation was anomalous",
                ),
                &["metric"],
            )?,
            source_errors: IntCounterVec::new(
                Opts::new(
                    "timegpt_source_errors_total",
                    "Failed fetches from the metrics source",
                ),
                &["metric"],
            )?,
            forecast_errors: IntCounterVec::new(
                Opts::new(
                    "timegpt_forecast_errors_total",
                    "Failed or timed out forecast requests",
                ),
                &["metric"],
            )?,
            cycle_duration_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "timegpt_cycle_duration_seconds",
                    "Wall-clock time of one analysis cycle",
                )
                .buckets(LATENCY_BUCKETS.to_vec()),
            )?,
            forecast_latency_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "timegpt_forecast_latency_seconds",
                    "Time spent waiting on the forecasting API",
                )
                .buckets(LATENCY_BUCKETS.to_vec()),
            )?,
            tracked_metrics: IntGauge::new(
                "timegpt_tracked_metrics",
                "Number of metrics analysed each cycle",
            )?,
        };

        registry.register(Box::new(metrics.analysis_requests.clone()))?;
        registry.register(Box::new(metrics.anomaly_count.clone()))?;
        registry.register(Box::new(metrics.anomalies_detected.clone()))?;
        registry.register(Box::new(metrics.source_errors.clone()))?;
        registry.register(Box::new(metrics.forecast_errors.clone()))?;
        registry.register(Box::new(metrics.cycle_duration_seconds.clone()))?;
        registry.register(Box::new(metrics.forecast_latency_seconds.clone()))?;
        registry.register(Box::new(metrics.tracked_metrics.clone()))?;

        Ok(metrics)
    }

    pub fn inc_analysis_requests(&self) {
        self.analysis_requests.inc();
    }

    pub fn analysis_requests(&self) -> u64 {
        self.analysis_requests.get()
    }

    /// Add anomalous history samples reported for `metric`
    pub fn add_anomaly_count(&self, metric: &str, count: u64) {
        self.anomaly_count.with_label_values(&[metric]).inc_by(count);
    }

    pub fn inc_anomalies_detected(&self, metric: &str) {
        self.anomalies_detected.with_label_values(&[metric]).inc();
    }

    pub fn inc_source_errors(&self, metric: &str) {
        self.source_errors.with_label_values(&[metric]).inc();
    }

    pub fn source_errors(&self, metric: &str) -> u64 {
        self.source_errors.with_label_values(&[metric]).get()
    }

    pub fn inc_forecast_errors(&self, metric: &str) {
        self.forecast_errors.with_label_values(&[metric]).inc();
    }

    pub fn forecast_errors(&self, metric: &str) -> u64 {
        self.forecast_errors.with_label_values(&[metric]).get()
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.cycle_duration_seconds.observe(duration_secs);
    }

    pub fn observe_forecast_latency(&self, duration_secs: f64) {
        self.forecast_latency_seconds.observe(duration_secs);
    }

    pub fn set_tracked_metrics(&self, count: i64) {
        self.tracked_metrics.set(count);
    }
}

/// Per-metric line of a cycle summary
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub metric: String,
    pub forecast_mean: Option<f64>,
    pub anomalous: bool,
    pub history_anomalies: Option<u32>,
}

impl MetricSummary {
    /// Summarise the signals published for one metric
    pub fn from_signals(metric: &str, signals: &[DerivedSignal]) -> Self {
        let find = |kind: SignalKind| signals.iter().find(|s| s.signal == kind).map(|s| s.value);

        Self {
            metric: metric.to_string(),
            forecast_mean: find(SignalKind::ForecastMean),
            anomalous: find(SignalKind::Anomaly).is_some_and(|v| v > 0.0),
            history_anomalies: find(SignalKind::HistoryAnomalies).map(|v| v as u32),
        }
    }
}

/// Structured logger for analyzer events
///
/// Every record carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log analyzer startup
    pub fn log_startup(&self, version: &str, model: &str, tracked: usize, port: u16) {
        info!(
            event = "analyzer_started",
            instance = %self.instance,
            version = %version,
            model = %model,
            tracked_metrics = tracked,
            port = port,
            "TimeGPT analysis server running"
        );
    }

    /// Log analyzer shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "analyzer_shutdown",
            instance = %self.instance,
            reason = %reason,
            "TimeGPT analyzer shutting down"
        );
    }

    /// Log the result of the startup connectivity probe
    pub fn log_source_probe(&self, url: &str, error: Option<&str>) {
        match error {
            None => info!(
                event = "source_probe",
                instance = %self.instance,
                url = %url,
                reachable = true,
                "Metrics source reachable"
            ),
            Some(error) => warn!(
                event = "source_probe",
                instance = %self.instance,
                url = %url,
                reachable = false,
                error = %error,
                "Metrics source not reachable, will retry every cycle"
            ),
        }
    }

    /// Log a failed fetch for one metric
    pub fn log_source_unavailable(&self, metric: &str, error: &str) {
        warn!(
            event = "source_unavailable",
            instance = %self.instance,
            metric = %metric,
            error = %error,
            "Metrics source query failed, skipping metric this cycle"
        );
    }

    /// Log a failed forecast for one metric
    pub fn log_forecast_unavailable(&self, metric: &str, error: &str) {
        warn!(
            event = "forecast_unavailable",
            instance = %self.instance,
            metric = %metric,
            error = %error,
            "TimeGPT analysis failed, skipping metric this cycle"
        );
    }

    /// Log an anomalous observation
    pub fn log_anomaly(&self, metric: &str, actual: f64, expected: f64, lower: f64, upper: f64) {
        warn!(
            event = "anomaly_detected",
            instance = %self.instance,
            metric = %metric,
            actual = actual,
            expected = expected,
            lower = lower,
            upper = upper,
            "Observation outside forecast interval"
        );
    }

    /// Log a completed cycle with a per-metric summary
    pub fn log_cycle(&self, summaries: &[MetricSummary], failed: usize, elapsed_ms: u128) {
        for summary in summaries {
            info!(
                event = "metric_analyzed",
                instance = %self.instance,
                metric = %summary.metric,
                forecast_mean = ?summary.forecast_mean,
                anomalous = summary.anomalous,
                history_anomalies = ?summary.history_anomalies,
                "TimeGPT analysis"
            );
        }

        info!(
            event = "cycle_completed",
            instance = %self.instance,
            analyzed = summaries.len(),
            failed = failed,
            elapsed_ms = elapsed_ms,
            "Analysis cycle complete"
        );
    }
}
