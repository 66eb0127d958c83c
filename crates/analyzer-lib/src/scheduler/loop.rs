//! Analysis loop
//!
//! Runs one cycle per interval. Metrics are processed sequentially; the only
//! state shared with the scrape server is the signal registry.

use crate::anomaly::ScoreDeriver;
use crate::error::{ForecastError, SourceError};
use crate::exporter::SignalRegistry;
use crate::forecast::Forecaster;
use crate::health::{components, HealthRegistry};
use crate::models::{DerivedSignal, SignalKind, TrackedMetric};
use crate::observability::{AnalyzerMetrics, MetricSummary, StructuredLogger};
use crate::source::MetricsSource;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the analysis loop
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between cycle starts (default: 30 seconds)
    pub interval: Duration,
    /// Forecast horizon in steps (default: 12)
    pub horizon: usize,
    /// Metrics analysed every cycle
    pub metrics: Vec<TrackedMetric>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            horizon: 12,
            metrics: Vec::new(),
        }
    }
}

/// Outcome of one cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    pub analyzed: Vec<MetricSummary>,
    pub source_failures: usize,
    pub forecast_failures: usize,
}

impl CycleReport {
    pub fn failed(&self) -> usize {
        self.source_failures + self.forecast_failures
    }
}

enum MetricFailure {
    Source(SourceError),
    Forecast(ForecastError),
}

/// Drives fetch → forecast → score → publish at a fixed interval
pub struct AnalysisLoop {
    source: Arc<dyn MetricsSource>,
    forecaster: Arc<dyn Forecaster>,
    deriver: ScoreDeriver,
    signals: SignalRegistry,
    metrics: AnalyzerMetrics,
    health: HealthRegistry,
    logger: StructuredLogger,
    config: SchedulerConfig,
}

impl AnalysisLoop {
    /// Run until a shutdown message is received
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            metrics = self.config.metrics.len(),
            "Starting analysis loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle(Utc::now()).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down analysis loop");
                    break;
                }
            }
        }
    }

    /// Run a single cycle over all tracked metrics ending at `now`
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::default();
        self.metrics.inc_analysis_requests();

        for metric in &self.config.metrics {
            match self.analyze_metric(metric, now).await {
                Ok(signals) => {
                    report
                        .analyzed
                        .push(MetricSummary::from_signals(&metric.name, &signals));
                }
                Err(MetricFailure::Source(e)) => {
                    report.source_failures += 1;
                    self.metrics.inc_source_errors(&metric.name);
                    self.logger
                        .log_source_unavailable(&metric.name, &e.to_string());
                }
                Err(MetricFailure::Forecast(e)) => {
                    report.forecast_failures += 1;
                    self.metrics.inc_forecast_errors(&metric.name);
                    self.logger
                        .log_forecast_unavailable(&metric.name, &e.to_string());
                }
            }
        }

        let attempted = self.config.metrics.len();
        self.health
            .record_cycle(components::SOURCE, attempted, report.source_failures)
            .await;
        self.health
            .record_cycle(
                components::FORECASTER,
                attempted - report.source_failures,
                report.forecast_failures,
            )
            .await;

        let elapsed = start.elapsed();
        self.metrics.observe_cycle_duration(elapsed.as_secs_f64());
        self.logger
            .log_cycle(&report.analyzed, report.failed(), elapsed.as_millis());

        report
    }

    async fn analyze_metric(
        &self,
        metric: &TrackedMetric,
        now: DateTime<Utc>,
    ) -> Result<Vec<DerivedSignal>, MetricFailure> {
        let observations = self
            .source
            .fetch(metric, now)
            .await
            .map_err(MetricFailure::Source)?;

        // The latest sample is scored against a forecast made from the rest
        let Some((actual, history)) = observations.split_last() else {
            return Err(MetricFailure::Source(SourceError::NoData(metric.name.clone())));
        };
        if history.is_empty() {
            return Err(MetricFailure::Forecast(ForecastError::InsufficientHistory {
                got: 0,
                need: 1,
            }));
        }

        let forecast_start = Instant::now();
        let mut forecast = self
            .forecaster
            .submit(history, self.config.horizon)
            .await
            .map_err(MetricFailure::Forecast)?;
        // Detection covers the full window so the flag belongs to `actual`
        if let Some(report) = self
            .forecaster
            .detect_anomalies(&observations)
            .await
            .map_err(MetricFailure::Forecast)?
        {
            forecast.apply_anomalies(report);
        }
        self.metrics
            .observe_forecast_latency(forecast_start.elapsed().as_secs_f64());

        let signals = self.deriver.derive(actual, &forecast);
        self.signals.publish_all(&signals);

        if let Some(count) = forecast.anomaly_count {
            self.metrics.add_anomaly_count(&metric.name, u64::from(count));
        }
        let anomalous = signals
            .iter()
            .any(|s| s.signal == SignalKind::Anomaly && s.value > 0.0);
        if let (true, Some(expected)) = (anomalous, forecast.next()) {
            self.metrics.inc_anomalies_detected(&metric.name);
            self.logger.log_anomaly(
                &metric.name,
                actual.value,
                expected.point,
                expected.lower,
                expected.upper,
            );
        }

        debug!(
            metric = %metric.name,
            model = %self.forecaster.model(),
            signals = signals.len(),
            "Published derived signals"
        );
        Ok(signals)
    }
}

/// Builder for the analysis loop
pub struct AnalysisLoopBuilder {
    source: Option<Arc<dyn MetricsSource>>,
    forecaster: Option<Arc<dyn Forecaster>>,
    signals: Option<SignalRegistry>,
    metrics: Option<AnalyzerMetrics>,
    health: HealthRegistry,
    logger: StructuredLogger,
    config: SchedulerConfig,
}

impl AnalysisLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            source: None,
            forecaster: None,
            signals: None,
            metrics: None,
            health: HealthRegistry::new(),
            logger: StructuredLogger::new("timegpt-analyzer"),
            config: SchedulerConfig::default(),
        }
    }

    /// Set the metrics source
    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the forecasting backend
    pub fn forecaster(mut self, forecaster: Arc<dyn Forecaster>) -> Self {
        self.forecaster = Some(forecaster);
        self
    }

    /// Set the signal registry shared with the scrape server
    pub fn signals(mut self, signals: SignalRegistry) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Set the self-metrics handle
    pub fn metrics(mut self, metrics: AnalyzerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    /// Set the structured logger
    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Set the cycle interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the forecast horizon
    pub fn horizon(mut self, horizon: usize) -> Self {
        self.config.horizon = horizon;
        self
    }

    /// Set the tracked metrics
    pub fn tracked(mut self, metrics: Vec<TrackedMetric>) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Build the analysis loop
    pub fn build(self) -> Result<AnalysisLoop> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let forecaster = self
            .forecaster
            .ok_or_else(|| anyhow::anyhow!("Forecaster is required"))?;
        let signals = self
            .signals
            .ok_or_else(|| anyhow::anyhow!("Signal registry is required"))?;
        let metrics = self
            .metrics
            .ok_or_else(|| anyhow::anyhow!("Analyzer metrics are required"))?;

        if self.config.interval.is_zero() {
            anyhow::bail!("Interval must be greater than zero");
        }
        if self.config.horizon == 0 {
            anyhow::bail!("Horizon must be at least 1");
        }

        metrics.set_tracked_metrics(self.config.metrics.len() as i64);

        Ok(AnalysisLoop {
            source,
            forecaster,
            deriver: ScoreDeriver::new(),
            signals,
            metrics,
            health: self.health,
            logger: self.logger,
            config: self.config,
        })
    }
}

impl Default for AnalysisLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
