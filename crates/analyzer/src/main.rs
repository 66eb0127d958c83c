//! TimeGPT analyzer - forecast-based anomaly scoring for Prometheus metrics
//!
//! Periodically pulls metric history from Prometheus, forecasts it with the
//! hosted TimeGPT API and republishes derived scores on `/metrics`.

use analyzer_lib::{
    exporter::{self, AppState, SignalRegistry},
    forecast::{Forecaster, TimeGptClient},
    health::{components, HealthRegistry},
    observability::{AnalyzerMetrics, StructuredLogger},
    scheduler::AnalysisLoopBuilder,
    source::{MetricsSource, PrometheusSource},
};
use anyhow::{Context, Result};
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const ANALYZER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting timegpt-analyzer");

    // Any configuration problem, including a missing API key, is fatal
    let config = config::AnalyzerConfig::load()?;
    let scheduler_config = config.scheduler_config();
    info!(
        instance = %config.instance,
        source_url = %config.source_url,
        interval_secs = config.interval_secs,
        "Analyzer configured"
    );

    // Instruments live in one explicit registry shared by the loop and the server
    let registry = Registry::new();
    let signals = SignalRegistry::new(registry.clone()).context("Failed to register signals")?;
    let metrics = AnalyzerMetrics::new(&registry).context("Failed to register self-metrics")?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SOURCE).await;
    health_registry.register(components::FORECASTER).await;
    health_registry.register(components::EXPORTER).await;

    let logger = StructuredLogger::new(&config.instance);

    let source = Arc::new(
        PrometheusSource::new(config.source_config()).context("Invalid metrics source")?,
    );
    let forecaster = Arc::new(
        TimeGptClient::new(config.forecast_config()).context("Invalid forecast endpoint")?,
    );

    // Failing to bind the scrape port exits non-zero so the orchestrator restarts us
    let listener = exporter::bind(config.api_port)
        .await
        .with_context(|| format!("Failed to bind metrics port {}", config.api_port))?;

    // Connectivity probe is informational only; the loop retries every cycle
    let probe_error = source.probe().await.err().map(|e| e.to_string());
    logger.log_source_probe(source.query_url().as_str(), probe_error.as_deref());

    let analysis = AnalysisLoopBuilder::new()
        .source(source.clone())
        .forecaster(forecaster.clone())
        .signals(signals)
        .metrics(metrics)
        .health(health_registry.clone())
        .logger(logger.clone())
        .interval(scheduler_config.interval)
        .horizon(scheduler_config.horizon)
        .tracked(scheduler_config.metrics)
        .build()?;

    let app_state = Arc::new(AppState::new(health_registry.clone(), registry));
    health_registry.set_ready(true).await;
    logger.log_startup(
        ANALYZER_VERSION,
        forecaster.model(),
        config.metrics.len(),
        config.api_port,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut api_handle = tokio::spawn(exporter::serve(listener, app_state));
    let analysis_handle = tokio::spawn(analysis.run(shutdown_tx.subscribe()));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        served = &mut api_handle => {
            health_registry
                .set_unhealthy(components::EXPORTER, "API server stopped")
                .await;
            served.context("API server task panicked")??;
            anyhow::bail!("API server exited unexpectedly");
        }
    }

    let _ = shutdown_tx.send(());
    analysis_handle.await.context("Analysis loop panicked")?;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
