//! Forecasting backends
//!
//! The scheduler talks to a [`Forecaster`]; the hosted TimeGPT API is the
//! production implementation.

mod timegpt;

pub use timegpt::{parse_freq, ForecastConfig, TimeGptClient, DEFAULT_ENDPOINT, MIN_HISTORY};

use crate::error::ForecastError;
use crate::models::{AnomalyReport, ForecastResult, Observation};
use async_trait::async_trait;

/// Trait for forecasting implementations
#[async_trait]
pub trait Forecaster: Send + Sync {
    /// Forecast `horizon` steps past the end of `history`
    ///
    /// `history` is a single metric ordered by ascending timestamp.
    async fn submit(
        &self,
        history: &[Observation],
        horizon: usize,
    ) -> Result<ForecastResult, ForecastError>;

    /// Run in-sample anomaly detection over `window`
    ///
    /// The report's `latest` flag describes the last sample of `window`.
    /// Backends without anomaly detection return `None`.
    async fn detect_anomalies(
        &self,
        _window: &[Observation],
    ) -> Result<Option<AnomalyReport>, ForecastError> {
        Ok(None)
    }

    /// Model identifier used in logs
    fn model(&self) -> &str;
}
