//! Score derivation
//!
//! Stateless: every cycle's signals depend only on that cycle's inputs.

use crate::models::{DerivedSignal, ForecastPoint, ForecastResult, Observation, SignalKind};

/// True if `actual` falls outside the forecast interval or the API flagged it
pub fn is_anomalous(actual: f64, expected: &ForecastPoint, api_flag: Option<bool>) -> bool {
    actual < expected.lower || actual > expected.upper || api_flag.unwrap_or(false)
}

/// Derives per-metric signals from an observation and its forecast
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreDeriver;

impl ScoreDeriver {
    pub fn new() -> Self {
        Self
    }

    /// Derive signals for `actual` against the first step of `forecast`
    ///
    /// Returns an empty set if the forecast has no horizon steps.
    pub fn derive(&self, actual: &Observation, forecast: &ForecastResult) -> Vec<DerivedSignal> {
        let Some(expected) = forecast.next() else {
            return Vec::new();
        };

        let metric = actual.metric.as_str();
        let deviation = (actual.value - expected.point).abs();
        let anomalous = is_anomalous(actual.value, expected, forecast.anomaly_flag);

        let mut signals = vec![
            DerivedSignal::new(metric, SignalKind::Actual, actual.value),
            DerivedSignal::new(metric, SignalKind::Forecast, expected.point),
            DerivedSignal::new(metric, SignalKind::ForecastLower, expected.lower),
            DerivedSignal::new(metric, SignalKind::ForecastUpper, expected.upper),
            DerivedSignal::new(metric, SignalKind::Deviation, deviation),
            DerivedSignal::new(metric, SignalKind::Anomaly, if anomalous { 1.0 } else { 0.0 }),
        ];

        if let Some(mean) = forecast.mean() {
            signals.push(DerivedSignal::new(metric, SignalKind::ForecastMean, mean));
        }
        if let Some(count) = forecast.anomaly_count {
            signals.push(DerivedSignal::new(
                metric,
                SignalKind::HistoryAnomalies,
                count as f64,
            ));
        }

        signals
    }
}
