//! Core data models for the analyzer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A metric tracked by the analyzer: exported name plus the query that produces it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedMetric {
    pub name: String,
    pub query: String,
}

impl TrackedMetric {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
        }
    }
}

/// One timestamped sample read from the metrics source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
}

/// A single forecast step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Forecast returned by the forecasting API for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub metric: String,
    /// Forecast steps in horizon order, first step is the one-step-ahead value
    pub horizon: Vec<ForecastPoint>,
    /// Anomaly flag reported by the API for the scored observation
    pub anomaly_flag: Option<bool>,
    /// Number of window samples the API flagged as anomalous
    pub anomaly_count: Option<u32>,
}

/// In-sample anomaly detection over a window of observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Whether the last sample of the window was flagged
    pub latest: bool,
    /// Number of flagged samples in the window
    pub count: u32,
}

impl ForecastResult {
    /// Attach the flags detected over the window ending at the scored observation
    pub fn apply_anomalies(&mut self, report: AnomalyReport) {
        self.anomaly_flag = Some(report.latest);
        self.anomaly_count = Some(report.count);
    }

    /// The step compared against the current observation
    pub fn next(&self) -> Option<&ForecastPoint> {
        self.horizon.first()
    }

    /// Mean point forecast over the whole horizon
    pub fn mean(&self) -> Option<f64> {
        if self.horizon.is_empty() {
            return None;
        }
        let sum: f64 = self.horizon.iter().map(|p| p.point).sum();
        Some(sum / self.horizon.len() as f64)
    }
}

/// Kinds of derived signals exported per metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Actual,
    Forecast,
    ForecastLower,
    ForecastUpper,
    ForecastMean,
    Deviation,
    Anomaly,
    HistoryAnomalies,
}

impl SignalKind {
    pub const ALL: [SignalKind; 8] = [
        SignalKind::Actual,
        SignalKind::Forecast,
        SignalKind::ForecastLower,
        SignalKind::ForecastUpper,
        SignalKind::ForecastMean,
        SignalKind::Deviation,
        SignalKind::Anomaly,
        SignalKind::HistoryAnomalies,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Actual => "actual",
            SignalKind::Forecast => "forecast",
            SignalKind::ForecastLower => "forecast_lower",
            SignalKind::ForecastUpper => "forecast_upper",
            SignalKind::ForecastMean => "forecast_mean",
            SignalKind::Deviation => "deviation",
            SignalKind::Anomaly => "anomaly",
            SignalKind::HistoryAnomalies => "history_anomalies",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A score derived from an observation and its forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedSignal {
    pub metric: String,
    pub signal: SignalKind,
    pub value: f64,
}

impl DerivedSignal {
    pub fn new(metric: impl Into<String>, signal: SignalKind, value: f64) -> Self {
        Self {
            metric: metric.into(),
            signal,
            value,
        }
    }
}
