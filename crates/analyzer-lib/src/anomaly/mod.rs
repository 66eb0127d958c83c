//! Forecast-based anomaly scoring
//!
//! Compares the latest observation of a metric against the forecast made from
//! its preceding history and produces the signals the exporter publishes.

mod deriver;

pub use deriver::{is_anomalous, ScoreDeriver};
