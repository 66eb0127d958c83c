//! Library for the TimeGPT metrics analyzer
//!
//! This crate provides the core functionality for:
//! - Fetching metric history from Prometheus
//! - Forecasting and anomaly detection through the hosted TimeGPT API
//! - Scoring the latest observation against its forecast
//! - Exposing derived signals for Prometheus to scrape
//! - Health checks and observability

pub mod anomaly;
pub mod error;
pub mod exporter;
pub mod forecast;
pub mod health;
pub mod models;
pub mod observability;
pub mod scheduler;
pub mod source;

pub use error::{ExportError, ForecastError, SourceError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AnalyzerMetrics, StructuredLogger};
