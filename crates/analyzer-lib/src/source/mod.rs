//! Metrics source adapters
//!
//! A source turns a tracked metric into an ordered window of observations.
//! The scheduler only sees the [`MetricsSource`] trait, so tests can swap in
//! an in-memory implementation.

mod prometheus;

pub use prometheus::{PrometheusSource, SourceConfig};

use crate::error::SourceError;
use crate::models::{Observation, TrackedMetric};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Trait for upstream metrics sources
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch the observation window for `metric` ending at `end`,
    /// ordered by ascending timestamp
    async fn fetch(
        &self,
        metric: &TrackedMetric,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, SourceError>;

    /// Check that the source is reachable and answering queries
    async fn probe(&self) -> Result<(), SourceError>;
}
