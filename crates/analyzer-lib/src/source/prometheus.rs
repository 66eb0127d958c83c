//! Prometheus range-query source
//!
//! Reads `/api/v1/query_range` and converts the first returned series into
//! observations. Non-finite samples are dropped.

use super::MetricsSource;
use crate::error::SourceError;
use crate::models::{Observation, TrackedMetric};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Query used to check connectivity at startup
const PROBE_QUERY: &str = "up";

/// Window used by the startup probe
const PROBE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Configuration for the Prometheus source
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Prometheus base URL (e.g., "http://prometheus:9090")
    pub base_url: String,
    /// How far back each fetch reaches
    pub lookback: Duration,
    /// Range query resolution, in Prometheus duration syntax
    pub step: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://prometheus:9090".to_string(),
            lookback: Duration::from_secs(60 * 60),
            step: "15s".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryRangeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Metrics source backed by the Prometheus HTTP API
pub struct PrometheusSource {
    client: Client,
    query_url: Url,
    config: SourceConfig,
}

impl PrometheusSource {
    /// Create a new source with the given configuration
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(SourceError::Unreachable)?;

        // Keep any route prefix in the base URL when joining
        let mut base = Url::parse(&config.base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let query_url = base.join("api/v1/query_range")?;

        Ok(Self {
            client,
            query_url,
            config,
        })
    }

    /// Get the range query URL
    pub fn query_url(&self) -> &Url {
        &self.query_url
    }

    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(f64, String)>, SourceError> {
        debug!(url = %self.query_url, query = %query, "Querying Prometheus");

        let start = start.timestamp().to_string();
        let end = end.timestamp().to_string();
        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[
                ("query", query),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", self.config.step.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: QueryRangeResponse =
            serde_json::from_str(&body).map_err(|e| SourceError::Malformed(e.to_string()))?;

        if parsed.status != "success" {
            return Err(SourceError::Query(
                parsed.error.unwrap_or_else(|| parsed.status.clone()),
            ));
        }

        let data = parsed
            .data
            .ok_or_else(|| SourceError::Malformed("missing 'data' field".to_string()))?;

        Ok(data
            .result
            .into_iter()
            .next()
            .map(|series| series.values)
            .unwrap_or_default())
    }
}

/// Convert raw `[timestamp, "value"]` pairs into observations
fn to_observations(
    metric: &str,
    values: Vec<(f64, String)>,
) -> Result<Vec<Observation>, SourceError> {
    let mut observations = Vec::with_capacity(values.len());

    for (ts, raw) in values {
        let value: f64 = raw
            .parse()
            .map_err(|_| SourceError::Malformed(format!("non-numeric sample '{raw}'")))?;
        if !value.is_finite() {
            continue;
        }

        let secs = ts.floor();
        let nanos = ((ts - secs) * 1e9).round() as u32;
        let timestamp = DateTime::<Utc>::from_timestamp(secs as i64, nanos.min(999_999_999))
            .ok_or_else(|| SourceError::Malformed(format!("timestamp out of range: {ts}")))?;

        observations.push(Observation {
            timestamp,
            metric: metric.to_string(),
            value,
        });
    }

    observations.sort_by_key(|o| o.timestamp);
    Ok(observations)
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn fetch(
        &self,
        metric: &TrackedMetric,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, SourceError> {
        let lookback = ChronoDuration::from_std(self.config.lookback)
            .unwrap_or_else(|_| ChronoDuration::hours(1));
        let values = self.query_range(&metric.query, end - lookback, end).await?;
        let observations = to_observations(&metric.name, values)?;

        if observations.is_empty() {
            return Err(SourceError::NoData(metric.name.clone()));
        }

        debug!(
            metric = %metric.name,
            samples = observations.len(),
            "Fetched observations"
        );
        Ok(observations)
    }

    async fn probe(&self) -> Result<(), SourceError> {
        let end = Utc::now();
        let window =
            ChronoDuration::from_std(PROBE_WINDOW).unwrap_or_else(|_| ChronoDuration::minutes(5));
        self.query_range(PROBE_QUERY, end - window, end).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn source_for(server: &mockito::Server) -> PrometheusSource {
        PrometheusSource::new(SourceConfig {
            base_url: server.url(),
            timeout: Duration::from_secs(2),
            ..SourceConfig::default()
        })
        .unwrap()
    }

    fn latency() -> TrackedMetric {
        TrackedMetric::new("latency", "avg(rate(http_server_requests_seconds_sum[5m]))")
    }

    #[test]
    fn test_base_url_with_route_prefix() {
        let source = PrometheusSource::new(SourceConfig {
            base_url: "http://prom:9090/prometheus".to_string(),
            ..SourceConfig::default()
        })
        .unwrap();
        assert_eq!(
            source.query_url().as_str(),
            "http://prom:9090/prometheus/api/v1/query_range"
        );

        let source = PrometheusSource::new(SourceConfig::default()).unwrap();
        assert_eq!(
            source.query_url().as_str(),
            "http://prometheus:9090/api/v1/query_range"
        );
    }

    #[tokio::test]
    async fn test_fetch_parses_matrix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "query".into(),
                    "avg(rate(http_server_requests_seconds_sum[5m]))".into(),
                ),
                Matcher::UrlEncoded("step".into(), "15s".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{"resultType":"matrix","result":[
                    {"metric":{"application":"user-system"},
                     "values":[[1700000015,"0.25"],[1700000000,"0.5"],[1700000030,"NaN"]]}
                ]}}"#,
            )
            .create_async()
            .await;

        let source = source_for(&server);
        let end = DateTime::<Utc>::from_timestamp(1_700_000_030, 0).unwrap();
        let observations = source.fetch(&latency(), end).await.unwrap();

        mock.assert_async().await;
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].value, 0.5);
        assert_eq!(observations[1].value, 0.25);
        assert_eq!(observations[1].metric, "latency");
        assert!(observations[0].timestamp < observations[1].timestamp);
    }

    #[tokio::test]
    async fn test_fetch_empty_result_is_no_data() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#)
            .create_async()
            .await;

        let source = source_for(&server);
        let err = source.fetch(&latency(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, SourceError::NoData(name) if name == "latency"));
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let source = source_for(&server);
        let err = source.fetch(&latency(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_fetch_query_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#)
            .create_async()
            .await;

        let source = source_for(&server);
        let err = source.fetch(&latency(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, SourceError::Query(msg) if msg == "parse error"));
    }

    #[tokio::test]
    async fn test_fetch_missing_data_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"success"}"#)
            .create_async()
            .await;

        let source = source_for(&server);
        let err = source.fetch(&latency(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        let source = PrometheusSource::new(SourceConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_millis(500),
            ..SourceConfig::default()
        })
        .unwrap();

        let err = source.fetch(&latency(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, SourceError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_probe_uses_up_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query_range")
            .match_query(Matcher::UrlEncoded("query".into(), "up".into()))
            .with_status(200)
            .with_body(r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#)
            .create_async()
            .await;

        let source = source_for(&server);
        assert!(source.probe().await.is_ok());
        mock.assert_async().await;
    }

    #[test]
    fn test_to_observations_fractional_timestamp() {
        let obs = to_observations("gc", vec![(1700000000.5, "1".to_string())]).unwrap();
        assert_eq!(obs[0].timestamp.timestamp(), 1_700_000_000);
        assert_eq!(obs[0].timestamp.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_to_observations_rejects_garbage() {
        let err = to_observations("gc", vec![(1700000000.0, "abc".to_string())]).unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    #[test]
    fn test_invalid_base_url() {
        let result = PrometheusSource::new(SourceConfig {
            base_url: "not a url".to_string(),
            ..SourceConfig::default()
        });
        assert!(matches!(result, Err(SourceError::InvalidUrl(_))));
    }
}
