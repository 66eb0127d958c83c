//! TimeGPT REST client
//!
//! Submits a single series to the hosted forecasting API and, optionally, a
//! window ending at the scored observation to its in-sample anomaly detection
//! endpoint. Every failure is mapped to a
//! [`ForecastError`] so the caller can skip the metric for this cycle.

use super::Forecaster;
use crate::error::ForecastError;
use crate::models::{AnomalyReport, ForecastPoint, ForecastResult, Observation};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Hosted API base URL
pub const DEFAULT_ENDPOINT: &str = "https://api.nixtla.io";

/// Minimum number of history samples submitted for a forecast
pub const MIN_HISTORY: usize = 8;

const FORECAST_PATH: &str = "v2/forecast";
const ANOMALY_PATH: &str = "v2/anomaly_detection";

/// Configuration for the TimeGPT client
#[derive(Debug, Clone)]
pub struct ForecastConfig {
    /// API base URL
    pub endpoint: String,
    /// Bearer token
    pub api_key: String,
    /// Model name (e.g., "timegpt-1")
    pub model: String,
    /// Series frequency, in pandas offset syntax (e.g., "15s")
    pub freq: String,
    /// Prediction interval level in percent
    pub level: u32,
    /// Per-request timeout
    pub timeout: Duration,
    /// Also run in-sample anomaly detection
    pub detect_anomalies: bool,
    /// Reject histories shorter than this
    pub min_history: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: "timegpt-1".to_string(),
            freq: "15s".to_string(),
            level: 80,
            timeout: Duration::from_secs(30),
            detect_anomalies: true,
            min_history: MIN_HISTORY,
        }
    }
}

#[derive(Debug, Serialize)]
struct SeriesPayload {
    sizes: Vec<usize>,
    y: Vec<f64>,
}

impl SeriesPayload {
    fn from_history(history: &[Observation]) -> Self {
        Self {
            sizes: vec![history.len()],
            y: history.iter().map(|o| o.value).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ForecastRequest<'a> {
    series: &'a SeriesPayload,
    model: &'a str,
    h: usize,
    freq: &'a str,
    level: [u32; 1],
    clean_ex_first: bool,
}

#[derive(Debug, Serialize)]
struct AnomalyRequest<'a> {
    series: &'a SeriesPayload,
    model: &'a str,
    freq: &'a str,
    level: [u32; 1],
    clean_ex_first: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnomalyFlag {
    Bool(bool),
    Int(i64),
}

impl AnomalyFlag {
    fn is_set(&self) -> bool {
        match self {
            AnomalyFlag::Bool(b) => *b,
            AnomalyFlag::Int(i) => *i != 0,
        }
    }
}

/// Response shape shared by the forecast and anomaly detection endpoints
#[derive(Debug, Deserialize)]
struct ApiResponse {
    mean: Vec<f64>,
    #[serde(default)]
    intervals: Option<HashMap<String, Vec<f64>>>,
    #[serde(default)]
    anomaly: Option<Vec<AnomalyFlag>>,
}

impl ApiResponse {
    fn bounds(&self, level: u32) -> Option<(&[f64], &[f64])> {
        let intervals = self.intervals.as_ref()?;
        let lo = intervals.get(&format!("lo-{level}"))?;
        let hi = intervals.get(&format!("hi-{level}"))?;
        Some((lo.as_slice(), hi.as_slice()))
    }
}

/// Parse a pandas-style frequency ("15s", "5min", "1h", "D") into a duration
pub fn parse_freq(freq: &str) -> Option<ChronoDuration> {
    let freq = freq.trim();
    let split = freq
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(freq.len());
    let (count, unit) = freq.split_at(split);
    let count: i64 = if count.is_empty() { 1 } else { count.parse().ok()? };

    if count <= 0 {
        return None;
    }

    match unit {
        "ms" | "L" => Some(ChronoDuration::milliseconds(count)),
        "s" | "S" => Some(ChronoDuration::seconds(count)),
        "min" | "T" => Some(ChronoDuration::minutes(count)),
        "h" | "H" => Some(ChronoDuration::hours(count)),
        "d" | "D" => Some(ChronoDuration::days(count)),
        _ => None,
    }
}

/// Client for the hosted TimeGPT API
pub struct TimeGptClient {
    client: Client,
    forecast_url: Url,
    anomaly_url: Url,
    config: ForecastConfig,
}

impl TimeGptClient {
    /// Create a new client with the given configuration
    pub fn new(config: ForecastConfig) -> Result<Self, ForecastError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ForecastError::Transport)?;

        let mut base = Url::parse(&config.endpoint)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client,
            forecast_url: base.join(FORECAST_PATH)?,
            anomaly_url: base.join(ANOMALY_PATH)?,
            config,
        })
    }

    /// Get the forecast endpoint URL
    pub fn forecast_url(&self) -> &Url {
        &self.forecast_url
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<T, ForecastError> {
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForecastError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ForecastError::Malformed(e.to_string()))
    }

    async fn forecast(
        &self,
        series: &SeriesPayload,
        horizon: usize,
    ) -> Result<ApiResponse, ForecastError> {
        let request = ForecastRequest {
            series,
            model: &self.config.model,
            h: horizon,
            freq: &self.config.freq,
            level: [self.config.level],
            clean_ex_first: true,
        };
        self.post(&self.forecast_url, &request).await
    }

    /// Spacing between horizon steps
    fn step(&self, history: &[Observation]) -> ChronoDuration {
        if let Some(step) = parse_freq(&self.config.freq) {
            return step;
        }
        match history {
            [.., prev, last] if last.timestamp > prev.timestamp => last.timestamp - prev.timestamp,
            _ => ChronoDuration::seconds(15),
        }
    }
}

/// Per-sample anomaly flags, aligned to the end of `y`
fn anomaly_flags(
    response: &ApiResponse,
    y: &[f64],
    level: u32,
) -> Result<Vec<bool>, ForecastError> {
    if let Some(anomaly) = &response.anomaly {
        if anomaly.len() > y.len() {
            return Err(ForecastError::Malformed(format!(
                "anomaly response has {} flags for {} samples",
                anomaly.len(),
                y.len()
            )));
        }
        return Ok(anomaly.iter().map(AnomalyFlag::is_set).collect());
    }

    let (lo, hi) = response.bounds(level).ok_or_else(|| {
        ForecastError::Malformed(format!("anomaly response missing lo-{level}/hi-{level}"))
    })?;

    let fitted = response.mean.len().min(lo.len()).min(hi.len());
    if fitted > y.len() {
        return Err(ForecastError::Malformed(format!(
            "anomaly response has {fitted} fitted values for {} samples",
            y.len()
        )));
    }

    let offset = y.len() - fitted;
    Ok((0..fitted)
        .map(|i| {
            let actual = y[offset + i];
            actual < lo[i] || actual > hi[i]
        })
        .collect())
}

/// Build horizon points from a forecast response
fn horizon_points(
    response: &ApiResponse,
    horizon: usize,
    level: u32,
    last: DateTime<Utc>,
    step: ChronoDuration,
) -> Result<Vec<ForecastPoint>, ForecastError> {
    if response.mean.len() < horizon {
        return Err(ForecastError::Malformed(format!(
            "expected {horizon} forecast values, got {}",
            response.mean.len()
        )));
    }

    let (lo, hi) = response.bounds(level).ok_or_else(|| {
        ForecastError::Malformed(format!("forecast response missing lo-{level}/hi-{level}"))
    })?;
    if lo.len() < horizon || hi.len() < horizon {
        return Err(ForecastError::Malformed(
            "prediction interval shorter than horizon".to_string(),
        ));
    }

    let mut points = Vec::with_capacity(horizon);
    let mut timestamp = last;
    for i in 0..horizon {
        timestamp += step;
        let point = response.mean[i];
        if !point.is_finite() {
            return Err(ForecastError::Malformed(format!(
                "non-finite forecast value at step {i}"
            )));
        }
        if !lo[i].is_finite() || !hi[i].is_finite() {
            return Err(ForecastError::Malformed(format!(
                "non-finite prediction interval at step {i}"
            )));
        }
        points.push(ForecastPoint {
            timestamp,
            point,
            lower: lo[i].min(hi[i]),
            upper: hi[i].max(lo[i]),
        });
    }
    Ok(points)
}

#[async_trait]
impl Forecaster for TimeGptClient {
    async fn submit(
        &self,
        history: &[Observation],
        horizon: usize,
    ) -> Result<ForecastResult, ForecastError> {
        let need = self.config.min_history.max(1);
        if history.len() < need {
            return Err(ForecastError::InsufficientHistory {
                got: history.len(),
                need,
            });
        }
        if horizon == 0 {
            return Err(ForecastError::Malformed("horizon must be at least 1".to_string()));
        }

        let metric = history[0].metric.clone();
        let last = history[history.len() - 1].timestamp;
        let series = SeriesPayload::from_history(history);
        let start = Instant::now();

        let response = self.forecast(&series, horizon).await?;
        let points = horizon_points(
            &response,
            horizon,
            self.config.level,
            last,
            self.step(history),
        )?;

        debug!(
            metric = %metric,
            samples = history.len(),
            horizon = horizon,
            elapsed_ms = start.elapsed().as_millis(),
            "TimeGPT forecast complete"
        );

        Ok(ForecastResult {
            metric,
            horizon: points,
            anomaly_flag: None,
            anomaly_count: None,
        })
    }

    async fn detect_anomalies(
        &self,
        window: &[Observation],
    ) -> Result<Option<AnomalyReport>, ForecastError> {
        if !self.config.detect_anomalies {
            return Ok(None);
        }
        let need = self.config.min_history.max(1);
        if window.len() < need {
            return Err(ForecastError::InsufficientHistory {
                got: window.len(),
                need,
            });
        }

        let series = SeriesPayload::from_history(window);
        let request = AnomalyRequest {
            series: &series,
            model: &self.config.model,
            freq: &self.config.freq,
            level: [self.config.level],
            clean_ex_first: true,
        };
        let response: ApiResponse = self.post(&self.anomaly_url, &request).await?;
        let flags = anomaly_flags(&response, &series.y, self.config.level)?;

        Ok(Some(AnomalyReport {
            latest: flags.last().copied().unwrap_or(false),
            count: flags.iter().filter(|f| **f).count() as u32,
        }))
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
