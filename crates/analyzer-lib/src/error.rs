//! Error taxonomy for the analysis pipeline
//!
//! Source and forecast errors are caught per metric by the scheduler and never
//! terminate the process. Export errors surface to the scraping caller only.

use thiserror::Error;

/// The metrics source could not produce observations (SourceUnavailable)
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("metrics source unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("metrics source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("metrics source query failed: {0}")]
    Query(String),

    #[error("malformed metrics source response: {0}")]
    Malformed(String),

    #[error("no samples returned for metric {0}")]
    NoData(String),

    #[error("invalid metrics source url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// The forecasting API did not produce a usable forecast (ForecastUnavailable)
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("forecast request timed out")]
    Timeout,

    #[error("forecast API unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("forecast API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed forecast response: {0}")]
    Malformed(String),

    #[error("insufficient history: got {got} samples, need {need}")]
    InsufficientHistory { got: usize, need: usize },

    #[error("invalid forecast endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl From<reqwest::Error> for ForecastError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ForecastError::Timeout
        } else {
            ForecastError::Transport(err)
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Unreachable(err)
    }
}

/// Exposition of the registry failed (ExportFailure)
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),

    #[error("encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
