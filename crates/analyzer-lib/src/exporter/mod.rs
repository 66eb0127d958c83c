//! Metrics exposition
//!
//! [`SignalRegistry`] owns the per-metric instruments the scheduler updates;
//! the HTTP server reads the same `prometheus::Registry` on every scrape.

mod registry;
mod server;

pub use registry::{SignalRegistry, SIGNAL_LABEL};
pub use server::{bind, create_router, serve, AppState};

use crate::error::ExportError;
use prometheus::{Encoder, Registry, TextEncoder};

/// Encode every metric family in `registry` in the text exposition format
pub fn encode_text(registry: &Registry) -> Result<String, ExportError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
