//! Fixed-interval analysis scheduling
//!
//! Each tick runs fetch → forecast → score → publish for every tracked metric.
//! Failures are contained to the metric that produced them.

mod r#loop;


pub use r#loop::{AnalysisLoop, AnalysisLoopBuilder, CycleReport, SchedulerConfig};
