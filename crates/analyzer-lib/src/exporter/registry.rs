//! Derived signal instruments
//!
//! One gauge family per [`SignalKind`], labelled by metric name. A label set
//! is created on first publish and never removed afterwards, so a metric that
//! fails a cycle keeps exporting its last value.

use crate::models::{DerivedSignal, SignalKind};
use prometheus::{GaugeVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Label carrying the tracked metric name
pub const SIGNAL_LABEL: &str = "metric";

const NAMESPACE: &str = "timegpt";

fn help(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Actual => "Latest observed value of the tracked metric",
        SignalKind::Forecast => "One-step-ahead TimeGPT point forecast",
        SignalKind::ForecastLower => "Lower bound of the one-step-ahead prediction interval",
        SignalKind::ForecastUpper => "Upper bound of the one-step-ahead prediction interval",
        SignalKind::ForecastMean => "Mean TimeGPT point forecast over the full horizon",
        SignalKind::Deviation => "Absolute difference between observed and forecast value",
        SignalKind::Anomaly => "1 if the latest observation is anomalous, 0 otherwise",
        SignalKind::HistoryAnomalies => "Anomalous samples in the analysed history window",
    }
}

/// Shared handle to the derived signal instruments
///
/// Cloning is cheap; all clones update the same underlying gauges. Each
/// update is a single atomic store, so a concurrent scrape observes either
/// the previous or the new value.
#[derive(Clone)]
pub struct SignalRegistry {
    registry: Registry,
    gauges: Arc<HashMap<SignalKind, GaugeVec>>,
}

impl SignalRegistry {
    /// Register one gauge family per signal kind into `registry`
    pub fn new(registry: Registry) -> prometheus::Result<Self> {
        let mut gauges = HashMap::with_capacity(SignalKind::ALL.len());

        for kind in SignalKind::ALL {
            let gauge = GaugeVec::new(
                Opts::new(kind.as_str(), help(kind)).namespace(NAMESPACE),
                &[SIGNAL_LABEL],
            )?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(kind, gauge);
        }

        Ok(Self {
            registry,
            gauges: Arc::new(gauges),
        })
    }

    /// The registry the instruments are registered in
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Update the instrument for `signal` in place
    pub fn publish(&self, signal: &DerivedSignal) {
        if let Some(gauge) = self.gauges.get(&signal.signal) {
            gauge
                .with_label_values(&[signal.metric.as_str()])
                .set(signal.value);
            trace!(
                metric = %signal.metric,
                signal = %signal.signal,
                value = signal.value,
                "Published signal"
            );
        }
    }

    /// Publish a batch of signals
    pub fn publish_all(&self, signals: &[DerivedSignal]) {
        for signal in signals {
            self.publish(signal);
        }
    }

    /// Current value of a published instrument, `None` if never published
    pub fn value(&self, metric: &str, kind: SignalKind) -> Option<f64> {
        let name = format!("{NAMESPACE}_{}", kind.as_str());

        self.registry
            .gather()
            .into_iter()
            .find(|family| family.get_name() == name)?
            .get_metric()
            .iter()
            .find(|m| {
                m.get_label()
                    .iter()
                    .any(|l| l.get_name() == SIGNAL_LABEL && l.get_value() == metric)
            })
            .map(|m| m.get_gauge().get_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::encode_text;

    fn signal(metric: &str, kind: SignalKind, value: f64) -> DerivedSignal {
        DerivedSignal::new(metric, kind, value)
    }

    #[test]
    fn test_unpublished_metric_is_absent() {
        let signals = SignalRegistry::new(Registry::new()).unwrap();

        assert!(signals.value("latency", SignalKind::Deviation).is_none());
        let text = encode_text(signals.registry()).unwrap();
        assert!(!text.contains("metric=\"latency\""));
    }

    #[test]
    fn test_publish_exposes_labelled_line() {
        let signals = SignalRegistry::new(Registry::new()).unwrap();
        signals.publish(&signal("latency", SignalKind::Deviation, 10.0));

        let text = encode_text(signals.registry()).unwrap();
        assert!(text.contains("timegpt_deviation{metric=\"latency\"} 10"));
        assert_eq!(signals.value("latency", SignalKind::Deviation), Some(10.0));
    }

    #[test]
    fn test_publish_replaces_value_in_place() {
        let signals = SignalRegistry::new(Registry::new()).unwrap();
        signals.publish(&signal("latency", SignalKind::Anomaly, 1.0));
        signals.publish(&signal("latency", SignalKind::Anomaly, 0.0));

        let text = encode_text(signals.registry()).unwrap();
        let lines: Vec<_> = text
            .lines()
            .filter(|l| l.starts_with("timegpt_anomaly{"))
            .collect();
        assert_eq!(lines, vec!["timegpt_anomaly{metric=\"latency\"} 0"]);
    }

    #[test]
    fn test_metrics_are_keyed_independently() {
        let signals = SignalRegistry::new(Registry::new()).unwrap();
        signals.publish_all(&[
            signal("latency", SignalKind::Forecast, 0.2),
            signal("heap_usage", SignalKind::Forecast, 1024.0),
        ]);

        assert_eq!(signals.value("latency", SignalKind::Forecast), Some(0.2));
        assert_eq!(signals.value("heap_usage", SignalKind::Forecast), Some(1024.0));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        let _first = SignalRegistry::new(registry.clone()).unwrap();
        assert!(SignalRegistry::new(registry).is_err());
    }

    #[test]
    fn test_concurrent_scrape_sees_whole_values() {
        let signals = SignalRegistry::new(Registry::new()).unwrap();
        let old = 1.25;
        let new = 98765.4321;
        signals.publish(&signal("latency", SignalKind::Forecast, old));

        let writer = {
            let signals = signals.clone();
            std::thread::spawn(move || {
                for i in 0..2000 {
                    let value = if i % 2 == 0 { new } else { old };
                    signals.publish(&signal("latency", SignalKind::Forecast, value));
                }
            })
        };

        for _ in 0..200 {
            let text = encode_text(signals.registry()).unwrap();
            let line = text
                .lines()
                .find(|l| l.starts_with("timegpt_forecast{metric=\"latency\"}"))
                .unwrap();
            let value: f64 = line.rsplit(' ').next().unwrap().parse().unwrap();
            assert!(value == old || value == new, "unexpected value {value}");
        }

        writer.join().unwrap();
    }
}
