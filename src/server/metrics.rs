//! Controller metrics exposed on /metrics
//!
//! Reconciliation counters by kind and outcome, reconcile duration, and a
//! per-rollout canary weight gauge so dashboards can watch a rollout move.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Cheaply clonable handle to the metrics registry
#[derive(Clone)]
pub struct SharedMetrics {
    inner: Arc<Metrics>,
}

struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_duration: HistogramVec,
    traffic_weight: IntGaugeVec,
}

/// Build and register the controller metrics
pub fn create_metrics() -> anyhow::Result<SharedMetrics> {
    let registry = Registry::new();

    let reconciliations = IntCounterVec::new(
        Opts::new(
            "virta_reconciliations_total",
            "Reconciliations by resource kind and outcome",
        ),
        &["kind", "outcome"],
    )?;
    registry.register(Box::new(reconciliations.clone()))?;

    let reconcile_duration = HistogramVec::new(
        HistogramOpts::new(
            "virta_reconcile_duration_seconds",
            "Reconcile duration by resource kind",
        ),
        &["kind"],
    )?;
    registry.register(Box::new(reconcile_duration.clone()))?;

    let traffic_weight = IntGaugeVec::new(
        Opts::new(
            "virta_canary_weight",
            "Current canary traffic weight per rollout",
        ),
        &["namespace", "rollout"],
    )?;
    registry.register(Box::new(traffic_weight.clone()))?;

    Ok(SharedMetrics {
        inner: Arc::new(Metrics {
            registry,
            reconciliations,
            reconcile_duration,
            traffic_weight,
        }),
    })
}

impl SharedMetrics {
    pub fn record_reconciliation_success(&self, kind: &str, duration_secs: f64) {
        self.inner
            .reconciliations
            .with_label_values(&[kind, "success"])
            .inc();
        self.inner
            .reconcile_duration
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn record_reconciliation_error(&self, kind: &str, duration_secs: f64) {
        self.inner
            .reconciliations
            .with_label_values(&[kind, "error"])
            .inc();
        self.inner
            .reconcile_duration
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn set_traffic_weight(&self, namespace: &str, rollout: &str, weight: i64) {
        self.inner
            .traffic_weight
            .with_label_values(&[namespace, rollout])
            .set(weight);
    }

    /// Render the registry in Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.inner.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_encoded_output() {
        let metrics = create_metrics().unwrap();
        metrics.record_reconciliation_success("rollout", 0.05);
        metrics.record_reconciliation_error("analysisrun", 0.01);
        metrics.set_traffic_weight("default", "my-app", 30);

        let body = metrics.encode().unwrap();
        assert!(body.contains("virta_reconciliations_total"));
        assert!(body.contains("virta_canary_weight"));
        assert!(body.contains("my-app"));
    }
}
