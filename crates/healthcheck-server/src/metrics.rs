//! Prometheus metrics for health check sweeps.

use healthcheck_engine::Report;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Labels for sweep metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SweepLabels {
    /// Aggregate status (healthy, degraded, unhealthy)
    pub status: String,
}

/// Labels for per-probe outcome metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    /// Registration name
    pub probe: String,
    /// Outcome status (healthy, degraded, unhealthy)
    pub status: String,
}

/// Labels for per-probe duration metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProbeLabels {
    /// Registration name
    pub probe: String,
}

/// Metrics registry with all sweep and probe metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    /// Sweeps run, by aggregate status
    sweeps_total: Family<SweepLabels, Counter>,
    /// Wall time of whole sweeps
    sweep_duration_seconds: Histogram,
    /// Outcomes, by probe and status
    outcomes_total: Family<OutcomeLabels, Counter>,
    /// Wall time of single probe executions
    probe_duration_seconds: Family<ProbeLabels, Histogram>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let sweeps_total = Family::<SweepLabels, Counter>::default();
        registry.register(
            "healthcheck_sweeps",
            "Total health check sweeps by aggregate status",
            sweeps_total.clone(),
        );

        // Exponential buckets from 1ms to ~16s
        let sweep_duration_seconds = Histogram::new(exponential_buckets(0.001, 2.0, 15));
        registry.register(
            "healthcheck_sweep_duration_seconds",
            "Health check sweep duration in seconds",
            sweep_duration_seconds.clone(),
        );

        let outcomes_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "healthcheck_outcomes",
            "Probe outcomes by probe and status",
            outcomes_total.clone(),
        );

        let probe_duration_seconds = Family::<ProbeLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "healthcheck_probe_duration_seconds",
            "Probe execution duration in seconds",
            probe_duration_seconds.clone(),
        );

        Self {
            registry,
            sweeps_total,
            sweep_duration_seconds,
            outcomes_total,
            probe_duration_seconds,
        }
    }

    /// Record every outcome of a finished sweep
    pub fn record_report(&self, report: &Report) {
        self.sweeps_total
            .get_or_create(&SweepLabels {
                status: report.status().as_str().to_string(),
            })
            .inc();
        self.sweep_duration_seconds
            .observe(report.total_duration().as_secs_f64());

        for (name, outcome) in report.iter() {
            self.outcomes_total
                .get_or_create(&OutcomeLabels {
                    probe: name.to_string(),
                    status: outcome.status.as_str().to_string(),
                })
                .inc();
            self.probe_duration_seconds
                .get_or_create(&ProbeLabels {
                    probe: name.to_string(),
                })
                .observe(outcome.duration.as_secs_f64());
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_empty_report_counts_healthy_sweep() {
        let metrics = MetricsRegistry::new();
        metrics.record_report(&Report::default());
        metrics.record_report(&Report::default());

        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry).unwrap();
        assert!(buffer.contains("healthcheck_sweeps_total{status=\"healthy\"} 2"));
        assert!(buffer.contains("healthcheck_sweep_duration_seconds_count 2"));
        assert!(!buffer.contains("healthcheck_outcomes_total{"));
    }

    #[test]
    fn test_metric_names_registered() {
        let metrics = MetricsRegistry::new();
        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry).unwrap();
        assert!(buffer.contains("# TYPE healthcheck_sweeps counter"));
        assert!(buffer.contains("# TYPE healthcheck_probe_duration_seconds histogram"));
    }
}
