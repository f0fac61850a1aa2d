//! A thin wrapper around a [`prometheus::Registry`] shared by every
//! component of the gateway.
//!
//! Each component registers its own counters/gauges into the registry handed
//! to it at construction time; nothing here decides what gets measured.

use std::sync::Arc;

use prometheus::core::{AtomicI64, AtomicU64, GenericCounterVec, GenericGaugeVec};
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

/// Cloneable handle to the process-wide metrics registry.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<Registry>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        MetricsRegistry {
            inner: Arc::new(Registry::new()),
        }
    }

    /// Registers and returns an `IntCounterVec`, panicking on duplicate
    /// registration (a programming error, not a runtime condition).
    pub fn register_counter_vec(
        &self,
        name: &str,
        help: &str,
        var_labels: &[&str],
    ) -> GenericCounterVec<AtomicU64> {
        let counter = IntCounterVec::new(Opts::new(name, help), var_labels)
            .expect("metric options are valid");
        self.inner
            .register(Box::new(counter.clone()))
            .expect("metric is not already registered");
        counter
    }

    /// Registers and returns an `IntGaugeVec`, panicking on duplicate
    /// registration.
    pub fn register_gauge_vec(
        &self,
        name: &str,
        help: &str,
        var_labels: &[&str],
    ) -> GenericGaugeVec<AtomicI64> {
        let gauge =
            IntGaugeVec::new(Opts::new(name, help), var_labels).expect("metric options are valid");
        self.inner
            .register(Box::new(gauge.clone()))
            .expect("metric is not already registered");
        gauge
    }

    /// The underlying registry, for wiring into an HTTP `/metrics` exporter.
    pub fn registry(&self) -> &Registry {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_increment() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter_vec("ndg_test_total", "test counter", &["kind"]);
        counter.with_label_values(&["a"]).inc();
        let families = registry.registry().gather();
        assert!(families.iter().any(|f| f.get_name() == "ndg_test_total"));
    }
}
