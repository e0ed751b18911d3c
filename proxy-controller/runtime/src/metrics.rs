use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct Metrics {
    pub(crate) cycles: Counter,
    pub(crate) changes: Counter,
    pub(crate) version: Gauge,
    pushes: Family<PushLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PushLabels {
    outcome: &'static str,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let cycles = Counter::default();
        reg.register(
            "generation_cycles",
            "Total number of Caddyfile generation cycles",
            cycles.clone(),
        );

        let changes = Counter::default();
        reg.register(
            "config_changes",
            "Total number of generated configuration changes",
            changes.clone(),
        );

        let version = Gauge::default();
        reg.register(
            "config_version",
            "The version of the current configuration",
            version.clone(),
        );

        let pushes = Family::<PushLabels, Counter>::default();
        reg.register(
            "pushes",
            "Total number of configuration pushes to controlled servers by outcome",
            pushes.clone(),
        );

        Self {
            cycles,
            changes,
            version,
            pushes,
        }
    }

    pub(crate) fn push_ok(&self) {
        self.push("ok");
    }

    pub(crate) fn push_skipped(&self) {
        self.push("skipped");
    }

    pub(crate) fn push_failed(&self) {
        self.push("failed");
    }

    fn push(&self, outcome: &'static str) {
        self.pushes.get_or_create(&PushLabels { outcome }).inc();
    }

    #[cfg(test)]
    pub(crate) fn pushes(&self, outcome: &'static str) -> u64 {
        self.pushes.get_or_create(&PushLabels { outcome }).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_metrics() {
        let mut registry = Registry::with_prefix("caddy_proxy_controller");
        let metrics = Metrics::register(&mut registry);
        metrics.cycles.inc();
        metrics.version.set(3);
        metrics.push_ok();
        metrics.push_failed();
        metrics.push_failed();

        let mut text = String::new();
        prometheus_client::encoding::text::encode(&mut text, &registry).unwrap();
        assert!(text.contains("caddy_proxy_controller_generation_cycles_total 1"));
        assert!(text.contains("caddy_proxy_controller_config_version 3"));
        assert!(text.contains("caddy_proxy_controller_pushes_total{outcome=\"failed\"} 2"));
        assert_eq!(metrics.pushes("ok"), 1);
        assert_eq!(metrics.pushes("skipped"), 0);
    }
}
