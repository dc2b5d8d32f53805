use crate::telemetry::{runtime_counters, RuntimeCounters};
use std::sync::OnceLock;

pub use crate::telemetry::{NodeCounter, RuntimeCountersSnapshot};

/// Collector that wraps the runtime counter APIs with a single entrypoint.
pub struct MetricsCollector {
    counters: &'static RuntimeCounters,
}

impl MetricsCollector {
    fn new() -> Self {
        Self {
            counters: runtime_counters(),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn inc_ticks(&self) {
        self.counters.inc_ticks();
    }

    pub fn inc_tick_errors(&self) {
        self.counters.inc_tick_errors();
    }

    pub fn record(&self, node: &str, counter: NodeCounter) {
        self.counters.inc_node(node, counter);
    }

    pub fn render_prometheus(&self) -> String {
        render_snapshot(&self.snapshot())
    }
}

/// Returns the shared `MetricsCollector` instance.
pub fn metrics() -> &'static MetricsCollector {
    MetricsCollector::global()
}

pub fn render_snapshot(snapshot: &RuntimeCountersSnapshot) -> String {
    let mut output = String::new();

    output.push_str("# HELP nodeward_ticks_total Reconciliation ticks completed\n");
    output.push_str("# TYPE nodeward_ticks_total counter\n");
    output.push_str(&format!("nodeward_ticks_total {}\n", snapshot.ticks));

    output.push_str("# HELP nodeward_tick_errors_total Ticks aborted by an unexpected error\n");
    output.push_str("# TYPE nodeward_tick_errors_total counter\n");
    output.push_str(&format!(
        "nodeward_tick_errors_total {}\n",
        snapshot.tick_errors
    ));

    for counter in NodeCounter::ALL {
        let name = counter.metric_name();
        output.push_str(&format!("# HELP {} {}\n", name, counter.help()));
        output.push_str(&format!("# TYPE {} counter\n", name));
        for (node, values) in &snapshot.nodes {
            let value = values.get(&counter).copied().unwrap_or(0);
            output.push_str(&format!("{}{{node=\"{}\"}} {}\n", name, node, value));
        }
    }

    output
}
