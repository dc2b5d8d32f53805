use crate::error::Result;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::OnceLock;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "nodeward";

pub fn init_tracing() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nodeward=info,info"));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stdout
        .with_max_level(tracing::Level::INFO)
        .or_else(stderr.with_min_level(tracing::Level::WARN));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(false)
        .with_ansi(false)
        .event_format(NodeLogFormat {
            service: SERVICE_NAME,
        })
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

/// Renders one `key=value` line per event with the supervision fields
/// (`event`, `node`, `role`) ahead of everything else.
struct NodeLogFormat {
    service: &'static str,
}

/// Fields promoted to fixed positions right after the header.
const LEADING_FIELDS: [&str; 3] = ["event", "node", "role"];

impl<S, N> FormatEvent<S, N> for NodeLogFormat
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let metadata = event.metadata();
        let mut fields = EventFields::default();
        event.record(&mut fields);

        let mut line = LogLine::default();
        line.push("ts", &Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        line.push("level", metadata.level().as_str());
        line.push("service", self.service);

        for key in LEADING_FIELDS {
            if let Some(value) = fields.values.remove(key) {
                line.push(key, &value);
            }
        }

        let message = fields.message.unwrap_or_else(|| metadata.name().to_string());
        line.push("msg", &message);

        for (key, value) in &fields.values {
            line.push(key, value);
        }

        if let Some(scope) = ctx.lookup_current() {
            let names: Vec<&str> = scope.scope().from_root().map(|span| span.name()).collect();
            line.push("span", &names.join("."));
        }
        line.push("target", metadata.target());

        writer.write_str(&line.0)?;
        writer.write_char('\n')
    }
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    values: BTreeMap<String, String>,
}

impl EventFields {
    fn insert(&mut self, field: &Field, value: String) {
        match field.name() {
            "" => {}
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for EventFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }
}

/// Counter kinds tracked per supervised node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeCounter {
    ElectionWon,
    ElectionLost,
    LeaseRenewFailed,
    ContainerStarted,
    ContainerStartFailed,
    ContainerStopped,
    ContainerKilled,
    LivenessStall,
    StatusPublishFailed,
}

impl NodeCounter {
    pub const ALL: [NodeCounter; 9] = [
        NodeCounter::ElectionWon,
        NodeCounter::ElectionLost,
        NodeCounter::LeaseRenewFailed,
        NodeCounter::ContainerStarted,
        NodeCounter::ContainerStartFailed,
        NodeCounter::ContainerStopped,
        NodeCounter::ContainerKilled,
        NodeCounter::LivenessStall,
        NodeCounter::StatusPublishFailed,
    ];

    pub fn metric_name(self) -> &'static str {
        match self {
            NodeCounter::ElectionWon => "nodeward_elections_won_total",
            NodeCounter::ElectionLost => "nodeward_elections_lost_total",
            NodeCounter::LeaseRenewFailed => "nodeward_lease_renew_failures_total",
            NodeCounter::ContainerStarted => "nodeward_container_starts_total",
            NodeCounter::ContainerStartFailed => "nodeward_container_start_failures_total",
            NodeCounter::ContainerStopped => "nodeward_container_stops_total",
            NodeCounter::ContainerKilled => "nodeward_container_kills_total",
            NodeCounter::LivenessStall => "nodeward_liveness_stalls_total",
            NodeCounter::StatusPublishFailed => "nodeward_status_publish_failures_total",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            NodeCounter::ElectionWon => "Elections won by this instance",
            NodeCounter::ElectionLost => "Election attempts that lost the lock",
            NodeCounter::LeaseRenewFailed => "Lease renewals rejected by the coordination store",
            NodeCounter::ContainerStarted => "Containers started",
            NodeCounter::ContainerStartFailed => "Container starts that never came online",
            NodeCounter::ContainerStopped => "Containers stopped and removed",
            NodeCounter::ContainerKilled => "Containers killed after graceful stop failed",
            NodeCounter::LivenessStall => "Ticks where block production was not observed",
            NodeCounter::StatusPublishFailed => "Status writes rejected by the coordination store",
        }
    }
}

#[derive(Default)]
pub struct RuntimeCounters {
    ticks: AtomicU64,
    tick_errors: AtomicU64,
    nodes: Mutex<BTreeMap<String, BTreeMap<NodeCounter, u64>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeCountersSnapshot {
    pub ticks: u64,
    pub tick_errors: u64,
    pub nodes: BTreeMap<String, BTreeMap<NodeCounter, u64>>,
}

impl RuntimeCountersSnapshot {
    pub fn node_counter(&self, node: &str, counter: NodeCounter) -> u64 {
        self.nodes
            .get(node)
            .and_then(|counters| counters.get(&counter))
            .copied()
            .unwrap_or(0)
    }
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn inc_ticks(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tick_errors(&self) {
        self.tick_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_node(&self, node: &str, counter: NodeCounter) {
        if let Ok(mut guard) = self.nodes.lock() {
            *guard
                .entry(node.to_string())
                .or_default()
                .entry(counter)
                .or_default() += 1;
        }
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        let nodes = self
            .nodes
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        RuntimeCountersSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_errors: self.tick_errors.load(Ordering::Relaxed),
            nodes,
        }
    }
}

#[derive(Default)]
struct LogLine(String);

impl LogLine {
    fn push(&mut self, key: &str, value: &str) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        self.0.push_str(key);
        self.0.push('=');
        if value.is_empty() || value.contains(|c: char| c.is_whitespace() || "\"=\\".contains(c)) {
            self.0.push_str(&format!("{value:?}"));
        } else {
            self.0.push_str(value);
        }
    }
}
