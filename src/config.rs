mod management;
mod nodes;

use config::{Config, Environment, File, FileFormat};
use humantime::parse_duration;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

pub use management::{ManagementConfig, ManagementEndpointConfig};
pub use nodes::{trim_hex, unique_boot_nodes, LivenessConfig, NodeConfig};

const DEFAULT_CONFIG_PATH: &str = "config/nodeward";
const ENV_PREFIX: &str = "NODEWARD";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub tick_interval: Duration,
    pub stall_backoff: Duration,
    pub coordination: CoordinationConfig,
    pub election: ElectionConfig,
    pub container: ContainerConfig,
    pub nodes: Vec<NodeConfig>,
    pub management: Option<ManagementConfig>,
}

#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    pub address: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub lock_key: String,
    pub lock_delay: Duration,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8500,
            request_timeout: Duration::from_secs(5),
            lock_key: "nodeward/leader".to_string(),
            lock_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub enabled: bool,
    pub validator_warmup: Duration,
    pub grace: Duration,
}

impl ElectionConfig {
    /// Session TTL covering the validator warm-up plus container start latency.
    pub fn session_ttl(&self) -> Duration {
        self.validator_warmup + self.grace
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            validator_warmup: Duration::from_secs(120),
            grace: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub endpoint: String,
    pub network: String,
    pub request_timeout: Duration,
    pub stop_timeout: Duration,
    pub stop_attempts: u32,
    pub online_timeout: Duration,
    pub online_poll: Duration,
    pub rpc_port: u16,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:2375".to_string(),
            network: "substrate-ops".to_string(),
            request_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(30),
            stop_attempts: 3,
            online_timeout: Duration::from_secs(30),
            online_poll: Duration::from_secs(1),
            rpc_port: 9944,
        }
    }
}

/// Environment overrides inherited from earlier deployments of the supervisor.
/// They always apply to the first configured node.
#[derive(Debug, Clone, Default)]
pub struct LegacyOverrides {
    pub consul_address: Option<String>,
    pub node_name: Option<String>,
    pub monitor_host: Option<String>,
    pub node_port: Option<String>,
    pub node_key: Option<String>,
}

impl LegacyOverrides {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            consul_address: read("CONSUL_ADDRESS"),
            node_name: read("CLIENT_NODE_NAME"),
            monitor_host: read("MONITOR_HOST"),
            node_port: read("CLIENT_NODE_PORT"),
            node_key: read("CLIENT_NODE_KEY"),
        }
    }

    fn apply(self, raw: &mut RawConfig, errors: &mut Vec<String>) {
        if let Some(address) = self.consul_address {
            raw.coordination
                .get_or_insert_with(RawCoordinationSection::default)
                .address = Some(address);
        }

        let touches_node = self.node_name.is_some()
            || self.monitor_host.is_some()
            || self.node_port.is_some()
            || self.node_key.is_some();
        if !touches_node {
            return;
        }

        if raw.nodes.is_empty() {
            raw.nodes.push(nodes::RawNode::default());
        }
        let node = &mut raw.nodes[0];
        if let Some(name) = self.node_name {
            node.id = Some(name);
        }
        if let Some(host) = self.monitor_host {
            node.monitor_host = Some(host);
        }
        if let Some(port) = self.node_port {
            match port.trim().parse::<u16>() {
                Ok(port) => node.port = Some(port),
                Err(_) => errors.push(format!(
                    "CLIENT_NODE_PORT must be a port number (got `{port}`)"
                )),
            }
        }
        if let Some(key) = self.node_key {
            node.node_key = Some(key);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawConfig {
    #[serde(default)]
    tick_interval: Option<String>,
    #[serde(default)]
    stall_backoff: Option<String>,
    #[serde(default)]
    coordination: Option<RawCoordinationSection>,
    #[serde(default)]
    election: Option<RawElectionSection>,
    #[serde(default)]
    container: Option<RawContainerSection>,
    #[serde(default)]
    nodes: Vec<nodes::RawNode>,
    #[serde(default)]
    management: Option<management::RawManagementSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawCoordinationSection {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    request_timeout: Option<String>,
    #[serde(default)]
    lock_key: Option<String>,
    #[serde(default)]
    lock_delay: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawElectionSection {
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    validator_warmup: Option<String>,
    #[serde(default)]
    grace: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawContainerSection {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    request_timeout: Option<String>,
    #[serde(default)]
    stop_timeout: Option<String>,
    #[serde(default)]
    stop_attempts: Option<u32>,
    #[serde(default)]
    online_timeout: Option<String>,
    #[serde(default)]
    online_poll: Option<String>,
    #[serde(default)]
    rpc_port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error(transparent)]
    Invalid(ValidationError),
}

#[derive(Debug, Error)]
#[error("configuration validation failed:\n{rendered}")]
pub struct ValidationError {
    messages: Vec<String>,
    rendered: String,
}

impl ValidationError {
    pub fn new(messages: Vec<String>) -> Self {
        let rendered = messages
            .iter()
            .map(|msg| format!("- {msg}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self { messages, rendered }
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl SupervisorConfig {
    /// Loads the configuration file (optional when `path` is `None`), layers
    /// `NODEWARD__*` environment variables on top and applies the legacy
    /// per-node overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let raw: RawConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Self::from_raw(raw, LegacyOverrides::from_env())
    }

    /// Loads a single file without environment layering, as `validate` does.
    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = Config::builder()
            .add_source(File::with_name(path).required(true))
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw, LegacyOverrides::default())
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_str_with(contents, FileFormat::Yaml, LegacyOverrides::default())
    }

    pub fn from_str_with(
        contents: &str,
        format: FileFormat,
        legacy: LegacyOverrides,
    ) -> Result<Self, ConfigError> {
        let raw: RawConfig = Config::builder()
            .add_source(File::from_str(contents, format))
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw, legacy)
    }

    fn from_raw(mut raw: RawConfig, legacy: LegacyOverrides) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();
        legacy.apply(&mut raw, &mut errors);

        let RawConfig {
            tick_interval,
            stall_backoff,
            coordination,
            election,
            container,
            nodes: raw_nodes,
            management: raw_management,
        } = raw;

        let tick_interval = parse_positive_duration(
            "tick_interval",
            tick_interval,
            Duration::from_secs(3),
            &mut errors,
        );
        let stall_backoff = parse_duration_field(
            "stall_backoff",
            stall_backoff,
            Duration::from_secs(5),
            &mut errors,
        );
        let coordination = parse_coordination(coordination, &mut errors);
        let election = parse_election(election, &mut errors);
        let container = parse_container(container, &mut errors);
        let nodes = nodes::parse_nodes(raw_nodes, &mut errors);
        let management =
            raw_management.and_then(|section| management::resolve_management(section, &mut errors));

        validate_topology(&election, &coordination, &nodes, &mut errors);

        if errors.is_empty() {
            Ok(Self {
                tick_interval,
                stall_backoff,
                coordination,
                election,
                container,
                nodes,
                management,
            })
        } else {
            Err(ConfigError::Invalid(ValidationError::new(errors)))
        }
    }
}

fn parse_coordination(
    raw: Option<RawCoordinationSection>,
    errors: &mut Vec<String>,
) -> CoordinationConfig {
    let raw = raw.unwrap_or_default();
    let defaults = CoordinationConfig::default();

    let address = match raw.address {
        Some(value) if value.trim().is_empty() => {
            errors.push("coordination.address must not be empty".to_string());
            defaults.address.clone()
        }
        Some(value) => value.trim().to_string(),
        None => defaults.address.clone(),
    };

    let port = match raw.port {
        Some(0) => {
            errors.push("coordination.port must be greater than zero".to_string());
            defaults.port
        }
        Some(port) => port,
        None => defaults.port,
    };

    CoordinationConfig {
        address,
        port,
        request_timeout: parse_positive_duration(
            "coordination.request_timeout",
            raw.request_timeout,
            defaults.request_timeout,
            errors,
        ),
        lock_key: raw
            .lock_key
            .map(|key| key.trim().trim_start_matches('/').to_string())
            .unwrap_or(defaults.lock_key),
        lock_delay: parse_duration_field(
            "coordination.lock_delay",
            raw.lock_delay,
            defaults.lock_delay,
            errors,
        ),
    }
}

fn parse_election(raw: Option<RawElectionSection>, errors: &mut Vec<String>) -> ElectionConfig {
    let raw = raw.unwrap_or_default();
    let defaults = ElectionConfig::default();

    ElectionConfig {
        enabled: raw.enabled.unwrap_or(defaults.enabled),
        validator_warmup: parse_duration_field(
            "election.validator_warmup",
            raw.validator_warmup,
            defaults.validator_warmup,
            errors,
        ),
        grace: parse_duration_field("election.grace", raw.grace, defaults.grace, errors),
    }
}

fn parse_container(raw: Option<RawContainerSection>, errors: &mut Vec<String>) -> ContainerConfig {
    let raw = raw.unwrap_or_default();
    let defaults = ContainerConfig::default();

    let endpoint = raw
        .endpoint
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .unwrap_or(defaults.endpoint);
    if url::Url::parse(&endpoint).is_err() {
        errors.push(format!(
            "container.endpoint must be an absolute URL (got `{endpoint}`)"
        ));
    }

    let network = raw.network.unwrap_or(defaults.network);
    if network.trim().is_empty() {
        errors.push("container.network must not be empty".to_string());
    }

    let stop_attempts = match raw.stop_attempts {
        Some(0) => {
            errors.push("container.stop_attempts must be at least 1".to_string());
            defaults.stop_attempts
        }
        Some(value) => value,
        None => defaults.stop_attempts,
    };

    let online_timeout = parse_positive_duration(
        "container.online_timeout",
        raw.online_timeout,
        defaults.online_timeout,
        errors,
    );
    let online_poll = parse_positive_duration(
        "container.online_poll",
        raw.online_poll,
        defaults.online_poll,
        errors,
    );
    if online_poll > online_timeout {
        errors.push("container.online_poll must not exceed container.online_timeout".to_string());
    }

    ContainerConfig {
        endpoint,
        network,
        request_timeout: parse_positive_duration(
            "container.request_timeout",
            raw.request_timeout,
            defaults.request_timeout,
            errors,
        ),
        stop_timeout: parse_positive_duration(
            "container.stop_timeout",
            raw.stop_timeout,
            defaults.stop_timeout,
            errors,
        ),
        stop_attempts,
        online_timeout,
        online_poll,
        rpc_port: raw.rpc_port.unwrap_or(defaults.rpc_port),
    }
}

fn validate_topology(
    election: &ElectionConfig,
    coordination: &CoordinationConfig,
    nodes: &[NodeConfig],
    errors: &mut Vec<String>,
) {
    if nodes.is_empty() {
        errors.push("at least one entry in `nodes` is required".to_string());
        return;
    }

    let mut seen = BTreeSet::new();
    for node in nodes {
        if !node.id.is_empty() && !seen.insert(node.id.as_str()) {
            errors.push(format!("node id `{}` is defined more than once", node.id));
        }
    }

    if election.enabled {
        if nodes.len() != 1 {
            errors.push(format!(
                "leader election supervises exactly one node (got {}); set election.enabled = false for multi-node mode",
                nodes.len()
            ));
        }
        if coordination.lock_key.is_empty() {
            errors.push("coordination.lock_key must not be empty when election is enabled".to_string());
        }
    }
}

pub(crate) fn parse_duration_field(
    label: &str,
    raw: Option<String>,
    default: Duration,
    errors: &mut Vec<String>,
) -> Duration {
    match raw {
        None => default,
        Some(value) => match parse_duration(value.trim()) {
            Ok(duration) => duration,
            Err(err) => {
                errors.push(format!("{label} is not a valid duration (`{value}`): {err}"));
                default
            }
        },
    }
}

pub(crate) fn parse_positive_duration(
    label: &str,
    raw: Option<String>,
    default: Duration,
    errors: &mut Vec<String>,
) -> Duration {
    let duration = parse_duration_field(label, raw, default, errors);
    if duration.is_zero() {
        errors.push(format!("{label} must be greater than zero"));
        default
    } else {
        duration
    }
}
