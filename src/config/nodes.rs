use super::parse_positive_duration;
use crate::container::Role;
use crate::liveness::MetricSource;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BASE_DIR: &str = "/var/lib/nodeward";

/// Immutable identity of one supervised node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: String,
    pub image: String,
    pub base_path: PathBuf,
    pub port: u16,
    pub node_key: Option<String>,
    pub boot_nodes: Vec<String>,
    pub telemetry_urls: Vec<String>,
    pub monitor_host: Option<String>,
    /// Role used when leader election is disabled.
    pub role: Role,
    pub liveness: Option<LivenessConfig>,
}

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub url: String,
    pub source: MetricSource,
    pub timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawNode {
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) image: Option<String>,
    #[serde(default)]
    pub(crate) base_path: Option<String>,
    #[serde(default)]
    pub(crate) port: Option<u16>,
    #[serde(default)]
    pub(crate) node_key: Option<String>,
    #[serde(default)]
    pub(crate) boot_nodes: Vec<String>,
    #[serde(default)]
    pub(crate) telemetry_urls: Vec<String>,
    #[serde(default)]
    pub(crate) monitor_host: Option<String>,
    #[serde(default)]
    pub(crate) role: Option<String>,
    #[serde(default)]
    pub(crate) liveness: Option<RawLiveness>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawLiveness {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    pointer: Option<String>,
    #[serde(default)]
    timeout: Option<String>,
}

pub(crate) fn parse_nodes(raw: Vec<RawNode>, errors: &mut Vec<String>) -> Vec<NodeConfig> {
    raw.into_iter()
        .enumerate()
        .map(|(index, node)| parse_node(index, node, errors))
        .collect()
}

fn parse_node(index: usize, raw: RawNode, errors: &mut Vec<String>) -> NodeConfig {
    let label = format!("nodes[{index}]");

    let id = raw.id.map(|id| id.trim().to_string()).unwrap_or_default();
    if id.is_empty() {
        errors.push(format!("{label}.id is required"));
    } else if !is_valid_container_name(&id) {
        errors.push(format!(
            "{label}.id `{id}` must start with an alphanumeric character and contain only [a-zA-Z0-9_.-]"
        ));
    }

    let image = raw.image.map(|image| image.trim().to_string()).unwrap_or_default();
    if image.is_empty() {
        errors.push(format!("{label}.image is required"));
    }

    let port = match raw.port {
        Some(0) | None => {
            errors.push(format!("{label}.port is required and must be greater than zero"));
            0
        }
        Some(port) => port,
    };

    let base_path = raw
        .base_path
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR).join(&id));
    if !base_path.is_absolute() {
        errors.push(format!(
            "{label}.base_path must be absolute (got `{}`)",
            base_path.display()
        ));
    }

    let role = match raw.role.as_deref().map(str::trim) {
        None | Some("") => Role::Validator,
        Some(value) => match Role::parse(value) {
            Some(role) => role,
            None => {
                errors.push(format!(
                    "{label}.role must be one of `validator` or `follower` (got `{value}`)"
                ));
                Role::Validator
            }
        },
    };

    let liveness = raw
        .liveness
        .and_then(|section| parse_liveness(&label, section, errors));

    NodeConfig {
        id,
        image,
        base_path,
        port,
        node_key: raw
            .node_key
            .map(|key| trim_hex(key.trim()).to_string())
            .filter(|key| !key.is_empty()),
        boot_nodes: unique_boot_nodes(
            raw.boot_nodes
                .iter()
                .map(|addr| addr.trim())
                .filter(|addr| !addr.is_empty()),
        ),
        telemetry_urls: raw
            .telemetry_urls
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect(),
        monitor_host: raw
            .monitor_host
            .map(|host| host.trim().trim_end_matches('/').to_string())
            .filter(|host| !host.is_empty()),
        role,
        liveness,
    }
}

fn parse_liveness(
    label: &str,
    raw: RawLiveness,
    errors: &mut Vec<String>,
) -> Option<LivenessConfig> {
    let url = match raw.url.map(|url| url.trim().to_string()) {
        Some(url) if url::Url::parse(&url).is_ok() => url,
        Some(url) => {
            errors.push(format!("{label}.liveness.url is not a valid URL (`{url}`)"));
            return None;
        }
        None => {
            errors.push(format!("{label}.liveness.url is required"));
            return None;
        }
    };

    let source = match raw.source.as_deref().map(str::trim).unwrap_or("prometheus") {
        "prometheus" => match raw.metric.filter(|metric| !metric.trim().is_empty()) {
            Some(metric) => MetricSource::Prometheus {
                metric: metric.trim().to_string(),
            },
            None => {
                errors.push(format!(
                    "{label}.liveness.metric is required for the prometheus source"
                ));
                return None;
            }
        },
        "json" => match raw.pointer {
            Some(pointer) if pointer.starts_with('/') => MetricSource::Json { pointer },
            Some(pointer) => {
                errors.push(format!(
                    "{label}.liveness.pointer must be a JSON pointer starting with `/` (got `{pointer}`)"
                ));
                return None;
            }
            None => {
                errors.push(format!(
                    "{label}.liveness.pointer is required for the json source"
                ));
                return None;
            }
        },
        other => {
            errors.push(format!(
                "{label}.liveness.source must be one of `prometheus` or `json` (got `{other}`)"
            ));
            return None;
        }
    };

    let timeout = parse_positive_duration(
        &format!("{label}.liveness.timeout"),
        raw.timeout,
        Duration::from_secs(5),
        errors,
    );

    Some(LivenessConfig {
        url,
        source,
        timeout,
    })
}

fn is_valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

pub fn trim_hex(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

/// Keeps the first boot node per distinct network address
/// (`/ip4/<addr>/...` keyed on `<addr>`).
pub fn unique_boot_nodes<I, S>(nodes: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    for node in nodes {
        let node = node.as_ref();
        let address = node.split('/').nth(2).unwrap_or(node);
        if seen.insert(address.to_string()) {
            unique.push(node.to_string());
        }
    }
    unique
}
