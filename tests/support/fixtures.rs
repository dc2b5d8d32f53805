use nodeward::config::{NodeConfig, SupervisorConfig};
use std::path::Path;

pub const IMAGE: &str = "parity/polkadot:latest";

const TIMINGS: &str = r#"
tick_interval: 20ms
stall_backoff: 10ms
container:
  stop_timeout: 1s
  stop_attempts: 2
  online_timeout: 50ms
  online_poll: 10ms
"#;

fn node_entry(id: &str, role: &str, base: &Path) -> String {
    format!(
        r#"
  - id: {id}
    image: {IMAGE}
    port: 30333
    role: {role}
    base_path: {}
"#,
        base.join(id).display()
    )
}

/// Single-node configuration with leader election and millisecond timings.
pub fn elected_config(id: &str, base: &Path) -> SupervisorConfig {
    let yaml = format!(
        "{TIMINGS}election:\n  enabled: true\n  validator_warmup: 10ms\nnodes:{}",
        node_entry(id, "validator", base)
    );
    SupervisorConfig::from_yaml_str(&yaml).expect("elected fixture config")
}

/// Multi-node configuration without election; each node keeps its role.
pub fn static_config(nodes: &[(&str, &str)], base: &Path) -> SupervisorConfig {
    let entries: String = nodes
        .iter()
        .map(|(id, role)| node_entry(id, role, base))
        .collect();
    let yaml = format!(
        "{TIMINGS}election:\n  enabled: false\n  validator_warmup: 10ms\nnodes:{entries}"
    );
    SupervisorConfig::from_yaml_str(&yaml).expect("static fixture config")
}

pub fn node_config(config: &SupervisorConfig, id: &str) -> NodeConfig {
    config
        .nodes
        .iter()
        .find(|node| node.id == id)
        .cloned()
        .expect("node present in fixture")
}
