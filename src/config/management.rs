use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ManagementConfig {
    pub host: String,
    pub port: u16,
    pub live: Option<ManagementEndpointConfig>,
    pub status: Option<ManagementEndpointConfig>,
    pub metrics: Option<ManagementEndpointConfig>,
}

#[derive(Debug, Clone)]
pub struct ManagementEndpointConfig {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawManagementSection {
    #[serde(default)]
    pub(crate) host: Option<String>,
    #[serde(default)]
    pub(crate) port: Option<u16>,
    #[serde(default)]
    pub(crate) live: Option<RawManagementEndpoint>,
    #[serde(default)]
    pub(crate) status: Option<RawManagementEndpoint>,
    #[serde(default)]
    pub(crate) metrics: Option<RawManagementEndpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawManagementEndpoint {
    #[serde(default)]
    pub(crate) path: Option<String>,
}

pub(crate) fn resolve_management(
    section: RawManagementSection,
    errors: &mut Vec<String>,
) -> Option<ManagementConfig> {
    let port = match section.port {
        Some(port) => port,
        None => {
            errors.push("management section requires `port` when present".to_string());
            return None;
        }
    };

    let host = section
        .host
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "0.0.0.0".to_string());

    // An empty section exposes every endpoint on its default path.
    let expose_all = section.live.is_none() && section.status.is_none() && section.metrics.is_none();
    let endpoint = |raw: Option<RawManagementEndpoint>, default: &str| {
        match raw {
            Some(endpoint) => Some(ManagementEndpointConfig {
                path: normalise_endpoint_path(endpoint.path, default),
            }),
            None if expose_all => Some(ManagementEndpointConfig {
                path: default.to_string(),
            }),
            None => None,
        }
    };

    Some(ManagementConfig {
        host,
        port,
        live: endpoint(section.live, "/live"),
        status: endpoint(section.status, "/status"),
        metrics: endpoint(section.metrics, "/metrics"),
    })
}

fn normalise_endpoint_path(path: Option<String>, default: &str) -> String {
    let mut resolved = path
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string());

    if !resolved.starts_with('/') {
        resolved.insert(0, '/');
    }

    resolved
}
