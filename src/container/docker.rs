use super::{ContainerEngine, ContainerError, ContainerInfo, ContainerSpec};
use crate::config::ContainerConfig;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Docker Engine HTTP API client.
#[derive(Clone, Debug)]
pub struct DockerEngine {
    client: Client,
    endpoint: String,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CreatedContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Warnings", default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct InspectedContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "State", default)]
    state: InspectedState,
    #[serde(rename = "Args", default)]
    args: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectedState {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

impl DockerEngine {
    pub fn new(config: &ContainerConfig) -> Result<Self> {
        url::Url::parse(&config.endpoint)?;
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    async fn rejected(operation: &str, response: Response) -> ContainerError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiMessage>(&body)
            .map(|parsed| parsed.message)
            .unwrap_or(body);
        ContainerError::Api {
            operation: operation.to_string(),
            status,
            message: message.trim().to_string(),
        }
    }

    /// Accepts 2xx plus any explicitly tolerated status.
    async fn expect(
        operation: &str,
        response: Response,
        tolerated: &[StatusCode],
    ) -> Result<Response, ContainerError> {
        let status = response.status();
        if status.is_success() || tolerated.contains(&status) {
            Ok(response)
        } else {
            Err(Self::rejected(operation, response).await)
        }
    }

    fn create_body(spec: &ContainerSpec) -> Value {
        let mut exposed = Map::new();
        let mut bindings = Map::new();
        for port in &spec.ports {
            let key = format!("{port}/tcp");
            exposed.insert(key.clone(), json!({}));
            bindings.insert(key, json!([{ "HostPort": port.to_string() }]));
        }
        let binds: Vec<String> = spec.volumes.iter().map(|bind| bind.render()).collect();

        json!({
            "Image": spec.image,
            "Cmd": spec.command,
            "ExposedPorts": exposed,
            "HostConfig": {
                "Binds": binds,
                "PortBindings": bindings,
                "NetworkMode": spec.network,
            },
        })
    }
}

/// The image-pull endpoint streams progress objects; failures arrive in-band.
fn pull_stream_error(body: &str) -> Option<String> {
    body.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .find_map(|event| {
            event
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        let response = self
            .client
            .get(self.url(&format!("images/{image}/json")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::expect("inspect image", response, &[]).await?;
        Ok(true)
    }

    async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
        // Pulls can take far longer than a regular API call.
        let response = self
            .client
            .post(self.url("images/create"))
            .query(&[("fromImage", image)])
            .timeout(self.request_timeout * 20)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = match Self::rejected("pull image", response).await {
                ContainerError::Api { message, .. } => message,
                other => other.to_string(),
            };
            return Err(ContainerError::Pull {
                image: image.to_string(),
                message,
            });
        }
        let body = response.text().await?;
        match pull_stream_error(&body) {
            Some(message) => Err(ContainerError::Pull {
                image: image.to_string(),
                message,
            }),
            None => Ok(()),
        }
    }

    async fn ensure_network(&self, name: &str) -> Result<(), ContainerError> {
        let response = self
            .client
            .get(self.url(&format!("networks/{name}")))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(Self::rejected("inspect network", response).await);
        }

        tracing::info!(network = name, "creating container network");
        let response = self
            .client
            .post(self.url("networks/create"))
            .json(&json!({ "Name": name, "CheckDuplicate": true }))
            .send()
            .await?;
        // A concurrent creator wins with 409; the network exists either way.
        Self::expect("create network", response, &[StatusCode::CONFLICT]).await?;
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerInfo, ContainerError> {
        let response = self
            .client
            .post(self.url("containers/create"))
            .query(&[("name", spec.name.as_str())])
            .json(&Self::create_body(spec))
            .send()
            .await?;
        let response = Self::expect("create container", response, &[]).await?;
        let created: CreatedContainer = serde_json::from_str(&response.text().await?)?;
        for warning in created.warnings.unwrap_or_default() {
            tracing::warn!(container = %spec.name, warning = %warning, "container runtime warning");
        }

        let response = self
            .client
            .post(self.url(&format!("containers/{}/start", created.id)))
            .send()
            .await?;
        Self::expect("start container", response, &[StatusCode::NOT_MODIFIED]).await?;

        Ok(ContainerInfo {
            id: created.id,
            name: spec.name.clone(),
            state: "created".to_string(),
            args: spec.command.clone(),
        })
    }

    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>, ContainerError> {
        let response = self
            .client
            .get(self.url(&format!("containers/{name_or_id}/json")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect("inspect container", response, &[]).await?;
        let inspected: InspectedContainer = serde_json::from_str(&response.text().await?)?;
        Ok(Some(ContainerInfo {
            id: inspected.id,
            name: inspected.name.trim_start_matches('/').to_string(),
            state: inspected.state.status,
            args: inspected.args,
        }))
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), ContainerError> {
        let response = self
            .client
            .post(self.url(&format!("containers/{id}/stop")))
            .query(&[("t", grace_seconds(timeout).to_string())])
            .timeout(timeout + self.request_timeout)
            .send()
            .await?;
        Self::expect("stop container", response, &[StatusCode::NOT_MODIFIED]).await?;
        Ok(())
    }

    async fn wait(&self, id: &str, timeout: Duration) -> Result<bool, ContainerError> {
        let result = self
            .client
            .post(self.url(&format!("containers/{id}/wait")))
            .timeout(timeout)
            .send()
            .await;
        match result {
            Ok(response) if response.status() == StatusCode::NOT_FOUND => Ok(true),
            Ok(response) => {
                Self::expect("wait container", response, &[]).await?;
                Ok(true)
            }
            Err(err) if err.is_timeout() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn kill(&self, id: &str) -> Result<(), ContainerError> {
        let response = self
            .client
            .post(self.url(&format!("containers/{id}/kill")))
            .send()
            .await?;
        // 409: the container is no longer running.
        Self::expect("kill container", response, &[StatusCode::CONFLICT]).await?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        let response = self
            .client
            .delete(self.url(&format!("containers/{id}")))
            .send()
            .await?;
        Self::expect("remove container", response, &[StatusCode::NOT_FOUND]).await?;
        Ok(())
    }
}

/// Docker reads `t=0` as an immediate kill, so partial seconds round up.
fn grace_seconds(timeout: Duration) -> u64 {
    let whole = timeout.as_secs();
    let partial = u64::from(timeout.subsec_nanos() > 0);
    (whole + partial).max(1)
}
