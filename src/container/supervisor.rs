use super::{ContainerEngine, ContainerInfo, ContainerSpec, Role, VolumeBind};
use crate::config::{ContainerConfig, NodeConfig};
use crate::error::{Context, Result};
use crate::metrics::metrics;
use crate::node_event;
use crate::telemetry::NodeCounter;
use std::sync::Arc;
use std::time::Duration;

/// Owns the single container of one node identity.
pub struct ContainerSupervisor {
    engine: Arc<dyn ContainerEngine>,
    node: NodeConfig,
    settings: ContainerConfig,
    handle: Option<ContainerInfo>,
}

/// Builds the node command line for `role`.
pub fn node_command(node: &NodeConfig, role: Role) -> Vec<String> {
    let mut command = vec![
        "--base-path".to_string(),
        node.base_path.display().to_string(),
        "--port".to_string(),
        node.port.to_string(),
        "--name".to_string(),
        node.id.clone(),
        "--rpc-cors=all".to_string(),
    ];

    if let Some(host) = &node.monitor_host {
        command.push("--telemetry-url".to_string());
        command.push(format!("ws://{host}/socket/{}", node.id));
    }
    for url in &node.telemetry_urls {
        command.push("--telemetry-url".to_string());
        command.push(url.clone());
    }

    if !node.boot_nodes.is_empty() {
        command.push("--bootnodes".to_string());
        command.extend(node.boot_nodes.iter().cloned());
    }

    if let Some(key) = &node.node_key {
        command.push("--node-key".to_string());
        command.push(key.clone());
    }

    command.extend(role.args().iter().map(|arg| arg.to_string()));
    command
}

impl ContainerSupervisor {
    pub fn new(engine: Arc<dyn ContainerEngine>, node: NodeConfig, settings: ContainerConfig) -> Self {
        Self {
            engine,
            node,
            settings,
            handle: None,
        }
    }

    pub fn node(&self) -> &NodeConfig {
        &self.node
    }

    pub fn handle(&self) -> Option<&ContainerInfo> {
        self.handle.as_ref()
    }

    pub fn spec(&self, role: Role) -> ContainerSpec {
        let mut ports = vec![self.node.port];
        if self.settings.rpc_port != self.node.port {
            ports.push(self.settings.rpc_port);
        }
        ContainerSpec {
            name: self.node.id.clone(),
            image: self.node.image.clone(),
            command: node_command(&self.node, role),
            network: self.settings.network.clone(),
            volumes: vec![VolumeBind {
                host: self.node.base_path.clone(),
                container: self.node.base_path.clone(),
                read_only: false,
            }],
            ports,
        }
    }

    /// Reloads the cached handle, falling back to a lookup by container name.
    async fn resolve(&mut self) -> Result<Option<ContainerInfo>> {
        if let Some(cached_id) = self.handle.as_ref().map(|cached| cached.id.clone()) {
            if let Some(info) = self.engine.inspect(&cached_id).await? {
                self.handle = Some(info.clone());
                return Ok(Some(info));
            }
        }
        let found = self.engine.inspect(&self.node.id).await?;
        self.handle = found.clone();
        Ok(found)
    }

    pub async fn ensure_image(&self) -> Result<()> {
        let image = &self.node.image;
        if self.engine.image_exists(image).await? {
            return Ok(());
        }
        node_event!(info, "image_pull", node = self.node.id, image = image);
        self.engine
            .pull_image(image)
            .await
            .with_context(|| format!("failed to pull image {image}"))
    }

    pub async fn start(&mut self, role: Role) -> Result<()> {
        if self.resolve().await?.is_some() {
            self.stop(self.settings.stop_timeout, false).await?;
        }

        self.ensure_image().await?;
        self.engine.ensure_network(&self.settings.network).await?;

        let spec = self.spec(role);
        let info = self
            .engine
            .run(&spec)
            .await
            .with_context(|| format!("failed to start container {}", spec.name))?;
        node_event!(
            info,
            "container_started",
            node = self.node.id,
            role = role,
            container = info.id
        );
        metrics().record(&self.node.id, NodeCounter::ContainerStarted);
        self.handle = Some(info);
        Ok(())
    }

    /// Stops and removes the container. Returns whether one existed.
    pub async fn stop(&mut self, timeout: Duration, force: bool) -> Result<bool> {
        let Some(info) = self.resolve().await? else {
            return Ok(false);
        };

        if info.is_running() {
            if force {
                self.kill(&info.id).await?;
            } else {
                self.engine.stop(&info.id, timeout).await?;
                if !self.wait_exit(&info.id, timeout).await? {
                    node_event!(warn, "container_stop_timeout", node = self.node.id, container = info.id);
                    self.kill(&info.id).await?;
                }
            }
        }

        if !self.wait_exit(&info.id, timeout).await? {
            node_event!(warn, "container_exit_unconfirmed", node = self.node.id, container = info.id);
        }
        self.engine.remove(&info.id).await?;
        self.handle = None;

        node_event!(info, "container_removed", node = self.node.id, container = info.id);
        metrics().record(&self.node.id, NodeCounter::ContainerStopped);
        Ok(true)
    }

    async fn kill(&self, id: &str) -> Result<()> {
        node_event!(warn, "container_kill", node = self.node.id, container = id);
        self.engine.kill(id).await?;
        metrics().record(&self.node.id, NodeCounter::ContainerKilled);
        Ok(())
    }

    async fn wait_exit(&self, id: &str, timeout: Duration) -> Result<bool> {
        for _ in 0..self.settings.stop_attempts.max(1) {
            if self.engine.wait(id, timeout).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn is_running(&mut self) -> Result<bool> {
        Ok(self
            .resolve()
            .await?
            .map(|info| info.is_running())
            .unwrap_or(false))
    }

    /// Role of the running container, `None` when nothing runs.
    pub async fn running_role(&mut self) -> Result<Option<Role>> {
        Ok(self
            .resolve()
            .await?
            .filter(ContainerInfo::is_running)
            .map(|info| info.role()))
    }

    /// Polls at most `timeout / poll` times for the container to report `running`.
    pub async fn wait_online(&mut self, timeout: Duration, poll: Duration) -> bool {
        let attempts = if poll.is_zero() {
            1
        } else {
            (timeout.as_nanos() / poll.as_nanos()).max(1)
        };

        for attempt in 0..attempts {
            match self.is_running().await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => {
                    node_event!(debug, "container_probe_failed", node = self.node.id, error = err);
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(poll).await;
            }
        }
        false
    }
}
