//! Per-node reconciliation: status refresh, leadership, container role and
//! liveness, heartbeat.

use crate::config::{NodeConfig, SupervisorConfig};
use crate::container::{ContainerEngine, ContainerSupervisor, Role};
use crate::coordination::CoordinationStore;
use crate::election::LeaderElection;
use crate::error::{Context, Result};
use crate::liveness::{HttpProgressProbe, LivenessMonitor, ProgressProbe};
use crate::metrics::metrics;
use crate::node_event;
use crate::runtime::sleep_with_shutdown;
use crate::status::{load_status, save_status, NodeState, NodeStatus};
use crate::telemetry::NodeCounter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a supervisor decides which role its container runs in.
#[derive(Debug)]
pub enum SupervisorMode {
    /// Validator while holding the election lock, follower otherwise.
    Elected(LeaderElection),
    /// Fixed role, no election.
    Static(Role),
}

#[derive(Clone, Debug)]
pub struct Timings {
    pub stall_backoff: Duration,
    pub validator_warmup: Duration,
    pub stop_timeout: Duration,
    pub online_timeout: Duration,
    pub online_poll: Duration,
}

impl Timings {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            stall_backoff: config.stall_backoff,
            validator_warmup: config.election.validator_warmup,
            stop_timeout: config.container.stop_timeout,
            online_timeout: config.container.online_timeout,
            online_poll: config.container.online_poll,
        }
    }
}

/// Point-in-time view of one supervised node, published to the management server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub status: NodeState,
    pub heartbeat: i64,
    pub leader: bool,
    pub role: Option<Role>,
    pub running: bool,
}

/// Whether the tick ends with a heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Heartbeat,
    Skip,
}

pub struct NodeSupervisor {
    store: Arc<dyn CoordinationStore>,
    containers: ContainerSupervisor,
    liveness: Option<LivenessMonitor>,
    mode: SupervisorMode,
    timings: Timings,
    status: NodeStatus,
    leader: bool,
    observed_role: Option<Role>,
    warmup_until: Option<Instant>,
}

impl NodeSupervisor {
    pub fn new(
        node: NodeConfig,
        config: &SupervisorConfig,
        store: Arc<dyn CoordinationStore>,
        engine: Arc<dyn ContainerEngine>,
        probe: Option<Box<dyn ProgressProbe>>,
    ) -> Self {
        let mode = if config.election.enabled {
            SupervisorMode::Elected(LeaderElection::new(
                &node.id,
                &config.coordination,
                &config.election,
            ))
        } else {
            SupervisorMode::Static(node.role)
        };

        Self {
            store,
            status: NodeStatus::new(node.id.clone()),
            containers: ContainerSupervisor::new(engine, node, config.container.clone()),
            liveness: probe.map(LivenessMonitor::new),
            mode,
            timings: Timings::from_config(config),
            leader: false,
            observed_role: None,
            warmup_until: None,
        }
    }

    /// Builds the supervisor with an HTTP liveness probe when one is configured.
    pub fn from_config(
        node: NodeConfig,
        config: &SupervisorConfig,
        store: Arc<dyn CoordinationStore>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Result<Self> {
        let probe = match &node.liveness {
            Some(liveness) => {
                let probe = HttpProgressProbe::new(liveness)
                    .with_context(|| format!("invalid liveness probe for node {}", node.id))?;
                Some(Box::new(probe) as Box<dyn ProgressProbe>)
            }
            None => {
                node_event!(
                    warn,
                    "liveness_disabled",
                    node = node.id,
                    reason = "no liveness source configured"
                );
                None
            }
        };
        Ok(Self::new(node, config, store, engine, probe))
    }

    pub fn id(&self) -> &str {
        &self.containers.node().id
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id().to_string(),
            status: self.status.status,
            heartbeat: self.status.heartbeat,
            leader: self.leader,
            role: self.observed_role,
            running: self.observed_role.is_some(),
        }
    }

    /// Publishes `booting` then `running`. Refuses to start while the stored
    /// record shows another live instance with the same id.
    pub async fn init(&mut self) -> Result<()> {
        let id = self.id().to_string();
        if let Some(stored) = load_status(self.store.as_ref(), &id).await {
            crate::ensure_err!(
                stored.status.is_halted(),
                "node `{id}` is already reported as {}; refusing to start a second instance",
                stored.status
            );
        }

        let base_path = self.containers.node().base_path.clone();
        tokio::fs::create_dir_all(&base_path)
            .await
            .with_context(|| format!("failed to create base path {}", base_path.display()))?;

        self.status = NodeStatus::new(id.clone());
        self.status.transition(NodeState::Booting)?;
        self.status.touch();
        crate::ensure_err!(
            save_status(self.store.as_ref(), &self.status).await,
            "failed to publish initial status for node `{id}`"
        );

        self.status.transition(NodeState::Running)?;
        crate::ensure_err!(
            save_status(self.store.as_ref(), &self.status).await,
            "failed to publish running status for node `{id}`"
        );
        node_event!(info, "node_initialised", node = id, status = self.status.status);
        Ok(())
    }

    /// One reconciliation pass.
    pub async fn tick(&mut self, shutdown: &CancellationToken) -> Result<()> {
        self.refresh().await;

        if self.status.status.is_halted() {
            return self.halt().await;
        }

        let static_role = match &self.mode {
            SupervisorMode::Static(role) => Some(*role),
            SupervisorMode::Elected(_) => None,
        };
        let flow = match static_role {
            Some(role) => self.reconcile_static(role, shutdown).await?,
            None => self.reconcile_elected(shutdown).await?,
        };

        if flow == Flow::Heartbeat && !shutdown.is_cancelled() {
            self.heartbeat().await;
        }
        Ok(())
    }

    async fn refresh(&mut self) {
        let id = self.id().to_string();
        match load_status(self.store.as_ref(), &id).await {
            Some(stored) if stored.id == id => self.status = stored,
            Some(stored) => {
                node_event!(warn, "status_id_mismatch", node = id, stored = stored.id);
            }
            None => {}
        }
    }

    /// Halted nodes run nothing and hold no leadership.
    async fn halt(&mut self) -> Result<()> {
        if self.containers.is_running().await? {
            node_event!(
                info,
                "halted_node_stopping_container",
                node = self.id(),
                status = self.status.status
            );
            self.containers.stop(self.timings.stop_timeout, false).await?;
        }
        self.observed_role = None;

        let id = self.id().to_string();
        if let SupervisorMode::Elected(election) = &mut self.mode {
            if election.is_leader(self.store.as_ref(), &id).await {
                election.release(self.store.as_ref()).await;
            }
        }
        self.leader = false;
        Ok(())
    }

    async fn reconcile_elected(&mut self, shutdown: &CancellationToken) -> Result<Flow> {
        let id = self.id().to_string();
        let SupervisorMode::Elected(election) = &mut self.mode else {
            return Ok(Flow::Heartbeat);
        };

        let Some(holder) = election.leader(self.store.as_ref()).await else {
            if self.status.status == NodeState::Running {
                election.elect(self.store.as_ref(), &self.status).await;
            }
            return Ok(Flow::Heartbeat);
        };

        self.leader = holder.holder_id().as_deref() == Some(id.as_str());
        if self.leader {
            return self.lead(shutdown).await;
        }

        if let Some(stale) = election.forget() {
            node_event!(info, "stale_lease_forgotten", node = id, session = stale.session);
        }
        self.ensure_role(Role::Follower, shutdown).await
    }

    async fn lead(&mut self, shutdown: &CancellationToken) -> Result<Flow> {
        match self.containers.running_role().await? {
            Some(Role::Validator) => {
                self.observed_role = Some(Role::Validator);
                if self.check_liveness().await {
                    return Ok(Flow::Heartbeat);
                }
                self.stop_container().await?;
                self.release_leadership().await;
                sleep_with_shutdown(self.timings.stall_backoff, shutdown).await;
                Ok(Flow::Skip)
            }
            Some(Role::Follower) => {
                node_event!(info, "promoting_to_validator", node = self.id());
                self.stop_container().await?;
                self.start_role(Role::Validator, shutdown).await
            }
            None => self.start_role(Role::Validator, shutdown).await,
        }
    }

    async fn reconcile_static(&mut self, role: Role, shutdown: &CancellationToken) -> Result<Flow> {
        match self.containers.running_role().await? {
            Some(current) if current == role => {
                self.observed_role = Some(current);
                if role == Role::Validator && !self.warming_up() && !self.check_liveness().await {
                    self.stop_container().await?;
                    sleep_with_shutdown(self.timings.stall_backoff, shutdown).await;
                    return Ok(Flow::Skip);
                }
                Ok(Flow::Heartbeat)
            }
            Some(_) => {
                self.stop_container().await?;
                self.start_role(role, shutdown).await
            }
            None => self.start_role(role, shutdown).await,
        }
    }

    /// Stop-before-start role enforcement without liveness checks.
    async fn ensure_role(&mut self, role: Role, shutdown: &CancellationToken) -> Result<Flow> {
        match self.containers.running_role().await? {
            Some(current) if current == role => {
                self.observed_role = Some(current);
                Ok(Flow::Heartbeat)
            }
            Some(current) => {
                node_event!(info, "switching_role", node = self.id(), from = current, to = role);
                self.stop_container().await?;
                self.start_role(role, shutdown).await
            }
            None => self.start_role(role, shutdown).await,
        }
    }

    async fn start_role(&mut self, role: Role, shutdown: &CancellationToken) -> Result<Flow> {
        let online = match self.containers.start(role).await {
            Ok(()) => {
                self.containers
                    .wait_online(self.timings.online_timeout, self.timings.online_poll)
                    .await
            }
            Err(err) => {
                node_event!(error, "container_start_failed", node = self.id(), role = role, error = err);
                false
            }
        };

        if !online {
            metrics().record(self.id(), NodeCounter::ContainerStartFailed);
            node_event!(error, "container_not_online", node = self.id(), role = role);
            if let Err(err) = self.containers.stop(self.timings.stop_timeout, true).await {
                node_event!(warn, "forced_stop_failed", node = self.id(), error = err);
            }
            self.observed_role = None;
            self.mark_failed().await;
            self.release_leadership().await;
            return Ok(Flow::Skip);
        }

        self.observed_role = Some(role);
        if role == Role::Validator {
            if matches!(self.mode, SupervisorMode::Elected(_)) {
                node_event!(
                    info,
                    "validator_warmup",
                    node = self.id(),
                    seconds = self.timings.validator_warmup.as_secs()
                );
                if sleep_with_shutdown(self.timings.validator_warmup, shutdown).await {
                    return Ok(Flow::Skip);
                }
            } else {
                self.warmup_until = Some(Instant::now() + self.timings.validator_warmup);
            }
        }
        Ok(Flow::Heartbeat)
    }

    fn warming_up(&mut self) -> bool {
        match self.warmup_until {
            Some(deadline) if Instant::now() < deadline => true,
            Some(_) => {
                self.warmup_until = None;
                false
            }
            None => false,
        }
    }

    /// Missing liveness source counts as alive.
    async fn check_liveness(&mut self) -> bool {
        let Some(monitor) = self.liveness.as_mut() else {
            return true;
        };
        if monitor.check().await {
            return true;
        }
        let last = monitor.last();
        node_event!(warn, "liveness_stall", node = self.id(), last_height = last);
        metrics().record(self.id(), NodeCounter::LivenessStall);
        false
    }

    async fn stop_container(&mut self) -> Result<()> {
        self.containers
            .stop(self.timings.stop_timeout, false)
            .await
            .with_context(|| format!("failed to stop container for node {}", self.id()))?;
        self.observed_role = None;
        Ok(())
    }

    async fn release_leadership(&mut self) {
        if let SupervisorMode::Elected(election) = &mut self.mode {
            election.release(self.store.as_ref()).await;
        }
        self.leader = false;
    }

    async fn heartbeat(&mut self) {
        self.status.touch();
        if let SupervisorMode::Elected(election) = &mut self.mode {
            if election.lease().is_some() {
                election.renew(self.store.as_ref()).await;
            }
        }
        self.publish().await;
    }

    async fn publish(&self) -> bool {
        let published = save_status(self.store.as_ref(), &self.status).await;
        if !published {
            node_event!(warn, "status_publish_failed", node = self.id(), status = self.status.status);
            metrics().record(self.id(), NodeCounter::StatusPublishFailed);
        }
        published
    }

    async fn mark_failed(&mut self) {
        if let Err(err) = self.status.transition(NodeState::Failed) {
            node_event!(warn, "status_transition_rejected", node = self.id(), error = err);
            return;
        }
        node_event!(error, "node_failed", node = self.id());
        self.publish().await;
    }

    /// Best-effort `failed` marker after an error escaped a tick. Written
    /// from any state, including an operator `stop`.
    pub async fn fail(&mut self) {
        self.status.force(NodeState::Failed);
        node_event!(error, "node_failed", node = self.id());
        self.publish().await;
        self.release_leadership().await;
    }

    /// Shutdown path: publish `stop`, stop the container, release leadership.
    pub async fn teardown(&mut self) {
        match self.status.transition(NodeState::Stop) {
            Ok(_) => {
                self.publish().await;
            }
            Err(err) => {
                node_event!(warn, "status_transition_rejected", node = self.id(), error = err);
            }
        }

        if let Err(err) = self.containers.stop(self.timings.stop_timeout, false).await {
            node_event!(warn, "teardown_stop_failed", node = self.id(), error = err);
        }
        self.observed_role = None;
        self.release_leadership().await;
        node_event!(info, "node_torn_down", node = self.id());
    }
}
