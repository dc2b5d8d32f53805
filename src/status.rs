use crate::coordination::CoordinationStore;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Stop,
    Booting,
    Starting,
    Stopping,
    Running,
    Failed,
}

impl NodeState {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Stop => "stop",
            NodeState::Booting => "booting",
            NodeState::Starting => "starting",
            NodeState::Stopping => "stopping",
            NodeState::Running => "running",
            NodeState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stop" => Some(NodeState::Stop),
            "booting" => Some(NodeState::Booting),
            "starting" => Some(NodeState::Starting),
            "stopping" => Some(NodeState::Stopping),
            "running" => Some(NodeState::Running),
            "failed" => Some(NodeState::Failed),
            _ => None,
        }
    }

    /// `stop` and `failed` suppress heartbeats and leader participation
    /// until an operator rewrites the record.
    pub fn is_halted(self) -> bool {
        matches!(self, NodeState::Stop | NodeState::Failed)
    }

    fn is_valid_transition(from: NodeState, to: NodeState) -> bool {
        if from == to {
            return true;
        }
        match from {
            NodeState::Stop => matches!(to, NodeState::Booting),
            NodeState::Booting => {
                matches!(to, NodeState::Running | NodeState::Failed | NodeState::Stop)
            }
            NodeState::Starting => {
                matches!(to, NodeState::Running | NodeState::Failed | NodeState::Stop)
            }
            NodeState::Stopping => matches!(to, NodeState::Stop | NodeState::Failed),
            NodeState::Running => matches!(
                to,
                NodeState::Failed | NodeState::Stop | NodeState::Starting | NodeState::Stopping
            ),
            NodeState::Failed => matches!(to, NodeState::Stop),
        }
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("node `{node}` cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub node: String,
    pub from: NodeState,
    pub to: NodeState,
}

/// Status record published under the coordination key named after the node id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    pub status: NodeState,
    #[serde(default)]
    pub heartbeat: i64,
}

impl NodeStatus {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: NodeState::Stop,
            heartbeat: 0,
        }
    }

    pub fn transition(&mut self, next: NodeState) -> Result<NodeState, TransitionError> {
        if !NodeState::is_valid_transition(self.status, next) {
            return Err(TransitionError {
                node: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(next)
    }

    /// Bypasses the transition table. Reserved for the fail-stop marker.
    pub fn force(&mut self, next: NodeState) {
        self.status = next;
    }

    /// Sets `heartbeat` to the current epoch second.
    pub fn touch(&mut self) {
        self.heartbeat = chrono::Utc::now().timestamp();
    }

    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_json(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

pub async fn load_status(store: &dyn CoordinationStore, id: &str) -> Option<NodeStatus> {
    let bytes = store.get(id).await?;
    let status = NodeStatus::from_json(&bytes);
    if status.is_none() {
        tracing::debug!(node = id, "stored status record could not be decoded");
    }
    status
}

pub async fn save_status(store: &dyn CoordinationStore, status: &NodeStatus) -> bool {
    store.put(&status.id, &status.to_json()).await
}
