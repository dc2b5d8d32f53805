//! Container runtime seam and the per-node container supervisor.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub mod docker;
pub mod supervisor;

pub use docker::DockerEngine;
pub use supervisor::{node_command, ContainerSupervisor};

const VALIDATOR_FLAG: &str = "--validator";

/// Shape a node container is launched in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Validator,
    Follower,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Validator => "validator",
            Role::Follower => "follower",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "validator" => Some(Role::Validator),
            "follower" => Some(Role::Follower),
            _ => None,
        }
    }

    /// Role-specific trailing arguments of the node command line.
    pub fn args(self) -> &'static [&'static str] {
        match self {
            Role::Validator => &[VALIDATOR_FLAG],
            Role::Follower => &["--rpc-external", "--ws-external"],
        }
    }

    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        if args.iter().any(|arg| arg.as_ref() == VALIDATOR_FLAG) {
            Role::Validator
        } else {
            Role::Follower
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container runtime request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("container runtime rejected {operation} with status {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },
    #[error("failed to pull image `{image}`: {message}")]
    Pull { image: String, message: String },
    #[error("malformed container runtime response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeBind {
    pub host: PathBuf,
    pub container: PathBuf,
    pub read_only: bool,
}

impl VolumeBind {
    pub fn render(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host.display(),
            self.container.display(),
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

/// Everything the runtime needs to create and start one detached container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub network: String,
    pub volumes: Vec<VolumeBind>,
    /// TCP ports published on the same host port.
    pub ports: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: String,
    pub args: Vec<String>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    pub fn role(&self) -> Role {
        Role::from_args(&self.args)
    }
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError>;
    async fn pull_image(&self, image: &str) -> Result<(), ContainerError>;
    async fn ensure_network(&self, name: &str) -> Result<(), ContainerError>;
    /// Creates and starts the container described by `spec`.
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerInfo, ContainerError>;
    /// `Ok(None)` when no container matches `name_or_id`.
    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>, ContainerError>;
    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), ContainerError>;
    /// Whether the container exited within `timeout`.
    async fn wait(&self, id: &str, timeout: Duration) -> Result<bool, ContainerError>;
    async fn kill(&self, id: &str) -> Result<(), ContainerError>;
    async fn remove(&self, id: &str) -> Result<(), ContainerError>;
}
