use async_trait::async_trait;
use nodeward::container::{ContainerEngine, ContainerError, ContainerInfo, ContainerSpec, Role};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operation recorded by [`MockEngine`], in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineOp {
    Pull(String),
    EnsureNetwork(String),
    Run { name: String, role: Role },
    Stop(String),
    Kill(String),
    Remove(String),
}

/// Container runtime double that tracks containers by name and records every
/// mutating call.
#[derive(Clone, Default)]
pub struct MockEngine {
    inner: Arc<Mutex<EngineState>>,
}

#[derive(Default)]
struct EngineState {
    containers: HashMap<String, ContainerInfo>,
    images: HashSet<String>,
    ops: Vec<EngineOp>,
    next_id: u64,
    fail_pull: bool,
    start_state: Option<String>,
    ignore_stop: bool,
    unreachable: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.inner
            .lock()
            .expect("engine state")
            .images
            .insert(image.to_string());
        self
    }

    pub fn fail_pulls(&self) {
        self.inner.lock().expect("engine state").fail_pull = true;
    }

    /// State new containers report after `run` (defaults to `running`).
    pub fn start_in_state(&self, state: &str) {
        self.inner.lock().expect("engine state").start_state = Some(state.to_string());
    }

    /// Graceful stops are accepted but the container keeps running.
    pub fn ignore_graceful_stop(&self) {
        self.inner.lock().expect("engine state").ignore_stop = true;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().expect("engine state").unreachable = unreachable;
    }

    /// Places an existing container under `name`, as if left over from a previous run.
    pub fn seed_container(&self, name: &str, state: &str, role: Role) -> ContainerInfo {
        let mut inner = self.inner.lock().expect("engine state");
        inner.next_id += 1;
        let info = ContainerInfo {
            id: format!("container-{}", inner.next_id),
            name: name.to_string(),
            state: state.to_string(),
            args: role.args().iter().map(|arg| arg.to_string()).collect(),
        };
        inner.containers.insert(name.to_string(), info.clone());
        info
    }

    pub fn crash(&self, name: &str) {
        if let Some(container) = self.inner.lock().expect("engine state").containers.get_mut(name) {
            container.state = "exited".to_string();
        }
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.inner
            .lock()
            .expect("engine state")
            .containers
            .get(name)
            .cloned()
    }

    pub fn running_role(&self, name: &str) -> Option<Role> {
        self.container(name)
            .filter(|info| info.is_running())
            .map(|info| info.role())
    }

    pub fn ops(&self) -> Vec<EngineOp> {
        self.inner.lock().expect("engine state").ops.clone()
    }

    pub fn runs(&self) -> Vec<Role> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                EngineOp::Run { role, .. } => Some(role),
                _ => None,
            })
            .collect()
    }

    pub fn clear_ops(&self) {
        self.inner.lock().expect("engine state").ops.clear();
    }
}

impl EngineState {
    fn check_reachable(&self) -> Result<(), ContainerError> {
        if self.unreachable {
            return Err(ContainerError::Api {
                operation: "connect".to_string(),
                status: 503,
                message: "container runtime unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn find_mut(&mut self, name_or_id: &str) -> Option<&mut ContainerInfo> {
        self.containers
            .values_mut()
            .find(|info| info.id == name_or_id || info.name == name_or_id)
    }

    fn not_found(operation: &str, id: &str) -> ContainerError {
        ContainerError::Api {
            operation: operation.to_string(),
            status: 404,
            message: format!("no such container: {id}"),
        }
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn image_exists(&self, image: &str) -> Result<bool, ContainerError> {
        let inner = self.inner.lock().expect("engine state");
        inner.check_reachable()?;
        Ok(inner.images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().expect("engine state");
        inner.check_reachable()?;
        inner.ops.push(EngineOp::Pull(image.to_string()));
        if inner.fail_pull {
            return Err(ContainerError::Pull {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            });
        }
        inner.images.insert(image.to_string());
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().expect("engine state");
        inner.check_reachable()?;
        inner.ops.push(EngineOp::EnsureNetwork(name.to_string()));
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerInfo, ContainerError> {
        let mut inner = self.inner.lock().expect("engine state");
        inner.check_reachable()?;
        if inner.containers.contains_key(&spec.name) {
            return Err(ContainerError::Api {
                operation: "create container".to_string(),
                status: 409,
                message: format!("container name {} already in use", spec.name),
            });
        }
        inner.next_id += 1;
        let info = ContainerInfo {
            id: format!("container-{}", inner.next_id),
            name: spec.name.clone(),
            state: inner
                .start_state
                .clone()
                .unwrap_or_else(|| "running".to_string()),
            args: spec.command.clone(),
        };
        inner.ops.push(EngineOp::Run {
            name: spec.name.clone(),
            role: Role::from_args(&spec.command),
        });
        inner.containers.insert(spec.name.clone(), info.clone());
        Ok(info)
    }

    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>, ContainerError> {
        let mut inner = self.inner.lock().expect("engine state");
        inner.check_reachable()?;
        Ok(inner.find_mut(name_or_id).map(|info| info.clone()))
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().expect("engine state");
        inner.check_reachable()?;
        let ignore = inner.ignore_stop;
        let container = inner
            .find_mut(id)
            .ok_or_else(|| EngineState::not_found("stop container", id))?;
        let name = container.name.clone();
        if !ignore {
            container.state = "exited".to_string();
        }
        inner.ops.push(EngineOp::Stop(name));
        Ok(())
    }

    async fn wait(&self, id: &str, _timeout: Duration) -> Result<bool, ContainerError> {
        let mut inner = self.inner.lock().expect("engine state");
        inner.check_reachable()?;
        Ok(inner
            .find_mut(id)
            .map(|info| !info.is_running())
            .unwrap_or(true))
    }

    async fn kill(&self, id: &str) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().expect("engine state");
        inner.check_reachable()?;
        let container = inner
            .find_mut(id)
            .ok_or_else(|| EngineState::not_found("kill container", id))?;
        container.state = "exited".to_string();
        let name = container.name.clone();
        inner.ops.push(EngineOp::Kill(name));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), ContainerError> {
        let mut inner = self.inner.lock().expect("engine state");
        inner.check_reachable()?;
        let Some(container) = inner.find_mut(id).map(|info| info.clone()) else {
            return Ok(());
        };
        if container.is_running() {
            return Err(ContainerError::Api {
                operation: "remove container".to_string(),
                status: 409,
                message: "cannot remove a running container".to_string(),
            });
        }
        inner.containers.remove(&container.name);
        inner.ops.push(EngineOp::Remove(container.name));
        Ok(())
    }
}
