use crate::config::SupervisorConfig;
use crate::container::{ContainerEngine, DockerEngine};
use crate::coordination::{ConsulClient, CoordinationStore};
use crate::error::{Context, Result};
use crate::management::{ManagementServer, ManagementState};
use crate::metrics::metrics;
use crate::node_event;
use crate::runtime::sleep_with_shutdown;
use crate::supervisor::{NodeSnapshot, NodeSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub struct SupervisorApp {
    tick_interval: Duration,
    supervisors: Vec<NodeSupervisor>,
    management: Option<ManagementServer>,
    snapshots: watch::Sender<Vec<NodeSnapshot>>,
    shutdown: CancellationToken,
}

impl SupervisorApp {
    /// Wires the Consul and Docker clients into one supervisor per configured node.
    pub async fn initialise(config: SupervisorConfig) -> Result<Self> {
        let store: Arc<dyn CoordinationStore> = Arc::new(
            ConsulClient::new(&config.coordination).context("failed to build coordination client")?,
        );
        let engine: Arc<dyn ContainerEngine> = Arc::new(
            DockerEngine::new(&config.container).context("failed to build container runtime client")?,
        );

        let peers = store.list_peers().await;
        if peers.is_empty() {
            tracing::warn!(
                address = %config.coordination.address,
                port = config.coordination.port,
                "coordination store reported no peers"
            );
        } else {
            tracing::info!(peers = ?peers, "coordination store reachable");
        }

        let supervisors = config
            .nodes
            .iter()
            .cloned()
            .map(|node| NodeSupervisor::from_config(node, &config, store.clone(), engine.clone()))
            .collect::<Result<Vec<_>>>()?;

        Self::new(&config, supervisors)
    }

    pub fn new(config: &SupervisorConfig, supervisors: Vec<NodeSupervisor>) -> Result<Self> {
        let management = match &config.management {
            Some(management) => ManagementServer::build(management)?,
            None => None,
        };
        let (snapshots, _) = watch::channel(Vec::new());

        Ok(Self {
            tick_interval: config.tick_interval,
            supervisors,
            management,
            snapshots,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<NodeSnapshot>> {
        self.snapshots.subscribe()
    }

    fn publish_snapshots(&self) {
        let snapshot = self.supervisors.iter().map(NodeSupervisor::snapshot).collect();
        self.snapshots.send_replace(snapshot);
    }

    /// Runs until SIGINT/SIGTERM or a failing tick.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let signals = tokio::spawn(watch_signals(shutdown.clone()));
        let result = self.run_until_cancelled().await;
        signals.abort();
        result
    }

    /// Drives the reconciliation loop until the shutdown token fires.
    pub async fn run_until_cancelled(mut self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let management_shutdown = CancellationToken::new();
        let management_task = self.management.take().map(|server| {
            let state = ManagementState::new(self.snapshots.subscribe());
            let token = management_shutdown.clone();
            tokio::spawn(async move { server.serve(state, token).await })
        });

        let result = self.reconcile(&shutdown).await;
        self.publish_snapshots();

        management_shutdown.cancel();
        if let Some(task) = management_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(error = %err, "management server stopped with error"),
                Err(join_err) => tracing::warn!(error = %join_err, "management server task join error"),
            }
        }

        result
    }

    async fn reconcile(&mut self, shutdown: &CancellationToken) -> Result<()> {
        for supervisor in self.supervisors.iter_mut() {
            supervisor
                .init()
                .await
                .with_context(|| format!("failed to initialise node {}", supervisor.id()))?;
        }
        self.publish_snapshots();
        tracing::info!(
            nodes = self.supervisors.len(),
            "nodeward supervisor ready; press Ctrl+C to stop"
        );

        loop {
            for supervisor in self.supervisors.iter_mut() {
                if shutdown.is_cancelled() {
                    break;
                }
                metrics().inc_ticks();
                if let Err(err) = supervisor.tick(shutdown).await {
                    metrics().inc_tick_errors();
                    node_event!(error, "tick_failed", node = supervisor.id(), error = err);
                    supervisor.fail().await;
                    return Err(crate::error::Error::with_context(
                        format!("reconciliation failed for node {}", supervisor.id()),
                        err,
                    ));
                }
            }
            self.publish_snapshots();

            if shutdown.is_cancelled() || sleep_with_shutdown(self.tick_interval, shutdown).await {
                break;
            }
        }

        tracing::info!("shutdown requested; tearing down supervised nodes");
        for supervisor in self.supervisors.iter_mut() {
            supervisor.teardown().await;
        }
        Ok(())
    }
}

async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
