//! Lease-based leader election over a session-locked coordination key.
//!
//! At most one session holds the lock key at a time; that holder runs the
//! validator. A lease that is neither renewed nor released expires after the
//! session TTL, and the store then frees the key for the next contender.

use crate::config::{CoordinationConfig, ElectionConfig};
use crate::coordination::{CoordinationStore, LockHolder};
use crate::metrics::metrics;
use crate::node_event;
use crate::status::NodeStatus;
use crate::telemetry::NodeCounter;
use std::time::Duration;

/// Session held by this process after a successful acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    pub session: String,
    pub ttl: Duration,
}

#[derive(Debug)]
pub struct LeaderElection {
    node_id: String,
    lock_key: String,
    session_name: String,
    lock_delay: Duration,
    ttl: Duration,
    lease: Option<Lease>,
}

impl LeaderElection {
    pub fn new(node_id: &str, coordination: &CoordinationConfig, election: &ElectionConfig) -> Self {
        Self {
            node_id: node_id.to_string(),
            lock_key: coordination.lock_key.clone(),
            session_name: format!("nodeward_{node_id}"),
            lock_delay: coordination.lock_delay,
            ttl: election.session_ttl(),
            lease: None,
        }
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Opens a fresh session and tries to take the lock with `status` as value.
    /// A lease still remembered from an earlier term is destroyed first.
    pub async fn elect(&mut self, store: &dyn CoordinationStore, status: &NodeStatus) -> bool {
        if let Some(stale) = self.lease.take() {
            node_event!(info, "stale_lease_dropped", node = self.node_id, session = stale.session);
            store.destroy_session(&stale.session).await;
        }

        let Some(session) = store
            .create_session(&self.session_name, self.lock_delay, self.ttl)
            .await
        else {
            node_event!(warn, "election_session_unavailable", node = self.node_id);
            return false;
        };

        if store
            .acquire(&self.lock_key, &session, &status.to_json())
            .await
        {
            node_event!(info, "election_won", node = self.node_id, session = session);
            metrics().record(&self.node_id, NodeCounter::ElectionWon);
            self.lease = Some(Lease {
                session,
                ttl: self.ttl,
            });
            true
        } else {
            node_event!(info, "election_lost", node = self.node_id, session = session);
            metrics().record(&self.node_id, NodeCounter::ElectionLost);
            store.destroy_session(&session).await;
            false
        }
    }

    pub async fn leader(&self, store: &dyn CoordinationStore) -> Option<LockHolder> {
        store.lock_holder(&self.lock_key).await
    }

    pub async fn is_leader(&self, store: &dyn CoordinationStore, id: &str) -> bool {
        self.leader(store)
            .await
            .and_then(|holder| holder.holder_id())
            .is_some_and(|holder| holder == id)
    }

    /// Renews the held lease. A failed renewal keeps the lease for the next attempt.
    pub async fn renew(&mut self, store: &dyn CoordinationStore) -> bool {
        let Some(lease) = &self.lease else {
            return false;
        };
        if store.renew_session(&lease.session).await {
            return true;
        }

        node_event!(warn, "lease_renew_failed", node = self.node_id, session = lease.session);
        metrics().record(&self.node_id, NodeCounter::LeaseRenewFailed);
        if let Some(info) = store.session_info(&lease.session).await {
            tracing::debug!(
                node = %self.node_id,
                session = %info.id,
                ttl = info.ttl.as_deref().unwrap_or("unknown"),
                "lease still registered"
            );
        }
        false
    }

    /// Destroys the held session, freeing the lock. No-op without a lease.
    pub async fn release(&mut self, store: &dyn CoordinationStore) -> bool {
        let Some(lease) = self.lease.take() else {
            return false;
        };
        let destroyed = store.destroy_session(&lease.session).await;
        if destroyed {
            node_event!(info, "leadership_released", node = self.node_id, session = lease.session);
        } else {
            node_event!(warn, "leadership_release_failed", node = self.node_id, session = lease.session);
        }
        destroyed
    }

    /// Drops the lease locally; the store reclaims the session once its TTL lapses.
    pub fn forget(&mut self) -> Option<Lease> {
        self.lease.take()
    }
}
