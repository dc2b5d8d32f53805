//! Coordination store façade.
//!
//! Every operation reports failure as absence (`None`, `false`, or an empty
//! list): transport errors, timeouts, non-success statuses and undecodable
//! payloads are indistinguishable from "no data" for callers.

use crate::status::NodeStatus;
use async_trait::async_trait;
use std::time::Duration;

pub mod consul;

pub use consul::ConsulClient;

/// Current holder of a session-locked key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockHolder {
    pub value: Vec<u8>,
    pub session: String,
}

impl LockHolder {
    /// The holder's published status, when the lock value is a status record.
    pub fn status(&self) -> Option<NodeStatus> {
        NodeStatus::from_json(&self.value)
    }

    pub fn holder_id(&self) -> Option<String> {
        self.status().map(|status| status.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub name: Option<String>,
    pub ttl: Option<String>,
    pub node: Option<String>,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn put(&self, key: &str, value: &[u8]) -> bool;
    async fn delete(&self, key: &str) -> bool;

    async fn create_session(&self, name: &str, lock_delay: Duration, ttl: Duration)
        -> Option<String>;
    async fn destroy_session(&self, id: &str) -> bool;
    /// True only when the store echoes back the same session id.
    async fn renew_session(&self, id: &str) -> bool;
    async fn session_info(&self, id: &str) -> Option<SessionInfo>;

    /// Compare-and-set lock acquisition using `session` as the lock token.
    async fn acquire(&self, key: &str, session: &str, value: &[u8]) -> bool;
    async fn release(&self, key: &str, session: &str) -> bool;
    /// Present only while a session holds the key.
    async fn lock_holder(&self, key: &str) -> Option<LockHolder>;

    async fn list_peers(&self) -> Vec<String>;
}

/// Renders a duration the way the store expects it (`"15s"`).
pub fn format_seconds(duration: Duration) -> String {
    format!("{}s", duration.as_secs().max(1))
}
