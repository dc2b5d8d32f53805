use async_trait::async_trait;
use nodeward::coordination::{CoordinationStore, LockHolder, SessionInfo};
use nodeward::status::NodeStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory coordination store with Consul session-lock semantics.
///
/// Clones share state, so several supervisors can contend on one store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    kv: HashMap<String, Entry>,
    sessions: HashMap<String, SessionRecord>,
    next_session: u64,
    unavailable: bool,
}

#[derive(Clone, Default)]
struct Entry {
    value: Vec<u8>,
    session: Option<String>,
}

#[derive(Clone)]
struct SessionRecord {
    name: String,
    ttl: Duration,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable store: every call reports absence.
    pub fn set_available(&self, available: bool) {
        self.inner.lock().expect("store state").unavailable = !available;
    }

    /// TTL lapse: the session disappears and its locks are released.
    pub fn expire_session(&self, id: &str) {
        let mut state = self.inner.lock().expect("store state");
        state.drop_session(id);
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().expect("store state").sessions.len()
    }

    pub fn session_name(&self, id: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("store state")
            .sessions
            .get(id)
            .map(|record| record.name.clone())
    }

    pub fn holder_session(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("store state")
            .kv
            .get(key)
            .and_then(|entry| entry.session.clone())
    }

    pub fn status(&self, id: &str) -> Option<NodeStatus> {
        let state = self.inner.lock().expect("store state");
        state
            .kv
            .get(id)
            .and_then(|entry| NodeStatus::from_json(&entry.value))
    }

    /// Operator-style overwrite of a status record.
    pub fn write_status(&self, status: &NodeStatus) {
        let mut state = self.inner.lock().expect("store state");
        state.kv.entry(status.id.clone()).or_default().value = status.to_json();
    }
}

impl StoreState {
    fn drop_session(&mut self, id: &str) -> bool {
        let existed = self.sessions.remove(id).is_some();
        for entry in self.kv.values_mut() {
            if entry.session.as_deref() == Some(id) {
                entry.session = None;
            }
        }
        existed
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let state = self.inner.lock().expect("store state");
        if state.unavailable {
            return None;
        }
        state.kv.get(key).map(|entry| entry.value.clone())
    }

    async fn put(&self, key: &str, value: &[u8]) -> bool {
        let mut state = self.inner.lock().expect("store state");
        if state.unavailable {
            return false;
        }
        state.kv.entry(key.to_string()).or_default().value = value.to_vec();
        true
    }

    async fn delete(&self, key: &str) -> bool {
        let mut state = self.inner.lock().expect("store state");
        if state.unavailable {
            return false;
        }
        state.kv.remove(key);
        true
    }

    async fn create_session(&self, name: &str, _lock_delay: Duration, ttl: Duration) -> Option<String> {
        let mut state = self.inner.lock().expect("store state");
        if state.unavailable {
            return None;
        }
        state.next_session += 1;
        let id = format!("session-{}", state.next_session);
        state.sessions.insert(
            id.clone(),
            SessionRecord {
                name: name.to_string(),
                ttl,
            },
        );
        Some(id)
    }

    async fn destroy_session(&self, id: &str) -> bool {
        let mut state = self.inner.lock().expect("store state");
        if state.unavailable {
            return false;
        }
        state.drop_session(id);
        true
    }

    async fn renew_session(&self, id: &str) -> bool {
        let state = self.inner.lock().expect("store state");
        !state.unavailable && state.sessions.contains_key(id)
    }

    async fn session_info(&self, id: &str) -> Option<SessionInfo> {
        let state = self.inner.lock().expect("store state");
        if state.unavailable {
            return None;
        }
        state.sessions.get(id).map(|record| SessionInfo {
            id: id.to_string(),
            name: Some(record.name.clone()),
            ttl: Some(format!("{}s", record.ttl.as_secs())),
            node: None,
        })
    }

    async fn acquire(&self, key: &str, session: &str, value: &[u8]) -> bool {
        let mut state = self.inner.lock().expect("store state");
        if state.unavailable || !state.sessions.contains_key(session) {
            return false;
        }
        let entry = state.kv.entry(key.to_string()).or_default();
        match entry.session.as_deref() {
            Some(holder) if holder != session => false,
            _ => {
                entry.session = Some(session.to_string());
                entry.value = value.to_vec();
                true
            }
        }
    }

    async fn release(&self, key: &str, session: &str) -> bool {
        let mut state = self.inner.lock().expect("store state");
        if state.unavailable {
            return false;
        }
        match state.kv.get_mut(key) {
            Some(entry) if entry.session.as_deref() == Some(session) => {
                entry.session = None;
                true
            }
            _ => false,
        }
    }

    async fn lock_holder(&self, key: &str) -> Option<LockHolder> {
        let state = self.inner.lock().expect("store state");
        if state.unavailable {
            return None;
        }
        let entry = state.kv.get(key)?;
        entry.session.as_ref().map(|session| LockHolder {
            value: entry.value.clone(),
            session: session.clone(),
        })
    }

    async fn list_peers(&self) -> Vec<String> {
        Vec::new()
    }
}
