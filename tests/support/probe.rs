use async_trait::async_trait;
use nodeward::liveness::ProgressProbe;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Progress probe replaying scripted observations.
///
/// Once the script runs out it either keeps advancing the counter (a healthy
/// validator) or repeats the last value (a stalled one).
#[derive(Clone)]
pub struct ScriptedProbe {
    inner: Arc<Mutex<ProbeState>>,
}

struct ProbeState {
    script: VecDeque<Option<u64>>,
    last: u64,
    advance: bool,
    calls: usize,
}

impl ScriptedProbe {
    pub fn new<I>(script: I) -> Self
    where
        I: IntoIterator<Item = Option<u64>>,
    {
        Self {
            inner: Arc::new(Mutex::new(ProbeState {
                script: script.into_iter().collect(),
                last: 0,
                advance: false,
                calls: 0,
            })),
        }
    }

    /// Counter that grows by one on every observation.
    pub fn advancing() -> Self {
        let probe = Self::new(Vec::new());
        probe.inner.lock().expect("probe state").advance = true;
        probe
    }

    /// Freezes the counter at its current value.
    pub fn stall(&self) {
        self.inner.lock().expect("probe state").advance = false;
    }

    pub fn calls(&self) -> usize {
        self.inner.lock().expect("probe state").calls
    }

    pub fn boxed(&self) -> Box<dyn ProgressProbe> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl ProgressProbe for ScriptedProbe {
    async fn observe(&self) -> Option<u64> {
        let mut state = self.inner.lock().expect("probe state");
        state.calls += 1;
        if let Some(next) = state.script.pop_front() {
            if let Some(value) = next {
                state.last = value;
            }
            return next;
        }
        if state.advance {
            state.last += 1;
        }
        Some(state.last)
    }
}
