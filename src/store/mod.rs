use crate::core::{Snapshot, SourceHealth};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::Instant;
use tracing::debug;

struct StoreState {
    snapshot: Arc<Snapshot>,
    health: BTreeMap<String, SourceHealth>,
    last_refresh: Option<Instant>,
}

/// Last known-good snapshot plus per-source health.
///
/// Readers get an `Arc` to a complete snapshot; a commit swaps the whole snapshot under the
/// write lock, so a reader never sees a partially applied cycle.
pub struct SnapshotStore {
    state: RwLock<StoreState>,
}

impl SnapshotStore {
    pub fn new(seed: Snapshot) -> Self {
        Self {
            state: RwLock::new(StoreState {
                snapshot: Arc::new(seed),
                health: BTreeMap::new(),
                last_refresh: None,
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&state.snapshot)
    }

    /// Health of the most recent attempt per source, including attempts that did not commit.
    pub fn health(&self) -> BTreeMap<String, SourceHealth> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.health.clone()
    }

    /// When a snapshot was last committed by a refresh cycle. `None` until the first commit.
    pub fn last_refresh(&self) -> Option<Instant> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.last_refresh
    }

    /// Records a cycle's merged health and, if given, commits its snapshot, in one step.
    pub(crate) fn apply(&self, health: BTreeMap<String, SourceHealth>, snapshot: Option<Snapshot>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.health = health;
        if let Some(snapshot) = snapshot {
            debug!(rates = snapshot.rates.len(), "Snapshot PUT");
            state.snapshot = Arc::new(snapshot);
            state.last_refresh = Some(Instant::now());
        }
    }
}
