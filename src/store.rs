use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::flow::FlowState;

pub type SessionId = Uuid;

#[derive(Debug, Clone)]
struct SessionEntry {
    state: FlowState,
    last_touched: DateTime<Utc>,
}

/// Explicitly owned, time-bounded home for session states. The transport
/// layer reads a state, applies a transition, and writes the result back;
/// it also decides when to sweep idle sessions. Nothing here is a
/// process-wide singleton.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, creating a fresh `Idle` session on first interaction.
    pub fn state(&self, id: SessionId, now: DateTime<Utc>) -> FlowState {
        let mut sessions = self.sessions.write();
        let entry = sessions.entry(id).or_insert_with(|| SessionEntry {
            state: FlowState::Idle,
            last_touched: now,
        });
        entry.last_touched = now;
        entry.state.clone()
    }

    /// Replaces the session's state wholesale with a transition result.
    pub fn upsert(&self, id: SessionId, state: FlowState, now: DateTime<Utc>) {
        self.sessions.write().insert(
            id,
            SessionEntry {
                state,
                last_touched: now,
            },
        );
    }

    /// Discards a session entirely (explicit reset or account removal).
    pub fn remove(&self, id: SessionId) -> Option<FlowState> {
        self.sessions.write().remove(&id).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drops sessions idle for longer than `ttl`. Returns how many were
    /// evicted. A session mid-generation is still evictable: the lock lives
    /// in the discarded state and the remote call's result is simply dropped.
    pub fn evict_idle(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| {
            now.signed_duration_since(entry.last_touched)
                .to_std()
                .unwrap_or_default()
                < ttl
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "🧹 idle sessions evicted");
        }
        evicted
    }
}
