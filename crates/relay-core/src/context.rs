//! Per-user conversational context with turn-based lifespans, plus per-user locks.
//!
//! A context is a named bag of parameters that expires after a number of NLU turns.
//! Decay happens once per tier-2 turn for that user; commands do not consume turns.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub parameters: Map<String, Value>,
    /// Remaining turns; the entry is removed when this reaches 0.
    pub lifespan: u32,
    pub created_at: DateTime<Utc>,
}

/// All live contexts for one user, by name.
pub type ContextSet = HashMap<String, ContextEntry>;

/// Concurrent map user_id → contexts. Safe to share behind `Arc`.
#[derive(Debug, Default)]
pub struct ContextStore {
    inner: DashMap<String, ContextSet>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a context. A lifespan of 0 removes it instead.
    pub fn set_context(
        &self,
        user_id: &str,
        name: &str,
        parameters: Map<String, Value>,
        lifespan: u32,
    ) {
        if lifespan == 0 {
            self.clear_context(user_id, Some(name));
            return;
        }
        let entry = ContextEntry {
            parameters,
            lifespan,
            created_at: Utc::now(),
        };
        self.inner
            .entry(user_id.to_string())
            .or_default()
            .insert(name.to_string(), entry);
        tracing::debug!(target: "relay::context", user_id, name, lifespan, "context set");
    }

    pub fn get_context(&self, user_id: &str, name: &str) -> Option<ContextEntry> {
        self.inner
            .get(user_id)
            .and_then(|set| set.get(name).cloned())
    }

    /// Snapshot of all live contexts for the user (empty when none).
    pub fn contexts(&self, user_id: &str) -> ContextSet {
        self.inner
            .get(user_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn has_context(&self, user_id: &str, name: &str) -> bool {
        self.inner
            .get(user_id)
            .map(|set| set.contains_key(name))
            .unwrap_or(false)
    }

    /// Remove one named context, or all of the user's contexts when `name` is `None`.
    pub fn clear_context(&self, user_id: &str, name: Option<&str>) {
        match name {
            None => {
                self.inner.remove(user_id);
            }
            Some(name) => {
                let now_empty = match self.inner.get_mut(user_id) {
                    Some(mut set) => {
                        set.remove(name);
                        set.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.inner.remove_if(user_id, |_, set| set.is_empty());
                }
            }
        }
    }

    /// Consume one turn from every context of the user. Returns the names that expired.
    pub fn decay(&self, user_id: &str) -> Vec<String> {
        let (expired, now_empty) = match self.inner.get_mut(user_id) {
            Some(mut set) => {
                let mut expired = Vec::new();
                set.retain(|name, entry| {
                    entry.lifespan = entry.lifespan.saturating_sub(1);
                    if entry.lifespan == 0 {
                        expired.push(name.clone());
                        false
                    } else {
                        true
                    }
                });
                (expired, set.is_empty())
            }
            None => return Vec::new(),
        };
        if now_empty {
            self.inner.remove_if(user_id, |_, set| set.is_empty());
        }
        if !expired.is_empty() {
            tracing::debug!(target: "relay::context", user_id, ?expired, "contexts expired");
        }
        expired
    }

    /// Number of users with at least one live context.
    pub fn active_users(&self) -> usize {
        self.inner.len()
    }
}

/// Per-user async mutexes: one message per user is processed at a time,
/// while different users proceed concurrently. A user's entry lives only while
/// someone holds or waits for it.
#[derive(Debug, Default)]
pub struct UserLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> UserTurn<'_> {
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        UserTurn {
            guard: Some(lock.lock_owned().await),
            locks: self,
            user_id: user_id.to_string(),
        }
    }

    /// Users with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held for the duration of one user's processing cycle.
#[derive(Debug)]
pub struct UserTurn<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a UserLocks,
    user_id: String,
}

impl Drop for UserTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are taken under the shard lock, so a count of 1 means no waiter exists.
        self.locks
            .locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
