//! A single memory namespace.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use agency_core::{AgencyError, AgencyEvent, Result, ScopeId};
use agency_events::EventBus;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::access::MemoryAccessController;

/// Kind of mutation recorded in a scope's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// A key was written by the scope's owner.
    Remember,
    /// A key was removed.
    Forget,
    /// Every key was removed.
    Clear,
    /// A key was copied in from another scope.
    Shared,
}

/// One history record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// What happened.
    pub action: HistoryAction,
    /// Affected key; `None` for [`HistoryAction::Clear`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Value written, for writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// When it happened.
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct ScopeState {
    store: BTreeMap<String, Value>,
    history: VecDeque<HistoryEntry>,
}

/// Key/value namespace with a bounded, ordered mutation history.
///
/// All operations lock the scope for their own duration only; concurrent
/// writers to one key are last-writer-wins.
pub struct MemoryScope {
    id: ScopeId,
    state: Mutex<ScopeState>,
    access: Arc<MemoryAccessController>,
    bus: EventBus,
    max_history: usize,
}

impl std::fmt::Debug for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryScope")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl MemoryScope {
    /// Create an empty scope. Normally done through
    /// [`MemoryManager`](crate::MemoryManager).
    pub fn new(
        id: ScopeId,
        access: Arc<MemoryAccessController>,
        bus: EventBus,
        max_history: usize,
    ) -> Self {
        Self {
            id,
            state: Mutex::new(ScopeState::default()),
            access,
            bus,
            max_history: max_history.max(1),
        }
    }

    /// Scope id.
    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    /// Write or overwrite `key`.
    ///
    /// Fails with [`AgencyError::ReadOnlyKey`] if the key was shared into
    /// this scope read-only; the stored value is left untouched. The check
    /// and the write happen under the scope lock, so a concurrent grant
    /// either sees this write (and replaces it) or rejects it.
    pub fn remember(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        {
            let mut state = self.state.lock();
            if self.access.is_read_only(&self.id, &key) {
                debug!(scope_id = %self.id, key = %key, "write rejected by read-only grant");
                return Err(AgencyError::ReadOnlyKey {
                    scope: self.id.to_string(),
                    key,
                });
            }
            self.store(&mut state, key.clone(), value, HistoryAction::Remember);
        }
        self.updated(key);
        Ok(())
    }

    /// Current value of `key`, if any.
    pub fn recall(&self, key: &str) -> Option<Value> {
        self.state.lock().store.get(key).cloned()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().store.contains_key(key)
    }

    /// Remove `key`. Returns whether it was present.
    ///
    /// Read-only keys cannot be forgotten either.
    pub fn forget(&self, key: &str) -> Result<bool> {
        let removed = {
            let mut state = self.state.lock();
            if self.access.is_read_only(&self.id, key) {
                return Err(AgencyError::ReadOnlyKey {
                    scope: self.id.to_string(),
                    key: key.to_string(),
                });
            }
            let removed = state.store.remove(key).is_some();
            if removed {
                self.push_history(&mut state, HistoryAction::Forget, Some(key.to_string()), None);
            }
            removed
        };

        if removed {
            let _ = self.bus.emit(AgencyEvent::MemoryUpdated {
                scope_id: self.id.clone(),
                key: key.to_string(),
                removed: true,
            });
        }
        Ok(removed)
    }

    /// Remove every key and record a clear in history.
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.store.clear();
            self.push_history(&mut state, HistoryAction::Clear, None, None);
        }
        let _ = self.bus.emit(AgencyEvent::MemoryCleared {
            scope_id: self.id.clone(),
        });
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().store.keys().cloned().collect()
    }

    /// Copy of the store as a JSON object.
    pub fn snapshot(&self) -> Value {
        let state = self.state.lock();
        Value::Object(
            state
                .store
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.state.lock().store.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().store.is_empty()
    }

    /// History, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().history.iter().cloned().collect()
    }

    // Grant copies skip the read-only check: replacing a shared snapshot is
    // the controller's job. `record` runs under the scope lock so the grant
    // and the copy land together.
    pub(crate) fn write_shared(&self, key: String, value: Value, record: impl FnOnce()) {
        {
            let mut state = self.state.lock();
            record();
            self.store(&mut state, key.clone(), value, HistoryAction::Shared);
        }
        self.updated(key);
    }

    fn store(&self, state: &mut ScopeState, key: String, value: Value, action: HistoryAction) {
        let _ = state.store.insert(key.clone(), value.clone());
        self.push_history(state, action, Some(key), Some(value));
    }

    fn updated(&self, key: String) {
        let _ = self.bus.emit(AgencyEvent::MemoryUpdated {
            scope_id: self.id.clone(),
            key,
            removed: false,
        });
    }

    fn push_history(
        &self,
        state: &mut ScopeState,
        action: HistoryAction,
        key: Option<String>,
        value: Option<Value>,
    ) {
        state.history.push_back(HistoryEntry {
            action,
            key,
            value,
            at: Utc::now(),
        });
        while state.history.len() > self.max_history {
            let _ = state.history.pop_front();
        }
    }
}
