//! Scope registry.

use std::sync::Arc;

use agency_core::{AccessMode, AgencyError, AgencyEvent, Result, ScopeId};
use agency_events::EventBus;
use agency_settings::MemorySettings;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::access::{GrantReport, MemoryAccessController};
use crate::scope::MemoryScope;

/// Owns every [`MemoryScope`] of one orchestrator plus their shared
/// [`MemoryAccessController`].
pub struct MemoryManager {
    scopes: DashMap<ScopeId, Arc<MemoryScope>>,
    access: Arc<MemoryAccessController>,
    bus: EventBus,
    max_history: usize,
    global: Arc<MemoryScope>,
}

impl MemoryManager {
    /// Registry containing only the `global` scope.
    pub fn new(bus: EventBus, settings: &MemorySettings) -> Self {
        let access = Arc::new(MemoryAccessController::new());
        let global = Arc::new(MemoryScope::new(
            ScopeId::global(),
            Arc::clone(&access),
            bus.clone(),
            settings.max_history,
        ));
        let scopes = DashMap::new();
        let _ = scopes.insert(ScopeId::global(), Arc::clone(&global));

        Self {
            scopes,
            access,
            bus,
            max_history: settings.max_history,
            global,
        }
    }

    /// The always-present global scope.
    pub fn global(&self) -> Arc<MemoryScope> {
        Arc::clone(&self.global)
    }

    /// The grant table shared by all scopes.
    pub fn access(&self) -> &Arc<MemoryAccessController> {
        &self.access
    }

    /// Return scope `id`, creating it if needed.
    pub fn create_scope(&self, id: impl Into<ScopeId>) -> Arc<MemoryScope> {
        let id = id.into();
        let (scope, created) = match self.scopes.entry(id.clone()) {
            Entry::Occupied(e) => (Arc::clone(e.get()), false),
            Entry::Vacant(e) => {
                let scope = Arc::new(MemoryScope::new(
                    id.clone(),
                    Arc::clone(&self.access),
                    self.bus.clone(),
                    self.max_history,
                ));
                let _ = e.insert(Arc::clone(&scope));
                (scope, true)
            }
        };

        if created {
            debug!(scope_id = %id, "memory scope created");
            let _ = self.bus.emit(AgencyEvent::MemoryCreated { scope_id: id });
        }
        scope
    }

    /// Look up scope `id`.
    pub fn scope(&self, id: &ScopeId) -> Option<Arc<MemoryScope>> {
        self.scopes.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Remove scope `id` and every grant targeting it.
    ///
    /// Returns whether the scope existed. The global scope cannot be removed.
    pub fn delete_scope(&self, id: &ScopeId) -> Result<bool> {
        if id.is_global() {
            return Err(AgencyError::configuration(
                "the global memory scope cannot be deleted",
            ));
        }
        if self.scopes.remove(id).is_none() {
            return Ok(false);
        }

        let revoked = self.access.revoke_scope(id);
        debug!(scope_id = %id, revoked, "memory scope deleted");
        let _ = self.bus.emit(AgencyEvent::MemoryDeleted {
            scope_id: id.clone(),
        });
        Ok(true)
    }

    /// All scope ids, sorted.
    pub fn scope_ids(&self) -> Vec<ScopeId> {
        let mut ids: Vec<ScopeId> = self.scopes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Copy `keys` from one registered scope into another.
    ///
    /// Both scopes must exist. Publishes `memory:shared` with the keys that
    /// were actually granted.
    pub fn share<I, K>(
        &self,
        source: &ScopeId,
        target: &ScopeId,
        keys: I,
        access_mode: AccessMode,
    ) -> Result<GrantReport>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let source_scope = self
            .scope(source)
            .ok_or_else(|| AgencyError::configuration(format!("unknown memory scope '{source}'")))?;
        let target_scope = self
            .scope(target)
            .ok_or_else(|| AgencyError::configuration(format!("unknown memory scope '{target}'")))?;

        let report = self
            .access
            .grant(&source_scope, &target_scope, keys, access_mode);

        let _ = self.bus.emit(AgencyEvent::MemoryShared {
            source_scope: source.clone(),
            target_scope: target.clone(),
            keys: report.granted.clone(),
            access_mode,
        });
        if !report.skipped.is_empty() {
            info!(
                source = %source,
                target = %target,
                skipped = ?report.skipped,
                "some shared keys were absent from the source"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    fn manager() -> (MemoryManager, Arc<Mutex<Vec<(String, Value)>>>) {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["memory:created", "memory:deleted", "memory:shared"] {
            let sink = Arc::clone(&seen);
            let _ = bus.subscribe(name, move |e| {
                sink.lock().push((e.name.clone(), e.payload.clone()));
                Ok(())
            });
        }
        (MemoryManager::new(bus, &MemorySettings::default()), seen)
    }

    #[test]
    fn global_always_exists() {
        let (m, _) = manager();
        assert_eq!(m.scope_ids(), vec![ScopeId::global()]);
        assert!(m.scope(&ScopeId::global()).is_some());
    }

    #[test]
    fn create_scope_is_idempotent() {
        let (m, seen) = manager();
        let a = m.create_scope(ScopeId::from_raw("wf1"));
        a.remember("k", json!(1)).unwrap();
        let b = m.create_scope(ScopeId::from_raw("wf1"));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.recall("k"), Some(json!(1)));
        let created = seen.lock().iter().filter(|(n, _)| n == "memory:created").count();
        assert_eq!(created, 1);
    }

    #[test]
    fn global_cannot_be_deleted() {
        let (m, _) = manager();
        assert_matches!(
            m.delete_scope(&ScopeId::global()),
            Err(AgencyError::Configuration(_))
        );
    }

    #[test]
    fn delete_scope_drops_grants() {
        let (m, seen) = manager();
        let wf = ScopeId::from_raw("wf1");
        let _ = m.create_scope(wf.clone());
        m.global().remember("k", json!(1)).unwrap();
        let _ = m.share(&ScopeId::global(), &wf, ["k"], AccessMode::ReadOnly).unwrap();

        assert!(m.delete_scope(&wf).unwrap());
        assert!(!m.delete_scope(&wf).unwrap());
        assert!(m.access().grants_for(&wf).is_empty());
        assert!(m.scope(&wf).is_none());
        assert!(seen.lock().iter().any(|(n, p)| n == "memory:deleted" && p["scopeId"] == "wf1"));
    }

    #[test]
    fn share_requires_both_scopes() {
        let (m, _) = manager();
        let err = m
            .share(&ScopeId::global(), &ScopeId::from_raw("nope"), ["k"], AccessMode::ReadOnly)
            .unwrap_err();
        assert_matches!(err, AgencyError::Configuration(msg) if msg.contains("nope"));
    }

    #[test]
    fn share_publishes_granted_keys() {
        let (m, seen) = manager();
        let wf = ScopeId::from_raw("wf1");
        let _ = m.create_scope(wf.clone());
        m.global().remember("present", json!("x")).unwrap();

        let report = m
            .share(&ScopeId::global(), &wf, ["present", "absent"], AccessMode::ReadOnly)
            .unwrap();
        assert_eq!(report.skipped, vec!["absent"]);

        let seen = seen.lock();
        let (_, payload) = seen.iter().find(|(n, _)| n == "memory:shared").unwrap();
        assert_eq!(
            *payload,
            json!({
                "sourceScope": "global",
                "targetScope": "wf1",
                "keys": ["present"],
                "accessMode": "read-only"
            })
        );
    }

    #[test]
    fn history_limit_comes_from_settings() {
        let m = MemoryManager::new(EventBus::new(), &MemorySettings { max_history: 2 });
        let s = m.create_scope(ScopeId::from_raw("s"));
        for i in 0..5 {
            s.remember("k", json!(i)).unwrap();
        }
        assert_eq!(s.history().len(), 2);
    }
}
