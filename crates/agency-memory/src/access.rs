//! Cross-scope sharing and read-only enforcement.
//!
//! Sharing copies the *current* value of each key into the target scope;
//! later writes to the source are not propagated. The grant recorded for
//! `(target, key)` decides whether the target may overwrite its copy.

use agency_core::{AccessMode, ScopeId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::scope::MemoryScope;

/// One recorded share of a key into a target scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    /// Scope the value was copied from.
    pub source_scope: ScopeId,
    /// Scope holding the copy.
    pub target_scope: ScopeId,
    /// Shared key.
    pub key: String,
    /// What the target may do with the key.
    pub access_mode: AccessMode,
    /// When the copy was made.
    pub shared_at: DateTime<Utc>,
}

/// Outcome of [`MemoryAccessController::grant`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantReport {
    /// Keys copied and granted, in request order.
    pub granted: Vec<String>,
    /// Requested keys absent from the source.
    pub skipped: Vec<String>,
}

/// Table of `(target scope, key) → grant`, shared by every scope of one
/// orchestrator.
#[derive(Debug, Default)]
pub struct MemoryAccessController {
    grants: DashMap<(ScopeId, String), AccessGrant>,
}

impl MemoryAccessController {
    /// Empty grant table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `keys` from `source` into `target` and record a grant for each.
    ///
    /// A new grant for the same `(target, key)` replaces the old one and
    /// overwrites the target's copy, even if it was read-only.
    pub fn grant<I, K>(
        &self,
        source: &MemoryScope,
        target: &MemoryScope,
        keys: I,
        access_mode: AccessMode,
    ) -> GrantReport
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut report = GrantReport::default();

        for key in keys {
            let key = key.into();
            let Some(value) = source.recall(&key) else {
                debug!(source = %source.id(), key = %key, "shared key absent from source, skipping");
                report.skipped.push(key);
                continue;
            };

            let grant = AccessGrant {
                source_scope: source.id().clone(),
                target_scope: target.id().clone(),
                key: key.clone(),
                access_mode,
                shared_at: Utc::now(),
            };
            target.write_shared(key.clone(), value, || {
                let _ = self.grants.insert((target.id().clone(), key.clone()), grant);
            });
            report.granted.push(key);
        }

        info!(
            source = %source.id(),
            target = %target.id(),
            granted = report.granted.len(),
            skipped = report.skipped.len(),
            ?access_mode,
            "memory shared"
        );
        report
    }

    /// Mode recorded for `key` in `scope`, if shared.
    pub fn access_mode(&self, scope: &ScopeId, key: &str) -> Option<AccessMode> {
        self.grants
            .get(&(scope.clone(), key.to_string()))
            .map(|g| g.access_mode)
    }

    /// Whether writes to `key` in `scope` must be rejected.
    pub fn is_read_only(&self, scope: &ScopeId, key: &str) -> bool {
        self.access_mode(scope, key) == Some(AccessMode::ReadOnly)
    }

    /// Drop the grant on `key` in `scope`. The copied value stays.
    pub fn revoke(&self, scope: &ScopeId, key: &str) -> bool {
        self.grants.remove(&(scope.clone(), key.to_string())).is_some()
    }

    /// Drop every grant targeting `scope`. Returns how many were removed.
    pub fn revoke_scope(&self, scope: &ScopeId) -> usize {
        let before = self.grants.len();
        self.grants.retain(|(target, _), _| target != scope);
        before - self.grants.len()
    }

    /// Grants targeting `scope`, sorted by key.
    pub fn grants_for(&self, scope: &ScopeId) -> Vec<AccessGrant> {
        let mut grants: Vec<AccessGrant> = self
            .grants
            .iter()
            .filter(|entry| &entry.key().0 == scope)
            .map(|entry| entry.value().clone())
            .collect();
        grants.sort_by(|a, b| a.key.cmp(&b.key));
        grants
    }
}
