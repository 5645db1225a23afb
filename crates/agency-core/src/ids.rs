use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh, time-ordered id.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap a caller-chosen id verbatim.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

branded_id!(
    /// Identifies a job and its brief.
    JobId,
    "job"
);
branded_id!(
    /// Identifies one workflow run (and the memory scope it owns).
    WorkflowId,
    "wf"
);
branded_id!(
    /// Identifies a memory scope.
    ScopeId,
    "scope"
);
branded_id!(
    /// Identifies a registered agent or team.
    AssigneeId,
    "agent"
);

impl ScopeId {
    /// Name of the scope that always exists.
    pub const GLOBAL: &'static str = "global";

    /// The always-present global scope.
    pub fn global() -> Self {
        Self::from_raw(Self::GLOBAL)
    }

    /// Whether this is the global scope.
    pub fn is_global(&self) -> bool {
        self.0 == Self::GLOBAL
    }
}

impl From<&WorkflowId> for ScopeId {
    fn from(id: &WorkflowId) -> Self {
        Self::from_raw(id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_has_prefix() {
        let id = JobId::new();
        assert!(id.as_str().starts_with("job_"), "got: {id}");
    }

    #[test]
    fn workflow_id_has_prefix() {
        let id = WorkflowId::new();
        assert!(id.as_str().starts_with("wf_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = JobId::from_raw("research");
        assert_eq!(id.as_str(), "research");
        assert_eq!(JobId::from("research"), id);
    }

    #[test]
    fn global_scope() {
        assert!(ScopeId::global().is_global());
        assert!(!ScopeId::new().is_global());
    }

    #[test]
    fn workflow_scope_shares_the_workflow_name() {
        let wf = WorkflowId::from_raw("onboarding");
        assert_eq!(ScopeId::from(&wf).as_str(), "onboarding");
    }

    #[test]
    fn serde_is_transparent() {
        let id = JobId::from_raw("j1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"j1\"");
        let parsed: JobId = serde_json::from_str("\"j1\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<WorkflowId> = (0..50).map(|_| WorkflowId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
