use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AssigneeId, JobId, ScopeId, WorkflowId};
use crate::runnable::AssigneeType;

/// Event names published by the orchestrator. The catalogue is additive:
/// names and payload fields are never removed.
pub mod names {
    pub const JOB_ASSIGNED: &str = "job:assigned";
    pub const JOB_STARTED: &str = "job:started";
    pub const JOB_COMPLETED: &str = "job:completed";
    pub const JOB_FAILED: &str = "job:failed";
    pub const JOB_RETRYING: &str = "job:retrying";
    pub const JOB_CLEANED: &str = "job:cleaned";
    pub const WORKFLOW_STARTED: &str = "workflow:started";
    pub const WORKFLOW_STEP: &str = "workflow:step";
    pub const WORKFLOW_STEP_SKIPPED: &str = "workflow:stepSkipped";
    pub const WORKFLOW_COMPLETED: &str = "workflow:completed";
    pub const WORKFLOW_FAILED: &str = "workflow:failed";
    pub const WORKFLOW_CLEANED: &str = "workflow:cleaned";
    pub const MEMORY_SHARED: &str = "memory:shared";
    pub const MEMORY_CREATED: &str = "memory:created";
    pub const MEMORY_DELETED: &str = "memory:deleted";
    pub const MEMORY_UPDATED: &str = "memory:updated";
    pub const MEMORY_CLEARED: &str = "memory:cleared";
    pub const BRIEF_CREATED: &str = "brief:created";
    pub const JOB_CONTEXT_CREATED: &str = "jobContext:created";
    pub const JOB_CONTEXT_UPDATED: &str = "jobContext:updated";
    pub const PLANNER_PLANNED: &str = "planner:planned";
    pub const PLANNER_REPLANNED: &str = "planner:replanned";
}

/// A transient, named notification delivered synchronously to listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Catalogue name, e.g. `job:completed`.
    pub name: String,
    /// Event-specific fields.
    pub payload: Value,
}

impl Event {
    /// Build an event from a name and payload.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Access mode attached to a shared memory key.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    /// Target scope may read but not overwrite the key.
    ReadOnly,
    /// Target scope may read and overwrite the key.
    ReadWrite,
}

/// Typed form of every event in the catalogue.
///
/// Serializes to the payload object only (field names in camelCase); the
/// name comes from [`AgencyEvent::name`].
#[derive(Clone, Debug, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
#[allow(missing_docs)]
pub enum AgencyEvent {
    JobAssigned {
        job_id: JobId,
        assignee_id: AssigneeId,
        assignee_type: AssigneeType,
    },
    JobStarted {
        job_id: JobId,
    },
    JobCompleted {
        job_id: JobId,
        results: Value,
    },
    JobFailed {
        job_id: JobId,
        error: String,
    },
    JobRetrying {
        job_id: JobId,
        retry_count: u32,
        max_retries: u32,
    },
    JobCleaned {
        job_id: JobId,
        keep_results: bool,
    },
    WorkflowStarted {
        workflow_id: WorkflowId,
        steps: usize,
    },
    WorkflowStep {
        workflow_id: WorkflowId,
        step_index: usize,
        job_id: Option<JobId>,
        job_ids: Vec<JobId>,
        step_type: &'static str,
    },
    WorkflowStepSkipped {
        workflow_id: WorkflowId,
        step_index: usize,
        job_id: JobId,
        reason: String,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        results: Value,
    },
    WorkflowFailed {
        workflow_id: WorkflowId,
        error: String,
        step: usize,
    },
    WorkflowCleaned {
        workflow_id: WorkflowId,
        keep_results: bool,
    },
    MemoryShared {
        source_scope: ScopeId,
        target_scope: ScopeId,
        keys: Vec<String>,
        access_mode: AccessMode,
    },
    MemoryCreated {
        scope_id: ScopeId,
    },
    MemoryDeleted {
        scope_id: ScopeId,
    },
    MemoryUpdated {
        scope_id: ScopeId,
        key: String,
        removed: bool,
    },
    MemoryCleared {
        scope_id: ScopeId,
    },
    BriefCreated {
        job_id: JobId,
        brief: Value,
    },
    JobContextCreated {
        job_id: JobId,
        context: Value,
    },
    JobContextUpdated {
        job_id: JobId,
        context: Value,
        results: Value,
    },
    PlannerPlanned {
        agent_id: AssigneeId,
        goal: String,
        job_ids: Vec<JobId>,
        source: &'static str,
    },
    PlannerReplanned {
        original_job_id: JobId,
        job_ids: Vec<JobId>,
    },
}

impl AgencyEvent {
    /// Catalogue name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobAssigned { .. } => names::JOB_ASSIGNED,
            Self::JobStarted { .. } => names::JOB_STARTED,
            Self::JobCompleted { .. } => names::JOB_COMPLETED,
            Self::JobFailed { .. } => names::JOB_FAILED,
            Self::JobRetrying { .. } => names::JOB_RETRYING,
            Self::JobCleaned { .. } => names::JOB_CLEANED,
            Self::WorkflowStarted { .. } => names::WORKFLOW_STARTED,
            Self::WorkflowStep { .. } => names::WORKFLOW_STEP,
            Self::WorkflowStepSkipped { .. } => names::WORKFLOW_STEP_SKIPPED,
            Self::WorkflowCompleted { .. } => names::WORKFLOW_COMPLETED,
            Self::WorkflowFailed { .. } => names::WORKFLOW_FAILED,
            Self::WorkflowCleaned { .. } => names::WORKFLOW_CLEANED,
            Self::MemoryShared { .. } => names::MEMORY_SHARED,
            Self::MemoryCreated { .. } => names::MEMORY_CREATED,
            Self::MemoryDeleted { .. } => names::MEMORY_DELETED,
            Self::MemoryUpdated { .. } => names::MEMORY_UPDATED,
            Self::MemoryCleared { .. } => names::MEMORY_CLEARED,
            Self::BriefCreated { .. } => names::BRIEF_CREATED,
            Self::JobContextCreated { .. } => names::JOB_CONTEXT_CREATED,
            Self::JobContextUpdated { .. } => names::JOB_CONTEXT_UPDATED,
            Self::PlannerPlanned { .. } => names::PLANNER_PLANNED,
            Self::PlannerReplanned { .. } => names::PLANNER_REPLANNED,
        }
    }

    /// Payload object for this event.
    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Convert into the untyped [`Event`] delivered to listeners.
    pub fn into_event(self) -> Event {
        Event::new(self.name(), self.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_uses_camel_case_fields() {
        let evt = AgencyEvent::JobAssigned {
            job_id: JobId::from_raw("j1"),
            assignee_id: AssigneeId::from_raw("writer"),
            assignee_type: AssigneeType::Agent,
        };
        assert_eq!(evt.name(), "job:assigned");
        assert_eq!(
            evt.payload(),
            json!({"jobId": "j1", "assigneeId": "writer", "assigneeType": "agent"})
        );
    }

    #[test]
    fn retrying_payload() {
        let evt = AgencyEvent::JobRetrying {
            job_id: JobId::from_raw("j1"),
            retry_count: 2,
            max_retries: 3,
        };
        assert_eq!(
            evt.into_event(),
            Event::new(
                "job:retrying",
                json!({"jobId": "j1", "retryCount": 2, "maxRetries": 3})
            )
        );
    }

    #[test]
    fn access_mode_is_kebab_case() {
        let evt = AgencyEvent::MemoryShared {
            source_scope: ScopeId::global(),
            target_scope: ScopeId::from_raw("wf1"),
            keys: vec!["k".into()],
            access_mode: AccessMode::ReadOnly,
        };
        assert_eq!(evt.payload()["accessMode"], "read-only");
        assert_eq!(evt.payload()["sourceScope"], "global");
    }

    #[test]
    fn step_skipped_name_matches_catalogue() {
        let evt = AgencyEvent::WorkflowStepSkipped {
            workflow_id: WorkflowId::from_raw("wf"),
            step_index: 1,
            job_id: JobId::from_raw("j"),
            reason: "condition not met".into(),
        };
        assert_eq!(evt.name(), "workflow:stepSkipped");
        assert_eq!(evt.payload()["stepIndex"], 1);
    }
}
