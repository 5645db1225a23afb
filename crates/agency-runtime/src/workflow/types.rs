//! Workflow definitions and run records.

use std::fmt;
use std::sync::Arc;

use agency_core::{AssigneeId, AssigneeType, JobId, WorkflowId};
use agency_jobs::Brief;
use agency_memory::MemoryScope;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Predicate for a conditional step, evaluated over the previous step's
/// data and the workflow's memory scope.
pub type Condition = Arc<dyn Fn(&Value, &MemoryScope) -> bool + Send + Sync>;

/// One job to run inside a workflow.
#[derive(Clone, Debug, PartialEq)]
pub struct JobStep {
    /// Job to execute.
    pub job_id: JobId,
    /// Assignee used when the job has to be (re)assigned.
    pub assignee_id: AssigneeId,
    /// Kind of assignee.
    pub assignee_type: AssigneeType,
    /// Brief created when none exists yet for `job_id`.
    pub brief: Option<Brief>,
    /// Step-specific inputs, merged over the job context.
    pub inputs: Map<String, Value>,
}

impl JobStep {
    /// Step running `job_id` on agent `assignee_id`.
    pub fn new(job_id: impl Into<JobId>, assignee_id: impl Into<AssigneeId>) -> Self {
        Self {
            job_id: job_id.into(),
            assignee_id: assignee_id.into(),
            assignee_type: AssigneeType::Agent,
            brief: None,
            inputs: Map::new(),
        }
    }

    /// Run on a team instead of an agent.
    #[must_use]
    pub fn team(mut self) -> Self {
        self.assignee_type = AssigneeType::Team;
        self
    }

    /// Brief to create if the job has none.
    #[must_use]
    pub fn with_brief(mut self, brief: Brief) -> Self {
        self.brief = Some(brief);
        self
    }

    /// Add one step input.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.inputs.insert(key.into(), value);
        self
    }

    pub(crate) fn default_brief(&self) -> Brief {
        self.brief.clone().unwrap_or_else(|| {
            Brief::new(
                self.job_id.as_str(),
                format!("Complete workflow step '{}'", self.job_id),
            )
        })
    }
}

/// One entry of a workflow definition.
#[derive(Clone)]
pub enum Step {
    /// Run one job, feeding it the previous step's data.
    Sequential(JobStep),
    /// Start every branch, then join. `currentData` becomes
    /// `{jobId: result}` for all branches.
    Parallel(Vec<JobStep>),
    /// Run `step` only when `condition` holds; otherwise record a skip.
    Conditional {
        /// Gate for the step.
        condition: Condition,
        /// Step to run when the gate is open.
        step: JobStep,
    },
}

impl Step {
    /// Sequential step.
    pub fn sequential(step: JobStep) -> Self {
        Self::Sequential(step)
    }

    /// Parallel step.
    pub fn parallel(branches: impl IntoIterator<Item = JobStep>) -> Self {
        Self::Parallel(branches.into_iter().collect())
    }

    /// Conditional step.
    pub fn conditional<F>(condition: F, step: JobStep) -> Self
    where
        F: Fn(&Value, &MemoryScope) -> bool + Send + Sync + 'static,
    {
        Self::Conditional {
            condition: Arc::new(condition),
            step,
        }
    }

    /// `sequential`, `parallel` or `conditional`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sequential(_) => "sequential",
            Self::Parallel(_) => "parallel",
            Self::Conditional { .. } => "conditional",
        }
    }

    /// Jobs this step may run.
    pub fn job_ids(&self) -> Vec<JobId> {
        match self {
            Self::Sequential(step) | Self::Conditional { step, .. } => vec![step.job_id.clone()],
            Self::Parallel(branches) => branches.iter().map(|b| b.job_id.clone()).collect(),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential(step) => f.debug_tuple("Sequential").field(step).finish(),
            Self::Parallel(branches) => f.debug_tuple("Parallel").field(branches).finish(),
            Self::Conditional { step, .. } => f
                .debug_struct("Conditional")
                .field("step", step)
                .finish_non_exhaustive(),
        }
    }
}

/// Ordered list of steps.
#[derive(Clone, Debug, Default)]
pub struct WorkflowDefinition {
    /// Steps in execution order.
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Empty definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    #[must_use]
    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromIterator<Step> for WorkflowDefinition {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

/// Lifecycle of a workflow run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Steps are running.
    InProgress,
    /// Every step finished.
    Completed,
    /// A step aborted the run.
    Failed,
}

impl WorkflowStatus {
    /// Completed or failed.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Record of one workflow invocation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    /// Run id; also the id of its memory scope.
    pub id: WorkflowId,
    /// Distinguishes this invocation from earlier runs that used the same id.
    pub run_token: Uuid,
    /// Definition being executed.
    #[serde(skip)]
    pub definition: Arc<WorkflowDefinition>,
    /// Steps in the definition.
    pub step_count: usize,
    /// Lifecycle state.
    pub status: WorkflowStatus,
    /// Index of the step running (or that ran last).
    pub current_step: usize,
    /// Result per job id; skipped steps hold a skip marker.
    pub results: Map<String, Value>,
    /// Why the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Completion or failure time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub(crate) fn new(id: WorkflowId, definition: Arc<WorkflowDefinition>) -> Self {
        Self {
            id,
            run_token: Uuid::now_v7(),
            step_count: definition.len(),
            definition,
            status: WorkflowStatus::InProgress,
            current_step: 0,
            results: Map::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}
