//! Error taxonomy for the orchestrator.
//!
//! [`AgencyError`] is the single error type returned by every registry,
//! engine and planner operation. [`RunError`] is what a [`Runnable`]
//! reports; it is folded into [`AgencyError::Execution`] at the job
//! boundary.
//!
//! [`Runnable`]: crate::runnable::Runnable

use thiserror::Error;

/// Top-level error type for the orchestrator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgencyError {
    /// A referenced brief, job, assignee, scope or workflow is missing or
    /// the request is malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Job input or output violated its declared schema.
    #[error("validation failed for {context}: {}", violations.join("; "))]
    Validation {
        /// What was being validated (e.g. `job research input`).
        context: String,
        /// Human-readable violation strings.
        violations: Vec<String>,
    },

    /// The assignee's `run` failed.
    #[error("execution error: {0}")]
    Execution(String),

    /// Planner output could not be turned into a task list.
    #[error("planning error: {0}")]
    Planning(String),

    /// The operation is not legal in the entity's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An explicit retry would exceed the caller's bound.
    #[error("job {job_id} exceeded retry limit ({retry_count}/{max_retries})")]
    RetryLimitExceeded {
        /// Job being retried.
        job_id: String,
        /// Retries already performed.
        retry_count: u32,
        /// Caller-supplied maximum.
        max_retries: u32,
    },

    /// Write rejected by a read-only access grant.
    #[error("key '{key}' is read-only in scope '{scope}'")]
    ReadOnlyKey {
        /// Scope that rejected the write.
        scope: String,
        /// Key carrying the read-only grant.
        key: String,
    },

    /// A workflow aborted and no workflow-level handler substituted a value.
    #[error("workflow {workflow_id} failed at step {step}: {message}")]
    WorkflowFailed {
        /// Failed workflow.
        workflow_id: String,
        /// Index of the step that aborted the run.
        step: usize,
        /// Underlying error message.
        message: String,
    },
}

impl AgencyError {
    /// Shorthand for [`AgencyError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Shorthand for [`AgencyError::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Validation { .. } => "validation",
            Self::Execution(_) => "execution",
            Self::Planning(_) => "planning",
            Self::InvalidState(_) => "invalid_state",
            Self::RetryLimitExceeded { .. } => "retry_limit_exceeded",
            Self::ReadOnlyKey { .. } => "read_only_key",
            Self::WorkflowFailed { .. } => "workflow_failed",
        }
    }

    /// Whether the error was produced while running a job (as opposed to a
    /// malformed request that never reached the assignee).
    pub fn is_job_failure(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::Validation { .. })
    }
}

impl From<RunError> for AgencyError {
    fn from(e: RunError) -> Self {
        Self::Execution(e.to_string())
    }
}

/// Failure reported by a [`Runnable`](crate::runnable::Runnable).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RunError {
    /// Human-readable reason.
    pub message: String,
}

impl RunError {
    /// Create a run error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, AgencyError>;
