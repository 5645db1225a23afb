//! Multi-step workflows over the job registry.

pub mod engine;
pub mod types;

pub use engine::{WorkflowEngine, WorkflowErrorHandler};
pub use types::{Condition, JobStep, Step, WorkflowDefinition, WorkflowRun, WorkflowStatus};
