//! # agency-runtime
//!
//! The orchestration layer on top of the job registry:
//!
//! - **Workflows**: ordered sequential, parallel and conditional steps run
//!   by [`WorkflowEngine`], each run with its own memory scope
//! - **Planner**: goal decomposition and re-planning through an agent, with
//!   lenient recovery of the agent's JSON
//! - **Agency**: the facade that owns one bus, one scope registry, one job
//!   registry, one engine and one planner

#![deny(unsafe_code)]

pub mod agency;
pub mod planner;
pub mod workflow;

pub use agency::{Agency, init_logging};
pub use planner::{Plan, PlannedTask, Planner, default_plan};
pub use workflow::{
    Condition, JobStep, Step, WorkflowDefinition, WorkflowEngine, WorkflowErrorHandler,
    WorkflowRun, WorkflowStatus,
};
