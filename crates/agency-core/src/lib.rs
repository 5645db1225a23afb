//! # agency-core
//!
//! Foundation types shared by every agency crate:
//!
//! - **Branded IDs**: [`JobId`], [`WorkflowId`], [`ScopeId`], [`AssigneeId`]
//! - **Errors**: [`AgencyError`] taxonomy via `thiserror`
//! - **Runnable**: the single-method capability implemented by agents and teams
//! - **Schema**: required/type/enum validation for job inputs and outputs
//! - **Structured output**: lenient JSON recovery from free-form model text
//! - **Events**: the [`AgencyEvent`] catalogue published on the event bus
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod mock;
pub mod runnable;
pub mod schema;
pub mod structured;

pub use errors::{AgencyError, Result, RunError};
pub use events::{AccessMode, AgencyEvent, Event};
pub use ids::{AssigneeId, JobId, ScopeId, WorkflowId};
pub use runnable::{AssigneeType, RunContext, Runnable};
pub use schema::{FieldSchema, Schema, ValidationOutcome};
