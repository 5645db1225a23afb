//! # agency-jobs
//!
//! The [`JobRegistry`] owns every Brief, Job and `JobContext` of one
//! orchestrator, plus the directory of assignees that jobs run on.
//!
//! Job lifecycle:
//!
//! ```text
//! assigned ──► in_progress ──► completed
//!    ▲                    └──► failed ──┐
//!    └──────────── retry ───────────────┘
//! ```
//!
//! Every status change goes through [`JobStatus::can_transition_to`].

#![deny(unsafe_code)]

pub mod registry;
pub mod types;

pub use registry::{JobErrorHandler, JobRegistry};
pub use types::{Brief, Job, JobStatus};
