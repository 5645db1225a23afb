//! # agency-memory
//!
//! Shared memory for jobs and workflows.
//!
//! - [`MemoryScope`]: one namespace of key/value pairs with a bounded
//!   mutation history. `global` always exists; each workflow run owns a
//!   scope named after it.
//! - [`MemoryAccessController`]: copies keys between scopes and remembers
//!   the access mode of each copy. Read-only copies cannot be overwritten
//!   in the target scope.
//! - [`MemoryManager`]: the scope registry owned by one `Agency`.

#![deny(unsafe_code)]

pub mod access;
pub mod manager;
pub mod scope;

pub use access::{AccessGrant, GrantReport, MemoryAccessController};
pub use agency_core::AccessMode;
pub use manager::MemoryManager;
pub use scope::{HistoryAction, HistoryEntry, MemoryScope};
