//! The capability every agent or team exposes to the orchestrator.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RunError;
use crate::ids::{AssigneeId, JobId};

/// Kind of capability provider a job is assigned to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssigneeType {
    /// A single agent.
    Agent,
    /// A team of agents behind one entrypoint.
    Team,
}

impl fmt::Display for AssigneeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent => f.write_str("agent"),
            Self::Team => f.write_str("team"),
        }
    }
}

/// Per-call metadata handed to [`Runnable::run`] next to the merged input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunContext {
    /// Job being executed.
    pub job_id: JobId,
    /// Assignee receiving the call.
    pub assignee_id: AssigneeId,
    /// Whether the assignee is an agent or a team.
    pub assignee_type: AssigneeType,
    /// How many explicit retries preceded this call.
    pub retry_count: u32,
}

/// Single-entrypoint capability implemented by agents and teams.
///
/// `input` is the merged job input (an object for job execution, a prompt
/// string for planning). The returned value is opaque to the orchestrator:
/// plain text or structured JSON. Timeouts are the implementor's concern;
/// the orchestrator never cancels a call.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Execute one unit of work.
    async fn run(&self, input: Value, ctx: &RunContext) -> Result<Value, RunError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignee_type_serde() {
        assert_eq!(serde_json::to_string(&AssigneeType::Agent).unwrap(), "\"agent\"");
        let parsed: AssigneeType = serde_json::from_str("\"team\"").unwrap();
        assert_eq!(parsed, AssigneeType::Team);
    }

    #[test]
    fn assignee_type_display() {
        assert_eq!(AssigneeType::Team.to_string(), "team");
    }
}
