//! Brief, Job and status types.

use std::fmt;

use agency_core::{AssigneeId, AssigneeType, JobId, Schema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Brief
// ─────────────────────────────────────────────────────────────────────────────

/// Descriptive record for one unit of work, keyed by job id.
///
/// Unknown keys in a serialized brief are kept in [`Brief::fields`] and
/// flow into the job's input like the named ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brief {
    /// Short task name.
    pub title: String,
    /// What the job should achieve.
    pub goal: String,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    /// Names of the inputs the job expects.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Names of the outputs the job produces.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Checked against the merged input before the assignee runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Schema>,
    /// Checked against the assignee's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Schema>,
    /// Free-form extra fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Brief {
    /// Brief with a title and goal and nothing else.
    pub fn new(title: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            goal: goal.into(),
            overview: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_schema: None,
            output_schema: None,
            fields: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the overview.
    #[must_use]
    pub fn with_overview(mut self, overview: impl Into<String>) -> Self {
        self.overview = Some(overview.into());
        self
    }

    /// Declare input names.
    #[must_use]
    pub fn with_inputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declare output names.
    #[must_use]
    pub fn with_outputs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = names.into_iter().map(Into::into).collect();
        self
    }

    /// Validate merged inputs against `schema`.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Validate results against `schema`.
    #[must_use]
    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Attach a free-form field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.fields.insert(key.into(), value);
        self
    }

    /// The lowest-priority layer of a job's input: `title`, `goal`,
    /// `overview` (when set) and every free-form field.
    pub fn derived_inputs(&self) -> Map<String, Value> {
        let mut out = Map::new();
        let _ = out.insert("title".into(), Value::String(self.title.clone()));
        let _ = out.insert("goal".into(), Value::String(self.goal.clone()));
        if let Some(overview) = &self.overview {
            let _ = out.insert("overview".into(), Value::String(overview.clone()));
        }
        for (k, v) in &self.fields {
            let _ = out.insert(k.clone(), v.clone());
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be executed.
    Assigned,
    /// The assignee is running.
    InProgress,
    /// Finished with results.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// Whether the job has finished, successfully or not.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The only legal edges: `assigned → in_progress`,
    /// `in_progress → completed | failed` and `failed → assigned`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Assigned, Self::InProgress)
                | (Self::InProgress, Self::Completed | Self::Failed)
                | (Self::Failed, Self::Assigned)
        )
    }

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job
// ─────────────────────────────────────────────────────────────────────────────

/// A brief assigned to an agent or team.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job id (same as the brief's key).
    pub id: JobId,
    /// Copy of the brief at assignment time.
    pub brief: Brief,
    /// Who runs the job.
    pub assignee_id: AssigneeId,
    /// Agent or team.
    pub assignee_type: AssigneeType,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// When the job was (re)assigned.
    pub assigned_at: DateTime<Utc>,
    /// When the latest execution started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the latest execution completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Results of a completed run, or the substitute an error handler
    /// returned for a failed one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    /// Error message of the latest failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Explicit retries performed so far.
    pub retry_count: u32,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        brief: Brief,
        assignee_id: AssigneeId,
        assignee_type: AssigneeType,
    ) -> Self {
        Self {
            id,
            brief,
            assignee_id,
            assignee_type,
            status: JobStatus::Assigned,
            assigned_at: Utc::now(),
            started_at: None,
            completed_at: None,
            results: None,
            error: None,
            retry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALL: [JobStatus; 4] = [
        JobStatus::Assigned,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    #[test]
    fn only_documented_edges_are_legal() {
        let legal = [
            (JobStatus::Assigned, JobStatus::InProgress),
            (JobStatus::InProgress, JobStatus::Completed),
            (JobStatus::InProgress, JobStatus::Failed),
            (JobStatus::Failed, JobStatus::Assigned),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_value(JobStatus::InProgress).unwrap(),
            json!("in_progress")
        );
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn derived_inputs_include_free_form_fields() {
        let brief = Brief::new("research", "find sources")
            .with_overview("three sources minimum")
            .with_field("topic", json!("rust"));
        let inputs = brief.derived_inputs();
        assert_eq!(inputs["title"], "research");
        assert_eq!(inputs["goal"], "find sources");
        assert_eq!(inputs["overview"], "three sources minimum");
        assert_eq!(inputs["topic"], "rust");
    }

    #[test]
    fn brief_round_trips_unknown_fields() {
        let brief: Brief = serde_json::from_value(json!({
            "title": "t",
            "goal": "g",
            "inputs": ["a"],
            "originalJobId": "job_1"
        }))
        .unwrap();
        assert_eq!(brief.inputs, vec!["a"]);
        assert_eq!(brief.fields["originalJobId"], "job_1");

        let v = serde_json::to_value(&brief).unwrap();
        assert_eq!(v["originalJobId"], "job_1");
        assert!(v.get("inputSchema").is_none());
    }
}
