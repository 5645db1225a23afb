//! Goal decomposition and re-planning.
//!
//! The planner asks an agent for a JSON task list and turns each task into
//! a brief plus a job assigned back to that agent. Replies are recovered
//! with [`agency_core::structured`]. Goal planning falls back to a fixed
//! three-task plan when nothing can be recovered; re-planning never does.

pub mod prompt;

use std::sync::Arc;

use agency_core::structured::{ParseTier, Parsed, parse_lenient, parse_lenient_or};
use agency_core::{AgencyError, AgencyEvent, AssigneeId, AssigneeType, JobId, Result, RunContext};
use agency_events::EventBus;
use agency_jobs::{Brief, JobRegistry};
use agency_settings::PlannerSettings;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// One task as described by a planning agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTask {
    /// Short identifier; becomes the brief title.
    pub name: String,
    /// What the task does; becomes the brief goal.
    #[serde(default)]
    pub description: String,
    /// Names of the data the task needs.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Names of the data the task produces.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl PlannedTask {
    fn new(name: &str, description: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            inputs: inputs.iter().map(ToString::to_string).collect(),
            outputs: outputs.iter().map(ToString::to_string).collect(),
        }
    }

    fn brief(&self) -> Brief {
        Brief::new(self.name.as_str(), self.description.as_str())
            .with_inputs(self.inputs.iter().cloned())
            .with_outputs(self.outputs.iter().cloned())
    }
}

/// Plan used when a goal-planning reply holds no recoverable task list.
pub fn default_plan() -> Vec<PlannedTask> {
    vec![
        PlannedTask::new(
            "analyze_goal",
            "Analyze the goal and identify what is needed to achieve it",
            &["goal"],
            &["analysis"],
        ),
        PlannedTask::new(
            "execute_plan",
            "Carry out the work identified in the analysis",
            &["analysis"],
            &["results"],
        ),
        PlannedTask::new(
            "review_results",
            "Review the results against the original goal",
            &["results", "goal"],
            &["review"],
        ),
    ]
}

/// Tasks created by one planning call.
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    /// Tasks in execution order.
    pub tasks: Vec<PlannedTask>,
    /// Job created for each task, index-aligned with `tasks`.
    pub job_ids: Vec<JobId>,
    /// How the task list was obtained.
    pub source: ParseTier,
}

/// Turns goals into jobs through a planning agent.
pub struct Planner {
    jobs: Arc<JobRegistry>,
    bus: EventBus,
    settings: PlannerSettings,
}

impl Planner {
    /// Planner creating jobs in `jobs`.
    pub fn new(jobs: Arc<JobRegistry>, bus: EventBus, settings: PlannerSettings) -> Self {
        Self {
            jobs,
            bus,
            settings,
        }
    }

    /// Ask `agent_id` to decompose `goal`, then create one assigned job per
    /// task on that same agent.
    ///
    /// Unrecoverable output yields [`default_plan`] (logged at `warn`); a
    /// failing agent call is an [`AgencyError::Execution`].
    pub async fn plan_from_goal(&self, agent_id: &AssigneeId, goal: &str) -> Result<Plan> {
        let kind = self.assignee_kind(agent_id)?;
        let prompt = prompt::goal_prompt(goal, self.settings.include_examples);
        let reply = self.ask(agent_id, kind, prompt).await?;

        let mut parsed = parse_lenient_or(&reply, default_plan);
        if parsed.value.is_empty() {
            parsed = Parsed {
                value: default_plan(),
                tier: ParseTier::Fallback,
            };
        }
        if parsed.tier == ParseTier::Fallback {
            warn!(agent_id = %agent_id, goal, "planner reply had no task list, using default plan");
        }

        let tasks = self.capped(parsed.value);
        let job_ids = tasks
            .iter()
            .map(|task| {
                let brief = task.brief().with_field("planGoal", json!(goal));
                self.create_job(brief, agent_id, kind)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(agent_id = %agent_id, tasks = tasks.len(), source = %parsed.tier, "goal planned");
        let _ = self.bus.emit(AgencyEvent::PlannerPlanned {
            agent_id: agent_id.clone(),
            goal: goal.to_string(),
            job_ids: job_ids.clone(),
            source: parsed.tier.as_str(),
        });

        Ok(Plan {
            tasks,
            job_ids,
            source: parsed.tier,
        })
    }

    /// Ask the failed job's assignee for alternative tasks and create a job
    /// for each, tagged with `originalJobId`.
    ///
    /// Unrecoverable or empty output is an [`AgencyError::Planning`].
    pub async fn replan_failed_job(&self, job_id: &JobId, error: &str) -> Result<Plan> {
        let job = self
            .jobs
            .job(job_id)
            .ok_or_else(|| AgencyError::configuration(format!("unknown job '{job_id}'")))?;
        let prompt = prompt::replan_prompt(&job.brief.title, &job.brief.goal, error);
        let reply = self.ask(&job.assignee_id, job.assignee_type, prompt).await?;

        let parsed: Parsed<Vec<PlannedTask>> = parse_lenient(&reply)?;
        if parsed.value.is_empty() {
            return Err(AgencyError::Planning(format!(
                "re-planning job '{job_id}' produced no tasks"
            )));
        }

        let tasks = self.capped(parsed.value);
        let job_ids = tasks
            .iter()
            .map(|task| {
                let brief = task.brief().with_field("originalJobId", json!(job_id));
                self.create_job(brief, &job.assignee_id, job.assignee_type)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(job_id = %job_id, tasks = tasks.len(), "failed job re-planned");
        let _ = self.bus.emit(AgencyEvent::PlannerReplanned {
            original_job_id: job_id.clone(),
            job_ids: job_ids.clone(),
        });

        Ok(Plan {
            tasks,
            job_ids,
            source: parsed.tier,
        })
    }

    fn assignee_kind(&self, id: &AssigneeId) -> Result<AssigneeType> {
        self.jobs
            .assignee_type(id)
            .ok_or_else(|| AgencyError::configuration(format!("no assignee registered as '{id}'")))
    }

    async fn ask(&self, id: &AssigneeId, kind: AssigneeType, prompt: String) -> Result<String> {
        let runnable = self
            .jobs
            .runnable(id)
            .ok_or_else(|| AgencyError::configuration(format!("no assignee registered as '{id}'")))?;
        let ctx = RunContext {
            job_id: JobId::new(),
            assignee_id: id.clone(),
            assignee_type: kind,
            retry_count: 0,
        };
        debug!(assignee_id = %id, planning_call = %ctx.job_id, "asking for a plan");

        let reply = runnable.run(Value::String(prompt), &ctx).await?;
        Ok(match reply {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }

    fn capped(&self, mut tasks: Vec<PlannedTask>) -> Vec<PlannedTask> {
        if tasks.len() > self.settings.max_tasks {
            debug!(
                tasks = tasks.len(),
                max_tasks = self.settings.max_tasks,
                "dropping tasks beyond the plan limit"
            );
            tasks.truncate(self.settings.max_tasks);
        }
        tasks
    }

    fn create_job(&self, brief: Brief, assignee: &AssigneeId, kind: AssigneeType) -> Result<JobId> {
        let job_id = JobId::new();
        self.jobs.create_brief(job_id.clone(), brief);
        let _ = self.jobs.assign_job(job_id.clone(), assignee.clone(), kind)?;
        Ok(job_id)
    }
}
