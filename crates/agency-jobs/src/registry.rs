//! The job registry.

use std::sync::Arc;

use agency_core::{
    AgencyError, AgencyEvent, AssigneeId, AssigneeType, JobId, Result, RunContext, Runnable,
};
use agency_events::EventBus;
use agency_memory::MemoryScope;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::types::{Brief, Job, JobStatus};

/// Per-job failure handler. Its return value becomes the result of the
/// failing `execute` call; the job itself stays `failed`.
pub type JobErrorHandler = Arc<dyn Fn(&Job, &AgencyError) -> Value + Send + Sync>;

#[derive(Clone)]
struct Assignee {
    kind: AssigneeType,
    runnable: Arc<dyn Runnable>,
}

/// Owns briefs, jobs, job contexts, assignees and per-job error handlers.
///
/// No map entry is held across an `.await`: `execute` claims the job
/// (`assigned → in_progress`), releases it, runs the assignee, then
/// re-acquires it to record the outcome.
pub struct JobRegistry {
    briefs: DashMap<JobId, Brief>,
    jobs: DashMap<JobId, Job>,
    contexts: DashMap<JobId, Map<String, Value>>,
    assignees: DashMap<AssigneeId, Assignee>,
    handlers: DashMap<JobId, JobErrorHandler>,
    bus: EventBus,
    global: Arc<MemoryScope>,
}

impl JobRegistry {
    /// Empty registry. Archived results go to `global`.
    pub fn new(bus: EventBus, global: Arc<MemoryScope>) -> Self {
        Self {
            briefs: DashMap::new(),
            jobs: DashMap::new(),
            contexts: DashMap::new(),
            assignees: DashMap::new(),
            handlers: DashMap::new(),
            bus,
            global,
        }
    }

    // ── Assignees ───────────────────────────────────────────────────────────

    /// Register (or replace) an agent or team.
    pub fn register_assignee(
        &self,
        id: impl Into<AssigneeId>,
        kind: AssigneeType,
        runnable: Arc<dyn Runnable>,
    ) {
        let id = id.into();
        info!(assignee_id = %id, assignee_type = %kind, "assignee registered");
        let _ = self.assignees.insert(id, Assignee { kind, runnable });
    }

    /// Remove an assignee. Existing jobs keep their assignment but cannot
    /// execute until it is registered again.
    pub fn unregister_assignee(&self, id: &AssigneeId) -> bool {
        self.assignees.remove(id).is_some()
    }

    /// Whether `id` is registered.
    pub fn has_assignee(&self, id: &AssigneeId) -> bool {
        self.assignees.contains_key(id)
    }

    /// Registered kind of `id`.
    pub fn assignee_type(&self, id: &AssigneeId) -> Option<AssigneeType> {
        self.assignees.get(id).map(|a| a.kind)
    }

    /// Capability registered as `id`.
    pub fn runnable(&self, id: &AssigneeId) -> Option<Arc<dyn Runnable>> {
        self.assignees.get(id).map(|a| Arc::clone(&a.runnable))
    }

    // ── Briefs ──────────────────────────────────────────────────────────────

    /// Store the brief for `job_id`, replacing any earlier one.
    ///
    /// Jobs already assigned keep the copy they were assigned with.
    pub fn create_brief(&self, job_id: impl Into<JobId>, brief: Brief) {
        let job_id = job_id.into();
        let payload = serde_json::to_value(&brief).unwrap_or(Value::Null);
        if self.briefs.insert(job_id.clone(), brief).is_some() {
            debug!(job_id = %job_id, "brief overwritten");
        }
        let _ = self.bus.emit(AgencyEvent::BriefCreated {
            job_id,
            brief: payload,
        });
    }

    /// Store the brief for `job_id` only if none exists yet.
    pub fn try_create_brief(&self, job_id: impl Into<JobId>, brief: Brief) -> Result<()> {
        let job_id = job_id.into();
        let payload = serde_json::to_value(&brief).unwrap_or(Value::Null);
        match self.briefs.entry(job_id.clone()) {
            Entry::Occupied(_) => {
                return Err(AgencyError::configuration(format!(
                    "brief for job '{job_id}' already exists"
                )));
            }
            Entry::Vacant(e) => {
                let _ = e.insert(brief);
            }
        }
        let _ = self.bus.emit(AgencyEvent::BriefCreated {
            job_id,
            brief: payload,
        });
        Ok(())
    }

    /// Brief stored for `job_id`.
    pub fn brief(&self, job_id: &JobId) -> Option<Brief> {
        self.briefs.get(job_id).map(|b| b.clone())
    }

    /// Whether a brief exists for `job_id`.
    pub fn has_brief(&self, job_id: &JobId) -> bool {
        self.briefs.contains_key(job_id)
    }

    // ── Assignment ──────────────────────────────────────────────────────────

    /// Create the job for `job_id` in `assigned` and its context if absent.
    ///
    /// Needs a brief and a registered assignee of the stated type. A job
    /// still waiting in `assigned` may be reassigned; any other existing
    /// record is `InvalidState`. A failed job goes through
    /// [`retry_job`](Self::retry_job), a finished one through
    /// [`cleanup_job`](Self::cleanup_job) first.
    pub fn assign_job(
        &self,
        job_id: impl Into<JobId>,
        assignee_id: impl Into<AssigneeId>,
        assignee_type: AssigneeType,
    ) -> Result<Job> {
        let job_id = job_id.into();
        let assignee_id = assignee_id.into();

        let brief = self.brief(&job_id).ok_or_else(|| {
            AgencyError::configuration(format!("no brief exists for job '{job_id}'"))
        })?;
        match self.assignee_type(&assignee_id) {
            None => {
                return Err(AgencyError::configuration(format!(
                    "no {assignee_type} registered as '{assignee_id}'"
                )));
            }
            Some(kind) if kind != assignee_type => {
                return Err(AgencyError::configuration(format!(
                    "'{assignee_id}' is registered as a {kind}, not a {assignee_type}"
                )));
            }
            Some(_) => {}
        }

        let job = Job::new(job_id.clone(), brief, assignee_id.clone(), assignee_type);
        match self.jobs.entry(job_id.clone()) {
            Entry::Occupied(mut e) => {
                let status = e.get().status;
                if status != JobStatus::Assigned {
                    let hint = match status {
                        JobStatus::Failed => "; retry it or clean it up first",
                        JobStatus::Completed => "; clean it up first",
                        _ => "",
                    };
                    return Err(AgencyError::invalid_state(format!(
                        "job '{job_id}' is {status} and cannot be reassigned{hint}"
                    )));
                }
                let _ = e.insert(job.clone());
            }
            Entry::Vacant(e) => {
                let _ = e.insert(job.clone());
            }
        }

        let created_context = match self.contexts.entry(job_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                let _ = e.insert(Map::new());
                true
            }
        };

        info!(job_id = %job_id, assignee_id = %assignee_id, %assignee_type, "job assigned");
        let _ = self.bus.emit(AgencyEvent::JobAssigned {
            job_id: job_id.clone(),
            assignee_id,
            assignee_type,
        });
        if created_context {
            let _ = self.bus.emit(AgencyEvent::JobContextCreated {
                job_id,
                context: Value::Object(Map::new()),
            });
        }
        Ok(job)
    }

    /// Assign `job_id` for a new run. A `completed` record is dropped first
    /// (context and error handler stay); everything else behaves like
    /// [`assign_job`](Self::assign_job), so a failed job is refused.
    pub fn renew(
        &self,
        job_id: impl Into<JobId>,
        assignee_id: impl Into<AssigneeId>,
        assignee_type: AssigneeType,
    ) -> Result<Job> {
        let job_id = job_id.into();
        if self
            .jobs
            .remove_if(&job_id, |_, job| job.status == JobStatus::Completed)
            .is_some()
        {
            debug!(job_id = %job_id, "completed job record dropped for a new run");
        }
        self.assign_job(job_id, assignee_id, assignee_type)
    }

    // ── Execution ───────────────────────────────────────────────────────────

    /// Run an `assigned` job on its assignee.
    ///
    /// Input is the brief's [`derived_inputs`](Brief::derived_inputs),
    /// overlaid by the job context, overlaid by `extra_inputs` (an object;
    /// any other non-null value is passed under `input`).
    ///
    /// On failure the job becomes `failed` and `job:failed` is published. A
    /// registered error handler then supplies the return value; without
    /// one the error is returned.
    pub async fn execute(&self, job_id: &JobId, extra_inputs: Value) -> Result<Value> {
        let (brief, assignee_id, assignee_type, retry_count) = {
            let mut job = self
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| AgencyError::configuration(format!("unknown job '{job_id}'")))?;
            if job.status != JobStatus::Assigned {
                return Err(AgencyError::invalid_state(format!(
                    "job '{job_id}' is {}, expected assigned",
                    job.status
                )));
            }
            transition(&mut job, JobStatus::InProgress)?;
            job.started_at = Some(Utc::now());
            (
                job.brief.clone(),
                job.assignee_id.clone(),
                job.assignee_type,
                job.retry_count,
            )
        };

        info!(job_id = %job_id, assignee_id = %assignee_id, retry_count, "job started");
        let _ = self.bus.emit(AgencyEvent::JobStarted {
            job_id: job_id.clone(),
        });

        let ctx = RunContext {
            job_id: job_id.clone(),
            assignee_id,
            assignee_type,
            retry_count,
        };
        let input = self.merge_inputs(job_id, &brief, extra_inputs);

        match self.run_validated(&brief, &ctx, input).await {
            Ok(results) => {
                self.complete(job_id, &results);
                Ok(results)
            }
            Err(error) => self.fail(job_id, error),
        }
    }

    async fn run_validated(&self, brief: &Brief, ctx: &RunContext, input: Value) -> Result<Value> {
        if let Some(schema) = &brief.input_schema {
            let outcome = schema.validate(&input);
            if !outcome.valid {
                return Err(AgencyError::Validation {
                    context: format!("job '{}' input", ctx.job_id),
                    violations: outcome.errors,
                });
            }
        }

        let runnable = self
            .assignees
            .get(&ctx.assignee_id)
            .map(|a| Arc::clone(&a.runnable))
            .ok_or_else(|| {
                AgencyError::configuration(format!(
                    "assignee '{}' is no longer registered",
                    ctx.assignee_id
                ))
            })?;

        let results = runnable.run(input, ctx).await?;

        if let Some(schema) = &brief.output_schema {
            let outcome = schema.validate(&results);
            if !outcome.valid {
                return Err(AgencyError::Validation {
                    context: format!("job '{}' output", ctx.job_id),
                    violations: outcome.errors,
                });
            }
        }
        Ok(results)
    }

    fn merge_inputs(&self, job_id: &JobId, brief: &Brief, extra: Value) -> Value {
        let mut merged = brief.derived_inputs();
        if let Some(ctx) = self.contexts.get(job_id) {
            for (k, v) in ctx.iter() {
                let _ = merged.insert(k.clone(), v.clone());
            }
        }
        match extra {
            Value::Object(extra) => merged.extend(extra),
            Value::Null => {}
            other => {
                let _ = merged.insert("input".into(), other);
            }
        }
        Value::Object(merged)
    }

    fn complete(&self, job_id: &JobId, results: &Value) {
        let Some(mut job) = self.jobs.get_mut(job_id) else {
            warn!(job_id = %job_id, "job removed while running, dropping results");
            return;
        };
        if let Err(e) = transition(&mut job, JobStatus::Completed) {
            warn!(job_id = %job_id, error = %e, "job changed while running, dropping results");
            return;
        }
        job.completed_at = Some(Utc::now());
        job.results = Some(results.clone());
        drop(job);

        let context = self.contexts.get_mut(job_id).map(|mut ctx| {
            let _ = ctx.insert("lastResults".into(), results.clone());
            let _ = ctx.insert("lastExecutedAt".into(), Value::String(Utc::now().to_rfc3339()));
            Value::Object(ctx.clone())
        });

        info!(job_id = %job_id, "job completed");
        if let Some(context) = context {
            let _ = self.bus.emit(AgencyEvent::JobContextUpdated {
                job_id: job_id.clone(),
                context,
                results: results.clone(),
            });
        }
        let _ = self.bus.emit(AgencyEvent::JobCompleted {
            job_id: job_id.clone(),
            results: results.clone(),
        });
    }

    fn fail(&self, job_id: &JobId, error: AgencyError) -> Result<Value> {
        let snapshot = self.jobs.get_mut(job_id).and_then(|mut job| {
            match transition(&mut job, JobStatus::Failed) {
                Ok(()) => {
                    job.error = Some(error.to_string());
                    Some(job.clone())
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "job changed while running, not recording failure");
                    None
                }
            }
        });

        warn!(job_id = %job_id, error = %error, kind = error.error_kind(), "job failed");
        let _ = self.bus.emit(AgencyEvent::JobFailed {
            job_id: job_id.clone(),
            error: error.to_string(),
        });

        let handler = self.handlers.get(job_id).map(|h| Arc::clone(h.value()));
        match (handler, snapshot) {
            (Some(handler), Some(job)) => {
                let substitute = handler(&job, &error);
                if let Some(mut job) = self.jobs.get_mut(job_id) {
                    job.results = Some(substitute.clone());
                }
                warn!(job_id = %job_id, "error handler supplied a substitute result; job stays failed");
                Ok(substitute)
            }
            _ => Err(error),
        }
    }

    /// Retry a `failed` job: bump `retry_count`, move it back to
    /// `assigned`, clear the error, and execute again.
    ///
    /// `RetryLimitExceeded` when `retry_count` has already reached
    /// `max_retries`.
    pub async fn retry_job(
        &self,
        job_id: &JobId,
        max_retries: u32,
        extra_inputs: Value,
    ) -> Result<Value> {
        let retry_count = {
            let mut job = self
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| AgencyError::configuration(format!("unknown job '{job_id}'")))?;
            if job.status != JobStatus::Failed {
                return Err(AgencyError::invalid_state(format!(
                    "job '{job_id}' is not in failed state (status: {})",
                    job.status
                )));
            }
            if job.retry_count >= max_retries {
                return Err(AgencyError::RetryLimitExceeded {
                    job_id: job_id.to_string(),
                    retry_count: job.retry_count,
                    max_retries,
                });
            }
            transition(&mut job, JobStatus::Assigned)?;
            job.retry_count += 1;
            job.error = None;
            job.results = None;
            job.retry_count
        };

        info!(job_id = %job_id, retry_count, max_retries, "retrying job");
        let _ = self.bus.emit(AgencyEvent::JobRetrying {
            job_id: job_id.clone(),
            retry_count,
            max_retries,
        });
        self.execute(job_id, extra_inputs).await
    }

    // ── Cleanup ─────────────────────────────────────────────────────────────

    /// Remove a finished job with its context and error handler.
    ///
    /// Returns `false` (changing nothing) unless the job is `completed` or
    /// `failed`. With `keep_results`, existing results are archived in the
    /// global scope as `job:<id>:results`. The brief is kept.
    pub fn cleanup_job(&self, job_id: &JobId, keep_results: bool) -> bool {
        let Some((_, job)) = self
            .jobs
            .remove_if(job_id, |_, job| job.status.is_terminal())
        else {
            return false;
        };
        let _ = self.contexts.remove(job_id);
        let _ = self.handlers.remove(job_id);

        if keep_results {
            if let Some(results) = job.results {
                let key = format!("job:{job_id}:results");
                if let Err(e) = self.global.remember(key, results) {
                    warn!(job_id = %job_id, error = %e, "could not archive job results");
                }
            }
        }

        debug!(job_id = %job_id, keep_results, "job cleaned up");
        let _ = self.bus.emit(AgencyEvent::JobCleaned {
            job_id: job_id.clone(),
            keep_results,
        });
        true
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Snapshot of one job.
    pub fn job(&self, job_id: &JobId) -> Option<Job> {
        self.jobs.get(job_id).map(|j| j.clone())
    }

    /// Status of one job.
    pub fn status(&self, job_id: &JobId) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|j| j.status)
    }

    /// All jobs, optionally filtered by status, sorted by id.
    pub fn jobs(&self, status: Option<JobStatus>) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .map(|j| j.clone())
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Copy of a job's context.
    pub fn context(&self, job_id: &JobId) -> Option<Map<String, Value>> {
        self.contexts.get(job_id).map(|c| c.clone())
    }

    /// Set one key in a job's context.
    pub fn update_context(&self, job_id: &JobId, key: impl Into<String>, value: Value) -> Result<()> {
        let mut ctx = self.contexts.get_mut(job_id).ok_or_else(|| {
            AgencyError::configuration(format!("no context exists for job '{job_id}'"))
        })?;
        let _ = ctx.insert(key.into(), value);
        Ok(())
    }

    // ── Error handlers ──────────────────────────────────────────────────────

    /// Install the failure handler for `job_id`, replacing any earlier one.
    pub fn set_error_handler<F>(&self, job_id: impl Into<JobId>, handler: F)
    where
        F: Fn(&Job, &AgencyError) -> Value + Send + Sync + 'static,
    {
        let _ = self.handlers.insert(job_id.into(), Arc::new(handler));
    }

    /// Remove the failure handler for `job_id`.
    pub fn clear_error_handler(&self, job_id: &JobId) -> bool {
        self.handlers.remove(job_id).is_some()
    }
}

fn transition(job: &mut Job, next: JobStatus) -> Result<()> {
    if !job.status.can_transition_to(next) {
        return Err(AgencyError::invalid_state(format!(
            "job '{}' cannot move from {} to {next}",
            job.id, job.status
        )));
    }
    debug!(job_id = %job.id, from = %job.status, to = %next, "job status changed");
    job.status = next;
    Ok(())
}
