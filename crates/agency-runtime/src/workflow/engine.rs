//! Workflow execution.
//!
//! A run walks its steps in order. Sequential and conditional steps run on
//! the caller's task; a parallel step spawns one tokio task per branch and
//! joins them. The join fails as soon as any branch fails. Branches still
//! running at that point are not cancelled; they finish in the background
//! and may still write their results into the (already failed) run, but
//! never into a later run that reuses the same id.

use std::collections::HashSet;
use std::sync::Arc;

use agency_core::{AgencyError, AgencyEvent, JobId, Result, ScopeId, WorkflowId};
use agency_events::EventBus;
use agency_jobs::{JobRegistry, JobStatus};
use agency_memory::{MemoryManager, MemoryScope};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::types::{JobStep, Step, WorkflowDefinition, WorkflowRun, WorkflowStatus};

/// Workflow failure handler. Its return value becomes the result of the
/// failing `execute_workflow` call; the run itself stays `failed`.
pub type WorkflowErrorHandler = Arc<dyn Fn(&WorkflowRun, &AgencyError) -> Value + Send + Sync>;

type Runs = Arc<DashMap<WorkflowId, WorkflowRun>>;

/// Runs workflow definitions and keeps their run records.
pub struct WorkflowEngine {
    jobs: Arc<JobRegistry>,
    memory: Arc<MemoryManager>,
    bus: EventBus,
    runs: Runs,
    error_handler: RwLock<Option<WorkflowErrorHandler>>,
}

impl WorkflowEngine {
    /// Engine over the given registry and scopes.
    pub fn new(jobs: Arc<JobRegistry>, memory: Arc<MemoryManager>, bus: EventBus) -> Self {
        Self {
            jobs,
            memory,
            bus,
            runs: Arc::new(DashMap::new()),
            error_handler: RwLock::new(None),
        }
    }

    /// Install the handler consulted when any run fails.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&WorkflowRun, &AgencyError) -> Value + Send + Sync + 'static,
    {
        *self.error_handler.write() = Some(Arc::new(handler));
    }

    /// Remove the failure handler.
    pub fn clear_error_handler(&self) -> bool {
        self.error_handler.write().take().is_some()
    }

    /// Snapshot of one run.
    pub fn run(&self, id: &WorkflowId) -> Option<WorkflowRun> {
        self.runs.get(id).map(|r| r.clone())
    }

    /// Snapshot of every run, sorted by id.
    pub fn runs(&self) -> Vec<WorkflowRun> {
        let mut runs: Vec<WorkflowRun> = self.runs.iter().map(|r| r.clone()).collect();
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        runs
    }

    /// Execute `definition` as run `workflow_id`.
    ///
    /// The run's memory scope is seeded from `initial_data`: an object's
    /// keys are stored individually, any other non-null value is stored
    /// under `initialData`. `initial_data` is also the first step's
    /// `previousStepData`.
    ///
    /// Returns the results object (`{jobId: result}`) on completion. On
    /// failure the run is marked `failed`; the error handler, if set,
    /// supplies the return value, otherwise [`AgencyError::WorkflowFailed`]
    /// is returned.
    pub async fn execute_workflow(
        &self,
        definition: &WorkflowDefinition,
        workflow_id: impl Into<WorkflowId>,
        initial_data: Value,
    ) -> Result<Value> {
        let workflow_id = workflow_id.into();
        validate_definition(definition)?;
        let (scope, token) =
            self.start_run(&workflow_id, Arc::new(definition.clone()), &initial_data)?;

        let span = info_span!("workflow", workflow_id = %workflow_id);
        self.drive(definition, &workflow_id, scope, token, initial_data)
            .instrument(span)
            .await
    }

    fn start_run(
        &self,
        workflow_id: &WorkflowId,
        definition: Arc<WorkflowDefinition>,
        initial_data: &Value,
    ) -> Result<(Arc<MemoryScope>, Uuid)> {
        let scope_id = ScopeId::from(workflow_id);
        if scope_id.is_global() {
            return Err(AgencyError::configuration(
                "a workflow cannot use the global scope's id",
            ));
        }

        let step_count = definition.len();
        let run = WorkflowRun::new(workflow_id.clone(), definition);
        let token = run.run_token;
        let replaced = match self.runs.entry(workflow_id.clone()) {
            Entry::Occupied(mut e) => {
                if !e.get().status.is_terminal() {
                    return Err(AgencyError::configuration(format!(
                        "workflow '{workflow_id}' is already in progress"
                    )));
                }
                let _ = e.insert(run);
                true
            }
            Entry::Vacant(e) => {
                let _ = e.insert(run);
                false
            }
        };
        if replaced {
            debug!(workflow_id = %workflow_id, "replacing finished run with the same id");
            let _ = self.memory.delete_scope(&scope_id)?;
        }

        let scope = self.memory.create_scope(scope_id);
        let seeded = match initial_data {
            Value::Object(map) => map
                .iter()
                .try_for_each(|(k, v)| scope.remember(k.clone(), v.clone())),
            Value::Null => Ok(()),
            other => scope.remember("initialData", other.clone()),
        };
        if let Err(e) = seeded {
            let _ = self.runs.remove(workflow_id);
            return Err(e);
        }

        info!(workflow_id = %workflow_id, steps = step_count, "workflow started");
        let _ = self.bus.emit(AgencyEvent::WorkflowStarted {
            workflow_id: workflow_id.clone(),
            steps: step_count,
        });
        Ok((scope, token))
    }

    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        workflow_id: &WorkflowId,
        scope: Arc<MemoryScope>,
        token: Uuid,
        initial_data: Value,
    ) -> Result<Value> {
        let runner = StepRunner {
            jobs: Arc::clone(&self.jobs),
            runs: Arc::clone(&self.runs),
            scope,
            workflow_id: workflow_id.clone(),
            token,
        };
        let mut current = initial_data;

        for (index, step) in definition.steps.iter().enumerate() {
            if let Some(mut run) = self.runs.get_mut(workflow_id) {
                run.current_step = index;
            }
            let job_ids = step.job_ids();
            let _ = self.bus.emit(AgencyEvent::WorkflowStep {
                workflow_id: workflow_id.clone(),
                step_index: index,
                job_id: match step {
                    Step::Parallel(_) => None,
                    _ => job_ids.first().cloned(),
                },
                job_ids,
                step_type: step.kind(),
            });
            debug!(step = index, kind = step.kind(), "workflow step");

            let outcome = match step {
                Step::Sequential(job) => runner.run_job(job, &current).await,
                Step::Parallel(branches) => runner.run_parallel(branches, &current).await,
                Step::Conditional { condition, step: job } => {
                    if condition(&current, runner.scope.as_ref()) {
                        runner.run_job(job, &current).await
                    } else {
                        self.skip(&runner, index, &job.job_id);
                        continue;
                    }
                }
            };

            match outcome {
                Ok(data) => current = data,
                Err(error) => return self.abort(workflow_id, index, error),
            }
        }

        Ok(self.complete(workflow_id))
    }

    fn skip(&self, runner: &StepRunner, index: usize, job_id: &JobId) {
        let reason = "condition not met".to_string();
        runner.record(job_id, json!({"skipped": true, "reason": reason}), false);
        info!(step = index, job_id = %job_id, "conditional step skipped");
        let _ = self.bus.emit(AgencyEvent::WorkflowStepSkipped {
            workflow_id: runner.workflow_id.clone(),
            step_index: index,
            job_id: job_id.clone(),
            reason,
        });
    }

    fn complete(&self, workflow_id: &WorkflowId) -> Value {
        let results = self
            .runs
            .get_mut(workflow_id)
            .map(|mut run| {
                run.status = WorkflowStatus::Completed;
                run.finished_at = Some(Utc::now());
                Value::Object(run.results.clone())
            })
            .unwrap_or_else(|| Value::Object(Map::new()));

        info!(workflow_id = %workflow_id, "workflow completed");
        let _ = self.bus.emit(AgencyEvent::WorkflowCompleted {
            workflow_id: workflow_id.clone(),
            results: results.clone(),
        });
        results
    }

    fn abort(&self, workflow_id: &WorkflowId, step: usize, error: AgencyError) -> Result<Value> {
        let message = error.to_string();
        let run = self.runs.get_mut(workflow_id).map(|mut run| {
            run.status = WorkflowStatus::Failed;
            run.error = Some(message.clone());
            run.finished_at = Some(Utc::now());
            run.clone()
        });

        warn!(workflow_id = %workflow_id, step, error = %message, "workflow failed");
        let _ = self.bus.emit(AgencyEvent::WorkflowFailed {
            workflow_id: workflow_id.clone(),
            error: message.clone(),
            step,
        });

        let handler = self.error_handler.read().clone();
        if let (Some(handler), Some(run)) = (handler, run) {
            let substitute = handler(&run, &error);
            warn!(workflow_id = %workflow_id, "error handler supplied a substitute result; workflow stays failed");
            return Ok(substitute);
        }
        Err(AgencyError::WorkflowFailed {
            workflow_id: workflow_id.to_string(),
            step,
            message,
        })
    }

    /// Remove a finished run and its memory scope.
    ///
    /// Returns `false` (changing nothing) unless the run is `completed` or
    /// `failed`. With `keep_results`, the run's results are archived in the
    /// global scope as `workflow:<id>:results`.
    pub fn cleanup_workflow(&self, workflow_id: &WorkflowId, keep_results: bool) -> bool {
        let Some((_, run)) = self
            .runs
            .remove_if(workflow_id, |_, run| run.status.is_terminal())
        else {
            return false;
        };

        if let Err(e) = self.memory.delete_scope(&ScopeId::from(workflow_id)) {
            warn!(workflow_id = %workflow_id, error = %e, "could not delete workflow scope");
        }
        if keep_results {
            let key = format!("workflow:{workflow_id}:results");
            if let Err(e) = self.memory.global().remember(key, Value::Object(run.results)) {
                warn!(workflow_id = %workflow_id, error = %e, "could not archive workflow results");
            }
        }

        debug!(workflow_id = %workflow_id, keep_results, "workflow cleaned up");
        let _ = self.bus.emit(AgencyEvent::WorkflowCleaned {
            workflow_id: workflow_id.clone(),
            keep_results,
        });
        true
    }
}

fn validate_definition(definition: &WorkflowDefinition) -> Result<()> {
    for (index, step) in definition.steps.iter().enumerate() {
        if let Step::Parallel(branches) = step {
            if branches.is_empty() {
                return Err(AgencyError::configuration(format!(
                    "parallel step {index} has no branches"
                )));
            }
            let mut seen = HashSet::new();
            for branch in branches {
                if !seen.insert(&branch.job_id) {
                    return Err(AgencyError::configuration(format!(
                        "parallel step {index} runs job '{}' twice",
                        branch.job_id
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Everything a step needs, cloneable into spawned branch tasks.
#[derive(Clone)]
struct StepRunner {
    jobs: Arc<JobRegistry>,
    runs: Runs,
    scope: Arc<MemoryScope>,
    workflow_id: WorkflowId,
    token: Uuid,
}

impl StepRunner {
    /// Make sure the step's job has a brief and a live assignment.
    ///
    /// A job completed by an earlier run gets a fresh record. A failed job
    /// is refused; it has to be retried or cleaned up first.
    fn prepare(&self, step: &JobStep) -> Result<()> {
        if !self.jobs.has_brief(&step.job_id) {
            debug!(job_id = %step.job_id, "creating brief for workflow step");
            self.jobs.create_brief(step.job_id.clone(), step.default_brief());
        }
        match self.jobs.status(&step.job_id) {
            Some(JobStatus::Assigned | JobStatus::InProgress) => {}
            _ => {
                let _ = self.jobs.renew(
                    step.job_id.clone(),
                    step.assignee_id.clone(),
                    step.assignee_type,
                )?;
            }
        }
        Ok(())
    }

    async fn run_job(&self, step: &JobStep, current: &Value) -> Result<Value> {
        self.prepare(step)?;
        self.execute(step, current).await
    }

    async fn execute(&self, step: &JobStep, current: &Value) -> Result<Value> {
        let mut inputs = step.inputs.clone();
        let _ = inputs.insert("previousStepData".into(), current.clone());

        let result = self.jobs.execute(&step.job_id, Value::Object(inputs)).await?;

        if self.jobs.status(&step.job_id) == Some(JobStatus::Failed) {
            let message = self
                .jobs
                .job(&step.job_id)
                .and_then(|j| j.error)
                .unwrap_or_else(|| "job failed".to_string());
            return Err(AgencyError::Execution(message));
        }

        self.record(&step.job_id, result.clone(), true);
        Ok(result)
    }

    async fn run_parallel(&self, branches: &[JobStep], current: &Value) -> Result<Value> {
        for branch in branches {
            self.prepare(branch)?;
        }

        let handles: Vec<_> = branches
            .iter()
            .map(|branch| {
                let runner = self.clone();
                let branch = branch.clone();
                let current = current.clone();
                tokio::spawn(
                    async move {
                        let result = runner.execute(&branch, &current).await?;
                        Ok::<_, AgencyError>((branch.job_id, result))
                    }
                    .in_current_span(),
                )
            })
            .collect();

        let joined = try_join_all(handles.into_iter().map(|handle| async move {
            handle
                .await
                .map_err(|e| AgencyError::Execution(format!("parallel branch task failed: {e}")))?
        }))
        .await?;

        Ok(Value::Object(
            joined
                .into_iter()
                .map(|(job_id, result)| (job_id.to_string(), result))
                .collect(),
        ))
    }

    fn record(&self, job_id: &JobId, value: Value, remember: bool) {
        match self.runs.get_mut(&self.workflow_id) {
            Some(mut run) if run.run_token == self.token => {
                let _ = run.results.insert(job_id.to_string(), value.clone());
            }
            _ => {
                debug!(job_id = %job_id, "run no longer current, dropping step result");
                return;
            }
        }
        if remember {
            if let Err(e) = self.scope.remember(format!("results.{job_id}"), value) {
                warn!(job_id = %job_id, error = %e, "could not store step result in workflow scope");
            }
        }
    }
}
