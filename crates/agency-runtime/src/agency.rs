//! The `Agency` facade.
//!
//! One [`Agency`] owns an event bus, the memory scopes, the job registry,
//! the workflow engine and the planner. Nothing is shared between
//! instances.

use std::sync::Arc;

use agency_core::{
    AccessMode, AgencyError, AssigneeId, AssigneeType, Event, JobId, Result, Runnable, ScopeId,
    WorkflowId,
};
use agency_events::{EventBus, Subscription};
use agency_jobs::{Brief, Job, JobRegistry};
use agency_memory::{GrantReport, MemoryManager, MemoryScope};
use agency_settings::{AgencySettings, LoggingSettings};
use serde_json::Value;
use tracing::{debug, info};

use crate::planner::{Plan, Planner};
use crate::workflow::{WorkflowDefinition, WorkflowEngine, WorkflowRun};

/// Install the process-wide `tracing` subscriber described by `settings`.
///
/// Only the first call in a process has any effect.
pub fn init_logging(settings: &LoggingSettings) {
    if settings.json {
        agency_core::logging::init_json_subscriber(&settings.level);
    } else {
        agency_core::logging::init_subscriber(&settings.level);
    }
}

/// Orchestrator over agents, teams, jobs, workflows and shared memory.
pub struct Agency {
    settings: AgencySettings,
    bus: EventBus,
    memory: Arc<MemoryManager>,
    jobs: Arc<JobRegistry>,
    workflows: WorkflowEngine,
    planner: Planner,
}

impl Default for Agency {
    fn default() -> Self {
        Self::new(AgencySettings::default())
    }
}

impl Agency {
    /// Build an orchestrator from explicit settings.
    pub fn new(settings: AgencySettings) -> Self {
        let bus = EventBus::from_settings(&settings.events);
        let memory = Arc::new(MemoryManager::new(bus.clone(), &settings.memory));
        let jobs = Arc::new(JobRegistry::new(bus.clone(), memory.global()));
        let workflows = WorkflowEngine::new(Arc::clone(&jobs), Arc::clone(&memory), bus.clone());
        let planner = Planner::new(Arc::clone(&jobs), bus.clone(), settings.planner.clone());

        debug!(
            max_history = settings.memory.max_history,
            default_max_retries = settings.jobs.default_max_retries,
            "agency created"
        );
        Self {
            settings,
            bus,
            memory,
            jobs,
            workflows,
            planner,
        }
    }

    /// Build an orchestrator from `~/.agency/settings.json` and `AGENCY_*`
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let settings = agency_settings::load_settings()
            .map_err(|e| AgencyError::configuration(format!("loading settings: {e}")))?;
        Ok(Self::new(settings))
    }

    // ── Assignees ───────────────────────────────────────────────────────────

    /// Register a single agent.
    pub fn register_agent(&self, id: impl Into<AssigneeId>, agent: Arc<dyn Runnable>) {
        self.jobs.register_assignee(id, AssigneeType::Agent, agent);
    }

    /// Register a team.
    pub fn register_team(&self, id: impl Into<AssigneeId>, team: Arc<dyn Runnable>) {
        self.jobs.register_assignee(id, AssigneeType::Team, team);
    }

    // ── Jobs ────────────────────────────────────────────────────────────────

    /// Store (or replace) the brief for `job_id`.
    pub fn create_brief(&self, job_id: impl Into<JobId>, brief: Brief) {
        self.jobs.create_brief(job_id, brief);
    }

    /// Assign a briefed job to a registered agent or team.
    pub fn assign_job(
        &self,
        job_id: impl Into<JobId>,
        assignee_id: impl Into<AssigneeId>,
        assignee_type: AssigneeType,
    ) -> Result<Job> {
        self.jobs.assign_job(job_id, assignee_id, assignee_type)
    }

    /// Run an assigned job. See [`JobRegistry::execute`].
    pub async fn execute_job(&self, job_id: &JobId, extra_inputs: Value) -> Result<Value> {
        self.jobs.execute(job_id, extra_inputs).await
    }

    /// Retry a failed job, bounded by `jobs.defaultMaxRetries`.
    pub async fn retry_job(&self, job_id: &JobId, extra_inputs: Value) -> Result<Value> {
        let max_retries = self.settings.jobs.default_max_retries;
        self.jobs.retry_job(job_id, max_retries, extra_inputs).await
    }

    /// Retry a failed job with an explicit bound.
    pub async fn retry_job_with_limit(
        &self,
        job_id: &JobId,
        max_retries: u32,
        extra_inputs: Value,
    ) -> Result<Value> {
        self.jobs.retry_job(job_id, max_retries, extra_inputs).await
    }

    /// Remove a finished job. See [`JobRegistry::cleanup_job`].
    pub fn cleanup_job(&self, job_id: &JobId, keep_results: bool) -> bool {
        self.jobs.cleanup_job(job_id, keep_results)
    }

    /// Register the failure handler for one job.
    pub fn on_job_error<F>(&self, job_id: impl Into<JobId>, handler: F)
    where
        F: Fn(&Job, &AgencyError) -> Value + Send + Sync + 'static,
    {
        self.jobs.set_error_handler(job_id, handler);
    }

    // ── Workflows ───────────────────────────────────────────────────────────

    /// Run a workflow. See [`WorkflowEngine::execute_workflow`].
    pub async fn execute_workflow(
        &self,
        definition: &WorkflowDefinition,
        workflow_id: impl Into<WorkflowId>,
        initial_data: Value,
    ) -> Result<Value> {
        self.workflows
            .execute_workflow(definition, workflow_id, initial_data)
            .await
    }

    /// Register the failure handler for every workflow.
    pub fn on_workflow_error<F>(&self, handler: F)
    where
        F: Fn(&WorkflowRun, &AgencyError) -> Value + Send + Sync + 'static,
    {
        self.workflows.set_error_handler(handler);
    }

    /// Snapshot of a workflow run.
    pub fn workflow(&self, workflow_id: &WorkflowId) -> Option<WorkflowRun> {
        self.workflows.run(workflow_id)
    }

    /// Remove a finished workflow run and its scope.
    pub fn cleanup_workflow(&self, workflow_id: &WorkflowId, keep_results: bool) -> bool {
        self.workflows.cleanup_workflow(workflow_id, keep_results)
    }

    // ── Memory ──────────────────────────────────────────────────────────────

    /// Return memory scope `id`, creating it if needed.
    pub fn create_memory_scope(&self, id: impl Into<ScopeId>) -> Arc<MemoryScope> {
        self.memory.create_scope(id)
    }

    /// Existing memory scope `id`.
    pub fn memory_scope(&self, id: &ScopeId) -> Option<Arc<MemoryScope>> {
        self.memory.scope(id)
    }

    /// The global memory scope.
    pub fn global_memory(&self) -> Arc<MemoryScope> {
        self.memory.global()
    }

    /// Copy `keys` from `source` into `target` with the given access mode.
    pub fn share_memory<I, K>(
        &self,
        source: &ScopeId,
        target: &ScopeId,
        keys: I,
        access_mode: AccessMode,
    ) -> Result<GrantReport>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.memory.share(source, target, keys, access_mode)
    }

    // ── Planning ────────────────────────────────────────────────────────────

    /// Decompose `goal` into jobs on `agent_id`.
    pub async fn plan_from_goal(&self, agent_id: &AssigneeId, goal: &str) -> Result<Plan> {
        info!(agent_id = %agent_id, "planning goal");
        self.planner.plan_from_goal(agent_id, goal).await
    }

    /// Propose alternative jobs for a failed one.
    pub async fn replan_failed_job(&self, job_id: &JobId, error: &str) -> Result<Plan> {
        self.planner.replan_failed_job(job_id, error).await
    }

    // ── Events ──────────────────────────────────────────────────────────────

    /// Listen for events named `name`.
    pub fn subscribe<F>(&self, name: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bus.subscribe(name, listener)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    /// Settings this instance was built with.
    pub fn settings(&self) -> &AgencySettings {
        &self.settings
    }

    /// The event bus.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// The scope registry.
    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// The job registry.
    pub fn jobs(&self) -> &Arc<JobRegistry> {
        &self.jobs
    }

    /// The workflow engine.
    pub fn workflows(&self) -> &WorkflowEngine {
        &self.workflows
    }

    /// The planner.
    pub fn planner(&self) -> &Planner {
        &self.planner
    }
}
