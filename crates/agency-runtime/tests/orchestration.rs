//! End-to-end scenarios through the `Agency` facade.

use std::sync::Arc;
use std::time::Duration;

use agency_core::mock::{MockReply, MockRunnable};
use agency_core::{
    AccessMode, AgencyError, AssigneeType, JobId, RunContext, RunError, Runnable, ScopeId,
    WorkflowId,
};
use agency_jobs::{Brief, JobStatus};
use agency_runtime::{Agency, JobStep, Step, WorkflowDefinition, WorkflowStatus};
use agency_settings::{AgencySettings, load_settings_from_path};
use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::Barrier;

fn agency() -> Agency {
    Agency::new(AgencySettings::default())
}

fn job(id: &str) -> JobId {
    JobId::from_raw(id)
}

fn record(agency: &Agency, names: &[&str]) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for name in names {
        let sink = Arc::clone(&seen);
        let _ = agency.subscribe(*name, move |e| {
            sink.lock().push(e.name.clone());
            Ok(())
        });
    }
    seen
}

// ── Jobs ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn job_lifecycle_through_facade() {
    let agency = agency();
    let seen = record(
        &agency,
        &["job:assigned", "job:started", "job:completed", "job:cleaned"],
    );
    agency.register_agent("writer", Arc::new(MockRunnable::returning(json!("draft v1"))));
    agency.create_brief("draft", Brief::new("Draft", "write a draft"));
    let assigned = agency
        .assign_job("draft", "writer", AssigneeType::Agent)
        .unwrap();
    assert_eq!(assigned.status, JobStatus::Assigned);

    let result = agency.execute_job(&job("draft"), json!({})).await.unwrap();
    assert_eq!(result, "draft v1");
    assert_eq!(agency.jobs().status(&job("draft")), Some(JobStatus::Completed));

    assert!(agency.cleanup_job(&job("draft"), true));
    assert_eq!(
        agency.global_memory().recall("job:draft:results"),
        Some(json!("draft v1"))
    );
    assert_eq!(
        *seen.lock(),
        vec!["job:assigned", "job:started", "job:completed", "job:cleaned"]
    );
}

#[tokio::test]
async fn retry_on_completed_job_is_rejected() {
    let agency = agency();
    agency.register_agent("writer", Arc::new(MockRunnable::returning(json!("ok"))));
    agency.create_brief("j", Brief::new("j", "do it"));
    let _ = agency.assign_job("j", "writer", AssigneeType::Agent).unwrap();
    let _ = agency.execute_job(&job("j"), json!({})).await.unwrap();

    let err = agency.retry_job(&job("j"), json!({})).await.unwrap_err();

    assert_matches!(err, AgencyError::InvalidState(ref m) if m.contains("not in failed state"));
    assert_eq!(agency.jobs().status(&job("j")), Some(JobStatus::Completed));
}

#[tokio::test]
async fn retry_uses_configured_default_bound() {
    let mut settings = AgencySettings::default();
    settings.jobs.default_max_retries = 1;
    let agency = Agency::new(settings);
    agency.register_agent("flaky", Arc::new(MockRunnable::failing("503")));
    agency.create_brief("j", Brief::new("j", "call the service"));
    let _ = agency.assign_job("j", "flaky", AssigneeType::Agent).unwrap();

    assert!(agency.execute_job(&job("j"), json!({})).await.is_err());
    assert!(agency.retry_job(&job("j"), json!({})).await.is_err());
    let err = agency.retry_job(&job("j"), json!({})).await.unwrap_err();

    assert_matches!(
        err,
        AgencyError::RetryLimitExceeded {
            retry_count: 1,
            max_retries: 1,
            ..
        }
    );
    let record = agency.jobs().job(&job("j")).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.retry_count, 1);
}

#[tokio::test]
async fn retry_after_transient_failure_succeeds() {
    let agency = agency();
    agency.register_agent(
        "flaky",
        Arc::new(MockRunnable::new([
            MockReply::fail("timeout"),
            MockReply::text("recovered"),
        ])),
    );
    agency.create_brief("j", Brief::new("j", "call the service"));
    let _ = agency.assign_job("j", "flaky", AssigneeType::Agent).unwrap();

    assert!(agency.execute_job(&job("j"), json!({})).await.is_err());
    let value = agency
        .retry_job_with_limit(&job("j"), 3, json!({}))
        .await
        .unwrap();

    assert_eq!(value, "recovered");
    let record = agency.jobs().job(&job("j")).unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.error.is_none());
}

#[tokio::test]
async fn job_error_handler_substitutes_but_status_stays_failed() {
    let agency = agency();
    agency.register_agent("broken", Arc::new(MockRunnable::failing("bad gateway")));
    agency.create_brief("j", Brief::new("j", "fetch"));
    let _ = agency.assign_job("j", "broken", AssigneeType::Agent).unwrap();
    agency.on_job_error("j", |job, err| json!({"fallback": job.id, "why": err.to_string()}));

    let value = agency.execute_job(&job("j"), json!({})).await.unwrap();

    assert_eq!(value["fallback"], "j");
    let record = agency.jobs().job(&job("j")).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.unwrap().contains("bad gateway"));
}

#[tokio::test]
async fn cleanup_only_succeeds_for_finished_jobs() {
    let agency = agency();
    agency.register_agent("ok", Arc::new(MockRunnable::returning(json!(1))));
    agency.register_agent("bad", Arc::new(MockRunnable::failing("x")));
    for (id, who) in [("assigned", "ok"), ("completed", "ok"), ("failed", "bad")] {
        agency.create_brief(id, Brief::new(id, "work"));
        let _ = agency.assign_job(id, who, AssigneeType::Agent).unwrap();
    }
    let _ = agency.execute_job(&job("completed"), json!({})).await;
    let _ = agency.execute_job(&job("failed"), json!({})).await;

    assert!(!agency.cleanup_job(&job("assigned"), false));
    assert_eq!(agency.jobs().status(&job("assigned")), Some(JobStatus::Assigned));
    assert!(agency.jobs().context(&job("assigned")).is_some());

    assert!(agency.cleanup_job(&job("completed"), false));
    assert!(agency.cleanup_job(&job("failed"), false));
    assert!(!agency.cleanup_job(&job("missing"), false));
    assert!(agency.global_memory().recall("job:completed:results").is_none());
}

#[tokio::test(start_paused = true)]
async fn cleanup_of_running_job_is_refused() {
    let agency = Arc::new(agency());
    agency.register_agent(
        "slow",
        Arc::new(MockRunnable::always(MockReply::text("late").after_ms(100))),
    );
    agency.create_brief("j", Brief::new("j", "wait"));
    let _ = agency.assign_job("j", "slow", AssigneeType::Agent).unwrap();

    let runner = Arc::clone(&agency);
    let handle = tokio::spawn(async move { runner.execute_job(&job("j"), json!({})).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(agency.jobs().status(&job("j")), Some(JobStatus::InProgress));
    assert!(!agency.cleanup_job(&job("j"), true));

    assert_eq!(handle.await.unwrap().unwrap(), "late");
    assert!(agency.cleanup_job(&job("j"), true));
}

// ── Memory ──────────────────────────────────────────────────────────────────

#[test]
fn read_only_grant_blocks_only_granted_key() {
    let agency = agency();
    let global = agency.global_memory();
    global.remember("apiBase", json!("https://example.test")).unwrap();
    let target = agency.create_memory_scope("team-a");

    let report = agency
        .share_memory(
            &ScopeId::global(),
            target.id(),
            ["apiBase", "missing"],
            AccessMode::ReadOnly,
        )
        .unwrap();
    assert_eq!(report.granted, vec!["apiBase"]);
    assert_eq!(report.skipped, vec!["missing"]);

    let err = target.remember("apiBase", json!("https://evil.test")).unwrap_err();
    assert_matches!(err, AgencyError::ReadOnlyKey { .. });
    assert_eq!(target.recall("apiBase"), Some(json!("https://example.test")));

    target.remember("notes", json!("free to write")).unwrap();
    assert_eq!(target.recall("notes"), Some(json!("free to write")));
}

#[test]
fn shared_values_are_snapshots() {
    let agency = agency();
    let source = agency.create_memory_scope("src");
    let target = agency.create_memory_scope("dst");
    source.remember("k", json!(1)).unwrap();

    let _ = agency
        .share_memory(source.id(), target.id(), ["k"], AccessMode::ReadWrite)
        .unwrap();
    source.remember("k", json!(2)).unwrap();

    assert_eq!(target.recall("k"), Some(json!(1)));
    target.remember("k", json!(3)).unwrap();
    assert_eq!(source.recall("k"), Some(json!(2)));
}

#[test]
fn sharing_with_unknown_scope_is_configuration_error() {
    let agency = agency();
    let err = agency
        .share_memory(
            &ScopeId::global(),
            &ScopeId::from_raw("nowhere"),
            ["k"],
            AccessMode::ReadOnly,
        )
        .unwrap_err();
    assert_matches!(err, AgencyError::Configuration(_));
}

// ── Workflows ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_step_receives_first_step_result() {
    let agency = agency();
    agency.register_agent("first", Arc::new(MockRunnable::returning(json!({"a": 1}))));
    let second = Arc::new(MockRunnable::returning(json!("done")));
    agency.register_agent("second", second.clone());
    let def = WorkflowDefinition::new()
        .then(Step::sequential(JobStep::new("s1", "first")))
        .then(Step::sequential(JobStep::new("s2", "second")));

    let results = agency.execute_workflow(&def, "wf", json!({})).await.unwrap();

    assert_eq!(results, json!({"s1": {"a": 1}, "s2": "done"}));
    let (input, _) = second.last_call().unwrap();
    assert_eq!(input["previousStepData"], json!({"a": 1}));
}

#[tokio::test(start_paused = true)]
async fn parallel_branch_failure_fails_the_workflow() {
    let agency = agency();
    agency.register_agent(
        "b1",
        Arc::new(MockRunnable::always(MockReply::text("one").after_ms(5))),
    );
    agency.register_agent("b2", Arc::new(MockRunnable::failing("branch two exploded")));
    agency.register_agent(
        "b3",
        Arc::new(MockRunnable::always(MockReply::text("three").after_ms(5))),
    );
    let def = WorkflowDefinition::new().then(Step::parallel([
        JobStep::new("p1", "b1"),
        JobStep::new("p2", "b2"),
        JobStep::new("p3", "b3"),
    ]));

    let err = agency.execute_workflow(&def, "wf", json!({})).await.unwrap_err();
    assert_matches!(err, AgencyError::WorkflowFailed { step: 0, .. });

    let run = agency.workflow(&WorkflowId::from_raw("wf")).unwrap();
    assert_eq!(run.status, WorkflowStatus::Failed);
    assert!(run.error.unwrap().contains("branch two exploded"));
    assert!(!run.results.contains_key("p2"));

    // Surviving branches are not cancelled and may still record results.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let run = agency.workflow(&WorkflowId::from_raw("wf")).unwrap();
    assert_eq!(run.status, WorkflowStatus::Failed);
    assert_eq!(run.results.get("p1"), Some(&json!("one")));
    assert_eq!(run.results.get("p3"), Some(&json!("three")));
    assert_eq!(agency.jobs().status(&job("p2")), Some(JobStatus::Failed));
}

/// Records its start, then blocks until every branch sharing the barrier
/// has started.
struct Rendezvous {
    barrier: Arc<Barrier>,
    started: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Runnable for Rendezvous {
    async fn run(&self, _input: Value, ctx: &RunContext) -> Result<Value, RunError> {
        self.started.lock().push(ctx.job_id.to_string());
        let _ = self.barrier.wait().await;
        Ok(json!(ctx.assignee_id.as_str()))
    }
}

#[tokio::test]
async fn parallel_branches_all_start_before_any_finishes() {
    let agency = agency();
    let barrier = Arc::new(Barrier::new(3));
    let started = Arc::new(Mutex::new(Vec::new()));
    for name in ["x", "y", "z"] {
        agency.register_agent(
            name,
            Arc::new(Rendezvous {
                barrier: Arc::clone(&barrier),
                started: Arc::clone(&started),
            }),
        );
    }
    let def = WorkflowDefinition::new().then(Step::parallel([
        JobStep::new("jx", "x"),
        JobStep::new("jy", "y"),
        JobStep::new("jz", "z"),
    ]));

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        agency.execute_workflow(&def, "wf", json!({})),
    )
    .await
    .expect("a branch was awaited before the others started")
    .unwrap();

    assert_eq!(results, json!({"jx": "x", "jy": "y", "jz": "z"}));
    let mut started = started.lock().clone();
    started.sort();
    assert_eq!(started, vec!["jx", "jy", "jz"]);
}

#[tokio::test]
async fn conditional_skip_and_workflow_cleanup() {
    let agency = agency();
    let seen = record(&agency, &["workflow:stepSkipped", "workflow:cleaned"]);
    agency.register_team("crew", Arc::new(MockRunnable::returning(json!("handled"))));
    let def = WorkflowDefinition::new()
        .then(Step::sequential(JobStep::new("triage", "crew").team()))
        .then(Step::conditional(
            |data, _| data == &json!("escalate"),
            JobStep::new("escalate", "crew").team(),
        ));

    let results = agency.execute_workflow(&def, "ticket-7", json!({})).await.unwrap();
    assert_eq!(results["escalate"]["skipped"], true);

    let id = WorkflowId::from_raw("ticket-7");
    assert!(agency.cleanup_workflow(&id, true));
    assert!(agency.memory_scope(&ScopeId::from_raw("ticket-7")).is_none());
    assert_eq!(
        agency.global_memory().recall("workflow:ticket-7:results"),
        Some(results)
    );
    assert_eq!(*seen.lock(), vec!["workflow:stepSkipped", "workflow:cleaned"]);
}

#[tokio::test]
async fn workflow_error_handler_through_facade() {
    let agency = agency();
    agency.register_agent("bad", Arc::new(MockRunnable::failing("nope")));
    agency.on_workflow_error(|run, _| json!({"failedAt": run.current_step}));
    let def = WorkflowDefinition::new().then(Step::sequential(JobStep::new("j", "bad")));

    let value = agency.execute_workflow(&def, "wf", json!({})).await.unwrap();

    assert_eq!(value, json!({"failedAt": 0}));
    assert_eq!(
        agency.workflow(&WorkflowId::from_raw("wf")).unwrap().status,
        WorkflowStatus::Failed
    );
}

// ── Events ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn panicking_listener_does_not_break_execution() {
    let agency = agency();
    let _ = agency.subscribe("job:completed", |_| panic!("listener bug"));
    let _ = agency.subscribe("job:completed", |_| Err(anyhow::anyhow!("listener error")));
    let seen = record(&agency, &["job:completed"]);
    agency.register_agent("w", Arc::new(MockRunnable::returning(json!(1))));
    agency.create_brief("j", Brief::new("j", "g"));
    let _ = agency.assign_job("j", "w", AssigneeType::Agent).unwrap();

    assert_eq!(agency.execute_job(&job("j"), json!({})).await.unwrap(), 1);
    assert_eq!(seen.lock().len(), 1);
}

// ── Settings ────────────────────────────────────────────────────────────────

#[test]
fn agency_built_from_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"jobs": {"defaultMaxRetries": 7}}"#).unwrap();

    let settings = load_settings_from_path(&path).unwrap();
    let agency = Agency::new(settings);

    assert_eq!(agency.settings().jobs.default_max_retries, 7);
    assert_eq!(agency.settings().memory.max_history, 1000);
}
