//! Planner scenarios through the `Agency` facade.

use std::sync::Arc;

use agency_core::mock::{MockReply, MockRunnable};
use agency_core::structured::ParseTier;
use agency_core::{AgencyError, AssigneeId, AssigneeType, JobId};
use agency_jobs::{Brief, JobStatus};
use agency_runtime::{Agency, PlannedTask, default_plan};
use assert_matches::assert_matches;
use parking_lot::Mutex;
use serde_json::json;

const PICNIC_REPLY: &str = r#"Great idea! Here's how I would break down the picnic:

[
  {"name": "choose_location", "description": "Pick a park with shade and tables", "inputs": ["date"], "outputs": ["location"]},
  {"name": "plan_menu", "description": "Decide on food and drinks", "inputs": ["guests"], "outputs": ["menu"]},
  {"name": "buy_supplies", "description": "Shop for food, plates and a blanket", "inputs": ["menu"], "outputs": ["supplies"]},
  {"name": "invite_guests", "description": "Send invitations with time and place", "inputs": ["location", "guests"], "outputs": ["rsvps"]}
]

Let me know if you want to adjust anything."#;

fn planner_agency(reply: MockReply) -> (Agency, AssigneeId) {
    let agency = Agency::default();
    agency.register_agent("planner", Arc::new(MockRunnable::always(reply)));
    (agency, AssigneeId::from_raw("planner"))
}

#[tokio::test]
async fn picnic_plan_is_extracted_from_prose() {
    let (agency, planner) = planner_agency(MockReply::text(PICNIC_REPLY));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _ = agency.subscribe("planner:planned", move |e| {
        sink.lock().push(e.payload.clone());
        Ok(())
    });

    let plan = agency.plan_from_goal(&planner, "plan a picnic").await.unwrap();

    assert_eq!(plan.source, ParseTier::Extracted);
    let names: Vec<&str> = plan.tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["choose_location", "plan_menu", "buy_supplies", "invite_guests"]
    );
    assert_eq!(
        plan.tasks[3],
        PlannedTask {
            name: "invite_guests".into(),
            description: "Send invitations with time and place".into(),
            inputs: vec!["location".into(), "guests".into()],
            outputs: vec!["rsvps".into()],
        }
    );

    assert_eq!(plan.job_ids.len(), 4);
    for id in &plan.job_ids {
        let job = agency.jobs().job(id).unwrap();
        assert_eq!(job.status, JobStatus::Assigned);
        assert_eq!(job.assignee_id, planner);
    }

    let payload = events.lock()[0].clone();
    assert_eq!(payload["goal"], "plan a picnic");
    assert_eq!(payload["source"], "extracted");
    assert_eq!(payload["jobIds"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn planned_jobs_can_be_executed() {
    let agency = Agency::default();
    agency.register_agent(
        "planner",
        Arc::new(MockRunnable::new([
            MockReply::Ok(json!([{"name": "only_task", "description": "do the thing"}])),
            MockReply::text("task output"),
        ])),
    );
    let plan = agency
        .plan_from_goal(&AssigneeId::from_raw("planner"), "one step goal")
        .await
        .unwrap();

    let value = agency.execute_job(&plan.job_ids[0], json!({})).await.unwrap();

    assert_eq!(value, "task output");
}

#[tokio::test]
async fn prose_reply_yields_default_plan() {
    let (agency, planner) = planner_agency(MockReply::text(
        "A picnic sounds lovely. You should pick a sunny day and bring snacks.",
    ));

    let plan = agency.plan_from_goal(&planner, "plan a picnic").await.unwrap();

    assert_eq!(plan.source, ParseTier::Fallback);
    assert_eq!(plan.tasks, default_plan());
    assert_eq!(plan.tasks.len(), 3);
    assert_eq!(agency.jobs().jobs(Some(JobStatus::Assigned)).len(), 3);
}

#[tokio::test]
async fn prose_reply_makes_replanning_fail() {
    let (agency, planner) = planner_agency(MockReply::text("I am not sure what to suggest."));
    agency.create_brief("book_venue", Brief::new("book_venue", "reserve a pavilion"));
    let _ = agency
        .assign_job("book_venue", planner.clone(), AssigneeType::Agent)
        .unwrap();

    let err = agency
        .replan_failed_job(&JobId::from_raw("book_venue"), "pavilion fully booked")
        .await
        .unwrap_err();

    assert_matches!(err, AgencyError::Planning(_));
    assert_eq!(agency.jobs().jobs(None).len(), 1);
}

#[tokio::test]
async fn replanning_after_failure_creates_tagged_alternatives() {
    let agency = Agency::default();
    agency.register_agent(
        "venue",
        Arc::new(MockRunnable::new([
            MockReply::fail("fully booked"),
            MockReply::text(r#"[{"name": "find_backup_park", "description": "Find another park"}]"#),
        ])),
    );
    agency.create_brief("book_venue", Brief::new("book_venue", "reserve a pavilion"));
    let _ = agency
        .assign_job("book_venue", "venue", AssigneeType::Agent)
        .unwrap();
    let err = agency
        .execute_job(&JobId::from_raw("book_venue"), json!({}))
        .await
        .unwrap_err();

    // A failed job cannot be handed to someone else; alternatives go to
    // its own assignee.
    assert_matches!(
        agency.assign_job("book_venue", "venue", AssigneeType::Agent),
        Err(AgencyError::InvalidState(_))
    );
    let plan = agency
        .replan_failed_job(&JobId::from_raw("book_venue"), &err.to_string())
        .await
        .unwrap();

    assert_eq!(plan.source, ParseTier::Direct);
    let job = agency.jobs().job(&plan.job_ids[0]).unwrap();
    assert_eq!(job.brief.title, "find_backup_park");
    assert_eq!(job.brief.fields["originalJobId"], "book_venue");
    assert_eq!(job.assignee_id, AssigneeId::from_raw("venue"));
    assert_eq!(
        agency.jobs().status(&JobId::from_raw("book_venue")),
        Some(JobStatus::Failed)
    );
}
