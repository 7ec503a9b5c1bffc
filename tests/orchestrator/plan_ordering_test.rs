//! Plan-shape properties: a plan naming every registered agent runs all
//! five after the precedence re-sort, and the transcript gains exactly
//! one user and one agent message.

use tokio_util::sync::CancellationToken;

use crate::harness::{build, plan_json, request, MockCalendar, MockMail};

#[tokio::test]
async fn test_plan_runs_all_agents_in_canonical_order() {
    // The planner names every agent out of order; precedence re-sorts and
    // all five produce a result slot.
    let routes = vec![
        (
            "You are the Orchestrator",
            plan_json(
                &[
                    "calendar_agent",
                    "general_agent",
                    "email_agent",
                    "notes_agent",
                    "file_agent",
                ],
                "multi_step",
                serde_json::json!({"email_agent": {"action": "list", "parameters": {}}}),
            ),
        ),
        (
            "Extract the calendar operation",
            serde_json::json!({"action": "view_all"}).to_string(),
        ),
        (
            "Extract the notes operation",
            serde_json::json!({"action": "view_all"}).to_string(),
        ),
    ];
    let harness = build(routes, MockCalendar::default(), MockMail::sending_ok());

    let response = harness
        .orchestrator
        .handle(request("do everything", "s1"), &CancellationToken::new()) // no file upload
        .await
        .expect("handle");

    assert_eq!(response.agents_involved.len(), 5, "all five agents ran");
    // The transcript carries exactly one user and one agent message.
    let history = harness.store.load_history("s1", 10).await.expect("history");
    assert_eq!(history.len(), 2);
}
