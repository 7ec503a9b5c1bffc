//! File summarization handed off to the notes agent: the file pipeline
//! runs over an uploaded document and the notes agent captures the
//! resulting summary in a new provider document.

use tokio_util::sync::CancellationToken;

use maestro::types::AgentKind;

use crate::harness::{build, plan_json, request, MockCalendar, MockMail};

#[tokio::test]
async fn test_file_summary_then_notes_handoff() {
    let routes = vec![
        (
            "You are the Orchestrator",
            plan_json(
                &["file_agent", "notes_agent"],
                "multi_step",
                serde_json::json!({}),
            ),
        ),
        (
            "key insights from this document summary",
            serde_json::json!(["Revenue grew", "Costs fell", "Hiring paused"]).to_string(),
        ),
        (
            "chunk summaries",
            "The quarterly report shows strong revenue growth with falling costs.".to_owned(),
        ),
        (
            "Summarize this text",
            "This chunk describes quarterly results.".to_owned(),
        ),
        (
            "Provide a detailed summary",
            "This chunk describes quarterly results.".to_owned(),
        ),
        (
            "Extract the notes operation",
            serde_json::json!({
                "action": "create",
                "title": "Report Summary",
                "content": ""
            })
            .to_string(),
        ),
        (
            "Write the body for a note",
            "Summary saved: strong revenue growth with falling costs.".to_owned(),
        ),
    ];
    let harness = build(routes, MockCalendar::default(), MockMail::sending_ok());

    // An 18,000+ character text upload chunks into at least 9 pieces.
    let body = "The quarterly results were strong across all regions. ".repeat(340);
    assert!(body.len() >= 18_000);
    let mut req = request("summarize this and save the summary as notes", "s1");
    req.file_blob = Some(body.into_bytes());
    req.file_name = Some("report.txt".to_owned());

    let response = harness
        .orchestrator
        .handle(req, &CancellationToken::new())
        .await
        .expect("handle");

    assert_eq!(response.agents_involved.len(), 2, "both agents ran");
    assert!(response.agents_involved.contains(&AgentKind::File));
    assert!(response.agents_involved.contains(&AgentKind::Notes));

    // The note was created from the file agent's summary.
    let created = harness.docs.created.lock().await;
    assert_eq!(created.len(), 1);
    assert!(created[0].content.contains("revenue growth"));

    // The compiled response carries the summary preview and the new
    // document URL.
    assert!(response.response.contains("Document Analysis"));
    assert!(
        response.response.contains("https://docs.google.com/document/d/doc-new"),
        "response was: {}",
        response.response
    );
}
