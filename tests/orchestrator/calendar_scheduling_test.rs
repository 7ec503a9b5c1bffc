//! Calendar scheduling through the full orchestrator: timezone-preserving
//! create, fuzzy-reference update grounded against real events, and the
//! low-confidence refusal to mutate.

use tokio_util::sync::CancellationToken;

use maestro::clients::calendar::CalendarEvent;

use crate::harness::{build, event, plan_json, request, MockCalendar, MockMail};

fn three_events() -> Vec<CalendarEvent> {
    vec![
        event("ev-a", "Design Review", "2025-10-24T09:00:00Z", "2025-10-24T10:00:00Z"),
        event("ev-x", "Client Call", "2025-10-24T10:00:00Z", "2025-10-24T10:30:00Z"),
        event("ev-b", "1:1 with Sam", "2025-10-24T15:00:00Z", "2025-10-24T15:30:00Z"),
    ]
}

#[tokio::test]
async fn test_schedule_meeting_with_timezone() {
    let routes = vec![
        (
            "You are the Orchestrator",
            plan_json(&["calendar_agent"], "schedule_meeting", serde_json::json!({})),
        ),
        (
            "Extract the calendar operation",
            serde_json::json!({
                "action": "create",
                "title": "standup meeting",
                "start": "2025-10-28T11:00:00+05:30",
                "end": null,
            })
            .to_string(),
        ),
    ];
    let harness = build(routes, MockCalendar::default(), MockMail::sending_ok());

    let response = harness
        .orchestrator
        .handle(
            request("Schedule a standup meeting on Oct 28 at 11 AM IST", "s1"),
            &CancellationToken::new(),
        )
        .await
        .expect("handle");

    // The IST offset is preserved and the 30-minute default applied.
    let created = harness.calendar.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].start, "2025-10-28T11:00:00+05:30");
    assert_eq!(created[0].end, "2025-10-28T11:30:00+05:30");
    assert_eq!(created[0].title, "standup meeting");

    assert!(
        response.response.contains("Event 'standup meeting' created"),
        "response was: {}",
        response.response
    );
}

#[tokio::test]
async fn test_update_by_fuzzy_reference() {
    let routes = vec![
        (
            "You are the Orchestrator",
            plan_json(&["calendar_agent"], "schedule_meeting", serde_json::json!({})),
        ),
        (
            "Extract the calendar operation",
            serde_json::json!({
                "action": "update",
                "event_query": "the client call",
                "start": "2025-10-24T12:00:00",
            })
            .to_string(),
        ),
        (
            "Pick the best match",
            serde_json::json!({"matched_id": "ev-x", "confidence": 0.92, "reason": "title match"})
                .to_string(),
        ),
    ];
    let calendar = MockCalendar {
        upcoming: three_events(),
        ..MockCalendar::default()
    };
    let harness = build(routes, calendar, MockMail::sending_ok());

    let response = harness
        .orchestrator
        .handle(
            request("move the client call to 12pm", "s1"),
            &CancellationToken::new(),
        )
        .await
        .expect("handle");

    let updated = harness.calendar.updated.lock().await;
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].0, "ev-x", "only the grounded id is mutated");
    assert_eq!(updated[0].1.start.as_deref(), Some("2025-10-24T12:00:00"));

    assert!(
        response
            .response
            .contains("Successfully updated event 'Client Call'"),
        "response was: {}",
        response.response
    );
}

#[tokio::test]
async fn test_low_confidence_blocks_mutation() {
    let routes = vec![
        (
            "You are the Orchestrator",
            plan_json(&["calendar_agent"], "schedule_meeting", serde_json::json!({})),
        ),
        (
            "Extract the calendar operation",
            serde_json::json!({
                "action": "update",
                "event_query": "the client call",
                "start": "2025-10-24T12:00:00",
            })
            .to_string(),
        ),
        (
            "Pick the best match",
            serde_json::json!({"matched_id": null, "confidence": 0.2, "reason": "no match"})
                .to_string(),
        ),
    ];
    let calendar = MockCalendar {
        upcoming: three_events(),
        ..MockCalendar::default()
    };
    let harness = build(routes, calendar, MockMail::sending_ok());

    let response = harness
        .orchestrator
        .handle(
            request("move the client call to 12pm", "s1"),
            &CancellationToken::new(),
        )
        .await
        .expect("handle");

    assert!(
        harness.calendar.updated.lock().await.is_empty(),
        "no update may be attempted on a low-confidence match"
    );
    assert!(
        response.response.starts_with("Could not find a matching event"),
        "response was: {}",
        response.response
    );
}
