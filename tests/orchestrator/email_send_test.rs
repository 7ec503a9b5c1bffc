//! Draft/approve/send through the full orchestrator: the two-turn
//! draft-then-"send it" flow with the auto-approve shortcut, and the
//! permanent send failure that must never be retried or re-sent.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use maestro::agents::email::approval::ApprovalWorkflow;
use maestro::agents::email::EmailAgent;
use maestro::agents::AgentRegistry;
use maestro::clients::mail::MailClient;
use maestro::llm::LlmGateway;
use maestro::orchestrator::compiler::ResponseCompiler;
use maestro::orchestrator::planner::Planner;
use maestro::orchestrator::Orchestrator;
use maestro::store::{DraftStatus, EmailDraft};
use maestro::types::{Clock, SystemClock};

use crate::harness::{build, plan_json, request, MockCalendar, MockMail, RouterLlm};

fn email_routes(plan_agents: &[&str], action: &str) -> Vec<(&'static str, String)> {
    vec![
        (
            "You are the Orchestrator",
            plan_json(
                plan_agents,
                "email_draft",
                serde_json::json!({
                    "email_agent": {"action": action, "parameters": {"recipient": "bob@example.com"}}
                }),
            ),
        ),
        (
            "expert email writer",
            serde_json::json!({
                "to": "bob@example.com",
                "subject": "Q4 review",
                "body": "Hi Bob,\n\nCould we find time next week to walk through the Q4 review?\n\nBest,\nAlex",
                "reasoning": "direct request"
            })
            .to_string(),
        ),
    ]
}

#[tokio::test]
async fn test_draft_then_approve_and_send() {
    // Turn A: draft.
    let harness = build(
        email_routes(&["email_agent"], "draft"),
        MockCalendar::default(),
        MockMail::sending_ok(),
    );

    let response = harness
        .orchestrator
        .handle(
            request("Draft an email to bob@example.com about Q4 review", "s1"),
            &CancellationToken::new(),
        )
        .await
        .expect("draft turn");

    assert!(response.response.contains("**To:** bob@example.com"));
    assert!(response.response.contains("awaiting your approval"));
    let sidecar = response.draft_created.expect("draft sidecar");
    let draft_id = sidecar["id"].as_str().expect("id").to_owned();

    let stored = harness
        .store
        .get_draft(&draft_id, Some("s1"))
        .await
        .expect("stored draft");
    assert_eq!(stored.status, DraftStatus::PendingApproval);
    let safety = stored.safety_checks.expect("safety recorded");
    assert_eq!(safety["passed"], true);

    // Turn B, same session: "send it" auto-approves and sends. A fresh
    // orchestrator over the same store routes the planner to send.
    let (orchestrator2, mail2) = {
        let routes = email_routes(&["email_agent"], "send");
        let shared_store = Arc::clone(&harness.store);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let gateway = Arc::new(LlmGateway::new(Box::new(RouterLlm::new(routes))));
        let mail = Arc::new(MockMail::sending_ok());
        let workflow = Arc::new(ApprovalWorkflow::new(
            Arc::clone(&shared_store),
            Arc::clone(&clock),
        ));
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(EmailAgent::new(
            Arc::clone(&gateway),
            Arc::clone(&mail) as Arc<dyn MailClient>,
            Arc::clone(&shared_store),
            Arc::clone(&clock),
            workflow,
        )));
        (
            Orchestrator::new(
                Arc::new(registry),
                Planner::new(Arc::clone(&gateway)),
                ResponseCompiler::new(gateway),
                Arc::clone(&shared_store),
                clock,
            ),
            mail,
        )
    };

    let response = orchestrator2
        .handle(request("send it", "s1"), &CancellationToken::new())
        .await
        .expect("send turn");

    assert!(
        response.response.starts_with("✅ Email Sent"),
        "response was: {}",
        response.response
    );
    assert_eq!(mail2.send_count(), 1);

    let sent = harness
        .store
        .get_draft(&draft_id, Some("s1"))
        .await
        .expect("sent draft");
    assert_eq!(sent.status, DraftStatus::Sent);
    assert_eq!(sent.provider_message_id.as_deref(), Some("gm-msg-99"));
    assert!(sent.sent_at.is_some());
    assert_eq!(
        sent.approval_feedback.as_deref(),
        Some("auto-approved for send"),
        "the send shortcut records its feedback"
    );
}

#[tokio::test]
async fn test_send_fails_permanently_then_refuses_resend() {
    // Seed an approved draft directly.
    let harness = build(
        email_routes(&["email_agent"], "send"),
        MockCalendar::default(),
        MockMail::failing_permanently(),
    );
    let now = chrono::Utc::now();
    let mut draft = EmailDraft::new(
        "s1",
        "bob@example.com",
        "Q4 review",
        "Hi Bob, the numbers are in.",
        now,
    );
    draft
        .transition(DraftStatus::PendingApproval, now)
        .expect("ok");
    draft.transition(DraftStatus::Approved, now).expect("ok");
    harness.store.save_draft(&draft).await.expect("seed");

    let response = harness
        .orchestrator
        .handle(request("send it", "s1"), &CancellationToken::new())
        .await
        .expect("send turn");

    assert!(
        response.response.starts_with("Failed to send email"),
        "response was: {}",
        response.response
    );
    assert_eq!(harness.mail.send_count(), 1, "permanent errors are not retried");

    let failed = harness
        .store
        .get_draft(&draft.id, Some("s1"))
        .await
        .expect("failed draft");
    assert_eq!(failed.status, DraftStatus::Failed);
    assert_eq!(failed.retry_count, 0);

    // A second "send it" must observe the terminal state and stay off the wire.
    let response = harness
        .orchestrator
        .handle(request("send it", "s1"), &CancellationToken::new())
        .await
        .expect("second send turn");
    assert!(
        response.response.contains("already failed") || response.response.contains("Failed"),
        "response was: {}",
        response.response
    );
    assert_eq!(harness.mail.send_count(), 1, "terminal drafts are never re-sent");
}
