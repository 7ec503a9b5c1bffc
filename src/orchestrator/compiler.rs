//! Response compilation.
//!
//! Two regimes. With two or more agent results, typed formatters are
//! concatenated in a fixed order (notes, email, calendar, file, general)
//! and errored slots are skipped. With a single result, a dedicated
//! per-agent formatter renders it -- email's distinguishes drafted, sent,
//! and inbox listings -- and anything unrecognized falls through to an
//! LLM synthesis call at temperature 0.1.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::llm::{ChatTurn, CompletionRequest, LlmGateway};
use crate::types::{AgentKind, AgentResult, Scratchpad};

/// Formatter order for the multi-agent path.
const MULTI_AGENT_ORDER: [AgentKind; 5] = [
    AgentKind::Notes,
    AgentKind::Email,
    AgentKind::Calendar,
    AgentKind::File,
    AgentKind::General,
];

/// Compiled output plus the structured draft sidecar.
#[derive(Debug, Clone)]
pub struct CompiledResponse {
    pub text: String,
    /// Present when an email draft was created this request, so a UI can
    /// render it structurally alongside the text.
    pub draft_created: Option<serde_json::Value>,
}

/// Response compiler over the gateway.
pub struct ResponseCompiler {
    gateway: Arc<LlmGateway>,
}

impl ResponseCompiler {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Compile the final user-facing response.
    pub async fn compile(
        &self,
        scratchpad: &Scratchpad,
        cancel: &CancellationToken,
    ) -> CompiledResponse {
        let draft_created = extract_draft_sidecar(scratchpad);
        let results = &scratchpad.partial_results;

        let text = if results.len() > 1 {
            self.compile_multi(scratchpad, cancel).await
        } else if let Some((kind, result)) = results.iter().next() {
            match format_single(*kind, result) {
                Some(text) => text,
                None => self.synthesize(scratchpad, cancel).await,
            }
        } else {
            self.synthesize(scratchpad, cancel).await
        };

        CompiledResponse {
            text,
            draft_created,
        }
    }

    async fn compile_multi(
        &self,
        scratchpad: &Scratchpad,
        cancel: &CancellationToken,
    ) -> String {
        let results = &scratchpad.partial_results;
        let mut parts: Vec<String> = Vec::new();

        for kind in MULTI_AGENT_ORDER {
            let Some(result) = results.get(&kind) else {
                continue;
            };
            if !result.is_success() {
                continue;
            }
            match kind {
                AgentKind::Email => parts.push(format_email_part(result)),
                _ => parts.push(result.message.clone()),
            }
        }

        if !parts.is_empty() {
            return parts.join("\n\n");
        }

        // Every slot errored: show the agents' own messages verbatim.
        let errors: Vec<String> = results.values().map(|r| r.message.clone()).collect();
        if !errors.is_empty() {
            return errors.join("\n");
        }
        self.synthesize(scratchpad, cancel).await
    }

    /// LLM-mediated synthesis from whatever partial results exist.
    async fn synthesize(&self, scratchpad: &Scratchpad, cancel: &CancellationToken) -> String {
        let results_json = serde_json::to_string(&scratchpad.partial_results)
            .unwrap_or_else(|_| "{}".to_owned());
        let prompt = format!(
            "You are an expert at synthesizing responses from multiple AI agents. \
             Given the results from various agents and the original user request, \
             create a comprehensive, helpful response.\n\n\
             Original request: {}\n\
             Workflow type: {}\n\
             Agent results: {results_json}\n\n\
             Create a response that summarizes what was accomplished with SPECIFIC \
             DETAILS from each agent, shows the ACTUAL CONTENT that was created \
             (document titles, URLs, key information), and offers next steps when \
             relevant. Include actual content, not generic descriptions.",
            scratchpad.user_request, scratchpad.plan.workflow_type,
        );
        let request = CompletionRequest::text(vec![ChatTurn::user(prompt)], 0.1);
        match self.gateway.complete(&request, cancel).await {
            Ok(text) => text.trim().to_owned(),
            Err(e) => {
                warn!(error = %e, "synthesis fallback failed");
                // Last resort: raw messages so the user sees something real.
                scratchpad
                    .partial_results
                    .values()
                    .map(|r| r.message.clone())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }
}

/// Draft sidecar: present when an email draft was created (not sent) this
/// request.
fn extract_draft_sidecar(scratchpad: &Scratchpad) -> Option<serde_json::Value> {
    let email = scratchpad.partial_results.get(&AgentKind::Email)?;
    if !email.is_success() {
        return None;
    }
    let result = &email.result;
    let draft_id = result.get("draft_id")?.as_str()?;
    // A sent email also carries draft_id; only a fresh draft gets the sidecar.
    if result.get("provider_message_id").and_then(|v| v.as_str()).is_some() {
        return None;
    }
    result.get("to")?;
    Some(serde_json::json!({
        "id": draft_id,
        "to": result.get("to"),
        "subject": result.get("subject"),
        "body": result.get("body"),
        "status": result.get("status"),
        "created_at": result.get("created_at"),
    }))
}

/// Email slot rendering for the multi-agent path.
fn format_email_part(result: &AgentResult) -> String {
    let data = &result.result;
    let is_fresh_draft = data.get("draft_id").and_then(|v| v.as_str()).is_some()
        && data
            .get("provider_message_id")
            .and_then(|v| v.as_str())
            .is_none();
    if is_fresh_draft {
        let body = data.get("body").and_then(|v| v.as_str()).unwrap_or_default();
        let preview: String = body.chars().take(300).collect();
        return format!(
            "📧 **Email Draft Created**\n\
             **To:** {}\n\
             **Subject:** {}\n\
             **Preview:** {preview}...",
            data.get("to").and_then(|v| v.as_str()).unwrap_or("N/A"),
            data.get("subject").and_then(|v| v.as_str()).unwrap_or("N/A"),
        );
    }
    result.message.clone()
}

/// Single-agent formatters. `None` falls through to LLM synthesis.
fn format_single(kind: AgentKind, result: &AgentResult) -> Option<String> {
    match kind {
        AgentKind::Email => format_email_single(result),
        AgentKind::General => Some(result.message.clone()),
        AgentKind::Calendar | AgentKind::Notes | AgentKind::File => {
            Some(result.message.clone())
        }
    }
}

/// The email agent's dedicated formatter: sent, drafted, listed, read,
/// or a tailored auth sentence on failure.
fn format_email_single(result: &AgentResult) -> Option<String> {
    if !result.is_success() {
        if result.message.contains("Authentication required") {
            return Some("Please sign in with Google to access your emails.".to_owned());
        }
        return Some(result.message.clone());
    }

    let data = &result.result;

    // Sent this request.
    if let Some(message_id) = data.get("provider_message_id").and_then(|v| v.as_str()) {
        let mut lines = vec!["✅ Email Sent".to_owned()];
        if let Some(info) = result.collaboration_data.get("draft_info") {
            lines.push(format!(
                "**To:** {}",
                info.get("to").and_then(|v| v.as_str()).unwrap_or("N/A")
            ));
            lines.push(format!(
                "**Subject:** {}",
                info.get("subject").and_then(|v| v.as_str()).unwrap_or("N/A")
            ));
            lines.push(format!("**Message ID:** {message_id}"));
            if let Some(body) = info.get("body").and_then(|v| v.as_str()) {
                let preview: String = body.chars().take(200).collect();
                lines.push(format!("\n**Content Preview:** {preview}..."));
            }
        } else {
            if let Some(draft_id) = data.get("draft_id").and_then(|v| v.as_str()) {
                lines.push(format!("**Draft ID:** {draft_id}"));
            }
            lines.push(format!("**Message ID:** {message_id}"));
        }
        return Some(lines.join("\n"));
    }

    // Draft created this request.
    if data.get("draft_id").and_then(|v| v.as_str()).is_some()
        && data.get("to").and_then(|v| v.as_str()).is_some()
    {
        let body = data.get("body").and_then(|v| v.as_str()).unwrap_or_default();
        let preview: String = body.chars().take(500).collect();
        let mut lines = vec![
            "📧 **Email Draft Created**".to_owned(),
            format!(
                "**To:** {}",
                data.get("to").and_then(|v| v.as_str()).unwrap_or("N/A")
            ),
            format!(
                "**Subject:** {}",
                data.get("subject").and_then(|v| v.as_str()).unwrap_or("N/A")
            ),
            format!(
                "**Status:** {}",
                data.get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("pending_approval")
            ),
            "\n**Email Content:**".to_owned(),
            preview,
        ];
        if body.chars().count() > 500 {
            lines.push("\n... (content truncated)".to_owned());
        }
        lines.push("\n✅ The draft is awaiting your approval.".to_owned());
        return Some(lines.join("\n"));
    }

    // Inbox listing.
    if let Some(summaries) = data.get("email_summaries").and_then(|v| v.as_array()) {
        let total = data
            .get("total_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or_else(|| u64::try_from(summaries.len()).unwrap_or(0));
        if summaries.is_empty() {
            return Some(result.message.clone());
        }
        let query = data.get("query").and_then(|v| v.as_str());
        let plural = if total == 1 { "" } else { "s" };
        let mut lines = vec![match query {
            Some(q) if !q.is_empty() => format!("I found {total} email{plural} matching '{q}':"),
            _ => format!("I found {total} email{plural}:"),
        }];
        for (i, email) in summaries.iter().take(5).enumerate() {
            let n = i.saturating_add(1);
            let from = email.get("from").and_then(|v| v.as_str()).unwrap_or("Unknown");
            let subject = email
                .get("subject")
                .and_then(|v| v.as_str())
                .unwrap_or("(No Subject)");
            let unread = if email
                .get("is_unread")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
            {
                " (unread)"
            } else {
                ""
            };
            lines.push(format!("{n}. From: {from}"));
            lines.push(format!("   Subject: {subject}{unread}"));
            if let Some(snippet) = email.get("snippet").and_then(|v| v.as_str()) {
                if !snippet.is_empty() {
                    lines.push(format!("   Preview: {snippet}..."));
                }
            }
            lines.push(String::new());
        }
        if total > 5 {
            lines.push(format!("... and {} more emails.", total.saturating_sub(5)));
        }
        return Some(lines.join("\n"));
    }

    // Single message read.
    if data.get("email").is_some() {
        return Some(result.message.clone());
    }

    // Draft listing or approval confirmations use the agent's message.
    if data.get("drafts").is_some() || data.get("approved_at").is_some() {
        return Some(result.message.clone());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmProvider};
    use crate::types::ExecutionPlan;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct CannedProvider(&'static str);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn complete(&self, _r: &CompletionRequest) -> Result<String, LlmError> {
            Ok(self.0.to_owned())
        }
    }

    fn compiler() -> ResponseCompiler {
        ResponseCompiler::new(Arc::new(LlmGateway::new(Box::new(CannedProvider(
            "synthesized response",
        )))))
    }

    fn scratchpad(results: BTreeMap<AgentKind, AgentResult>) -> Scratchpad {
        Scratchpad {
            user_request: "do things".to_owned(),
            session_id: "s1".to_owned(),
            plan: ExecutionPlan {
                workflow_type: "multi_step".to_owned(),
                ..ExecutionPlan::default()
            },
            partial_results: results,
            ..Scratchpad::default()
        }
    }

    fn draft_result() -> AgentResult {
        AgentResult::success(
            "Email draft created and awaiting approval",
            serde_json::json!({
                "draft_id": "d1",
                "to": "bob@example.com",
                "subject": "Q4 review",
                "body": "Hi Bob, let's review Q4 results together.",
                "status": "pending_approval",
                "created_at": "2025-10-24T10:00:00Z",
            }),
        )
    }

    fn sent_result() -> AgentResult {
        AgentResult::success(
            "Email sent successfully",
            serde_json::json!({
                "draft_id": "d1",
                "provider_message_id": "gm-1",
                "provider_thread_id": "thr-1",
                "sent_at": "2025-10-24T10:05:00Z",
            }),
        )
        .with_collaboration(serde_json::json!({
            "draft_info": {"to": "bob@example.com", "subject": "Q4 review", "body": "Hi Bob"}
        }))
    }

    #[tokio::test]
    async fn test_single_draft_formatter() {
        let mut results = BTreeMap::new();
        results.insert(AgentKind::Email, draft_result());
        let pad = scratchpad(results);

        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        assert!(compiled.text.contains("**To:** bob@example.com"));
        assert!(compiled.text.contains("awaiting your approval"));

        let sidecar = compiled.draft_created.expect("sidecar present");
        assert_eq!(sidecar["id"], "d1");
        assert_eq!(sidecar["to"], "bob@example.com");
        assert_eq!(sidecar["status"], "pending_approval");
    }

    #[tokio::test]
    async fn test_single_sent_formatter() {
        let mut results = BTreeMap::new();
        results.insert(AgentKind::Email, sent_result());
        let pad = scratchpad(results);

        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        assert!(compiled.text.starts_with("✅ Email Sent"));
        assert!(compiled.text.contains("**Message ID:** gm-1"));
        assert!(
            compiled.draft_created.is_none(),
            "sent emails get no draft sidecar"
        );
    }

    #[tokio::test]
    async fn test_single_email_error_shown_verbatim() {
        let mut results = BTreeMap::new();
        results.insert(
            AgentKind::Email,
            AgentResult::error("Failed to send email: permanent provider failure"),
        );
        let pad = scratchpad(results);

        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        assert!(compiled.text.starts_with("Failed to send email"));
    }

    #[tokio::test]
    async fn test_auth_error_is_one_tailored_sentence() {
        let mut results = BTreeMap::new();
        results.insert(
            AgentKind::Email,
            AgentResult::error("Authentication required. Please sign in with Google to read emails."),
        );
        let pad = scratchpad(results);

        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        assert_eq!(
            compiled.text,
            "Please sign in with Google to access your emails."
        );
    }

    #[tokio::test]
    async fn test_inbox_listing_formatter() {
        let mut results = BTreeMap::new();
        results.insert(
            AgentKind::Email,
            AgentResult::success(
                "Found 2 emails",
                serde_json::json!({
                    "email_summaries": [
                        {"from": "sarah@co", "subject": "Q3 Budget", "snippet": "Please review", "is_unread": true},
                        {"from": "github", "subject": "[PR #42]", "snippet": "", "is_unread": false}
                    ],
                    "total_count": 2,
                    "query": null,
                    "action": "read_list",
                }),
            ),
        );
        let pad = scratchpad(results);

        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        assert!(compiled.text.starts_with("I found 2 emails:"));
        assert!(compiled.text.contains("1. From: sarah@co"));
        assert!(compiled.text.contains("Subject: Q3 Budget (unread)"));
    }

    #[tokio::test]
    async fn test_multi_agent_fixed_order() {
        let mut results = BTreeMap::new();
        results.insert(
            AgentKind::Calendar,
            AgentResult::success("Event 'standup' created", serde_json::Value::Null),
        );
        results.insert(
            AgentKind::Notes,
            AgentResult::success("Note 'minutes' created", serde_json::Value::Null),
        );
        results.insert(
            AgentKind::File,
            AgentResult::success("**Document Analysis Complete**", serde_json::Value::Null),
        );
        let pad = scratchpad(results);

        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        let notes_pos = compiled.text.find("Note 'minutes'").expect("notes part");
        let calendar_pos = compiled.text.find("Event 'standup'").expect("calendar part");
        let file_pos = compiled.text.find("Document Analysis").expect("file part");
        assert!(notes_pos < calendar_pos, "notes before calendar");
        assert!(calendar_pos < file_pos, "calendar before file");
    }

    #[tokio::test]
    async fn test_multi_agent_skips_errored_slots() {
        let mut results = BTreeMap::new();
        results.insert(
            AgentKind::File,
            AgentResult::success("**Document Analysis Complete**", serde_json::Value::Null),
        );
        results.insert(AgentKind::Notes, AgentResult::error("Notes agent timed out"));
        let pad = scratchpad(results);

        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        assert!(compiled.text.contains("Document Analysis"));
        assert!(!compiled.text.contains("timed out"), "errored slot skipped");
    }

    #[tokio::test]
    async fn test_multi_agent_all_errors_shown() {
        let mut results = BTreeMap::new();
        results.insert(AgentKind::File, AgentResult::error("file failed"));
        results.insert(AgentKind::Notes, AgentResult::error("notes failed"));
        let pad = scratchpad(results);

        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        assert!(compiled.text.contains("file failed"));
        assert!(compiled.text.contains("notes failed"));
    }

    #[tokio::test]
    async fn test_empty_results_synthesize() {
        let pad = scratchpad(BTreeMap::new());
        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        assert_eq!(compiled.text, "synthesized response");
    }

    #[tokio::test]
    async fn test_multi_agent_draft_part() {
        let mut results = BTreeMap::new();
        results.insert(AgentKind::Email, draft_result());
        results.insert(
            AgentKind::File,
            AgentResult::success("**Document Analysis Complete**", serde_json::Value::Null),
        );
        let pad = scratchpad(results);

        let compiled = compiler().compile(&pad, &CancellationToken::new()).await;
        assert!(compiled.text.contains("📧 **Email Draft Created**"));
        assert!(compiled.text.contains("**To:** bob@example.com"));
        assert!(compiled.draft_created.is_some());
    }
}
