//! Email agent: drafting, approval, sending, inbox read/list.
//!
//! The action is chosen by the planner's hint when present, otherwise by
//! an LLM classifier with a keyword fallback. Drafts always pass through
//! the approval state machine; the only path that bypasses a
//! human-initiated approval is the auto-approve shortcut taken when the
//! user's intent is clearly "send" on a still-pending draft.

pub mod approval;
pub mod drafter;
pub mod safety;
pub mod sender;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use crate::agents::{Agent, AgentContext};
use crate::clients::mail::{ListQuery, MailClient};
use crate::clients::ProviderError;
use crate::llm::{ChatTurn, CompletionRequest, LlmGateway};
use crate::store::{DraftStatus, EmailTone, SessionStore};
use crate::types::{AgentKind, AgentResult, Clock};

use approval::{ApprovalDecision, ApprovalWorkflow};
use drafter::{DraftRequest, EmailDrafter};
use safety::SafetyGuard;
use sender::{SendError, SendWorker};

/// Feedback string recorded by the send shortcut.
const AUTO_APPROVE_FEEDBACK: &str = "auto-approved for send";

/// Default inbox page size when the request names no count.
const DEFAULT_READ_RESULTS: u32 = 5;

/// Supported actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmailAction {
    Read,
    List,
    Draft,
    Update,
    Approve,
    Send,
}

impl EmailAction {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "read" => Some(Self::Read),
            "list" => Some(Self::List),
            "draft" => Some(Self::Draft),
            "update" => Some(Self::Update),
            "approve" => Some(Self::Approve),
            "send" => Some(Self::Send),
            _ => None,
        }
    }
}

/// Email agent wired to the gateway, mail client, store and workflow.
pub struct EmailAgent {
    gateway: Arc<LlmGateway>,
    mail: Arc<dyn MailClient>,
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    drafter: EmailDrafter,
    workflow: Arc<ApprovalWorkflow>,
    sender: SendWorker,
    guard: SafetyGuard,
}

impl EmailAgent {
    pub fn new(
        gateway: Arc<LlmGateway>,
        mail: Arc<dyn MailClient>,
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
        workflow: Arc<ApprovalWorkflow>,
    ) -> Self {
        Self {
            drafter: EmailDrafter::new(Arc::clone(&gateway)),
            sender: SendWorker::new(Arc::clone(&mail), Arc::clone(&store), Arc::clone(&clock)),
            gateway,
            mail,
            store,
            clock,
            workflow,
            guard: SafetyGuard::new(),
        }
    }

    /// Pick the action: explicit planner hint, then LLM classifier, then
    /// keyword fallback.
    async fn determine_action(&self, ctx: &AgentContext<'_>) -> EmailAction {
        if let Some(action) = ctx.action_hint().and_then(EmailAction::parse) {
            return action;
        }

        match self.classify_action_llm(ctx).await {
            Some(action) => {
                info!(action = ?action, "LLM classified email action");
                action
            }
            None => classify_action_keywords(ctx.user_request()),
        }
    }

    async fn classify_action_llm(&self, ctx: &AgentContext<'_>) -> Option<EmailAction> {
        let draft_context = match self.store.list_drafts(ctx.session_id(), None).await {
            Ok(drafts) => {
                let recent: Vec<String> = drafts
                    .iter()
                    .take(3)
                    .map(|d| format!("{}: {}", d.id, d.status))
                    .collect();
                recent.join(", ")
            }
            Err(_) => String::new(),
        };

        let prompt = format!(
            "Analyze this user request and determine the most appropriate email action.\n\n\
             Available actions:\n\
             - draft: Create a new email draft\n\
             - approve: Approve a pending email draft\n\
             - send: Send an approved email draft\n\
             - list: Show/list email drafts\n\
             - update: Modify an existing draft\n\
             - read: Read/fetch emails from inbox\n\n\
             Context:\n\
             - Recent conversation: {}\n\
             - Draft status: {draft_context}\n\n\
             User request: \"{}\"\n\n\
             Respond with ONLY the action name (draft/approve/send/list/update/read).",
            ctx.history_lines(3),
            ctx.user_request()
        );

        let request = CompletionRequest::text(
            vec![
                ChatTurn::system(
                    "You are an email action classifier. Respond with only the action name.",
                ),
                ChatTurn::user(prompt),
            ],
            0.1,
        )
        .with_max_tokens(10);

        match self.gateway.complete(&request, ctx.cancel).await {
            Ok(text) => EmailAction::parse(&text),
            Err(e) => {
                warn!(error = %e, "LLM action classification failed, using keywords");
                None
            }
        }
    }

    async fn handle_draft(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let tone = ctx
            .param_str("tone")
            .map(EmailTone::parse_lenient)
            .unwrap_or_default();
        let request = DraftRequest {
            user_request: ctx.user_request(),
            session_id: ctx.session_id(),
            user_id: ctx.scratchpad.user_id.as_deref(),
            recipient: ctx.param_str("recipient"),
            subject: ctx.param_str("subject"),
            tone,
            history: &ctx.scratchpad.history,
        };

        let mut draft = self
            .drafter
            .draft_email(&request, self.clock.now(), ctx.cancel)
            .await;

        let safety = self.guard.check_draft(&draft);
        draft.safety_checks = Some(safety.to_json());

        if let Err(e) = self.store.save_draft(&draft).await {
            return AgentResult::error(format!("Failed to save email draft: {e}"));
        }

        let user = ctx.scratchpad.user_id.as_deref().unwrap_or("anonymous");
        if let Err(e) = self
            .workflow
            .request_approval(&draft.id, ctx.session_id(), user)
            .await
        {
            return AgentResult::error(format!("Failed to request draft approval: {e}"));
        }

        let mut message = "Email draft created and awaiting approval".to_owned();
        if !safety.flags.is_empty() {
            let shown: Vec<String> = safety.flags.iter().take(3).cloned().collect();
            message.push_str(&format!(
                "\n\nSafety checks: {} issue(s) found:\n{}",
                safety.flags.len(),
                shown
                    .iter()
                    .map(|f| format!("  - {f}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        AgentResult::success(
            message,
            serde_json::json!({
                "draft_id": draft.id,
                "to": draft.to,
                "subject": draft.subject,
                "body": draft.body,
                "status": DraftStatus::PendingApproval.as_str(),
                "safety_checks": draft.safety_checks,
                "created_at": draft.created_at.to_rfc3339(),
            }),
        )
        .with_collaboration(serde_json::json!({"draft_id": draft.id}))
    }

    async fn handle_approve(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let draft_id = match self
            .resolve_draft_id(ctx, &[DraftStatus::PendingApproval])
            .await
        {
            Some(id) => id,
            None => return AgentResult::error("No pending drafts found to approve."),
        };

        let decision = ApprovalDecision {
            draft_id: draft_id.clone(),
            user_id: ctx
                .scratchpad
                .user_id
                .clone()
                .unwrap_or_else(|| "anonymous".to_owned()),
            approved: true,
            feedback: Some("Approved via agent".to_owned()),
            decided_at: self.clock.now(),
            modifications: None,
        };

        match self.workflow.process_decision(&decision).await {
            Ok(draft) => AgentResult::success(
                format!("Draft {draft_id} approved. Ready to send."),
                serde_json::json!({
                    "draft_id": draft.id,
                    "status": draft.status.as_str(),
                    "approved_at": draft.approved_at.map(|t| t.to_rfc3339()),
                }),
            ),
            Err(e) => AgentResult::error(format!("Failed to approve draft: {e}")),
        }
    }

    async fn handle_send(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let Some(token) = ctx.provider_token() else {
            return AgentResult::error(
                "Authentication required. Please sign in with Google to send emails.",
            )
            .with_collaboration(serde_json::json!({"requires_auth": true}));
        };

        let resolved = self
            .resolve_draft_id(
                ctx,
                &[
                    DraftStatus::Approved,
                    DraftStatus::Scheduled,
                    DraftStatus::PendingApproval,
                ],
            )
            .await;
        // Nothing sendable: fall back to the newest draft of any status so
        // a send against a terminal draft reports its terminal state
        // instead of "no drafts".
        let resolved = match resolved {
            Some(id) => Some(id),
            None => self
                .store
                .list_drafts(ctx.session_id(), None)
                .await
                .ok()
                .and_then(|drafts| drafts.first().map(|d| d.id.clone())),
        };
        let Some(draft_id) = resolved else {
            return AgentResult::error(
                "No drafts found to send. Please create an email draft first.",
            );
        };

        let draft = match self.store.get_draft(&draft_id, None).await {
            Ok(draft) => draft,
            Err(e) => return AgentResult::error(format!("Failed to load draft: {e}")),
        };

        // Send intent on a still-pending draft: the auto-approve shortcut.
        if draft.status == DraftStatus::PendingApproval {
            if let Err(e) = self
                .workflow
                .auto_approve(&draft_id, AUTO_APPROVE_FEEDBACK)
                .await
            {
                return AgentResult::error(format!(
                    "Failed to approve draft before sending: {e}"
                ));
            }
        }

        let session = draft.session_id.clone();
        match self
            .sender
            .send_draft(&draft_id, Some(&session), token, ctx.cancel)
            .await
        {
            Ok(sent) => AgentResult::success(
                "Email sent successfully",
                serde_json::json!({
                    "draft_id": sent.id,
                    "provider_message_id": sent.provider_message_id,
                    "provider_thread_id": sent.provider_thread_id,
                    "sent_at": sent.sent_at.map(|t| t.to_rfc3339()),
                }),
            )
            .with_collaboration(serde_json::json!({
                "draft_info": {
                    "to": sent.to,
                    "subject": sent.subject,
                    "body": sent.body,
                }
            })),
            Err(e) => {
                let retry_count = self
                    .store
                    .get_draft(&draft_id, Some(&session))
                    .await
                    .map(|d| d.retry_count)
                    .unwrap_or(0);
                let message = match &e {
                    SendError::Provider(p) if p.is_auth() => {
                        "Authentication required. Please sign in with Google to send emails."
                            .to_owned()
                    }
                    other => format!("Failed to send email: {other}"),
                };
                AgentResult {
                    status: crate::types::AgentStatus::Error,
                    message,
                    result: serde_json::json!({
                        "draft_id": draft_id,
                        "error": e.to_string(),
                        "retry_count": retry_count,
                    }),
                    collaboration_data: serde_json::Value::Null,
                }
            }
        }
    }

    async fn handle_list(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let status = ctx
            .param_str("status")
            .and_then(|s| serde_json::from_value::<DraftStatus>(serde_json::json!(s)).ok());

        match self.store.list_drafts(ctx.session_id(), status).await {
            Ok(drafts) => {
                let listing: Vec<serde_json::Value> = drafts
                    .iter()
                    .map(|d| {
                        serde_json::json!({
                            "draft_id": d.id,
                            "to": d.to,
                            "subject": d.subject,
                            "status": d.status.as_str(),
                            "created_at": d.created_at.to_rfc3339(),
                            "updated_at": d.updated_at.to_rfc3339(),
                        })
                    })
                    .collect();
                AgentResult::success(
                    format!("Found {} draft(s)", listing.len()),
                    serde_json::json!({"drafts": listing, "count": listing.len()}),
                )
            }
            Err(e) => AgentResult::error(format!("Failed to list drafts: {e}")),
        }
    }

    async fn handle_update(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let draft_id = match self
            .resolve_draft_id(ctx, &[DraftStatus::PendingApproval, DraftStatus::Drafted])
            .await
        {
            Some(id) => id,
            None => return AgentResult::error("No draft found to update."),
        };

        let mut draft = match self.store.get_draft(&draft_id, None).await {
            Ok(draft) => draft,
            Err(e) => return AgentResult::error(format!("Failed to load draft: {e}")),
        };
        if draft.status.is_terminal() {
            return AgentResult::error(format!(
                "Draft {draft_id} is already {} and can no longer be edited",
                draft.status
            ));
        }

        let modifications = extract_modifications(ctx);
        self.drafter
            .update_draft(
                &mut draft,
                &modifications,
                Some(ctx.user_request()),
                self.clock.now(),
                ctx.cancel,
            )
            .await;

        // Safety runs again after every update.
        let safety = self.guard.check_draft(&draft);
        draft.safety_checks = Some(safety.to_json());

        if let Err(e) = self.store.save_draft(&draft).await {
            return AgentResult::error(format!("Failed to save updated draft: {e}"));
        }

        AgentResult::success(
            format!("Draft {draft_id} updated successfully"),
            serde_json::json!({
                "draft_id": draft.id,
                "to": draft.to,
                "subject": draft.subject,
                "body": draft.body,
                "updated_at": draft.updated_at.to_rfc3339(),
            }),
        )
    }

    async fn handle_read(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let Some(token) = ctx.provider_token() else {
            return AgentResult::error(
                "Authentication required. Please sign in with Google to read emails.",
            )
            .with_collaboration(serde_json::json!({"requires_auth": true}));
        };

        let request_lower = ctx.user_request().to_lowercase();

        // Single-message path when the request names a message id.
        if let Some(message_id) = parse_message_id(ctx.user_request()) {
            return match self.mail.get(token, &message_id, ctx.cancel).await {
                Ok(email) => AgentResult::success(
                    format!("Fetched email: {}", email.subject),
                    serde_json::json!({
                        "email": email,
                        "action": "read_single",
                    }),
                ),
                Err(ProviderError::NotFound(_)) => {
                    AgentResult::error(format!("Email {message_id} not found"))
                }
                Err(e) => AgentResult::error(format!("Failed to read email: {e}")),
            };
        }

        let max_results = ctx
            .param_str("max_results")
            .and_then(|v| v.parse::<u32>().ok())
            .or_else(|| parse_email_count(&request_lower))
            .unwrap_or(DEFAULT_READ_RESULTS)
            .min(crate::clients::mail::MAX_LIST_RESULTS);

        let query = ctx
            .param_str("query")
            .map(ToOwned::to_owned)
            .or_else(|| compose_inbox_query(&request_lower));

        let list_query = ListQuery {
            max_results,
            query: query.clone(),
        };
        match self.mail.list(token, &list_query, ctx.cancel).await {
            Ok(emails) => {
                let total = emails.len();
                let message = if total == 0 {
                    match &query {
                        Some(q) => format!("No emails found matching '{q}'"),
                        None => "No emails found in inbox".to_owned(),
                    }
                } else {
                    let plural = if total == 1 { "" } else { "s" };
                    match &query {
                        Some(q) => format!("Found {total} email{plural} matching '{q}'"),
                        None => format!("Found {total} email{plural}"),
                    }
                };
                let summaries: Vec<serde_json::Value> = emails
                    .iter()
                    .take(10)
                    .map(|e| {
                        serde_json::json!({
                            "id": e.id,
                            "from": e.from,
                            "subject": e.subject,
                            "date": e.date,
                            "snippet": e.snippet,
                            "is_unread": e.is_unread,
                        })
                    })
                    .collect();
                AgentResult::success(
                    message,
                    serde_json::json!({
                        "emails": emails,
                        "email_summaries": summaries,
                        "total_count": total,
                        "query": query,
                        "action": "read_list",
                    }),
                )
            }
            Err(e) if e.is_auth() => AgentResult::error(
                "Authentication required. Please sign in with Google to read emails.",
            ),
            Err(e) => AgentResult::error(format!("Failed to fetch emails: {e}")),
        }
    }

    /// Planner-provided draft id, else the newest draft whose status is in
    /// `preferred` (checked in order).
    async fn resolve_draft_id(
        &self,
        ctx: &AgentContext<'_>,
        preferred: &[DraftStatus],
    ) -> Option<String> {
        if let Some(id) = ctx
            .params()
            .and_then(|p| p.get("draft_id"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
        {
            return Some(id.to_owned());
        }
        if let Some(id) = ctx.param_str("draft_id") {
            return Some(id.to_owned());
        }

        for status in preferred {
            if let Ok(drafts) = self.store.list_drafts(ctx.session_id(), Some(*status)).await {
                if let Some(newest) = drafts.first() {
                    info!(draft_id = %newest.id, status = %status, "resolved most recent draft");
                    return Some(newest.id.clone());
                }
            }
        }
        None
    }
}

#[async_trait]
impl Agent for EmailAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Email
    }

    async fn process(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let action = self.determine_action(ctx).await;
        info!(action = ?action, "email agent dispatching");
        match action {
            EmailAction::Draft => self.handle_draft(ctx).await,
            EmailAction::Approve => self.handle_approve(ctx).await,
            EmailAction::Send => self.handle_send(ctx).await,
            EmailAction::List => self.handle_list(ctx).await,
            EmailAction::Update => self.handle_update(ctx).await,
            EmailAction::Read => self.handle_read(ctx).await,
        }
    }
}

/// Keyword fallback when the classifier is unavailable or unclear.
fn classify_action_keywords(request: &str) -> EmailAction {
    let lower = request.to_lowercase();

    if ["approve", "accept", "confirm send"]
        .iter()
        .any(|w| lower.contains(w))
    {
        EmailAction::Approve
    } else if [
        "send email",
        "send the email",
        "send it",
        "send mail",
        "send the mail",
    ]
    .iter()
    .any(|w| lower.contains(w))
    {
        EmailAction::Send
    } else if ["list", "show", "drafts", "pending"]
        .iter()
        .any(|w| lower.contains(w))
    {
        EmailAction::List
    } else if ["update", "change", "edit", "modify"]
        .iter()
        .any(|w| lower.contains(w))
    {
        EmailAction::Update
    } else if ["read", "fetch", "get", "inbox", "emails", "messages"]
        .iter()
        .any(|w| lower.contains(w))
    {
        EmailAction::Read
    } else {
        EmailAction::Draft
    }
}

/// Modifications block from the planner hint, if present.
fn extract_modifications(ctx: &AgentContext<'_>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(mods) = ctx
        .params()
        .and_then(|p| p.get("modifications"))
        .and_then(|m| m.as_object())
    {
        for (key, value) in mods {
            if let Some(s) = value.as_str() {
                out.insert(key.clone(), s.to_owned());
            }
        }
    }
    out
}

static COUNT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(\d+)\s+emails?",
        r"(\d+)\s+latest",
        r"latest\s+(\d+)",
        r"get\s+(\d+)",
        r"show\s+(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("count regex"))
    .collect()
});

/// Parse "get 5 emails" / "latest 3" style counts. Singular phrases imply 1.
fn parse_email_count(request_lower: &str) -> Option<u32> {
    for re in COUNT_PATTERNS.iter() {
        if let Some(caps) = re.captures(request_lower) {
            if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                return Some(n.min(crate::clients::mail::MAX_LIST_RESULTS));
            }
        }
    }
    let singular = ["latest email", "recent email", "new email", "last email"];
    if singular.iter().any(|p| request_lower.contains(p)) {
        return Some(1);
    }
    None
}

static MESSAGE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bid\s+([A-Za-z0-9]{10,})",
        r"(?i)\bmessage\s+id\s+([A-Za-z0-9]{10,})",
        r"(?i)\bemail\s+id\s+([A-Za-z0-9]{10,})",
        r"(?i)\bmessage\s+([A-Za-z0-9]{16,})",
        r"(?i)\bemail\s+([A-Za-z0-9]{16,})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("message id regex"))
    .collect()
});

/// Parse a provider message id out of natural language. Ids must contain
/// a digit so long plain words never match.
fn parse_message_id(request: &str) -> Option<String> {
    for re in MESSAGE_ID_PATTERNS.iter() {
        if let Some(caps) = re.captures(request) {
            if let Some(candidate) = caps.get(1).map(|m| m.as_str()) {
                if candidate.chars().any(|c| c.is_ascii_digit()) {
                    return Some(candidate.to_owned());
                }
            }
        }
    }
    None
}

static FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"from\s+(\S+)").expect("from regex"));

/// Stop words excluded from keyword extraction.
const STOP_WORDS: &[&str] = &[
    "the", "and", "but", "for", "with", "about", "into", "through", "during", "before", "after",
    "above", "below", "from", "down", "out", "off", "over", "under", "again", "further", "then",
    "once", "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few",
    "more", "most", "other", "some", "such", "nor", "not", "only", "own", "same", "than", "too",
    "very", "can", "will", "just", "should", "now", "get", "show", "list", "find", "search",
    "look", "check", "see", "mail", "email", "emails", "message", "messages", "received", "sent",
    "got", "have", "has", "had", "does", "did", "are", "was", "were", "been", "being", "you",
    "your", "yours", "they", "them", "their", "latest", "recent", "new", "unread", "inbox",
    "read", "fetch", "please", "what", "which", "who", "that", "this", "these", "those",
];

/// Stop-word-filtered content tokens, at most three.
fn extract_search_keywords(request_lower: &str) -> Vec<String> {
    request_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(ToOwned::to_owned)
        .take(3)
        .collect()
}

/// Compose a provider search query from natural language:
/// unread/important/starred predicates, a `from X` filter, then remaining
/// content tokens OR-joined across subject and body.
fn compose_inbox_query(request_lower: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();

    if request_lower.contains("unread") {
        parts.push("is:unread".to_owned());
    } else if request_lower.contains("important") {
        parts.push("is:important".to_owned());
    } else if request_lower.contains("starred") {
        parts.push("is:starred".to_owned());
    }

    if let Some(caps) = FROM_RE.captures(request_lower) {
        if let Some(sender) = caps.get(1).map(|m| m.as_str()) {
            parts.push(format!("from:{sender}"));
        }
    }

    let keywords = extract_search_keywords(request_lower);
    if !keywords.is_empty() {
        let joined = keywords.join(" OR ");
        parts.push(format!("subject:({joined}) OR {joined}"));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}
