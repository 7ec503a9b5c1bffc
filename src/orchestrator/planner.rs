//! Conversation-aware execution planning.
//!
//! The planner asks the gateway for a rigid JSON plan, keeps only agents
//! that parse into the registry enumeration (first occurrence wins), then
//! appends keyword-implied agents unless the model declined with
//! `no_action`. Finally the three precedence pairs are enforced by a
//! stable re-sort: file before email, email before calendar, file before
//! notes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::llm::{ChatTurn, CompletionRequest, LlmError, LlmGateway};
use crate::types::{AgentKind, ExecutionPlan, HistoryEntry};

/// Keyword sets that imply an agent when the planner missed it.
fn keyword_map() -> [(AgentKind, &'static [&'static str]); 5] {
    [
        (
            AgentKind::Email,
            &[
                "email",
                "mail",
                "inbox",
                "unread",
                "gmail",
                "latest email",
                "recent email",
                "send email",
                "draft email",
                "compose",
            ],
        ),
        (
            AgentKind::Calendar,
            &[
                "calendar",
                "meeting",
                "schedule",
                "reschedule",
                "appointment",
                "event",
                "availability",
                "time slot",
                "book",
                "invite",
            ],
        ),
        (
            AgentKind::File,
            &[
                "file",
                "document",
                "pdf",
                "docx",
                "ppt",
                "slide",
                "slides",
                "summarize",
                "extract",
                "analyze",
                "report",
            ],
        ),
        (
            AgentKind::Notes,
            &[
                "note", "notes", "notebook", "remember", "save this", "to-do", "todo",
                "task list", "minutes",
            ],
        ),
        (
            AgentKind::General,
            &[
                "question", "answer", "explain", "help me", "plan", "planning", "strategy",
                "goal", "how to", "what is",
            ],
        ),
    ]
}

/// Workflow label that disables the keyword fallback.
const NO_ACTION: &str = "no_action";

/// Precedence rank used only when a violation forces a re-sort.
fn precedence_rank(kind: AgentKind) -> u8 {
    match kind {
        AgentKind::File => 0,
        AgentKind::Email | AgentKind::Notes => 1,
        AgentKind::Calendar => 2,
        AgentKind::General => 3,
    }
}

/// Conversation-aware planner over the LLM gateway.
pub struct Planner {
    gateway: Arc<LlmGateway>,
}

impl Planner {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Produce the execution plan for one request.
    pub async fn plan(
        &self,
        user_request: &str,
        history: &[HistoryEntry],
        file_context: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionPlan, LlmError> {
        let history_text = if history.is_empty() {
            "No previous conversation.".to_owned()
        } else {
            history
                .iter()
                .map(HistoryEntry::as_prompt_line)
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = format!(
            "You are the Orchestrator for a multi-agent system. Decide which agents \
             to run and in what order based on the current user request, recent \
             conversation, and available files.\n\n\
             Current date: {date}\n\n\
             Available agents (use only what is needed):\n\
             - calendar_agent: schedule/reschedule/cancel meetings, find availability, list events\n\
             - notes_agent: create/update/search notes, action items, meeting minutes\n\
             - file_agent: read/summarize/extract/analyze documents and files\n\
             - email_agent: read inbox/unread/search, draft/approve/send emails\n\
             - general_agent: handle general tasks, answer questions, create plans\n\n\
             Guidance:\n\
             - Select the minimal set of agents required to satisfy the request.\n\
             - Order agents so dependencies are satisfied (file_agent before \
             email_agent to email a summary; email_agent before calendar_agent to \
             schedule from an email; file_agent before notes_agent to capture a summary).\n\
             - If nothing actionable is required, return an empty list and \
             workflow_type \"no_action\".\n\
             - Prefer single-agent workflows when possible.\n\
             - For email actions: use \"approve\" when the user wants to approve a \
             draft, \"send\" when the user wants to send an email.\n\n\
             Output format (STRICT JSON only; no prose, no markdown):\n\
             {{\n\
               \"agents_to_invoke\": [\"calendar_agent\"],\n\
               \"reasoning\": \"one or two sentences\",\n\
               \"workflow_type\": \"email_search | file_summary | schedule_meeting | notes_capture | multi_step | no_action\",\n\
               \"agent_actions\": {{\n\
                 \"email_agent\": {{\"action\": \"read|draft|approve|send|list|update\", \"parameters\": {{\"query\": \"\", \"recipient\": \"\", \"subject\": \"\", \"tone\": \"\"}}}},\n\
                 \"calendar_agent\": {{\"action\": \"create|update|delete|view_all|view_specific|find_free_slots\", \"parameters\": {{}}}},\n\
                 \"file_agent\": {{\"action\": \"summarize|extract|analyze\", \"parameters\": {{\"query\": \"\", \"summary_mode\": \"\"}}}},\n\
                 \"notes_agent\": {{\"action\": \"create|append|search|list\", \"parameters\": {{\"title\": \"\", \"content\": \"\"}}}},\n\
                 \"general_agent\": {{\"action\": \"task_management|question_answer|planning|general_assistance\", \"parameters\": {{}}}}\n\
               }},\n\
               \"confidence\": 0.0\n\
             }}\n\n\
             Constraints:\n\
             - agents_to_invoke must only contain these exact values: \
             [\"calendar_agent\", \"notes_agent\", \"file_agent\", \"email_agent\", \"general_agent\"].\n\
             - Do not include agents that are not clearly relevant.\n\n\
             {file_context}\n\n\
             Conversation (last messages):\n{history_text}\n\n\
             Current user request:\n{user_request}",
            date = now.format("%Y-%m-%d"),
        );

        let request = CompletionRequest::json(vec![ChatTurn::user(prompt)], 0.1);
        let value = self.gateway.complete_json(&request, cancel).await?;

        let mut plan = parse_plan(&value);
        apply_keyword_fallback(&mut plan, user_request);
        enforce_precedence(&mut plan.agents);

        info!(
            agents = ?plan.agents.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
            workflow_type = %plan.workflow_type,
            confidence = plan.confidence,
            "plan ready"
        );
        Ok(plan)
    }
}

/// Parse the model's JSON into a typed plan, dropping unknown agent names
/// and duplicates (first occurrence preserved).
pub fn parse_plan(value: &serde_json::Value) -> ExecutionPlan {
    let mut agents: Vec<AgentKind> = Vec::new();
    if let Some(names) = value.get("agents_to_invoke").and_then(|v| v.as_array()) {
        for name in names {
            let Some(name) = name.as_str() else { continue };
            let Ok(kind) = name.parse::<AgentKind>() else {
                continue;
            };
            if !agents.contains(&kind) {
                agents.push(kind);
            }
        }
    }

    ExecutionPlan {
        agents,
        reasoning: value
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        workflow_type: value
            .get("workflow_type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned(),
        agent_actions: value
            .get("agent_actions")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default(),
        confidence: value
            .get("confidence")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0),
    }
}

/// Append keyword-implied agents the planner missed. Disabled entirely for
/// `no_action` plans so the model can correctly decline.
pub fn apply_keyword_fallback(plan: &mut ExecutionPlan, user_request: &str) {
    if plan.workflow_type == NO_ACTION {
        info!("planner declined with no_action, skipping keyword fallback");
        return;
    }
    let lower = user_request.to_lowercase();
    for (kind, keywords) in keyword_map() {
        if plan.agents.contains(&kind) {
            continue;
        }
        if keywords.iter().any(|kw| lower.contains(kw)) {
            info!(agent = kind.as_str(), "keyword fallback appended agent");
            plan.agents.push(kind);
        }
    }
}

/// Enforce file->email, email->calendar and file->notes by a stable
/// re-sort, applied only when a pair is actually violated.
pub fn enforce_precedence(agents: &mut [AgentKind]) {
    let violated = |agents: &[AgentKind], before: AgentKind, after: AgentKind| {
        let b = agents.iter().position(|a| *a == before);
        let a = agents.iter().position(|a| *a == after);
        matches!((b, a), (Some(b), Some(a)) if b > a)
    };

    let any_violation = violated(agents, AgentKind::File, AgentKind::Email)
        || violated(agents, AgentKind::Email, AgentKind::Calendar)
        || violated(agents, AgentKind::File, AgentKind::Notes);

    if any_violation {
        agents.sort_by_key(|a| precedence_rank(*a));
    }
}
