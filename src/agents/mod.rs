//! Agent contract and registry.
//!
//! Every agent exposes exactly one operation, `process(ctx) -> AgentResult`.
//! Agents read shared scratchpad fields through [`AgentContext`] and never
//! mutate anything outside their own slot in `partial_results` (the
//! orchestrator records results for them). Expected errors become
//! `status=error` results; panics and timeouts are caught at the registry
//! boundary and converted to synthetic error results, so `process` never
//! unwinds into the orchestrator.

pub mod calendar;
pub mod email;
pub mod file;
pub mod general;
pub mod notes;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::types::{AgentKind, AgentResult, Scratchpad};

/// Per-agent execution budgets.
pub fn agent_timeout(kind: AgentKind) -> Duration {
    match kind {
        AgentKind::Calendar | AgentKind::Email => Duration::from_secs(60),
        AgentKind::General | AgentKind::Notes => Duration::from_secs(90),
        AgentKind::File => Duration::from_secs(120),
    }
}

/// Human-readable agent name for log lines and error messages.
pub fn display_name(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Calendar => "Calendar agent",
        AgentKind::Notes => "Notes agent",
        AgentKind::File => "File agent",
        AgentKind::Email => "Email agent",
        AgentKind::General => "General agent",
    }
}

/// Read-only view of the scratchpad handed to one agent invocation.
pub struct AgentContext<'a> {
    pub request_id: Uuid,
    pub kind: AgentKind,
    pub scratchpad: &'a Scratchpad,
    pub cancel: &'a CancellationToken,
}

impl AgentContext<'_> {
    pub fn user_request(&self) -> &str {
        &self.scratchpad.user_request
    }

    pub fn session_id(&self) -> &str {
        &self.scratchpad.session_id
    }

    pub fn provider_token(&self) -> Option<&str> {
        self.scratchpad.provider_token.as_deref()
    }

    /// The planner's action hint block for this agent, if any.
    pub fn params(&self) -> Option<&serde_json::Value> {
        self.scratchpad.plan.action_for(self.kind)
    }

    /// The planner-selected action name for this agent.
    pub fn action_hint(&self) -> Option<&str> {
        self.params()?.get("action")?.as_str()
    }

    /// One named parameter from the planner's hint block.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        let params = self.params()?.get("parameters")?;
        let value = params.get(key)?.as_str()?;
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    /// Last `n` history lines rendered for a prompt.
    pub fn history_lines(&self, n: usize) -> String {
        let history = &self.scratchpad.history;
        let skip = history.len().saturating_sub(n);
        let lines: Vec<String> = history
            .iter()
            .skip(skip)
            .map(crate::types::HistoryEntry::as_prompt_line)
            .collect();
        if lines.is_empty() {
            "No previous conversation.".to_owned()
        } else {
            lines.join("\n")
        }
    }

    /// Earlier agents' results in this plan (read-only).
    pub fn peer_results(&self) -> &BTreeMap<AgentKind, AgentResult> {
        &self.scratchpad.partial_results
    }

    /// Compact JSON rendering of peer results for prompt context.
    pub fn peer_context(&self) -> String {
        if self.scratchpad.partial_results.is_empty() {
            return "No context from other agents.".to_owned();
        }
        let brief: BTreeMap<&str, &str> = self
            .scratchpad
            .partial_results
            .iter()
            .map(|(kind, result)| (kind.as_str(), result.message.as_str()))
            .collect();
        serde_json::to_string(&brief).unwrap_or_else(|_| "{}".to_owned())
    }
}

/// The one operation every agent implements.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Which registry slot this agent fills.
    fn kind(&self) -> AgentKind;

    /// Handle one request. Expected failures are returned as
    /// `status=error` results, never raised.
    async fn process(&self, ctx: &AgentContext<'_>) -> AgentResult;
}

/// Fixed mapping from agent kind to implementation.
#[derive(Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentKind, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: BTreeMap::new(),
        }
    }

    /// Register an agent under its own kind.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.kind(), agent);
    }

    pub fn get(&self, kind: AgentKind) -> Option<&Arc<dyn Agent>> {
        self.agents.get(&kind)
    }

    /// Registered kinds, in registry order.
    pub fn kinds(&self) -> Vec<AgentKind> {
        self.agents.keys().copied().collect()
    }

    /// Run one agent under its timeout with panic isolation.
    ///
    /// Emits the per-invocation structured log record
    /// `{request_id, session_id, agent, duration_ms, outcome, error_kind?}`.
    pub async fn run(
        &self,
        kind: AgentKind,
        scratchpad: &Scratchpad,
        request_id: Uuid,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let start = tokio::time::Instant::now();
        let session_id = scratchpad.session_id.clone();

        let (result, error_kind) = match self.agents.get(&kind) {
            None => (
                AgentResult::error(format!("{} is not registered", display_name(kind))),
                Some("unregistered"),
            ),
            Some(agent) => {
                let ctx = AgentContext {
                    request_id,
                    kind,
                    scratchpad,
                    cancel,
                };
                let guarded = std::panic::AssertUnwindSafe(agent.process(&ctx)).catch_unwind();
                tokio::select! {
                    _ = cancel.cancelled() => (
                        AgentResult::error(format!("{} cancelled", display_name(kind))),
                        Some("cancelled"),
                    ),
                    outcome = tokio::time::timeout(agent_timeout(kind), guarded) => {
                        match outcome {
                            Ok(Ok(result)) => (result, None),
                            Ok(Err(payload)) => {
                                let detail = payload
                                    .downcast_ref::<&str>()
                                    .map(|s| (*s).to_owned())
                                    .or_else(|| payload.downcast_ref::<String>().cloned())
                                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                                error!(agent = %kind, panic = %detail, "agent panicked");
                                (
                                    AgentResult::error(format!(
                                        "{} failed unexpectedly",
                                        display_name(kind)
                                    )),
                                    Some("panic"),
                                )
                            }
                            Err(_elapsed) => (
                                AgentResult::error(format!(
                                    "{} timed out - please try a simpler request",
                                    display_name(kind)
                                )),
                                Some("timeout"),
                            ),
                        }
                    }
                }
            }
        };

        let duration_ms = start.elapsed().as_millis();
        let outcome = if result.is_success() { "success" } else { "error" };
        info!(
            request_id = %request_id,
            session_id = %session_id,
            agent = %kind,
            duration_ms = %duration_ms,
            outcome,
            error_kind = error_kind.unwrap_or(""),
            "agent invocation finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionPlan, HistoryEntry};

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn kind(&self) -> AgentKind {
            AgentKind::General
        }

        async fn process(&self, ctx: &AgentContext<'_>) -> AgentResult {
            AgentResult::success(
                format!("echo: {}", ctx.user_request()),
                serde_json::Value::Null,
            )
        }
    }

    struct PanickyAgent;

    #[async_trait]
    impl Agent for PanickyAgent {
        fn kind(&self) -> AgentKind {
            AgentKind::Calendar
        }

        async fn process(&self, _ctx: &AgentContext<'_>) -> AgentResult {
            panic!("boom");
        }
    }

    struct StuckAgent;

    #[async_trait]
    impl Agent for StuckAgent {
        fn kind(&self) -> AgentKind {
            AgentKind::File
        }

        async fn process(&self, _ctx: &AgentContext<'_>) -> AgentResult {
            tokio::time::sleep(Duration::from_secs(100_000)).await;
            AgentResult::success("never", serde_json::Value::Null)
        }
    }

    fn scratchpad(request: &str) -> Scratchpad {
        Scratchpad {
            user_request: request.to_owned(),
            session_id: "s1".to_owned(),
            ..Scratchpad::default()
        }
    }

    #[tokio::test]
    async fn test_run_success() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(EchoAgent));

        let pad = scratchpad("hello");
        let result = registry
            .run(AgentKind::General, &pad, Uuid::nil(), &CancellationToken::new())
            .await;
        assert!(result.is_success());
        assert_eq!(result.message, "echo: hello");
    }

    #[tokio::test]
    async fn test_run_unregistered() {
        let registry = AgentRegistry::new();
        let pad = scratchpad("hello");
        let result = registry
            .run(AgentKind::Email, &pad, Uuid::nil(), &CancellationToken::new())
            .await;
        assert!(!result.is_success());
        assert!(result.message.contains("not registered"));
    }

    #[tokio::test]
    async fn test_run_converts_panic_to_error() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(PanickyAgent));

        let pad = scratchpad("hello");
        let result = registry
            .run(AgentKind::Calendar, &pad, Uuid::nil(), &CancellationToken::new())
            .await;
        assert!(!result.is_success());
        assert!(result.message.contains("failed unexpectedly"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_yields_error() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StuckAgent));

        let pad = scratchpad("hello");
        let result = registry
            .run(AgentKind::File, &pad, Uuid::nil(), &CancellationToken::new())
            .await;
        assert!(!result.is_success());
        assert!(result.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(StuckAgent));

        let pad = scratchpad("hello");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = registry
            .run(AgentKind::File, &pad, Uuid::nil(), &cancel)
            .await;
        assert!(!result.is_success());
        assert!(result.message.contains("cancelled"));
    }

    #[test]
    fn test_timeout_table() {
        assert_eq!(agent_timeout(AgentKind::Calendar), Duration::from_secs(60));
        assert_eq!(agent_timeout(AgentKind::Email), Duration::from_secs(60));
        assert_eq!(agent_timeout(AgentKind::General), Duration::from_secs(90));
        assert_eq!(agent_timeout(AgentKind::File), Duration::from_secs(120));
    }

    #[test]
    fn test_context_accessors() {
        let mut actions = serde_json::Map::new();
        actions.insert(
            "email_agent".to_owned(),
            serde_json::json!({
                "action": "draft",
                "parameters": {"recipient": "bob@example.org", "tone": ""}
            }),
        );
        let pad = Scratchpad {
            user_request: "draft an email".to_owned(),
            session_id: "s1".to_owned(),
            history: vec![
                HistoryEntry {
                    role: "User".to_owned(),
                    body: "earlier".to_owned(),
                },
                HistoryEntry {
                    role: "Assistant".to_owned(),
                    body: "reply".to_owned(),
                },
            ],
            plan: ExecutionPlan {
                agents: vec![AgentKind::Email],
                agent_actions: actions,
                ..ExecutionPlan::default()
            },
            ..Scratchpad::default()
        };
        let cancel = CancellationToken::new();
        let ctx = AgentContext {
            request_id: Uuid::nil(),
            kind: AgentKind::Email,
            scratchpad: &pad,
            cancel: &cancel,
        };

        assert_eq!(ctx.action_hint(), Some("draft"));
        assert_eq!(ctx.param_str("recipient"), Some("bob@example.org"));
        assert_eq!(ctx.param_str("tone"), None, "empty params read as absent");
        let lines = ctx.history_lines(1);
        assert_eq!(lines, "Assistant: reply");
        assert_eq!(ctx.peer_context(), "No context from other agents.");
    }
}
