//! General agent: tasks, Q&A, planning and everything without a
//! specialized home.
//!
//! Classifies the request by keyword into one of four categories and
//! dispatches a single completion with a purpose-specific template. The
//! registry's 90-second budget bounds the whole call.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::agents::{Agent, AgentContext};
use crate::llm::{ChatTurn, CompletionRequest, LlmError, LlmGateway};
use crate::types::{AgentKind, AgentResult, Clock};

const TASK_KEYWORDS: &[&str] = &[
    "task", "todo", "to-do", "reminder", "deadline", "complete", "finish", "done", "add task",
    "create task", "manage tasks",
];

const PLANNING_KEYWORDS: &[&str] = &[
    "plan", "planning", "goal", "strategy", "roadmap", "timeline", "project plan", "organize",
    "structure", "break down",
];

const QUESTION_KEYWORDS: &[&str] = &[
    "what", "how", "why", "when", "where", "who", "explain", "tell me", "help me understand",
    "can you", "do you know",
];

/// Request categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestCategory {
    TaskManagement,
    QuestionAnswer,
    Planning,
    GeneralAssistance,
}

impl RequestCategory {
    fn as_str(self) -> &'static str {
        match self {
            Self::TaskManagement => "task_management",
            Self::QuestionAnswer => "question_answer",
            Self::Planning => "planning",
            Self::GeneralAssistance => "general_assistance",
        }
    }
}

fn classify(request: &str) -> RequestCategory {
    let lower = request.to_lowercase();
    if TASK_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        RequestCategory::TaskManagement
    } else if PLANNING_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        RequestCategory::Planning
    } else if QUESTION_KEYWORDS.iter().any(|kw| lower.contains(kw)) || request.ends_with('?') {
        RequestCategory::QuestionAnswer
    } else {
        RequestCategory::GeneralAssistance
    }
}

/// General-purpose agent over the gateway.
pub struct GeneralAgent {
    gateway: Arc<LlmGateway>,
    clock: Arc<dyn Clock>,
}

impl GeneralAgent {
    pub fn new(gateway: Arc<LlmGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }

    fn prompt_for(&self, category: RequestCategory, ctx: &AgentContext<'_>) -> String {
        let date = self.clock.now().format("%Y-%m-%d");
        let history = ctx.history_lines(5);
        let request = ctx.user_request();

        match category {
            RequestCategory::TaskManagement => format!(
                "You are a task management assistant. Help the user organize and track \
                 their tasks.\n\n\
                 Current date: {date}\n\
                 User request: {request}\n\n\
                 Recent conversation:\n{history}\n\n\
                 Analyze the request and provide:\n\
                 1. Task identification and categorization\n\
                 2. Priority assessment (high/medium/low)\n\
                 3. Suggested deadlines if not specified\n\
                 4. Action items or subtasks\n\
                 5. Any dependencies or prerequisites\n\n\
                 Format your response as a structured task list with clear priorities \
                 and timelines."
            ),
            RequestCategory::QuestionAnswer => format!(
                "You are a knowledgeable assistant that provides clear, accurate answers \
                 to questions.\n\n\
                 Current date: {date}\n\
                 User question: {request}\n\n\
                 Recent conversation context:\n{history}\n\n\
                 Available context from other agents:\n{peers}\n\n\
                 Provide a clear, well-structured answer that directly addresses the \
                 question, uses available context when relevant, and breaks complex \
                 topics into understandable parts. Keep responses conversational but \
                 informative.",
                peers = ctx.peer_context(),
            ),
            RequestCategory::Planning => format!(
                "You are a planning specialist. Help users create structured plans for \
                 projects, goals, and activities.\n\n\
                 Current date: {date}\n\
                 Planning request: {request}\n\n\
                 Recent conversation:\n{history}\n\n\
                 Create a comprehensive plan that includes clear objectives, a \
                 step-by-step action plan, a timeline with milestones, required \
                 resources, potential challenges with mitigations, and success \
                 metrics. Make the plan realistic and achievable."
            ),
            RequestCategory::GeneralAssistance => format!(
                "You are a helpful general assistant. Provide useful, actionable \
                 responses to user requests.\n\n\
                 Current date: {date}\n\
                 User request: {request}\n\n\
                 Recent conversation:\n{history}\n\n\
                 Understand the user's intent, offer practical advice or solutions, and \
                 suggest next steps. Maintain a supportive, professional tone."
            ),
        }
    }
}

#[async_trait]
impl Agent for GeneralAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::General
    }

    async fn process(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let category = classify(ctx.user_request());
        info!(category = category.as_str(), "general agent dispatching");

        let request = CompletionRequest::text(
            vec![ChatTurn::user(self.prompt_for(category, ctx))],
            0.3,
        )
        .with_max_tokens(4096);

        match self.gateway.complete(&request, ctx.cancel).await {
            Ok(answer) => {
                let answer = answer.trim().to_owned();
                AgentResult::success(
                    answer.clone(),
                    serde_json::json!({
                        "answer": answer,
                        "request_type": category.as_str(),
                    }),
                )
            }
            Err(LlmError::Timeout) => AgentResult::error(
                "General agent timed out - please try a simpler request",
            ),
            Err(e) => AgentResult::error(format!("General assistance failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmProvider;
    use crate::types::Scratchpad;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct CannedProvider(&'static str);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            Ok(self.0.to_owned())
        }
    }

    struct NeverProvider;

    #[async_trait]
    impl LlmProvider for NeverProvider {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(100_000)).await;
            Ok(String::new())
        }
    }

    fn run_ctx<'a>(pad: &'a Scratchpad, cancel: &'a CancellationToken) -> AgentContext<'a> {
        AgentContext {
            request_id: Uuid::nil(),
            kind: AgentKind::General,
            scratchpad: pad,
            cancel,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify("add task: ship the release"), RequestCategory::TaskManagement);
        assert_eq!(classify("create a project plan for Q1"), RequestCategory::Planning);
        assert_eq!(classify("what is a monad"), RequestCategory::QuestionAnswer);
        assert_eq!(classify("is it raining?"), RequestCategory::QuestionAnswer);
        assert_eq!(classify("thanks, looks good"), RequestCategory::GeneralAssistance);
    }

    #[tokio::test]
    async fn test_answer_flows_through() {
        let agent = GeneralAgent::new(
            Arc::new(LlmGateway::new(Box::new(CannedProvider("Here is the answer.")))),
            Arc::new(crate::types::SystemClock),
        );
        let pad = Scratchpad {
            user_request: "what is the capital of France?".to_owned(),
            session_id: "s1".to_owned(),
            ..Scratchpad::default()
        };
        let cancel = CancellationToken::new();
        let result = agent.process(&run_ctx(&pad, &cancel)).await;
        assert!(result.is_success());
        assert_eq!(result.message, "Here is the answer.");
        assert_eq!(result.result["request_type"], "question_answer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_specific_error() {
        let agent = GeneralAgent::new(
            Arc::new(LlmGateway::with_limits(
                Box::new(NeverProvider),
                2,
                Duration::from_secs(1),
            )),
            Arc::new(crate::types::SystemClock),
        );
        let pad = Scratchpad {
            user_request: "hello there".to_owned(),
            session_id: "s1".to_owned(),
            ..Scratchpad::default()
        };
        let cancel = CancellationToken::new();
        let result = agent.process(&run_ctx(&pad, &cancel)).await;
        assert!(!result.is_success());
        assert!(result.message.contains("timed out"));
    }
}
