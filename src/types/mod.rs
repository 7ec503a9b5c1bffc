// Core shared types: agent kinds, results, chat records, plans, scratchpad.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fixed set of agents the orchestrator can route to.
///
/// The planner emits these enumeration values, never arbitrary strings;
/// unknown names fail to parse and are dropped from the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    /// Schedule, reschedule, cancel and list calendar events.
    #[serde(rename = "calendar_agent")]
    Calendar,
    /// Create, update and search notes/documents.
    #[serde(rename = "notes_agent")]
    Notes,
    /// Summarize and answer questions about uploaded files.
    #[serde(rename = "file_agent")]
    File,
    /// Draft, approve, send and read email.
    #[serde(rename = "email_agent")]
    Email,
    /// General Q&A, planning and task shaping.
    #[serde(rename = "general_agent")]
    General,
}

impl AgentKind {
    /// Canonical registry name (matches the planner JSON schema).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calendar => "calendar_agent",
            Self::Notes => "notes_agent",
            Self::File => "file_agent",
            Self::Email => "email_agent",
            Self::General => "general_agent",
        }
    }

    /// Every registered agent kind.
    pub fn all() -> [AgentKind; 5] {
        [
            Self::Calendar,
            Self::Notes,
            Self::File,
            Self::Email,
            Self::General,
        ]
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calendar_agent" => Ok(Self::Calendar),
            "notes_agent" => Ok(Self::Notes),
            "file_agent" => Ok(Self::File),
            "email_agent" => Ok(Self::Email),
            "general_agent" => Ok(Self::General),
            other => Err(anyhow::anyhow!("unknown agent name: {other}")),
        }
    }
}

/// Who produced a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

/// One persisted entry in a session's chat transcript.
///
/// Append-only within a session; ordering is strictly by `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub message: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub session_id: String,
}

/// Success/error discriminator for an agent result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Success,
    Error,
}

/// The uniform output contract every agent returns from `process`.
///
/// Exactly one of success/error; `message` is always present and is what
/// the response compiler shows verbatim when the agent failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentStatus,
    pub message: String,
    /// Typed payload, shape depends on the agent and action.
    #[serde(default)]
    pub result: serde_json::Value,
    /// Optional metadata for downstream agents in the same plan.
    #[serde(default)]
    pub collaboration_data: serde_json::Value,
}

impl AgentResult {
    /// Successful result with a payload.
    pub fn success(message: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            status: AgentStatus::Success,
            message: message.into(),
            result,
            collaboration_data: serde_json::Value::Null,
        }
    }

    /// Error result; `message` is the user-facing explanation.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Error,
            message: message.into(),
            result: serde_json::Value::Null,
            collaboration_data: serde_json::Value::Null,
        }
    }

    /// Attach collaboration metadata for downstream agents.
    pub fn with_collaboration(mut self, data: serde_json::Value) -> Self {
        self.collaboration_data = data;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Success
    }
}

/// A role-tagged history line handed to agents and the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// "User" or "Assistant".
    pub role: String,
    pub body: String,
}

impl HistoryEntry {
    /// Render as the `Role: body` line used in prompts.
    pub fn as_prompt_line(&self) -> String {
        format!("{}: {}", self.role, self.body)
    }
}

/// Transient per-request execution plan produced by the orchestrator.
///
/// `agents` is an ordered subset of the registry with no duplicates;
/// order is significant (dependencies flow front to back).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub agents: Vec<AgentKind>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub workflow_type: String,
    /// Per-agent action hints keyed by registry name.
    #[serde(default)]
    pub agent_actions: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub confidence: f64,
}

impl ExecutionPlan {
    /// Action hint block for one agent, if the planner provided one.
    pub fn action_for(&self, kind: AgentKind) -> Option<&serde_json::Value> {
        self.agent_actions.get(kind.as_str())
    }
}

/// Per-request shared state threaded through the orchestrator and agents.
///
/// Owned by exactly one in-flight request. Agents read it through
/// `AgentContext` and never mutate anything outside their own slot in
/// `partial_results` (the orchestrator writes the slot for them).
#[derive(Debug, Clone, Default)]
pub struct Scratchpad {
    pub user_request: String,
    pub session_id: String,
    pub user_id: Option<String>,
    /// Opaque third-party API token for the capability clients.
    pub provider_token: Option<String>,
    pub file_blob: Option<Vec<u8>>,
    pub file_name: Option<String>,
    /// Last-10 transcript snapshot, oldest first.
    pub history: Vec<HistoryEntry>,
    pub plan: ExecutionPlan,
    pub partial_results: BTreeMap<AgentKind, AgentResult>,
    pub final_response: String,
}

/// Injected time source so janitors and state transitions are testable.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed time source for tests and deterministic sweeps.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
