//! The orchestrator: analyze -> plan -> execute sequentially -> compile.
//!
//! One request is one logical task. Agents in a plan run strictly in
//! order because later agents consume earlier agents' partial results; a
//! timed-out or panicked agent yields a synthetic error result and the
//! plan continues. The session transcript gains exactly one user message
//! and one agent message per completed run -- a cancelled run appends
//! neither.

pub mod compiler;
pub mod planner;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::AgentRegistry;
use crate::llm::LlmError;
use crate::store::{SessionStore, StoreError};
use crate::types::{
    AgentKind, ChatMessage, Clock, HistoryEntry, Scratchpad, Sender,
};

use compiler::{CompiledResponse, ResponseCompiler};
use planner::Planner;

/// Transcript lines loaded for planner/agent context.
const HISTORY_WINDOW: usize = 10;

/// Outer per-request budget.
const REQUEST_BUDGET: Duration = Duration::from_secs(300);

/// One inbound user request.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorRequest {
    pub user_request: String,
    pub session_id: String,
    pub user_id: Option<String>,
    /// Opaque third-party API token for the capability clients.
    pub provider_token: Option<String>,
    pub file_blob: Option<Vec<u8>>,
    pub file_name: Option<String>,
}

/// The compiled outcome of one request.
#[derive(Debug, Clone)]
pub struct OrchestratorResponse {
    pub request_id: Uuid,
    pub response: String,
    pub workflow_type: String,
    pub agents_involved: Vec<AgentKind>,
    /// Structured sidecar when an email draft was created this request.
    pub draft_created: Option<serde_json::Value>,
}

/// Streaming events; the final `Complete` carries the same string the
/// non-streaming call would return.
#[derive(Debug)]
pub enum OrchestratorEvent {
    Delta(String),
    Complete(OrchestratorResponse),
}

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("planning failed: {0}")]
    Planning(#[from] LlmError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The request was cancelled; the transcript was not touched.
    #[error("request cancelled")]
    Cancelled,
    /// The outer request budget elapsed.
    #[error("request exceeded its time budget")]
    BudgetExceeded,
}

/// Orchestrator wired to the registry, planner, compiler and store.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    planner: Planner,
    compiler: ResponseCompiler,
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        planner: Planner,
        compiler: ResponseCompiler,
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            planner,
            compiler,
            store,
            clock,
        }
    }

    /// Handle one request end to end under the outer budget.
    pub async fn handle(
        &self,
        request: OrchestratorRequest,
        cancel: &CancellationToken,
    ) -> Result<OrchestratorResponse, OrchestratorError> {
        match tokio::time::timeout(REQUEST_BUDGET, self.run(request, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::BudgetExceeded),
        }
    }

    /// Streaming variant: compiler output is forwarded as deltas and the
    /// final event carries the identical full response.
    pub async fn handle_streaming(
        self: Arc<Self>,
        request: OrchestratorRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<OrchestratorEvent, OrchestratorError>> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            match self.handle(request, &cancel).await {
                Ok(response) => {
                    let _ = tx
                        .send(Ok(OrchestratorEvent::Delta(response.response.clone())))
                        .await;
                    let _ = tx.send(Ok(OrchestratorEvent::Complete(response))).await;
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        rx
    }

    async fn run(
        &self,
        request: OrchestratorRequest,
        cancel: &CancellationToken,
    ) -> Result<OrchestratorResponse, OrchestratorError> {
        let request_id = Uuid::new_v4();
        info!(
            request_id = %request_id,
            session_id = %request.session_id,
            "orchestrator handling request"
        );

        // Persist the upload first so the planner's file context sees it
        // and later turns can re-read it.
        if let (Some(blob), Some(name)) = (&request.file_blob, &request.file_name) {
            self.store
                .save_file(&request.session_id, name, blob)
                .await?;
        }

        // Step 1: history snapshot.
        let history: Vec<HistoryEntry> = self
            .store
            .load_history(&request.session_id, HISTORY_WINDOW)
            .await?
            .into_iter()
            .map(|m| HistoryEntry {
                role: match m.sender {
                    Sender::User => "User".to_owned(),
                    Sender::Agent => "Assistant".to_owned(),
                },
                body: m.message,
            })
            .collect();

        let file_context = self.file_context(&request.session_id).await;

        // Step 2 & 3: plan (the planner applies fallback and ordering).
        let plan = self
            .planner
            .plan(
                &request.user_request,
                &history,
                &file_context,
                self.clock.now(),
                cancel,
            )
            .await?;

        let mut scratchpad = Scratchpad {
            user_request: request.user_request.clone(),
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            provider_token: request.provider_token.clone(),
            file_blob: request.file_blob.clone(),
            file_name: request.file_name.clone(),
            history,
            plan,
            ..Scratchpad::default()
        };

        // Step 4: sequential execution, each agent under its own timeout.
        for kind in scratchpad.plan.agents.clone() {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            let result = self
                .registry
                .run(kind, &scratchpad, request_id, cancel)
                .await;
            scratchpad.partial_results.insert(kind, result);
        }

        // Step 5: compile.
        let CompiledResponse {
            text,
            draft_created,
        } = self.compiler.compile(&scratchpad, cancel).await;

        // Step 6: transcript. All-or-nothing with respect to cancellation:
        // once we commit, both messages are appended without checking the
        // token in between.
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let agents_involved: Vec<AgentKind> =
            scratchpad.partial_results.keys().copied().collect();
        let agent_type = agents_involved
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let now = self.clock.now();
        self.store
            .append_message(&ChatMessage {
                id: Uuid::new_v4(),
                message: request.user_request.clone(),
                sender: Sender::User,
                timestamp: now,
                agent_type: None,
                session_id: request.session_id.clone(),
            })
            .await?;
        self.store
            .append_message(&ChatMessage {
                id: Uuid::new_v4(),
                message: text.clone(),
                sender: Sender::Agent,
                timestamp: self.clock.now(),
                agent_type: if agent_type.is_empty() {
                    None
                } else {
                    Some(agent_type)
                },
                session_id: request.session_id.clone(),
            })
            .await?;

        info!(request_id = %request_id, agents = agents_involved.len(), "request complete");
        Ok(OrchestratorResponse {
            request_id,
            response: text,
            workflow_type: scratchpad.plan.workflow_type.clone(),
            agents_involved,
            draft_created,
        })
    }

    /// The planner's view of the session's uploaded files.
    async fn file_context(&self, session_id: &str) -> String {
        match self.store.list_files(session_id).await {
            Ok(files) if !files.is_empty() => {
                let lines: Vec<String> = files
                    .iter()
                    .map(|f| format!("- {} ({} bytes)", f.name, f.size_bytes))
                    .collect();
                format!("Available files in current session:\n{}", lines.join("\n"))
            }
            Ok(_) => "No files available in current session.".to_owned(),
            Err(e) => {
                warn!(error = %e, "failed to list session files");
                "File context unavailable.".to_owned()
            }
        }
    }
}
