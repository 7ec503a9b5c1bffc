//! Shared fixtures: a scripted LLM and mock capability clients wired into
//! a full orchestrator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use maestro::agents::email::approval::ApprovalWorkflow;
use maestro::agents::email::EmailAgent;
use maestro::agents::file::FileAgent;
use maestro::agents::general::GeneralAgent;
use maestro::agents::notes::NotesAgent;
use maestro::agents::{calendar::CalendarAgent, AgentRegistry};
use maestro::clients::calendar::{
    BusyInterval, CalendarClient, CalendarEvent, EventPatch, FreeBusyQuery, ListWindow, NewEvent,
};
use maestro::clients::docs::{
    DocsClient, DocumentContent, DocumentHandle, DocumentUpdate, NewDocument,
};
use maestro::clients::mail::{
    EmailFull, EmailSummary, ListQuery, MailClient, OutgoingEmail, SendReceipt,
};
use maestro::clients::ProviderError;
use maestro::llm::{CompletionRequest, LlmError, LlmGateway, LlmProvider};
use maestro::orchestrator::compiler::ResponseCompiler;
use maestro::orchestrator::planner::Planner;
use maestro::orchestrator::{Orchestrator, OrchestratorRequest};
use maestro::store::SessionStore;
use maestro::types::{Clock, SystemClock};

// ── Scripted LLM ──

/// Routes prompts to canned responses by marker substring, checked in
/// order. Unmatched prompts get the fallback.
pub struct RouterLlm {
    routes: Vec<(&'static str, String)>,
    fallback: String,
}

impl RouterLlm {
    pub fn new(routes: Vec<(&'static str, String)>) -> Self {
        Self {
            routes,
            fallback: "ok".to_owned(),
        }
    }
}

#[async_trait]
impl LlmProvider for RouterLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let full_prompt: String = request
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        for (marker, response) in &self.routes {
            if full_prompt.contains(marker) {
                return Ok(response.clone());
            }
        }
        Ok(self.fallback.clone())
    }
}

// ── Mock calendar ──

#[derive(Default)]
pub struct MockCalendar {
    pub created: tokio::sync::Mutex<Vec<NewEvent>>,
    pub updated: tokio::sync::Mutex<Vec<(String, EventPatch)>>,
    pub upcoming: Vec<CalendarEvent>,
}

pub fn event(id: &str, title: &str, start: &str, end: &str) -> CalendarEvent {
    CalendarEvent {
        id: id.to_owned(),
        title: title.to_owned(),
        start: start.to_owned(),
        end: end.to_owned(),
        description: String::new(),
        location: String::new(),
        attendees: vec![],
        meeting_link: String::new(),
        status: "confirmed".to_owned(),
    }
}

#[async_trait]
impl CalendarClient for MockCalendar {
    async fn create(
        &self,
        _token: &str,
        new_event: &NewEvent,
        _cancel: &CancellationToken,
    ) -> Result<CalendarEvent, ProviderError> {
        self.created.lock().await.push(new_event.clone());
        Ok(event(
            "created-1",
            &new_event.title,
            &new_event.start,
            &new_event.end,
        ))
    }

    async fn update(
        &self,
        _token: &str,
        id: &str,
        patch: &EventPatch,
        _cancel: &CancellationToken,
    ) -> Result<CalendarEvent, ProviderError> {
        self.updated.lock().await.push((id.to_owned(), patch.clone()));
        let base = self
            .upcoming
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_owned()))?;
        Ok(CalendarEvent {
            title: patch.title.clone().unwrap_or(base.title),
            start: patch.start.clone().unwrap_or(base.start),
            end: patch.end.clone().unwrap_or(base.end),
            ..base
        })
    }

    async fn delete(
        &self,
        _token: &str,
        _id: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn list(
        &self,
        _token: &str,
        _window: &ListWindow,
        _cancel: &CancellationToken,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        Ok(self.upcoming.clone())
    }

    async fn get(
        &self,
        _token: &str,
        id: &str,
        _cancel: &CancellationToken,
    ) -> Result<CalendarEvent, ProviderError> {
        self.upcoming
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_owned()))
    }

    async fn search(
        &self,
        _token: &str,
        query: &str,
        _max: u32,
        _cancel: &CancellationToken,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        Ok(self
            .upcoming
            .iter()
            .filter(|e| e.title.to_lowercase().contains(&query.to_lowercase()))
            .cloned()
            .collect())
    }

    async fn free_busy(
        &self,
        _token: &str,
        _query: &FreeBusyQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<BusyInterval>, ProviderError> {
        Ok(vec![])
    }
}

// ── Mock mail ──

pub struct MockMail {
    outcomes: tokio::sync::Mutex<Vec<Result<SendReceipt, ProviderError>>>,
    sends: AtomicUsize,
}

impl MockMail {
    pub fn sending_ok() -> Self {
        Self {
            outcomes: tokio::sync::Mutex::new(vec![]),
            sends: AtomicUsize::new(0),
        }
    }

    pub fn failing_permanently() -> Self {
        Self {
            outcomes: tokio::sync::Mutex::new(vec![Err(ProviderError::Permanent(
                "550 mailbox unavailable".to_owned(),
            ))]),
            sends: AtomicUsize::new(0),
        }
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailClient for MockMail {
    async fn list(
        &self,
        _token: &str,
        _query: &ListQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<EmailSummary>, ProviderError> {
        Ok(vec![])
    }

    async fn get(
        &self,
        _token: &str,
        id: &str,
        _cancel: &CancellationToken,
    ) -> Result<EmailFull, ProviderError> {
        Err(ProviderError::NotFound(id.to_owned()))
    }

    async fn send(
        &self,
        _token: &str,
        _email: &OutgoingEmail,
        _cancel: &CancellationToken,
    ) -> Result<SendReceipt, ProviderError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().await;
        if outcomes.is_empty() {
            Ok(SendReceipt {
                provider_message_id: "gm-msg-99".to_owned(),
                provider_thread_id: "gm-thr-99".to_owned(),
            })
        } else {
            outcomes.remove(0)
        }
    }
}

// ── Mock docs ──

#[derive(Default)]
pub struct MockDocs {
    pub created: tokio::sync::Mutex<Vec<NewDocument>>,
}

#[async_trait]
impl DocsClient for MockDocs {
    async fn create(
        &self,
        _token: &str,
        doc: &NewDocument,
        _cancel: &CancellationToken,
    ) -> Result<DocumentHandle, ProviderError> {
        self.created.lock().await.push(doc.clone());
        Ok(DocumentHandle {
            id: "doc-new".to_owned(),
            title: doc.title.clone(),
            url: "https://docs.google.com/document/d/doc-new/edit".to_owned(),
            modified_at: None,
        })
    }

    async fn get(
        &self,
        _token: &str,
        id: &str,
        _cancel: &CancellationToken,
    ) -> Result<DocumentContent, ProviderError> {
        Err(ProviderError::NotFound(id.to_owned()))
    }

    async fn update(
        &self,
        _token: &str,
        id: &str,
        _update: &DocumentUpdate,
        _cancel: &CancellationToken,
    ) -> Result<DocumentHandle, ProviderError> {
        Err(ProviderError::NotFound(id.to_owned()))
    }

    async fn list(
        &self,
        _token: &str,
        _max: u32,
        _cancel: &CancellationToken,
    ) -> Result<Vec<DocumentHandle>, ProviderError> {
        Ok(vec![])
    }

    async fn search(
        &self,
        _token: &str,
        _query: &str,
        _max: u32,
        _cancel: &CancellationToken,
    ) -> Result<Vec<DocumentHandle>, ProviderError> {
        Ok(vec![])
    }

    async fn delete(
        &self,
        _token: &str,
        _id: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn share_link_reader(
        &self,
        _token: &str,
        _id: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

// ── Harness ──

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<SessionStore>,
    pub mail: Arc<MockMail>,
    pub calendar: Arc<MockCalendar>,
    pub docs: Arc<MockDocs>,
    pub _dir: tempfile::TempDir,
}

pub fn build(
    routes: Vec<(&'static str, String)>,
    calendar: MockCalendar,
    mail: MockMail,
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SessionStore::new(dir.path()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = Arc::new(LlmGateway::new(Box::new(RouterLlm::new(routes))));

    let calendar = Arc::new(calendar);
    let mail = Arc::new(mail);
    let docs = Arc::new(MockDocs::default());
    let workflow = Arc::new(ApprovalWorkflow::new(Arc::clone(&store), Arc::clone(&clock)));

    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(CalendarAgent::new(
        Arc::clone(&gateway),
        Arc::clone(&calendar) as Arc<dyn CalendarClient>,
        Arc::clone(&clock),
    )));
    registry.register(Arc::new(NotesAgent::new(
        Arc::clone(&gateway),
        Arc::clone(&docs) as Arc<dyn DocsClient>,
    )));
    registry.register(Arc::new(FileAgent::new(
        Arc::clone(&gateway),
        Arc::clone(&store),
    )));
    registry.register(Arc::new(EmailAgent::new(
        Arc::clone(&gateway),
        Arc::clone(&mail) as Arc<dyn MailClient>,
        Arc::clone(&store),
        Arc::clone(&clock),
        Arc::clone(&workflow),
    )));
    registry.register(Arc::new(GeneralAgent::new(
        Arc::clone(&gateway),
        Arc::clone(&clock),
    )));

    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        Planner::new(Arc::clone(&gateway)),
        ResponseCompiler::new(gateway),
        Arc::clone(&store),
        clock,
    );

    Harness {
        orchestrator,
        store,
        mail,
        calendar,
        docs,
        _dir: dir,
    }
}

pub fn request(text: &str, session: &str) -> OrchestratorRequest {
    OrchestratorRequest {
        user_request: text.to_owned(),
        session_id: session.to_owned(),
        user_id: Some("u1".to_owned()),
        provider_token: Some("g-token".to_owned()),
        file_blob: None,
        file_name: None,
    }
}

pub fn plan_json(agents: &[&str], workflow_type: &str, actions: serde_json::Value) -> String {
    serde_json::json!({
        "agents_to_invoke": agents,
        "reasoning": "scripted",
        "workflow_type": workflow_type,
        "agent_actions": actions,
        "confidence": 0.9,
    })
    .to_string()
}
