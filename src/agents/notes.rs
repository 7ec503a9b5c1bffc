//! Notes agent, operating on provider documents.
//!
//! Same shape as the calendar agent against the Docs capability:
//! intent extraction in JSON mode, match-before-mutate for update and
//! delete against the user's real document list, and a best-effort
//! link-share after create that never fails the create itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::agents::{Agent, AgentContext};
use crate::clients::docs::{DocsClient, DocumentHandle, DocumentUpdate, NewDocument};
use crate::clients::ProviderError;
use crate::llm::{ChatTurn, CompletionRequest, LlmGateway};
use crate::types::{AgentKind, AgentResult};

/// Documents pulled for match-before-mutate.
const MATCH_CANDIDATE_COUNT: u32 = 50;

/// Minimum match confidence for a mutation to proceed.
const MATCH_CONFIDENCE_FLOOR: f64 = 0.5;

/// Extracted intent, discriminated by `action`.
#[derive(Debug, Clone, Deserialize)]
struct NotesIntent {
    action: NotesAction,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    /// Fuzzy reference to an existing document.
    #[serde(default)]
    document_query: Option<String>,
    #[serde(default)]
    append: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NotesAction {
    Create,
    Update,
    Delete,
    ViewAll,
    ViewSpecific,
    Search,
}

#[derive(Debug, Deserialize)]
struct DocumentMatch {
    #[serde(default)]
    matched_id: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
}

/// Notes agent over the gateway and docs client.
pub struct NotesAgent {
    gateway: Arc<LlmGateway>,
    docs: Arc<dyn DocsClient>,
}

impl NotesAgent {
    pub fn new(gateway: Arc<LlmGateway>, docs: Arc<dyn DocsClient>) -> Self {
        Self { gateway, docs }
    }

    /// Peer results with their collaboration payloads, for prompt context.
    fn rich_peer_context(ctx: &AgentContext<'_>) -> String {
        if ctx.peer_results().is_empty() {
            return "No context from other agents.".to_owned();
        }
        let entries: Vec<serde_json::Value> = ctx
            .peer_results()
            .iter()
            .map(|(kind, result)| {
                serde_json::json!({
                    "agent": kind.as_str(),
                    "message": result.message,
                    "collaboration_data": result.collaboration_data,
                })
            })
            .collect();
        serde_json::to_string_pretty(&entries).unwrap_or_else(|_| "[]".to_owned())
    }

    async fn extract_intent(&self, ctx: &AgentContext<'_>) -> Result<NotesIntent, AgentResult> {
        let prompt = format!(
            "Extract the notes operation from the user's request.\n\n\
             Recent conversation:\n{history}\n\n\
             Context from other agents:\n{peers}\n\n\
             Return JSON:\n\
             {{\n\
               \"action\": \"create|update|delete|view_all|view_specific|search\",\n\
               \"title\": \"document title\",\n\
               \"content\": \"body text when the user supplied one, else empty\",\n\
               \"document_query\": \"reference to an existing document, for update/delete/view_specific/search\",\n\
               \"append\": false\n\
             }}\n\n\
             User request: {request}",
            history = ctx.history_lines(5),
            peers = Self::rich_peer_context(ctx),
            request = ctx.user_request(),
        );

        let request = CompletionRequest::json(
            vec![
                ChatTurn::system(
                    "You are a notes assistant. Extract structured document operations \
                     from natural language. Return only JSON.",
                ),
                ChatTurn::user(prompt),
            ],
            0.1,
        );

        let value = self
            .gateway
            .complete_json(&request, ctx.cancel)
            .await
            .map_err(|e| AgentResult::error(format!("Could not understand the notes request: {e}")))?;
        serde_json::from_value(value)
            .map_err(|e| AgentResult::error(format!("Could not understand the notes request: {e}")))
    }

    /// Synthesize a note body when the user did not supply one.
    async fn synthesize_body(&self, ctx: &AgentContext<'_>, title: &str) -> String {
        let prompt = format!(
            "Write the body for a note titled \"{title}\".\n\n\
             The user asked: {request}\n\n\
             Recent conversation:\n{history}\n\n\
             Results from other agents this turn (use their actual content, \
             e.g. a document summary to be saved):\n{peers}\n\n\
             Write only the note content. Be concrete; carry over real data from \
             the agent results instead of describing it.",
            request = ctx.user_request(),
            history = ctx.history_lines(5),
            peers = Self::rich_peer_context(ctx),
        );
        let request = CompletionRequest::text(vec![ChatTurn::user(prompt)], 0.3);
        match self.gateway.complete(&request, ctx.cancel).await {
            Ok(body) => body.trim().to_owned(),
            Err(e) => {
                warn!(error = %e, "note body synthesis failed, using the raw request");
                ctx.user_request().to_owned()
            }
        }
    }

    /// Ground a fuzzy document reference against the real document list.
    async fn match_document(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        document_query: &str,
    ) -> Result<DocumentHandle, AgentResult> {
        let documents = self
            .docs
            .list(token, MATCH_CANDIDATE_COUNT, ctx.cancel)
            .await
            .map_err(|e| provider_error_result(&e))?;

        if documents.is_empty() {
            return Err(AgentResult::error(
                "Could not find a matching document: you have no documents yet.",
            ));
        }

        let listing: Vec<serde_json::Value> = documents
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "title": d.title,
                    "modified_at": d.modified_at,
                })
            })
            .collect();

        let prompt = format!(
            "The user referred to a document as: \"{document_query}\"\n\n\
             These are the user's actual documents:\n{}\n\n\
             Pick the best match. Return JSON:\n\
             {{\"matched_id\": \"id or null\", \"confidence\": 0.0, \"reason\": \"\"}}\n\
             Use null and a low confidence when nothing matches well.",
            serde_json::to_string_pretty(&listing).unwrap_or_else(|_| "[]".to_owned()),
        );
        let request = CompletionRequest::json(vec![ChatTurn::user(prompt)], 0.1);
        let value = self
            .gateway
            .complete_json(&request, ctx.cancel)
            .await
            .map_err(|e| AgentResult::error(format!("Could not match the document: {e}")))?;
        let verdict: DocumentMatch = serde_json::from_value(value)
            .map_err(|e| AgentResult::error(format!("Could not match the document: {e}")))?;

        let Some(matched_id) = verdict.matched_id.filter(|id| !id.is_empty()) else {
            return Err(disambiguation_error(document_query, &documents));
        };
        if verdict.confidence < MATCH_CONFIDENCE_FLOOR {
            return Err(disambiguation_error(document_query, &documents));
        }
        let Some(document) = documents.into_iter().find(|d| d.id == matched_id) else {
            warn!(matched_id = %matched_id, "match returned an unlisted document id");
            return Err(AgentResult::error(format!(
                "Could not find a matching document for '{document_query}'. Please be more specific."
            )));
        };

        info!(document_id = %document.id, confidence = verdict.confidence, reason = %verdict.reason, "document matched");
        Ok(document)
    }

    async fn handle_create(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        intent: &NotesIntent,
    ) -> AgentResult {
        let title = intent.title.clone().unwrap_or_else(|| "New Note".to_owned());
        let content = match intent.content.clone().filter(|c| !c.trim().is_empty()) {
            Some(content) => content,
            None => self.synthesize_body(ctx, &title).await,
        };

        let new_doc = NewDocument {
            title: title.clone(),
            content: content.clone(),
            folder: None,
        };
        let handle = match self.docs.create(token, &new_doc, ctx.cancel).await {
            Ok(handle) => handle,
            Err(e) => return provider_error_result(&e),
        };

        // Best-effort: make the document link-shareable for readers.
        if let Err(e) = self
            .docs
            .share_link_reader(token, &handle.id, ctx.cancel)
            .await
        {
            warn!(document_id = %handle.id, error = %e, "link sharing failed, continuing");
        }

        AgentResult::success(
            format!("Note '{}' created: {}", handle.title, handle.url),
            serde_json::json!({
                "id": handle.id,
                "title": handle.title,
                "url": handle.url,
                "content_preview": content.chars().take(300).collect::<String>(),
            }),
        )
        .with_collaboration(serde_json::json!({
            "note_id": handle.id,
            "url": handle.url,
        }))
    }

    async fn handle_update(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        intent: &NotesIntent,
    ) -> AgentResult {
        let query = intent
            .document_query
            .clone()
            .or_else(|| intent.title.clone())
            .unwrap_or_else(|| ctx.user_request().to_owned());
        let document = match self.match_document(ctx, token, &query).await {
            Ok(document) => document,
            Err(result) => return result,
        };

        let content = match intent.content.clone().filter(|c| !c.trim().is_empty()) {
            Some(content) => content,
            None => self.synthesize_body(ctx, &document.title).await,
        };
        let update = DocumentUpdate {
            title: intent.title.clone(),
            content: Some(content),
            append: intent.append,
        };

        match self.docs.update(token, &document.id, &update, ctx.cancel).await {
            Ok(updated) => AgentResult::success(
                format!("Successfully updated note '{}'", updated.title),
                serde_json::json!({
                    "id": updated.id,
                    "title": updated.title,
                    "url": updated.url,
                }),
            ),
            Err(e) => provider_error_result(&e),
        }
    }

    async fn handle_delete(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        intent: &NotesIntent,
    ) -> AgentResult {
        let query = intent
            .document_query
            .clone()
            .or_else(|| intent.title.clone())
            .unwrap_or_else(|| ctx.user_request().to_owned());
        let document = match self.match_document(ctx, token, &query).await {
            Ok(document) => document,
            Err(result) => return result,
        };

        match self.docs.delete(token, &document.id, ctx.cancel).await {
            Ok(()) => AgentResult::success(
                format!("Successfully deleted note '{}' (moved to trash)", document.title),
                serde_json::json!({"id": document.id, "title": document.title}),
            ),
            Err(e) => provider_error_result(&e),
        }
    }

    async fn handle_view_all(&self, ctx: &AgentContext<'_>, token: &str) -> AgentResult {
        match self.docs.list(token, 10, ctx.cancel).await {
            Ok(documents) => {
                let lines: Vec<String> = documents
                    .iter()
                    .map(|d| format!("- {} ({})", d.title, d.url))
                    .collect();
                let message = if documents.is_empty() {
                    "You have no documents yet.".to_owned()
                } else {
                    format!("Found {} document(s):\n{}", documents.len(), lines.join("\n"))
                };
                AgentResult::success(
                    message,
                    serde_json::json!({"documents": documents, "total_count": documents.len()}),
                )
            }
            Err(e) => provider_error_result(&e),
        }
    }

    async fn handle_view_specific(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        intent: &NotesIntent,
    ) -> AgentResult {
        let query = intent
            .document_query
            .clone()
            .or_else(|| intent.title.clone())
            .unwrap_or_else(|| ctx.user_request().to_owned());

        // Direct id lookup first; fuzzy references fall back to search.
        match self.docs.get(token, &query, ctx.cancel).await {
            Ok(content) => {
                let preview: String = content.plain_text.chars().take(1000).collect();
                AgentResult::success(
                    format!("Document '{}':\n{preview}", content.handle.title),
                    serde_json::json!({
                        "id": content.handle.id,
                        "title": content.handle.title,
                        "url": content.handle.url,
                        "content": content.plain_text,
                    }),
                )
            }
            Err(ProviderError::NotFound(_)) => self.handle_search(ctx, token, &query).await,
            Err(e) => provider_error_result(&e),
        }
    }

    async fn handle_search(
        &self,
        ctx: &AgentContext<'_>,
        token: &str,
        query: &str,
    ) -> AgentResult {
        match self.docs.search(token, query, 10, ctx.cancel).await {
            Ok(documents) => {
                if documents.is_empty() {
                    return AgentResult::error(format!("No documents found matching '{query}'."));
                }
                let lines: Vec<String> = documents
                    .iter()
                    .map(|d| format!("- {} ({})", d.title, d.url))
                    .collect();
                AgentResult::success(
                    format!(
                        "Found {} document(s) matching '{query}':\n{}",
                        documents.len(),
                        lines.join("\n")
                    ),
                    serde_json::json!({"documents": documents, "total_count": documents.len()}),
                )
            }
            Err(e) => provider_error_result(&e),
        }
    }
}

#[async_trait]
impl Agent for NotesAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Notes
    }

    async fn process(&self, ctx: &AgentContext<'_>) -> AgentResult {
        let Some(token) = ctx.provider_token() else {
            return AgentResult::error("Please sign in with Google to access your notes.");
        };

        let intent = match self.extract_intent(ctx).await {
            Ok(intent) => intent,
            Err(result) => return result,
        };
        info!(action = ?intent.action, "notes agent dispatching");

        match intent.action {
            NotesAction::Create => self.handle_create(ctx, token, &intent).await,
            NotesAction::Update => self.handle_update(ctx, token, &intent).await,
            NotesAction::Delete => self.handle_delete(ctx, token, &intent).await,
            NotesAction::ViewAll => self.handle_view_all(ctx, token).await,
            NotesAction::ViewSpecific => self.handle_view_specific(ctx, token, &intent).await,
            NotesAction::Search => {
                let query = intent
                    .document_query
                    .clone()
                    .unwrap_or_else(|| ctx.user_request().to_owned());
                self.handle_search(ctx, token, &query).await
            }
        }
    }
}

fn provider_error_result(error: &ProviderError) -> AgentResult {
    if error.is_auth() {
        AgentResult::error("Please sign in with Google to access your notes.")
    } else {
        AgentResult::error(format!("Notes operation failed: {error}"))
    }
}

fn disambiguation_error(document_query: &str, documents: &[DocumentHandle]) -> AgentResult {
    let sample: Vec<String> = documents
        .iter()
        .take(5)
        .map(|d| format!("- {}", d.title))
        .collect();
    AgentResult::error(format!(
        "Could not find a matching document for '{document_query}'. \
         Did you mean one of these?\n{}",
        sample.join("\n")
    ))
}
