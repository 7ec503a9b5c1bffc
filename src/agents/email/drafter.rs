//! AI-assisted email drafting.
//!
//! The drafter builds an instruction+context prompt from the request, tone
//! guidelines, recipient/subject hints and the last five history lines,
//! calls the gateway in JSON mode, and validates `to`/`subject`/`body`.
//! An unmapped model failure falls back to a minimal template keyed by the
//! raw request rather than failing the whole action.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::llm::{ChatTurn, CompletionRequest, LlmGateway};
use crate::store::{EmailDraft, EmailTone};
use crate::types::HistoryEntry;

/// Drafting temperature: creative but bounded.
const DRAFT_TEMPERATURE: f32 = 0.7;

/// History lines folded into the drafting context.
const CONTEXT_HISTORY_LINES: usize = 5;

fn tone_guideline(tone: EmailTone) -> &'static str {
    match tone {
        EmailTone::Professional => {
            "Use professional, business-appropriate language. Be polite and clear."
        }
        EmailTone::Friendly => {
            "Use warm, friendly language while maintaining professionalism. Be conversational."
        }
        EmailTone::Formal => "Use formal, traditional business language. Be respectful and reserved.",
        EmailTone::Casual => "Use relaxed, informal language. Be personable and direct.",
    }
}

/// Inputs to one drafting call.
pub struct DraftRequest<'a> {
    pub user_request: &'a str,
    pub session_id: &'a str,
    pub user_id: Option<&'a str>,
    pub recipient: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub tone: EmailTone,
    pub history: &'a [HistoryEntry],
}

/// AI-powered draft generation over the LLM gateway.
pub struct EmailDrafter {
    gateway: Arc<LlmGateway>,
}

impl EmailDrafter {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }

    /// Generate a new draft in the `Drafted` state.
    pub async fn draft_email(
        &self,
        request: &DraftRequest<'_>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> EmailDraft {
        let context = render_context(request.history);
        let content = self.generate_content(request, &context, cancel).await;

        let mut draft = EmailDraft::new(
            request.session_id,
            &content.to,
            &content.subject,
            &content.body,
            now,
        );
        draft.user_id = request.user_id.map(ToOwned::to_owned);
        draft.tone = request.tone;
        draft.ai_reasoning = content.reasoning;
        let tail: Vec<String> = {
            let skip = request.history.len().saturating_sub(CONTEXT_HISTORY_LINES);
            request.history[skip..]
                .iter()
                .map(HistoryEntry::as_prompt_line)
                .collect()
        };
        if !tail.is_empty() {
            draft.conversation_context = Some(tail);
        }

        info!(draft_id = %draft.id, to = %draft.to, "draft generated");
        draft
    }

    /// Apply field modifications and optionally regenerate the body.
    pub async fn update_draft(
        &self,
        draft: &mut EmailDraft,
        modifications: &BTreeMap<String, String>,
        user_request: Option<&str>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) {
        apply_field_modifications(draft, modifications);

        if let Some(request) = user_request {
            if let Some(updated) = self.regenerate_content(draft, request, cancel).await {
                if let Some(body) = updated.get("body").and_then(|v| v.as_str()) {
                    draft.body = body.to_owned();
                }
                if let Some(subject) = updated.get("subject").and_then(|v| v.as_str()) {
                    draft.subject = subject.to_owned();
                }
            }
        }

        draft.updated_at = now;
    }

    async fn generate_content(
        &self,
        request: &DraftRequest<'_>,
        context: &str,
        cancel: &CancellationToken,
    ) -> GeneratedContent {
        let system = format!(
            "You are an expert email writer. Generate professional email drafts \
             based on user requests.\n\n\
             TONE: {}\n\n\
             INSTRUCTIONS:\n\
             1. Extract or infer the recipient email if not explicitly provided\n\
             2. Create a clear, concise subject line if not provided\n\
             3. Write a well-structured email body with proper greeting and closing\n\
             4. Maintain the requested tone throughout\n\
             5. Be specific and actionable\n\n\
             Return JSON with:\n\
             {{\n\
               \"to\": \"recipient@example.com\",\n\
               \"subject\": \"Clear subject line\",\n\
               \"body\": \"Full email body with greeting, content, and closing\",\n\
               \"reasoning\": \"Brief explanation of your approach\"\n\
             }}",
            tone_guideline(request.tone)
        );

        let recipient_line = match request.recipient {
            Some(recipient) => format!("Recipient: {recipient}"),
            None => "Infer recipient from request".to_owned(),
        };
        let subject_line = match request.subject {
            Some(subject) => format!("Subject: {subject}"),
            None => "Generate appropriate subject".to_owned(),
        };
        let user = format!(
            "User Request: {}\n\nConversation Context:\n{context}\n\n\
             {recipient_line}\n{subject_line}\n\nGenerate the email draft as JSON.",
            request.user_request
        );

        let completion = CompletionRequest::json(
            vec![ChatTurn::system(system), ChatTurn::user(user)],
            DRAFT_TEMPERATURE,
        );

        match self.gateway.complete_json(&completion, cancel).await {
            Ok(value) => {
                let to = value.get("to").and_then(|v| v.as_str());
                let subject = value.get("subject").and_then(|v| v.as_str());
                let body = value.get("body").and_then(|v| v.as_str());
                match (to, subject, body) {
                    (Some(to), Some(subject), Some(body)) => GeneratedContent {
                        // Caller-provided hints always win over the model.
                        to: request.recipient.unwrap_or(to).to_owned(),
                        subject: request.subject.unwrap_or(subject).to_owned(),
                        body: body.to_owned(),
                        reasoning: value
                            .get("reasoning")
                            .and_then(|v| v.as_str())
                            .map(ToOwned::to_owned),
                    },
                    _ => {
                        warn!("draft response missing required fields, using fallback template");
                        fallback_content(request)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "draft generation failed, using fallback template");
                fallback_content(request)
            }
        }
    }

    async fn regenerate_content(
        &self,
        draft: &EmailDraft,
        user_request: &str,
        cancel: &CancellationToken,
    ) -> Option<serde_json::Value> {
        let system = format!(
            "You are updating an email draft based on user feedback.\n\n\
             Current Email:\n\
             To: {}\n\
             Subject: {}\n\
             Body: {}\n\n\
             User's Update Request: {user_request}\n\n\
             Generate the updated email content as JSON with \"subject\" and \"body\" fields.",
            draft.to, draft.subject, draft.body
        );
        let completion = CompletionRequest::json(
            vec![
                ChatTurn::system(system),
                ChatTurn::user("Update the email as requested."),
            ],
            DRAFT_TEMPERATURE,
        );
        match self.gateway.complete_json(&completion, cancel).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "draft regeneration failed, keeping current content");
                None
            }
        }
    }
}

struct GeneratedContent {
    to: String,
    subject: String,
    body: String,
    reasoning: Option<String>,
}

fn fallback_content(request: &DraftRequest<'_>) -> GeneratedContent {
    GeneratedContent {
        to: request.recipient.unwrap_or("recipient@example.com").to_owned(),
        subject: request.subject.unwrap_or("Email from assistant").to_owned(),
        body: format!(
            "[Generated from request: {}]\n\nPlease review and edit as needed.",
            request.user_request
        ),
        reasoning: Some("Fallback template (model output unavailable)".to_owned()),
    }
}

fn render_context(history: &[HistoryEntry]) -> String {
    if history.is_empty() {
        return "No previous conversation context.".to_owned();
    }
    let skip = history.len().saturating_sub(CONTEXT_HISTORY_LINES);
    history[skip..]
        .iter()
        .map(HistoryEntry::as_prompt_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Direct field updates; only addressable fields are writable.
fn apply_field_modifications(draft: &mut EmailDraft, modifications: &BTreeMap<String, String>) {
    for (field, value) in modifications {
        match field.as_str() {
            "to" => draft.to = value.clone(),
            "subject" => draft.subject = value.clone(),
            "body" => draft.body = value.clone(),
            "cc" => draft.cc = Some(split_addresses(value)),
            "bcc" => draft.bcc = Some(split_addresses(value)),
            other => warn!(field = other, "ignoring unknown draft modification field"),
        }
    }
}

fn split_addresses(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmProvider};
    use async_trait::async_trait;

    struct CannedProvider(String);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            Err(LlmError::RequestFailed("unreachable".to_owned()))
        }
    }

    fn drafter(response: &str) -> EmailDrafter {
        EmailDrafter::new(Arc::new(LlmGateway::new(Box::new(CannedProvider(
            response.to_owned(),
        )))))
    }

    fn request<'a>(user_request: &'a str, recipient: Option<&'a str>) -> DraftRequest<'a> {
        DraftRequest {
            user_request,
            session_id: "s1",
            user_id: None,
            recipient,
            subject: None,
            tone: EmailTone::Professional,
            history: &[],
        }
    }

    #[tokio::test]
    async fn test_draft_from_model_json() {
        let drafter = drafter(
            r#"{"to": "bob@example.com", "subject": "Q4 review", "body": "Hi Bob,\n\nLet's review Q4.\n\nBest", "reasoning": "direct ask"}"#,
        );
        let req = request("Draft an email to bob@example.com about Q4 review", None);
        let draft = drafter
            .draft_email(&req, Utc::now(), &CancellationToken::new())
            .await;
        assert_eq!(draft.to, "bob@example.com");
        assert_eq!(draft.subject, "Q4 review");
        assert!(draft.body.contains("Hi Bob"));
        assert_eq!(draft.ai_reasoning.as_deref(), Some("direct ask"));
        assert_eq!(draft.status, crate::store::DraftStatus::Drafted);
    }

    #[tokio::test]
    async fn test_caller_recipient_overrides_model() {
        let drafter = drafter(
            r#"{"to": "guess@wrong.com", "subject": "s", "body": "b"}"#,
        );
        let req = request("email carol", Some("carol@real.org"));
        let draft = drafter
            .draft_email(&req, Utc::now(), &CancellationToken::new())
            .await;
        assert_eq!(draft.to, "carol@real.org");
    }

    #[tokio::test]
    async fn test_missing_fields_fall_back_to_template() {
        let drafter = drafter(r#"{"subject": "only subject"}"#);
        let req = request("tell dave the meeting moved", Some("dave@x.org"));
        let draft = drafter
            .draft_email(&req, Utc::now(), &CancellationToken::new())
            .await;
        assert_eq!(draft.to, "dave@x.org");
        assert!(draft.body.contains("tell dave the meeting moved"));
    }

    #[tokio::test]
    async fn test_gateway_failure_falls_back() {
        let drafter = EmailDrafter::new(Arc::new(LlmGateway::new(Box::new(FailingProvider))));
        let req = request("say hi to eve", None);
        let draft = drafter
            .draft_email(&req, Utc::now(), &CancellationToken::new())
            .await;
        assert_eq!(draft.to, "recipient@example.com");
        assert!(draft.body.contains("say hi to eve"));
    }

    #[tokio::test]
    async fn test_history_recorded_as_context() {
        let drafter = drafter(r#"{"to": "a@b.co", "subject": "s", "body": "b"}"#);
        let history: Vec<HistoryEntry> = (0..8)
            .map(|i| HistoryEntry {
                role: "User".to_owned(),
                body: format!("line {i}"),
            })
            .collect();
        let req = DraftRequest {
            history: &history,
            ..request("draft it", None)
        };
        let draft = drafter
            .draft_email(&req, Utc::now(), &CancellationToken::new())
            .await;
        let context = draft.conversation_context.expect("context recorded");
        assert_eq!(context.len(), 5, "only the last five lines are kept");
        assert_eq!(context[0], "User: line 3");
    }

    #[tokio::test]
    async fn test_update_applies_modifications() {
        let drafter = drafter(r#"{"subject": "ignored", "body": "ignored"}"#);
        let mut draft = EmailDraft::new("s1", "old@x.org", "old subject", "old body", Utc::now());
        let mut mods = BTreeMap::new();
        mods.insert("to".to_owned(), "new@x.org".to_owned());
        mods.insert("cc".to_owned(), "a@x.org, b@x.org".to_owned());

        drafter
            .update_draft(&mut draft, &mods, None, Utc::now(), &CancellationToken::new())
            .await;
        assert_eq!(draft.to, "new@x.org");
        assert_eq!(
            draft.cc.as_deref(),
            Some(&["a@x.org".to_owned(), "b@x.org".to_owned()][..])
        );
        assert_eq!(draft.subject, "old subject", "no regeneration without a request");
    }

    #[tokio::test]
    async fn test_update_with_request_regenerates() {
        let drafter = drafter(r#"{"subject": "new subject", "body": "new body"}"#);
        let mut draft = EmailDraft::new("s1", "a@x.org", "old subject", "old body", Utc::now());
        drafter
            .update_draft(
                &mut draft,
                &BTreeMap::new(),
                Some("make it shorter"),
                Utc::now(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(draft.subject, "new subject");
        assert_eq!(draft.body, "new body");
    }
}
