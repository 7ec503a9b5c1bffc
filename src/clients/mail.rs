//! Mail capability client -- Gmail-backed.
//!
//! Three operations: `list`, `get`, `send`. `send` is NOT idempotent at
//! the wire level; the email agent's send worker layers at-most-once
//! semantics on top. Bodies are truncated at 5000 characters and snippets
//! at 100 characters on read.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{map_error_status, parse_retry_after, ProviderError};

/// Maximum results a single list call may request.
pub const MAX_LIST_RESULTS: u32 = 100;

/// Snippet length cap on read.
const SNIPPET_MAX_CHARS: usize = 100;

/// Body length cap on read.
const BODY_MAX_CHARS: usize = 5000;

/// Structured metadata for one listed email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub subject: String,
    pub date: String,
    /// At most 100 characters.
    pub snippet: String,
    pub is_unread: bool,
}

/// A fully fetched email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailFull {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    pub date: String,
    pub subject: String,
    pub snippet: String,
    /// Truncated at 5000 characters.
    pub body: String,
    pub is_unread: bool,
    pub labels: Vec<String>,
}

/// Inbox list parameters.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Clamped to [`MAX_LIST_RESULTS`].
    pub max_results: u32,
    /// Provider search expression (already composed from natural language).
    pub query: Option<String>,
}

/// Outbound message handed to `send`.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Provider identifiers returned by a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub provider_thread_id: String,
}

/// Mail capability interface.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// List recent messages matching the query.
    async fn list(
        &self,
        token: &str,
        query: &ListQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<EmailSummary>, ProviderError>;

    /// Fetch a single message by id.
    async fn get(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<EmailFull, ProviderError>;

    /// Send a message. Not idempotent; callers own at-most-once semantics.
    async fn send(
        &self,
        token: &str,
        email: &OutgoingEmail,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, ProviderError>;
}

/// Gmail REST implementation.
pub struct GmailClient {
    base_url: String,
    client: reqwest::Client,
}

impl GmailClient {
    /// Client against the production Gmail endpoint.
    pub fn new() -> Self {
        Self::with_base_url("https://gmail.googleapis.com")
    }

    /// Client against an alternate endpoint (tests, proxies).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json(
        &self,
        token: &str,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        let fut = self.client.get(url).bearer_auth(token).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            resp = fut => resp.map_err(|e| ProviderError::Permanent(e.to_string()))?,
        };
        read_json_response(resp, !token.is_empty()).await
    }
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a response, mapping error statuses into the taxonomy.
async fn read_json_response(
    resp: reqwest::Response,
    had_token: bool,
) -> Result<serde_json::Value, ProviderError> {
    if !resp.status().is_success() {
        let status = resp.status();
        let retry_after = parse_retry_after(&resp);
        let body = resp.text().await.unwrap_or_default();
        return Err(map_error_status(status, &body, had_token, retry_after));
    }
    resp.json()
        .await
        .map_err(|e| ProviderError::Permanent(format!("malformed provider response: {e}")))
}

/// Pull one named header out of a Gmail message payload.
fn header<'a>(payload: &'a serde_json::Value, name: &str) -> &'a str {
    payload
        .get("headers")
        .and_then(|h| h.as_array())
        .and_then(|headers| {
            headers.iter().find(|h| {
                h.get("name")
                    .and_then(|n| n.as_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
        })
        .and_then(|h| h.get("value"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

/// Decode the first text/plain body part, falling back to the top-level body.
fn decode_body(payload: &serde_json::Value) -> String {
    fn data_of(part: &serde_json::Value) -> Option<String> {
        let data = part.get("body")?.get("data")?.as_str()?;
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(data.as_bytes())
            .ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    if let Some(parts) = payload.get("parts").and_then(|p| p.as_array()) {
        for part in parts {
            let mime = part
                .get("mimeType")
                .and_then(|m| m.as_str())
                .unwrap_or_default();
            if mime == "text/plain" {
                if let Some(text) = data_of(part) {
                    return text;
                }
            }
        }
        // No text/plain part; fall back to the first decodable part.
        for part in parts {
            if let Some(text) = data_of(part) {
                return text;
            }
        }
    }
    data_of(payload).unwrap_or_default()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Build the RFC-2822 payload Gmail expects in `raw`.
fn rfc2822_payload(email: &OutgoingEmail) -> String {
    let mut lines = Vec::new();
    lines.push(format!("To: {}", email.to));
    if !email.cc.is_empty() {
        lines.push(format!("Cc: {}", email.cc.join(", ")));
    }
    if !email.bcc.is_empty() {
        lines.push(format!("Bcc: {}", email.bcc.join(", ")));
    }
    lines.push(format!("Subject: {}", email.subject));
    lines.push("MIME-Version: 1.0".to_owned());
    lines.push("Content-Type: text/plain; charset=\"UTF-8\"".to_owned());
    lines.push(String::new());
    lines.push(email.body.clone());
    lines.join("\r\n")
}

#[async_trait]
impl MailClient for GmailClient {
    async fn list(
        &self,
        token: &str,
        query: &ListQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<EmailSummary>, ProviderError> {
        if token.is_empty() {
            return Err(ProviderError::AuthMissing);
        }
        let max = query.max_results.clamp(1, MAX_LIST_RESULTS);
        let mut url = format!(
            "{}/gmail/v1/users/me/messages?maxResults={max}",
            self.base_url
        );
        if let Some(q) = &query.query {
            if !q.is_empty() {
                url.push_str("&q=");
                url.push_str(&super::urlencode(q));
            }
        }

        let listing = self.get_json(token, &url, cancel).await?;
        let ids: Vec<String> = listing
            .get("messages")
            .and_then(|m| m.as_array())
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m.get("id").and_then(|i| i.as_str()))
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        debug!(count = ids.len(), "listed message ids");

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let url = format!(
                "{}/gmail/v1/users/me/messages/{id}?format=metadata",
                self.base_url
            );
            let msg = self.get_json(token, &url, cancel).await?;
            let payload = msg.get("payload").cloned().unwrap_or_default();
            let labels: Vec<String> = msg
                .get("labelIds")
                .and_then(|l| l.as_array())
                .map(|l| {
                    l.iter()
                        .filter_map(|v| v.as_str())
                        .map(ToOwned::to_owned)
                        .collect()
                })
                .unwrap_or_default();

            summaries.push(EmailSummary {
                id: msg
                    .get("id")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_owned(),
                thread_id: msg
                    .get("threadId")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_owned(),
                from: header(&payload, "From").to_owned(),
                subject: header(&payload, "Subject").to_owned(),
                date: header(&payload, "Date").to_owned(),
                snippet: truncate_chars(
                    msg.get("snippet").and_then(|s| s.as_str()).unwrap_or_default(),
                    SNIPPET_MAX_CHARS,
                ),
                is_unread: labels.iter().any(|l| l == "UNREAD"),
            });
        }
        Ok(summaries)
    }

    async fn get(
        &self,
        token: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<EmailFull, ProviderError> {
        if token.is_empty() {
            return Err(ProviderError::AuthMissing);
        }
        let url = format!("{}/gmail/v1/users/me/messages/{id}?format=full", self.base_url);
        let msg = self.get_json(token, &url, cancel).await?;
        let payload = msg.get("payload").cloned().unwrap_or_default();
        let labels: Vec<String> = msg
            .get("labelIds")
            .and_then(|l| l.as_array())
            .map(|l| {
                l.iter()
                    .filter_map(|v| v.as_str())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let cc = {
            let value = header(&payload, "Cc");
            if value.is_empty() {
                None
            } else {
                Some(value.to_owned())
            }
        };

        Ok(EmailFull {
            id: msg
                .get("id")
                .and_then(|i| i.as_str())
                .unwrap_or(id)
                .to_owned(),
            thread_id: msg
                .get("threadId")
                .and_then(|i| i.as_str())
                .unwrap_or_default()
                .to_owned(),
            from: header(&payload, "From").to_owned(),
            to: header(&payload, "To").to_owned(),
            cc,
            date: header(&payload, "Date").to_owned(),
            subject: header(&payload, "Subject").to_owned(),
            snippet: truncate_chars(
                msg.get("snippet").and_then(|s| s.as_str()).unwrap_or_default(),
                SNIPPET_MAX_CHARS,
            ),
            body: truncate_chars(&decode_body(&payload), BODY_MAX_CHARS),
            is_unread: labels.iter().any(|l| l == "UNREAD"),
            labels,
        })
    }

    async fn send(
        &self,
        token: &str,
        email: &OutgoingEmail,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, ProviderError> {
        if token.is_empty() {
            return Err(ProviderError::AuthMissing);
        }
        let url = format!("{}/gmail/v1/users/me/messages/send", self.base_url);
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(rfc2822_payload(email).as_bytes());

        let fut = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "raw": raw }))
            .send();

        // Once the request is on the wire the outcome must be observed;
        // cancellation is checked before, not during.
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let resp = fut
            .await
            // Transport failure after dispatch: delivery state unknowable.
            .map_err(|e| ProviderError::Permanent(format!("ambiguous send outcome: {e}")))?;

        let value = read_json_response(resp, true).await?;
        Ok(SendReceipt {
            provider_message_id: value
                .get("id")
                .and_then(|i| i.as_str())
                .unwrap_or_default()
                .to_owned(),
            provider_thread_id: value
                .get("threadId")
                .and_then(|i| i.as_str())
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc2822_payload_minimal() {
        let email = OutgoingEmail {
            to: "bob@example.org".to_owned(),
            cc: vec![],
            bcc: vec![],
            subject: "Hello".to_owned(),
            body: "Hi Bob".to_owned(),
        };
        let payload = rfc2822_payload(&email);
        assert!(payload.starts_with("To: bob@example.org\r\n"));
        assert!(payload.contains("Subject: Hello\r\n"));
        assert!(!payload.contains("Cc:"));
        assert!(payload.ends_with("\r\nHi Bob"));
    }

    #[test]
    fn test_rfc2822_payload_with_cc_bcc() {
        let email = OutgoingEmail {
            to: "a@x.org".to_owned(),
            cc: vec!["b@x.org".to_owned(), "c@x.org".to_owned()],
            bcc: vec!["d@x.org".to_owned()],
            subject: "s".to_owned(),
            body: "b".to_owned(),
        };
        let payload = rfc2822_payload(&email);
        assert!(payload.contains("Cc: b@x.org, c@x.org\r\n"));
        assert!(payload.contains("Bcc: d@x.org\r\n"));
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let payload = serde_json::json!({
            "headers": [
                {"name": "subject", "value": "Q3 Budget"},
                {"name": "From", "value": "sarah@co"}
            ]
        });
        assert_eq!(header(&payload, "Subject"), "Q3 Budget");
        assert_eq!(header(&payload, "From"), "sarah@co");
        assert_eq!(header(&payload, "Cc"), "");
    }

    #[test]
    fn test_decode_body_prefers_text_plain() {
        let encode = |s: &str| {
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s.as_bytes())
        };
        let payload = serde_json::json!({
            "parts": [
                {"mimeType": "text/html", "body": {"data": encode("<b>html</b>")}},
                {"mimeType": "text/plain", "body": {"data": encode("plain text")}}
            ]
        });
        assert_eq!(decode_body(&payload), "plain text");
    }

    #[test]
    fn test_decode_body_top_level_fallback() {
        let encoded =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("just a body".as_bytes());
        let payload = serde_json::json!({"body": {"data": encoded}});
        assert_eq!(decode_body(&payload), "just a body");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 100), "hello");
        assert_eq!(truncate_chars(&"x".repeat(200), 100).len(), 100);
    }

    #[tokio::test]
    async fn test_list_requires_token() {
        let client = GmailClient::new();
        let result = client
            .list(
                "",
                &ListQuery {
                    max_results: 10,
                    query: None,
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(ProviderError::AuthMissing)));
    }

    #[tokio::test]
    async fn test_send_requires_token() {
        let client = GmailClient::new();
        let email = OutgoingEmail {
            to: "a@b.co".to_owned(),
            cc: vec![],
            bcc: vec![],
            subject: "s".to_owned(),
            body: "b".to_owned(),
        };
        let result = client.send("", &email, &CancellationToken::new()).await;
        assert!(matches!(result, Err(ProviderError::AuthMissing)));
    }

    #[tokio::test]
    async fn test_send_cancelled_before_dispatch() {
        let client = GmailClient::new();
        let email = OutgoingEmail {
            to: "a@b.co".to_owned(),
            cc: vec![],
            bcc: vec![],
            subject: "s".to_owned(),
            body: "b".to_owned(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.send("token", &email, &cancel).await;
        assert!(matches!(result, Err(ProviderError::Cancelled)));
    }
}
