//! OpenAI-compatible chat-completions provider.
//!
//! Works with the official API and any server speaking the
//! `/v1/chat/completions` protocol (Azure-style deployments included when
//! fronted by a compatible proxy). JSON mode is requested through
//! `response_format: {"type": "json_object"}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatRole, CompletionRequest, LlmError, LlmProvider, ResponseFormat};

/// Chat completion request body.
#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireFormat>,
}

/// A single message in a chat completion request.
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

/// `response_format` field for JSON mode.
#[derive(Debug, Serialize)]
struct WireFormat {
    #[serde(rename = "type")]
    kind: String,
}

/// Chat completion response body.
#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

/// A single choice in a chat completion response.
#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

/// OpenAI-compatible HTTP provider.
pub struct OpenAiProvider {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Provider for the official API or any bearer-authenticated deployment.
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: Some(api_key.to_owned()),
            model: model.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Provider for a local OpenAI-compatible server (no API key).
    pub fn local(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: None,
            model: model.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    fn wire_request(&self, request: &CompletionRequest) -> WireRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    ChatRole::System => "system".to_owned(),
                    ChatRole::User => "user".to_owned(),
                    ChatRole::Assistant => "assistant".to_owned(),
                },
                content: m.content.clone(),
            })
            .collect();

        let response_format = match request.format {
            ResponseFormat::Text => None,
            ResponseFormat::JsonObject => Some(WireFormat {
                kind: "json_object".to_owned(),
            }),
        };

        WireRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.wire_request(request);

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("(body unreadable: {e})"));
            if status.as_u16() == 404 {
                return Err(LlmError::ModelUnavailable(self.model.clone()));
            }
            return Err(LlmError::RequestFailed(format!("HTTP {status}: {text}")));
        }

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        wire.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::RequestFailed("empty choices array".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatTurn;

    #[test]
    fn test_wire_request_shape() {
        let provider = OpenAiProvider::new("https://api.openai.com", "key", "gpt-4o");
        let request = CompletionRequest::json(
            vec![
                ChatTurn::system("be terse"),
                ChatTurn::user("hello"),
            ],
            0.1,
        );
        let wire = provider.wire_request(&request);
        let json = serde_json::to_value(&wire).expect("should serialize");

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_wire_request_text_mode_omits_format() {
        let provider = OpenAiProvider::local("http://localhost:1234", "local-model");
        let request = CompletionRequest::text(vec![ChatTurn::user("hi")], 0.5);
        let wire = provider.wire_request(&request);
        let json = serde_json::to_value(&wire).expect("should serialize");
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let json = serde_json::json!({
            "choices": [{
                "message": {"role": "assistant", "content": "Hello there!"}
            }]
        });
        let resp: WireResponse = serde_json::from_value(json).expect("should deserialize");
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].message.content, "Hello there!");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let provider = OpenAiProvider::local("http://localhost:1234/", "m");
        assert_eq!(provider.base_url, "http://localhost:1234");
    }
}
