//! Anthropic messages-API client.
//!
//! Structured generation asks for a bare JSON answer and parses the first
//! text block; streaming uses the SSE form where `content_block_delta`
//! events carry `delta.text` fragments.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use super::stream::data_lines;
use super::{AiProvider, ChatMessage, ProviderError, TextStream, strip_code_fences};

/// Base URL for the Anthropic API.
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";

const ANTHROPIC_VERSION: &str = "2023-06-01";

const MAX_TOKENS: u32 = 1024;

/// Client for the Anthropic messages API.
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: ANTHROPIC_API_BASE.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::new(api_key, model)
        }
    }

    /// Split a chat history into the system prompt and the turn list the
    /// messages API expects.
    fn split_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let system = messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.clone());
        let turns = messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        (system, turns)
    }

    async fn post(&self, mut body: Value) -> Result<reqwest::Response, ProviderError> {
        body["model"] = json!(self.model);
        body["max_tokens"] = json!(MAX_TOKENS);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 {
                return Err(ProviderError::Authentication(body));
            }
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Pull the first text block out of a messages response.
fn extract_text(response: &Value) -> Result<&str, ProviderError> {
    response["content"][0]["text"]
        .as_str()
        .ok_or_else(|| ProviderError::InvalidResponse("missing content[0].text".into()))
}

/// Pull the text fragment out of one streamed event, `None` for events that
/// carry no text (message_start, content_block_stop, ping, ...).
fn delta_text(data: &str) -> Result<Option<String>, ProviderError> {
    let value: Value = serde_json::from_str(data)?;
    if value["type"] != "content_block_delta" {
        return Ok(None);
    }
    Ok(value["delta"]["text"].as_str().map(|s| s.to_string()))
}

#[async_trait]
impl AiProvider for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let system = format!(
            "You extract structured data. Answer with one JSON object matching this schema, \
             and nothing else: {}",
            schema
        );
        let body = json!({
            "system": system,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let response: Value = self.post(body).await?.json().await?;
        let text = extract_text(&response)?;
        Ok(serde_json::from_str(strip_code_fences(text))?)
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TextStream, ProviderError> {
        let (system, turns) = Self::split_messages(messages);
        let mut body = json!({ "stream": true, "messages": turns });
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        let response = self.post(body).await?;
        let lines = data_lines(Box::pin(response.bytes_stream()));

        let texts = lines.filter_map(|item| async move {
            match item {
                Ok(data) => match delta_text(&data) {
                    Ok(Some(text)) => Some(Ok(text)),
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(texts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text() {
        let response = json!({
            "content": [{ "type": "text", "text": "{\"category\":\"security\"}" }]
        });
        assert_eq!(
            extract_text(&response).unwrap(),
            "{\"category\":\"security\"}"
        );
    }

    #[test]
    fn test_extract_text_missing() {
        assert!(extract_text(&json!({ "content": [] })).is_err());
    }

    #[test]
    fn test_delta_text_only_for_content_deltas() {
        let delta = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(delta_text(delta).unwrap(), Some("Hi".to_string()));

        let ping = r#"{"type":"ping"}"#;
        assert_eq!(delta_text(ping).unwrap(), None);
    }

    #[test]
    fn test_split_messages() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let (system, turns) = AnthropicClient::split_messages(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["role"], "user");
    }
}
