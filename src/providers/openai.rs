//! OpenAI chat-completions client.
//!
//! Structured generation uses `response_format: json_object` so the answer
//! is a bare JSON document; streaming uses the SSE variant of the same
//! endpoint, terminated by a `[DONE]` sentinel.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use super::stream::{DONE_SENTINEL, data_lines};
use super::{AiProvider, ChatMessage, ProviderError, TextStream, strip_code_fences};

/// Base URL for the OpenAI API.
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Client for the OpenAI chat-completions API.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: OPENAI_API_BASE.to_string(),
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

    fn message_values(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect()
    }

    async fn post(&self, body: Value) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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

/// Pull the assistant message text out of a completion response.
fn extract_content(response: &Value) -> Result<&str, ProviderError> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".into()))
}

/// Pull the text delta out of one streamed chunk, `None` for chunks that
/// carry no content (role preludes, finish markers).
fn delta_text(data: &str) -> Result<Option<String>, ProviderError> {
    let value: Value = serde_json::from_str(data)?;
    Ok(value["choices"][0]["delta"]["content"]
        .as_str()
        .map(|s| s.to_string()))
}

#[async_trait]
impl AiProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let system = format!(
            "You extract structured data. Answer with one JSON object matching this schema: {}",
            schema
        );
        let body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ]
        });

        let response: Value = self.post(body).await?.json().await?;
        let content = extract_content(&response)?;
        Ok(serde_json::from_str(strip_code_fences(content))?)
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TextStream, ProviderError> {
        let body = json!({
            "model": self.model,
            "stream": true,
            "messages": Self::message_values(messages)
        });

        let response = self.post(body).await?;
        let lines = data_lines(Box::pin(response.bytes_stream()));

        let texts = lines.filter_map(|item| async move {
            match item {
                Ok(data) if data == DONE_SENTINEL => None,
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
    fn test_extract_content() {
        let response = json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"category\":\"it\"}" } }]
        });
        assert_eq!(extract_content(&response).unwrap(), "{\"category\":\"it\"}");
    }

    #[test]
    fn test_extract_content_missing() {
        let response = json!({ "choices": [] });
        assert!(extract_content(&response).is_err());
    }

    #[test]
    fn test_delta_text() {
        let chunk = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(delta_text(chunk).unwrap(), Some("Hel".to_string()));

        // Role prelude carries no content.
        let prelude = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(delta_text(prelude).unwrap(), None);
    }

    #[test]
    fn test_delta_text_bad_json() {
        assert!(delta_text("not json").is_err());
    }
}
