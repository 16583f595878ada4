//! Google Gemini generateContent client.
//!
//! Structured generation sets `responseMimeType: application/json`;
//! streaming uses `streamGenerateContent?alt=sse`, where each frame carries
//! a partial candidate with `content.parts[].text`.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use super::stream::data_lines;
use super::{AiProvider, ChatMessage, ProviderError, TextStream, strip_code_fences};

/// Base URL for the Gemini API.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Gemini generateContent API.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: GEMINI_API_BASE.to_string(),
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

    /// Gemini uses "model" where the chat history says "assistant"; system
    /// prompts travel in a separate field.
    fn contents(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| {
                let role = if m.role == "assistant" { "model" } else { "user" };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect()
    }

    async fn post(&self, method: &str, body: Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!(
            "{}/models/{}:{}?key={}",
            self.base_url, self.model, method, self.api_key
        );

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
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

/// Pull the first candidate's text out of a generateContent response.
fn extract_text(response: &Value) -> Result<&str, ProviderError> {
    response["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| {
            ProviderError::InvalidResponse("missing candidates[0].content.parts[0].text".into())
        })
}

/// Pull the text fragment out of one streamed frame, `None` for frames with
/// no text part (safety metadata, finish markers).
fn delta_text(data: &str) -> Result<Option<String>, ProviderError> {
    let value: Value = serde_json::from_str(data)?;
    Ok(value["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(|s| s.to_string()))
}

#[async_trait]
impl AiProvider for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> Result<Value, ProviderError> {
        let body = json!({
            "systemInstruction": {
                "parts": [{ "text": format!(
                    "You extract structured data. Answer with one JSON object matching this schema: {}",
                    schema
                ) }]
            },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response: Value = self.post("generateContent", body).await?.json().await?;
        let text = extract_text(&response)?;
        Ok(serde_json::from_str(strip_code_fences(text))?)
    }

    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TextStream, ProviderError> {
        let body = json!({ "contents": Self::contents(messages) });

        // post() builds a single-parameter URL; the SSE form needs alt=sse too.
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

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
            "candidates": [{
                "content": { "parts": [{ "text": "{\"category\":\"cleaning\"}" }] }
            }]
        });
        assert_eq!(
            extract_text(&response).unwrap(),
            "{\"category\":\"cleaning\"}"
        );
    }

    #[test]
    fn test_extract_text_missing() {
        assert!(extract_text(&json!({ "candidates": [] })).is_err());
    }

    #[test]
    fn test_delta_text() {
        let frame = r#"{"candidates":[{"content":{"parts":[{"text":"chunk"}]}}]}"#;
        assert_eq!(delta_text(frame).unwrap(), Some("chunk".to_string()));

        let finish = r#"{"candidates":[{"finishReason":"STOP"}]}"#;
        assert_eq!(delta_text(finish).unwrap(), None);
    }

    #[test]
    fn test_contents_maps_roles() {
        let messages = vec![
            ChatMessage::system("ignored here"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
        ];
        let contents = GeminiClient::contents(&messages);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
    }
}
