//! AI provider layer: structured and streaming generation with fallback.
//!
//! Each backend implements [`AiProvider`]. The factory never panics or
//! errors on a missing credential: selection yields a [`Selection`] sum type
//! the caller can branch on, and [`select_with_fallback`] walks a fixed
//! priority order (OpenAI, then Anthropic, then Gemini) over the configured
//! credentials. When nothing is usable the caller gets
//! [`UnavailableReason::NoProvidersConfigured`] and degrades to the
//! rule-based parser in [`fallback`] instead of failing the request.
//!
//! Network and API errors from a chosen provider surface as
//! [`ProviderError`]; retrying is the caller's business, not the factory's.

pub mod anthropic;
pub mod fallback;
pub mod gemini;
pub mod openai;
pub mod stream;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{ActivityDraft, LlmConfig};
use crate::storage::Storage;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;

/// Errors that can occur when talking to an AI backend.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rejected or missing credential.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// HTTP-level failure.
    #[error("http error (status {status}): {body}")]
    Http { status: u16, body: String },

    /// Streaming response ended or decoded badly.
    #[error("stream error: {0}")]
    Stream(String),

    /// JSON encoding/decoding failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend answered 2xx but the body wasn't in the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Http {
            status: err.status().map(|s| s.as_u16()).unwrap_or(0),
            body: err.to_string(),
        }
    }
}

/// One message in a chat history.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// "system", "user", or "assistant".
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Incremental text chunks from a streaming generation.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Interface every AI backend satisfies.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable provider name for logging.
    fn name(&self) -> &'static str;

    /// Generate a JSON document matching `schema` from a prompt.
    ///
    /// One HTTP request per call; no retry here.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &Value,
    ) -> Result<Value, ProviderError>;

    /// Generate streaming text from a message history.
    async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TextStream, ProviderError>;
}

/// Identifier of a supported backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Gemini,
}

/// Fixed priority order used when falling back.
pub const FALLBACK_ORDER: [ProviderId; 3] =
    [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gemini];

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
            ProviderId::Gemini => "gemini",
        }
    }

    /// Parse a stored provider name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderId::OpenAi),
            "anthropic" | "claude" => Some(ProviderId::Anthropic),
            "gemini" | "google" => Some(ProviderId::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A usable provider configuration: known backend, non-empty credential.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: ProviderId,
    pub model: String,
    pub api_key: String,
}

impl ProviderConfig {
    /// Convert a stored configuration row; `None` when the provider name is
    /// unknown or the credential is blank.
    pub fn from_stored(config: &LlmConfig) -> Option<Self> {
        let provider = ProviderId::parse(&config.provider)?;
        if config.api_key.trim().is_empty() {
            return None;
        }
        Some(Self {
            provider,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

/// Why no provider handle could be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The requested backend has no usable credential.
    MissingCredential(ProviderId),
    /// The requested name isn't a known backend.
    UnknownProvider(String),
    /// No backend anywhere in the chain has a usable credential.
    NoProvidersConfigured,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::MissingCredential(id) => {
                write!(f, "no usable credential for provider '{}'", id)
            }
            UnavailableReason::UnknownProvider(name) => {
                write!(f, "unknown provider '{}'", name)
            }
            UnavailableReason::NoProvidersConfigured => f.write_str("no providers configured"),
        }
    }
}

/// Result of provider selection: a live handle or a reason there is none.
pub enum Selection {
    Available(Box<dyn AiProvider>),
    Unavailable(UnavailableReason),
}

impl Selection {
    pub fn is_available(&self) -> bool {
        matches!(self, Selection::Available(_))
    }
}

fn instantiate(config: &ProviderConfig) -> Box<dyn AiProvider> {
    match config.provider {
        ProviderId::OpenAi => Box::new(OpenAiClient::new(&config.api_key, &config.model)),
        ProviderId::Anthropic => Box::new(AnthropicClient::new(&config.api_key, &config.model)),
        ProviderId::Gemini => Box::new(GeminiClient::new(&config.api_key, &config.model)),
    }
}

/// Select a specific backend, without fallback.
pub fn select_provider(requested: ProviderId, configs: &[ProviderConfig]) -> Selection {
    match configs.iter().find(|c| c.provider == requested) {
        Some(config) => Selection::Available(instantiate(config)),
        None => Selection::Unavailable(UnavailableReason::MissingCredential(requested)),
    }
}

/// Select the requested backend if usable, otherwise the first usable one in
/// [`FALLBACK_ORDER`].
pub fn select_with_fallback(
    requested: Option<ProviderId>,
    configs: &[ProviderConfig],
) -> Selection {
    if let Some(id) = requested {
        if let Selection::Available(provider) = select_provider(id, configs) {
            return Selection::Available(provider);
        }
        warn!(provider = %id, "Requested provider unusable, trying fallback chain");
    }

    for id in FALLBACK_ORDER {
        if requested == Some(id) {
            continue;
        }
        if let Selection::Available(provider) = select_provider(id, configs) {
            return Selection::Available(provider);
        }
    }

    Selection::Unavailable(UnavailableReason::NoProvidersConfigured)
}

/// Where a draft came from, reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftSource {
    Ai,
    Fallback,
}

impl DraftSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftSource::Ai => "ai",
            DraftSource::Fallback => "fallback",
        }
    }
}

/// JSON schema the backends are asked to fill for an activity draft.
pub fn activity_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "category": {
                "type": "string",
                "description": "Incident category, e.g. maintenance, security, cleaning, it, medical"
            },
            "subcategory": { "type": "string" },
            "location": { "type": "string" },
            "notes": { "type": "string" }
        },
        "required": ["category"]
    })
}

/// Strip a Markdown code fence some backends wrap JSON answers in.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn draft_prompt(text: &str) -> String {
    format!(
        "Extract a school incident report from the message below. \
         Respond with a single JSON object matching the schema. \
         Use the original wording for notes.\n\nMessage: {}",
        text
    )
}

/// Turn free text into a structured activity draft.
///
/// Tries the selected provider first; any selection failure or provider
/// error degrades to the rule-based parser so the caller never 5xxes for a
/// missing or broken AI backend.
pub async fn draft_activity(
    storage: &Storage,
    text: &str,
    requested: Option<ProviderId>,
) -> anyhow::Result<(ActivityDraft, DraftSource)> {
    let configs: Vec<ProviderConfig> = storage
        .active_llm_configs()
        .await?
        .iter()
        .filter_map(ProviderConfig::from_stored)
        .collect();

    match select_with_fallback(requested, &configs) {
        Selection::Available(provider) => {
            match provider
                .generate_structured(&draft_prompt(text), &activity_schema())
                .await
            {
                Ok(value) => match serde_json::from_value::<ActivityDraft>(value) {
                    Ok(draft) => {
                        info!(provider = provider.name(), "Parsed activity draft");
                        return Ok((draft, DraftSource::Ai));
                    }
                    Err(e) => {
                        warn!(
                            provider = provider.name(),
                            error = %e,
                            "Provider returned a draft outside the schema"
                        );
                    }
                },
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Provider generation failed");
                }
            }
            Ok((fallback::parse_activity_text(text), DraftSource::Fallback))
        }
        Selection::Unavailable(reason) => {
            info!(%reason, "No AI provider usable, using rule-based parser");
            Ok((fallback::parse_activity_text(text), DraftSource::Fallback))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: ProviderId) -> ProviderConfig {
        ProviderConfig {
            provider,
            model: "test-model".to_string(),
            api_key: "test-key".to_string(),
        }
    }

    #[test]
    fn test_unconfigured_provider_is_unavailable_not_a_panic() {
        let selection = select_provider(ProviderId::OpenAi, &[]);
        match selection {
            Selection::Unavailable(UnavailableReason::MissingCredential(ProviderId::OpenAi)) => {}
            _ => panic!("expected MissingCredential"),
        }
    }

    #[test]
    fn test_no_fallback_available_is_detectable() {
        let selection = select_with_fallback(Some(ProviderId::Gemini), &[]);
        match selection {
            Selection::Unavailable(UnavailableReason::NoProvidersConfigured) => {}
            _ => panic!("expected NoProvidersConfigured"),
        }
        assert!(!select_with_fallback(None, &[]).is_available());
    }

    #[test]
    fn test_requested_provider_wins_when_usable() {
        let configs = vec![config(ProviderId::OpenAi), config(ProviderId::Gemini)];
        match select_with_fallback(Some(ProviderId::Gemini), &configs) {
            Selection::Available(provider) => assert_eq!(provider.name(), "gemini"),
            _ => panic!("expected gemini"),
        }
    }

    #[test]
    fn test_fallback_follows_priority_order() {
        // Requested anthropic has no credential; openai outranks gemini.
        let configs = vec![config(ProviderId::Gemini), config(ProviderId::OpenAi)];
        match select_with_fallback(Some(ProviderId::Anthropic), &configs) {
            Selection::Available(provider) => assert_eq!(provider.name(), "openai"),
            _ => panic!("expected openai"),
        }

        // With no request at all, the chain starts from the top.
        match select_with_fallback(None, &configs) {
            Selection::Available(provider) => assert_eq!(provider.name(), "openai"),
            _ => panic!("expected openai"),
        }
    }

    #[test]
    fn test_blank_credential_is_not_usable() {
        let stored = LlmConfig {
            id: "x".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: "   ".to_string(),
            is_active: true,
            is_default: false,
            created_at: chrono::Utc::now(),
        };
        assert!(ProviderConfig::from_stored(&stored).is_none());
    }

    #[test]
    fn test_unknown_provider_name_is_skipped() {
        let stored = LlmConfig {
            id: "x".to_string(),
            provider: "mystery-llm".to_string(),
            model: "m".to_string(),
            api_key: "key".to_string(),
            is_active: true,
            is_default: false,
            created_at: chrono::Utc::now(),
        };
        assert!(ProviderConfig::from_stored(&stored).is_none());
    }

    #[test]
    fn test_provider_id_parsing() {
        assert_eq!(ProviderId::parse("OpenAI"), Some(ProviderId::OpenAi));
        assert_eq!(ProviderId::parse("claude"), Some(ProviderId::Anthropic));
        assert_eq!(ProviderId::parse("google"), Some(ProviderId::Gemini));
        assert_eq!(ProviderId::parse("watson"), None);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_draft_activity_degrades_without_configs() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let (draft, source) =
            draft_activity(&storage, "water leak in Room 4", None).await.unwrap();
        assert_eq!(source, DraftSource::Fallback);
        assert_eq!(draft.category, "maintenance");
    }
}
