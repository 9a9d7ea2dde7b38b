//! OpenRouter-compatible HTTP client for collaborator calls.
//!
//! Speaks the OpenAI chat-completions wire format, which OpenRouter and
//! LiteLLM proxies both accept.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Collaborator, CompletionRequest};
use crate::error::CollaboratorError;

const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Collaborator backed by an OpenRouter-compatible API.
pub struct OpenRouterClient {
    api_base: String,
    api_key: String,
    http_client: Client,
}

impl OpenRouterClient {
    /// Create a client with an explicit API key.
    pub fn new(api_key: String) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Create a client from `OPENROUTER_API_KEY`, falling back to
    /// `LITELLM_API_KEY`.
    pub fn from_env() -> Result<Self, CollaboratorError> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .or_else(|_| env::var("LITELLM_API_KEY"))
            .map_err(|_| CollaboratorError::MissingApiKey)?;
        Ok(Self::new(api_key))
    }

    /// Override the API base URL (e.g. a local LiteLLM proxy).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

#[async_trait]
impl Collaborator for OpenRouterClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::RateLimited(body));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::ParseError(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(CollaboratorError::EmptyCompletion(request.model));
        }

        Ok(content)
    }
}
