//! LLM collaborator integration.
//!
//! Two responsibilities are delegated to an external completion service:
//! selecting representative tasks from a candidate list, and
//! reverse-engineering a natural-language replay prompt from a task's diff.
//!
//! Both are modeled behind the [`Collaborator`] seam: text in, text out,
//! `Result`-returning, so the core pipeline stays testable with a stub.
//! Calls are idempotent reads against a stateless service and may be wrapped
//! in [`BoundedRetry`] for transient-failure tolerance. The agent process
//! itself is never auto-retried; that policy lives in the runner.

mod client;
mod extract;
mod prompt;
mod selection;

pub use client::OpenRouterClient;
pub use extract::extract_json_object;
pub use prompt::generate_replay_prompt;
pub use selection::{parse_selection_response, select_tasks};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CollaboratorError;

/// A single completion request against the collaborator.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier, pinned for run-to-run comparability.
    pub model: String,
    /// The user prompt.
    pub prompt: String,
    /// Maximum tokens to generate, if bounded.
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// The external completion service as a pure interface.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Run one completion and return the plain-text result.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError>;
}

/// Bounded-retry decorator around a [`Collaborator`].
///
/// Retries only errors the collaborator marks as retryable, with a fixed
/// backoff between attempts.
pub struct BoundedRetry<C> {
    inner: C,
    max_retries: u32,
    backoff: Duration,
}

impl<C: Collaborator> BoundedRetry<C> {
    /// Wrap a collaborator with the default policy: up to 2 retries,
    /// 2 second backoff.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            max_retries: 2,
            backoff: Duration::from_secs(2),
        }
    }

    pub fn with_policy(inner: C, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }
}

#[async_trait]
impl<C: Collaborator> Collaborator for BoundedRetry<C> {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "collaborator call failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
