//! The abstract LLM client capability C7 consumes.
//!
//! spec.md §4.7 assumes "the core consumes an abstract LLM client
//! capability"; concrete provider adapters stay out of scope per spec.md
//! §1. [`LlmClient`] mirrors the shape of the teacher's `ClientWrapper`
//! trait, narrowed to the single-shot completion this crate's tick loop
//! needs — no streaming, no native tool-calling surface.
//!
//! `VIBEFORGE_LLM_MODE=stub` doesn't call through this trait at all — the
//! tick engine's deterministic stub reply (spec.md §4.8 Step 6) is computed
//! directly from the message content's hash, bypassing `LlmClient` entirely.
//! Two concrete implementations still ship with the core: [`FailingLlmClient`],
//! which exercises the LLM-failure fallback path with no real provider, and
//! [`DryRunLlmClient`] (used for `dry_run`), which builds the request but
//! never sends it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One role-tagged message in a completion request, assembled by
/// [`crate::llm_response`] from the role system prompt, prior history, and
/// the triggering content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<RequestMessage>,
    pub temperature: f32,
}

/// Token accounting returned alongside a completion, consumed by
/// [`crate::llm_response`]'s cost computation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
}

/// An abstract, provider-agnostic completion capability. Concrete
/// implementations (OpenAI, Anthropic, etc.) live outside this crate;
/// callers plug in whichever `Arc<dyn LlmClient>` they have.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, String>;
}

/// Always fails. Used to exercise the tick engine's LLM-failure fallback
/// path without a real provider.
pub struct FailingLlmClient;

#[async_trait]
impl LlmClient for FailingLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, String> {
        Err("LLM client not configured".to_string())
    }
}

/// Builds the request but never sends it; returns a fixed, clearly-labeled
/// response with zero usage. Used for `VIBEFORGE_LLM_MODE=dry_run`, where
/// callers want to exercise the full tick path with no spend and no network
/// call.
pub struct DryRunLlmClient;

#[async_trait]
impl LlmClient for DryRunLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, String> {
        Ok(CompletionResponse {
            content: format!("[DRY RUN] would call {} with {} messages", request.model, request.messages.len()),
            usage: TokenUsage::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_never_errors_and_reports_zero_usage() {
        let client = DryRunLlmClient;
        let response = client
            .complete(CompletionRequest {
                model: "gpt-4o-mini".into(),
                messages: vec![RequestMessage { role: "user".into(), content: "hi".into() }],
                temperature: 0.7,
            })
            .await
            .unwrap();
        assert_eq!(response.usage.prompt_tokens, 0);
        assert!(response.content.contains("gpt-4o-mini"));
    }

    #[tokio::test]
    async fn failing_client_always_errors() {
        let client = FailingLlmClient;
        let err = client.complete(CompletionRequest::default()).await.unwrap_err();
        assert!(!err.is_empty());
    }
}
