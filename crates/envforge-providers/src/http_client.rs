//! HTTP LLM client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Credentials come from the environment; the core never inspects them.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tracing::debug;

use envforge_core::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, LlmResponse, ToolDefinition,
};

use crate::traits::{LlmClient, LlmRequestConfig};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "ENVFORGE_API_KEY";
/// Environment variable overriding the API base URL.
pub const API_BASE_ENV: &str = "ENVFORGE_API_BASE";
/// Environment variable overriding the model.
pub const MODEL_ENV: &str = "ENVFORGE_MODEL";

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

// ─────────────────────────────────────────────
// HttpLlmClient
// ─────────────────────────────────────────────

/// Talks to any OpenAI-compatible chat-completions API via `reqwest`.
pub struct HttpLlmClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for HttpLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLlmClient")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl HttpLlmClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;
        Ok(HttpLlmClient {
            client,
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Build a client from `ENVFORGE_API_KEY` / `ENVFORGE_API_BASE` /
    /// `ENVFORGE_MODEL`. A missing key is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| anyhow!("{API_KEY_ENV} is not set"))?;
        let api_base =
            std::env::var(API_BASE_ENV).unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let model = std::env::var(MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(api_base, api_key, model)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        config: &LlmRequestConfig,
    ) -> anyhow::Result<LlmResponse> {
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            "calling LLM"
        );

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("LLM request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(anyhow!("LLM API error {status}: {error_body}"));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .context("failed to parse LLM response")?;
        let llm_response: LlmResponse = parsed.into();

        debug!(
            has_content = llm_response.content.is_some(),
            tool_calls = llm_response.tool_calls.len(),
            finish_reason = llm_response.finish_reason.as_deref().unwrap_or("?"),
            "LLM response received"
        );
        Ok(llm_response)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn display_name(&self) -> &str {
        "openai-compatible"
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
