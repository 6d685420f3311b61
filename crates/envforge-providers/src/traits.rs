//! The `LlmClient` trait — the single seam between the core and any model
//! backend.
//!
//! Transport and API failures are returned as errors so the agent runtime
//! can retry transient ones up to its configured budget; the client itself
//! never retries.

use async_trait::async_trait;

use envforge_core::types::{ChatMessage, LlmResponse, ToolDefinition};

/// Sampling parameters for each call.
#[derive(Clone, Debug)]
pub struct LlmRequestConfig {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmRequestConfig {
    fn default() -> Self {
        LlmRequestConfig {
            max_tokens: 8192,
            temperature: 0.7,
        }
    }
}

/// Trait every model backend implements.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One synchronous turn: prompt list in, completion (and any tool calls)
    /// out. Errors are transport/API failures, eligible for caller retry.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        config: &LlmRequestConfig,
    ) -> anyhow::Result<LlmResponse>;

    /// Model identifier used by this client.
    fn model(&self) -> &str;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
