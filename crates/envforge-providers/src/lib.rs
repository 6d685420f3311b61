//! LLM client abstraction for Envforge.
//!
//! The core never interprets model output semantically; it only needs a
//! function from a prompt list to a completion with optional tool calls.
//! `HttpLlmClient` implements that against any OpenAI-compatible endpoint.

pub mod http_client;
pub mod traits;

pub use http_client::HttpLlmClient;
pub use traits::{LlmClient, LlmRequestConfig};
