//! LLM completion types shared between the engine and client adapters.

use serde::{Deserialize, Serialize};

/// A non-streaming completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default)]
    pub tokens_used: u64,
    /// Cost in USD.
    #[serde(default)]
    pub cost: f64,
}

/// Errors reported by LLM clients.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("rate limited")]
    RateLimited,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
