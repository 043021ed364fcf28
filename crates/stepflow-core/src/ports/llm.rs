//! LLM client port.
//!
//! The engine only needs plain completions; provider selection, streaming and
//! token accounting details live behind this trait.

use std::future::Future;
use std::pin::Pin;

use stepflow_types::llm::{LlmError, LlmResponse};

/// A chat-completion client.
pub trait LlmClient: Send + Sync {
    /// Complete a prompt with no system prompt.
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<LlmResponse, LlmError>> + Send;

    /// Complete a prompt under a system prompt.
    fn complete_with_system(
        &self,
        system: &str,
        prompt: &str,
    ) -> impl Future<Output = Result<LlmResponse, LlmError>> + Send;
}

/// Object-safe version of [`LlmClient`] with boxed futures.
pub trait LlmClientDyn: Send + Sync {
    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>>;

    fn complete_with_system_boxed<'a>(
        &'a self,
        system: &'a str,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>>;
}

impl<T: LlmClient> LlmClientDyn for T {
    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>> {
        Box::pin(self.complete(prompt))
    }

    fn complete_with_system_boxed<'a>(
        &'a self,
        system: &'a str,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>> {
        Box::pin(self.complete_with_system(system, prompt))
    }
}

impl dyn LlmClientDyn {
    /// Complete with an optional system prompt.
    pub async fn ask(&self, system: Option<&str>, prompt: &str) -> Result<LlmResponse, LlmError> {
        match system {
            Some(system) if !system.is_empty() => {
                self.complete_with_system_boxed(system, prompt).await
            }
            _ => self.complete_boxed(prompt).await,
        }
    }
}
