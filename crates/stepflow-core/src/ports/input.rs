//! Interactive input port.
//!
//! Workflows ask a human through an [`InputSource`]. Reads are bounded by a
//! timeout (five minutes unless configured) and by the run's cancellation
//! token. [`AskUserTool`] exposes a source as the `ask_user` tool, whose
//! `{"response": ...}` output unwraps in templates and conditions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::tool::{Tool, ToolError};

/// Default bound on a single interactive read.
pub const DEFAULT_INPUT_TIMEOUT: Duration = Duration::from_secs(300);

/// Name under which [`AskUserTool`] registers.
pub const ASK_USER_TOOL: &str = "ask_user";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("no input received within {0:?}")]
    Timeout(Duration),

    #[error("input cancelled")]
    Cancelled,

    #[error("input stream closed")]
    Closed,

    #[error("input I/O error: {0}")]
    Io(String),
}

/// Reads one answer from a human.
pub trait InputSource: Send + Sync {
    fn read_line(&self, prompt: &str) -> impl Future<Output = Result<String, InputError>> + Send;
}

/// Object-safe version of [`InputSource`] with a boxed future.
pub trait InputSourceDyn: Send + Sync {
    fn read_line_boxed<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, InputError>> + Send + 'a>>;
}

impl<T: InputSource> InputSourceDyn for T {
    fn read_line_boxed<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, InputError>> + Send + 'a>> {
        Box::pin(self.read_line(prompt))
    }
}

/// Read from `source`, giving up after `timeout` or when `cancel` fires.
pub async fn read_input(
    source: &dyn InputSourceDyn,
    prompt: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, InputError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(InputError::Cancelled),
        read = tokio::time::timeout(timeout, source.read_line_boxed(prompt)) => {
            read.unwrap_or(Err(InputError::Timeout(timeout)))
        }
    }
}

/// The `ask_user` tool: params `{"prompt": "..."}`, output
/// `{"response": "<answer>"}`.
///
/// Cancellation reaches the read through the step runner, which drops the
/// attempt when the run is cancelled.
#[derive(Clone)]
pub struct AskUserTool {
    source: Arc<dyn InputSourceDyn>,
    timeout: Duration,
}

impl AskUserTool {
    pub fn new<S: InputSource + 'static>(source: S) -> Self {
        Self {
            source: Arc::new(source),
            timeout: DEFAULT_INPUT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for AskUserTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AskUserTool")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Tool for AskUserTool {
    fn name(&self) -> &str {
        ASK_USER_TOOL
    }

    async fn execute(&self, params: Map<String, Value>) -> Result<Value, ToolError> {
        let prompt = match params.get("prompt") {
            Some(Value::String(p)) => p.clone(),
            Some(other) => other.to_string(),
            None => return Err(ToolError::InvalidParams("missing 'prompt'".to_string())),
        };
        let answer = read_input(
            self.source.as_ref(),
            &prompt,
            self.timeout,
            &CancellationToken::new(),
        )
        .await
        .map_err(|e| ToolError::Failed(e.to_string()))?;
        tracing::debug!(answer_len = answer.len(), "received interactive input");
        Ok(json!({ "response": answer.trim_end_matches(['\r', '\n']) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(&'static str);

    impl InputSource for Canned {
        async fn read_line(&self, _prompt: &str) -> Result<String, InputError> {
            Ok(self.0.to_string())
        }
    }

    struct Silent;

    impl InputSource for Silent {
        async fn read_line(&self, _prompt: &str) -> Result<String, InputError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn ask_user_wraps_answer_in_response() {
        let tool = AskUserTool::new(Canned("yes\n"));
        let mut params = Map::new();
        params.insert("prompt".into(), json!("deploy?"));
        assert_eq!(tool.execute(params).await.unwrap(), json!({ "response": "yes" }));

        let err = tool.execute(Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn read_times_out_after_default_bound() {
        let err = read_input(&Silent, "?", DEFAULT_INPUT_TIMEOUT, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, InputError::Timeout(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn read_is_cancellable() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = read_input(&Silent, "?", DEFAULT_INPUT_TIMEOUT, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, InputError::Cancelled);
    }
}
