//! Script executor port.
//!
//! The engine validates a script and hands the sanitized body to an executor;
//! how the body reaches a shell (temp file, sandbox, remote runner) is the
//! executor's business.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A validated script ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    pub script: String,
    pub shell: String,
    /// Extra environment variables (the caller's environment is not inherited).
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Captured output of a finished script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    #[error("script timed out after {0:?}")]
    Timeout(Duration),

    #[error("script cancelled")]
    Cancelled,

    #[error("script exited with code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    #[error("script I/O error: {0}")]
    Io(String),
}

/// Runs validated scripts.
pub trait ScriptExecutor: Send + Sync {
    fn execute(
        &self,
        request: ScriptRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<ScriptOutput, ScriptError>> + Send;
}

/// Object-safe version of [`ScriptExecutor`] with a boxed future.
pub trait ScriptExecutorDyn: Send + Sync {
    fn execute_boxed(
        &self,
        request: ScriptRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ScriptOutput, ScriptError>> + Send + '_>>;
}

impl<T: ScriptExecutor> ScriptExecutorDyn for T {
    fn execute_boxed(
        &self,
        request: ScriptRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ScriptOutput, ScriptError>> + Send + '_>> {
        Box::pin(self.execute(request, cancel))
    }
}
