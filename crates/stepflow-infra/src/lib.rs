//! Infrastructure layer for stepflow.
//!
//! Contains implementations of the ports defined in `stepflow-core` that touch
//! the operating system: the shell-backed `ScriptExecutor`, owner-only
//! temporary script files, stdin-backed interactive input, and
//! `stepflow.toml` loading.

pub mod config;
pub mod input;
pub mod script;

pub use input::{LineInputSource, ask_user_tool};

use stepflow_core::workflow::{WorkflowEngine, WorkflowEngineBuilder};
use stepflow_types::config::EngineConfig;

use crate::script::ShellScriptExecutor;

/// An engine builder wired with `config` and the shell script executor.
///
/// Callers add tools, an LLM client and sinks before calling `build()`.
pub fn engine_builder(config: EngineConfig) -> WorkflowEngineBuilder {
    WorkflowEngine::builder()
        .with_config(config)
        .with_script_executor(ShellScriptExecutor::new())
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use stepflow_core::workflow::ExecutionContext;
    use stepflow_core::workflow::definition::parse_workflow_yaml;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[tokio::test]
    async fn script_steps_run_through_the_shell() {
        let workflow = parse_workflow_yaml(
            r#"
name: greet
steps:
  - name: hello
    type: script
    config:
      script: "echo hello $AGENT_USER"
  - name: shout
    type: script
    depends_on: [hello]
    config:
      script: "echo '{hello}' | tr a-z A-Z"
"#,
        )
        .unwrap();
        let ctx = Arc::new(ExecutionContext::new("greet"));
        ctx.insert_data("user", json!("ada"));

        let summary = engine_builder(EngineConfig::default())
            .build()
            .execute(&workflow, ctx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.result("hello").unwrap().output, json!("hello ada"));
        assert_eq!(summary.result("shout").unwrap().output, json!("HELLO ADA"));
    }
}
