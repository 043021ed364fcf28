//! Per-step state machine and step type handlers.
//!
//! `StepRunner::run_step` drives one step from pending to a published
//! `StepResult`: skip check, pre-transforms, the attempt loop (backoff,
//! per-attempt timeout, cancellation), post-transforms, publish. `dispatch`
//! routes the typed `StepConfig` to its handler. `loop` and `parallel`
//! handlers recurse into `run_step` for their inner steps.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use stepflow_types::llm::LlmError;
use stepflow_types::result::StepResult;
use stepflow_types::security::SecurityContext;
use stepflow_types::workflow::{
    DisplayStepConfig, LlmStepConfig, LlmWithToolsStepConfig, LoopStepConfig, ParallelStepConfig,
    ScriptStepConfig, Step, StepConfig, ToolStepConfig, WorkflowSettings,
};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::condition::{evaluate_conditions, evaluate_expression};
use super::context::ExecutionContext;
use super::expression::{ExpressionResolver, format_value, unwrap_response};
use super::retry::{RetryHandler, StepPolicy, sleep_or_cancel};
use crate::ports::{
    DisplaySink, LlmClientDyn, ScriptError, ScriptExecutorDyn, ScriptRequest, ToolRegistry,
};
use crate::security::ScriptSecurityValidator;
use crate::transform::{TransformError, TransformPipeline};

/// Data key holding the current 1-based loop iteration.
pub const LOOP_ITERATION_KEY: &str = "loop_iteration";

/// Prefix of the environment variables passed to scripts.
pub const SCRIPT_ENV_PREFIX: &str = "AGENT_";

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors that end a step attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// The step cannot run as configured (missing tool, missing client).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    /// The script was rejected before execution.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("script failed: {0}")]
    Script(String),

    #[error("pre-transform failed: {0}")]
    PreTransform(#[from] TransformError),

    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    /// One or more workers of a `parallel` step failed. `partial` holds the
    /// outputs of the workers that succeeded.
    #[error("{failed} of {total} parallel steps failed: {details}")]
    Parallel {
        failed: usize,
        total: usize,
        details: String,
        partial: Value,
    },

    /// An inner step of a `loop` failed.
    #[error("inner step '{step}' failed: {error}")]
    Inner { step: String, error: String },

    #[error("step cancelled")]
    Cancelled,
}

impl StepError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StepError::Configuration(_)
                | StepError::SecurityViolation(_)
                | StepError::PreTransform(_)
                | StepError::Cancelled
        )
    }

    /// Output kept on the failed result, if the error carries one.
    pub fn partial_output(&self) -> Option<&Value> {
        match self {
            StepError::Parallel { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// StepOutput
// ---------------------------------------------------------------------------

/// A handler's successful output plus metadata for the result.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub value: Value,
    pub metadata: Map<String, Value>,
}

impl StepOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Collaborators a [`StepRunner`] is built from.
pub(crate) struct RunnerDeps {
    pub resolver: Arc<ExpressionResolver>,
    pub pipeline: TransformPipeline,
    pub tools: ToolRegistry,
    pub llm: Option<Arc<dyn LlmClientDyn>>,
    pub scripts: Option<Arc<dyn ScriptExecutorDyn>>,
    pub display: Arc<dyn DisplaySink>,
    pub script_timeout: Duration,
    pub blocked_commands: Vec<String>,
    pub max_script_size: usize,
}

/// Runs individual steps. Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct StepRunner {
    deps: Arc<RunnerDeps>,
}

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<StepOutput, StepError>> + Send + 'a>>;

impl StepRunner {
    pub(crate) fn new(deps: RunnerDeps) -> Self {
        Self {
            deps: Arc::new(deps),
        }
    }

    pub fn resolver(&self) -> &ExpressionResolver {
        &self.deps.resolver
    }

    /// Run `step` to completion and publish its result.
    pub async fn run_step(
        &self,
        step: &Step,
        ctx: &Arc<ExecutionContext>,
        settings: &WorkflowSettings,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started_at = Utc::now();
        let clock = Instant::now();

        if !evaluate_conditions(&step.conditions, &self.deps.resolver, ctx) {
            tracing::info!(step = step.name.as_str(), "conditions not met, skipping step");
            let result = StepResult::skipped(&step.name).with_timing(started_at, clock.elapsed());
            ctx.publish_result(result.clone());
            return result;
        }

        let outcome = match self.deps.pipeline.apply_all(&step.context_transforms, ctx) {
            Ok(()) => self.attempt_loop(step, ctx, settings, cancel).await,
            Err(e) => Err((StepError::PreTransform(e), 0)),
        };

        match outcome {
            Ok((output, attempts)) => {
                let mut result = StepResult::success(&step.name, output.value)
                    .with_metadata("attempts", json!(attempts))
                    .with_metadata("step_type", json!(step.step_type().as_str()))
                    .with_timing(started_at, clock.elapsed());
                result.metadata.extend(output.metadata);

                // Post-transforms see the step's own result; other steps see
                // it only once it is published below.
                if !step.post_transforms.is_empty() {
                    let view = ctx.with_pending(result.clone());
                    if let Err(e) = self.deps.pipeline.apply_all(&step.post_transforms, &view) {
                        tracing::warn!(
                            step = step.name.as_str(),
                            error = %e,
                            "post-transform failed, keeping step result"
                        );
                    }
                }
                ctx.publish_result(result.clone());
                tracing::info!(
                    step = step.name.as_str(),
                    attempts,
                    duration_ms = result.execution_time.as_millis() as u64,
                    "step succeeded"
                );
                result
            }
            Err((error, attempts)) => {
                let mut result = StepResult::failure(&step.name, error.to_string())
                    .with_metadata("attempts", json!(attempts))
                    .with_metadata("step_type", json!(step.step_type().as_str()))
                    .with_timing(started_at, clock.elapsed());
                if let Some(partial) = error.partial_output() {
                    result.output = partial.clone();
                }
                if matches!(error, StepError::Cancelled) {
                    result.metadata.insert("cancelled".into(), Value::Bool(true));
                }
                tracing::info!(
                    step = step.name.as_str(),
                    attempts,
                    error = %error,
                    "step failed"
                );
                ctx.publish_result(result.clone());
                result
            }
        }
    }

    /// [`run_step`](Self::run_step) with panics turned into a failed result.
    pub async fn run_step_guarded(
        &self,
        step: &Step,
        ctx: &Arc<ExecutionContext>,
        settings: &WorkflowSettings,
        cancel: &CancellationToken,
    ) -> StepResult {
        match AssertUnwindSafe(self.run_step(step, ctx, settings, cancel))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(step = step.name.as_str(), panic = message.as_str(), "step panicked");
                let result = StepResult::failure(&step.name, format!("step panicked: {message}"))
                    .with_metadata("panicked", Value::Bool(true));
                ctx.publish_result(result.clone());
                result
            }
        }
    }

    async fn attempt_loop(
        &self,
        step: &Step,
        ctx: &Arc<ExecutionContext>,
        settings: &WorkflowSettings,
        cancel: &CancellationToken,
    ) -> Result<(StepOutput, u32), (StepError, u32)> {
        let policy = StepPolicy::for_step(step, settings);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                let delay = RetryHandler::backoff_delay(attempt);
                tracing::warn!(
                    step = step.name.as_str(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying step after backoff"
                );
                if !sleep_or_cancel(delay, cancel).await {
                    return Err((StepError::Cancelled, attempt - 1));
                }
            }
            if cancel.is_cancelled() {
                return Err((StepError::Cancelled, attempt - 1));
            }

            tracing::debug!(step = step.name.as_str(), attempt, "running step attempt");
            match self.run_attempt(step, ctx, settings, cancel, &policy).await {
                Ok(output) => return Ok((output, attempt)),
                Err(e) if RetryHandler::should_retry(&policy, attempt, &e) => {
                    tracing::warn!(step = step.name.as_str(), attempt, error = %e, "step attempt failed");
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    async fn run_attempt(
        &self,
        step: &Step,
        ctx: &Arc<ExecutionContext>,
        settings: &WorkflowSettings,
        cancel: &CancellationToken,
        policy: &StepPolicy,
    ) -> Result<StepOutput, StepError> {
        let bounded = async {
            match policy.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, self.dispatch(step, ctx, settings, cancel))
                    .await
                    .unwrap_or(Err(StepError::Timeout(limit))),
                None => self.dispatch(step, ctx, settings, cancel).await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StepError::Cancelled),
            outcome = bounded => outcome,
        }
    }

    /// Route a step to its type handler. Boxed so `loop` and `parallel` can
    /// recurse through `run_step`.
    fn dispatch<'a>(
        &'a self,
        step: &'a Step,
        ctx: &'a Arc<ExecutionContext>,
        settings: &'a WorkflowSettings,
        cancel: &'a CancellationToken,
    ) -> StepFuture<'a> {
        Box::pin(async move {
            match &step.config {
                StepConfig::Tool(cfg) => self.run_tool(cfg, ctx).await,
                StepConfig::Llm(cfg) => self.run_llm(cfg, ctx).await,
                StepConfig::LlmWithTools(cfg) => self.run_llm_with_tools(step, cfg, ctx).await,
                StepConfig::Display(cfg) => self.run_display(step, cfg, ctx).await,
                StepConfig::Script(cfg) => self.run_script(step, cfg, ctx, cancel).await,
                StepConfig::Condition(cfg) => {
                    let rendered = self.deps.resolver.render(&cfg.condition, ctx);
                    let holds = evaluate_expression(&rendered);
                    Ok(StepOutput::new(Value::Bool(holds))
                        .with_metadata("expression", Value::String(rendered)))
                }
                StepConfig::Loop(cfg) => self.run_loop(step, cfg, ctx, settings, cancel).await,
                StepConfig::Parallel(cfg) => {
                    self.run_parallel(step, cfg, ctx, settings, cancel).await
                }
            }
        })
    }

    fn llm(&self) -> Result<&Arc<dyn LlmClientDyn>, StepError> {
        self.deps
            .llm
            .as_ref()
            .ok_or_else(|| StepError::Configuration("no LLM client configured".to_string()))
    }

    // -- tool ---------------------------------------------------------------

    async fn run_tool(
        &self,
        cfg: &ToolStepConfig,
        ctx: &ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let tool = self.deps.tools.get_tool(&cfg.tool).ok_or_else(|| {
            StepError::Configuration(format!("tool '{}' is not registered", cfg.tool))
        })?;

        let mut params = ctx.data_snapshot();
        for (key, value) in &cfg.params {
            params.insert(key.clone(), self.deps.resolver.render_value(value, ctx));
        }

        let value = tool
            .execute_boxed(params)
            .await
            .map_err(|e| StepError::Tool {
                tool: cfg.tool.clone(),
                message: e.to_string(),
            })?;
        Ok(StepOutput::new(value).with_metadata("tool", Value::String(cfg.tool.clone())))
    }

    // -- llm ----------------------------------------------------------------

    async fn run_llm(
        &self,
        cfg: &LlmStepConfig,
        ctx: &ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let llm = self.llm()?;
        let prompt = self.deps.resolver.render(&cfg.prompt, ctx);
        let system = cfg
            .system_prompt
            .as_deref()
            .map(|s| self.deps.resolver.render(s, ctx));

        let response = llm.ask(system.as_deref(), &prompt).await?;
        ctx.add_llm_usage(response.tokens_used, response.cost);
        Ok(StepOutput::new(Value::String(response.content))
            .with_metadata("tokens_used", json!(response.tokens_used))
            .with_metadata("cost", json!(response.cost)))
    }

    // -- llm_with_tools -----------------------------------------------------

    async fn run_llm_with_tools(
        &self,
        step: &Step,
        cfg: &LlmWithToolsStepConfig,
        ctx: &ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let llm = self.llm()?;
        if let Some(missing) = cfg.tools.iter().find(|t| !self.deps.tools.contains(t)) {
            return Err(StepError::Configuration(format!(
                "tool '{missing}' is not registered"
            )));
        }

        let mut system = cfg
            .system_prompt
            .as_deref()
            .map(|s| format!("{}\n\n", self.deps.resolver.render(s, ctx)))
            .unwrap_or_default();
        system.push_str(&tool_protocol_prompt(&cfg.tools));

        let mut conversation = self.deps.resolver.render(&cfg.prompt, ctx);
        let mut tool_calls: Vec<Value> = Vec::new();
        let mut tokens_used = 0u64;
        let mut cost = 0.0f64;
        let mut budget_exhausted = false;

        let final_text = loop {
            let response = llm.complete_with_system_boxed(&system, &conversation).await?;
            ctx.add_llm_usage(response.tokens_used, response.cost);
            tokens_used += response.tokens_used;
            cost += response.cost;

            let Some(call) = parse_tool_call(&response.content) else {
                break response.content;
            };
            if tool_calls.len() >= cfg.max_tool_calls as usize {
                tracing::warn!(
                    step = step.name.as_str(),
                    max_tool_calls = cfg.max_tool_calls,
                    "tool call budget exhausted"
                );
                budget_exhausted = true;
                break response.content;
            }

            tracing::debug!(step = step.name.as_str(), tool = call.tool.as_str(), "model requested tool");
            let outcome = if !cfg.tools.contains(&call.tool) {
                Err(format!("tool '{}' is not available to this step", call.tool))
            } else {
                match self.deps.tools.get_tool(&call.tool) {
                    Some(tool) => tool
                        .execute_boxed(call.params.clone())
                        .await
                        .map_err(|e| e.to_string()),
                    None => Err(format!("tool '{}' is not registered", call.tool)),
                }
            };

            let observation = match &outcome {
                Ok(value) => format_value(value),
                Err(error) => format!("error: {error}"),
            };
            conversation.push_str(&format!(
                "\n\nAssistant: {}\n\nTool result ({}):\n{}",
                response.content.trim(),
                call.tool,
                observation
            ));
            tool_calls.push(match outcome {
                Ok(result) => json!({ "tool": call.tool, "params": call.params, "result": result }),
                Err(error) => json!({ "tool": call.tool, "params": call.params, "error": error }),
            });
        };

        let mut output = StepOutput::new(json!({
            "response": final_text,
            "tool_calls": tool_calls,
        }))
        .with_metadata("tool_call_count", json!(tool_calls.len()))
        .with_metadata("tokens_used", json!(tokens_used))
        .with_metadata("cost", json!(cost));
        if budget_exhausted {
            output = output.with_metadata("tool_budget_exhausted", Value::Bool(true));
        }
        Ok(output)
    }

    // -- display ------------------------------------------------------------

    async fn run_display(
        &self,
        step: &Step,
        cfg: &DisplayStepConfig,
        ctx: &ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        let text = match &cfg.prompt {
            Some(prompt) => {
                let llm = self.llm()?;
                let prompt = self.deps.resolver.render(prompt, ctx);
                let system = cfg
                    .system_prompt
                    .as_deref()
                    .map(|s| self.deps.resolver.render(s, ctx));
                let response = llm.ask(system.as_deref(), &prompt).await?;
                ctx.add_llm_usage(response.tokens_used, response.cost);
                response.content
            }
            None => self
                .deps
                .resolver
                .render(cfg.content.as_deref().unwrap_or_default(), ctx),
        };
        self.deps.display.display(&step.name, &text);
        Ok(StepOutput::new(Value::String(text)))
    }

    // -- script -------------------------------------------------------------

    async fn run_script(
        &self,
        step: &Step,
        cfg: &ScriptStepConfig,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepError> {
        let executor = self
            .deps
            .scripts
            .as_ref()
            .ok_or_else(|| StepError::Configuration("no script executor configured".to_string()))?;

        // Values spliced in by rendering may come from a model or a tool, so
        // a body that rendering changed is no longer author-written.
        let mut spliced = false;
        let body = match (&cfg.script, &cfg.from_step) {
            (Some(inline), _) => {
                let rendered = self.deps.resolver.render(inline, ctx);
                spliced = rendered != *inline;
                rendered
            }
            (None, Some(source)) => {
                let output = ctx.step_output(source).ok_or_else(|| {
                    StepError::Configuration(format!(
                        "script source step '{source}' has no successful output"
                    ))
                })?;
                format_value(&unwrap_response(output))
            }
            (None, None) => {
                return Err(StepError::Configuration("script step has no body".to_string()));
            }
        };

        let trusted = cfg.is_trusted_source() && !spliced;
        if spliced && cfg.is_trusted_source() {
            tracing::debug!(
                step = step.name.as_str(),
                "script body contains rendered values, validating as untrusted"
            );
        }
        let security = SecurityContext {
            is_trusted_source: trusted,
            blocked_commands: self.deps.blocked_commands.clone(),
            max_file_size: self.deps.max_script_size,
        };
        let validation = ScriptSecurityValidator::new()
            .validate_script(&body, &security)
            .map_err(|e| StepError::SecurityViolation(e.to_string()))?;
        for warning in &validation.warnings {
            tracing::warn!(step = step.name.as_str(), warning = warning.as_str(), "script security warning");
        }
        if !validation.is_secure {
            return Err(StepError::SecurityViolation(validation.violation_summary()));
        }

        let request = ScriptRequest {
            script: validation.sanitized_script,
            shell: cfg.shell.clone(),
            env: script_env(ctx),
            timeout: cfg
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.deps.script_timeout),
        };
        let output = executor
            .execute_boxed(request, cancel.clone())
            .await
            .map_err(|e| match e {
                ScriptError::Cancelled => StepError::Cancelled,
                ScriptError::Timeout(limit) => StepError::Timeout(limit),
                other => StepError::Script(other.to_string()),
            })?;

        Ok(StepOutput::new(Value::String(output.stdout.trim().to_string()))
            .with_metadata("exit_code", json!(output.exit_code))
            .with_metadata("stderr", Value::String(output.stderr))
            .with_metadata("trusted", Value::Bool(trusted)))
    }

    // -- loop ---------------------------------------------------------------

    async fn run_loop(
        &self,
        step: &Step,
        cfg: &LoopStepConfig,
        ctx: &Arc<ExecutionContext>,
        settings: &WorkflowSettings,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepError> {
        let mut iterations = 0;
        let mut break_reason = "max_iterations_reached";
        let mut last_outputs = Map::new();

        for iteration in 1..=cfg.max_iterations {
            if cancel.is_cancelled() {
                return Err(StepError::Cancelled);
            }
            iterations = iteration;
            ctx.insert_data(LOOP_ITERATION_KEY, json!(iteration));
            last_outputs = Map::new();

            for inner in &cfg.steps {
                let result = self.run_step(inner, ctx, settings, cancel).await;
                if !result.success {
                    if cancel.is_cancelled() {
                        return Err(StepError::Cancelled);
                    }
                    if !inner.continue_on_error {
                        return Err(StepError::Inner {
                            step: inner.name.clone(),
                            error: result.error.unwrap_or_default(),
                        });
                    }
                }
                last_outputs.insert(inner.name.clone(), result.output);
            }

            tracing::debug!(step = step.name.as_str(), iteration, "loop iteration finished");
            if !cfg.break_on.is_empty()
                && evaluate_conditions(&cfg.break_on, &self.deps.resolver, ctx)
            {
                break_reason = "break_condition_met";
                break;
            }
        }

        let value = match &cfg.output_var {
            Some(var) => ctx
                .step_output(var)
                .or_else(|| ctx.get_data(var))
                .unwrap_or(Value::Null),
            None => Value::Object(last_outputs),
        };
        Ok(StepOutput::new(value)
            .with_metadata("iterations", json!(iterations))
            .with_metadata("break_reason", json!(break_reason)))
    }

    // -- parallel -----------------------------------------------------------

    async fn run_parallel(
        &self,
        step: &Step,
        cfg: &ParallelStepConfig,
        ctx: &Arc<ExecutionContext>,
        settings: &WorkflowSettings,
        cancel: &CancellationToken,
    ) -> Result<StepOutput, StepError> {
        let total = cfg.steps.len();
        if total == 0 {
            return Ok(StepOutput::new(Value::Object(Map::new())));
        }

        let (tx, mut rx) = mpsc::channel::<StepResult>(total);
        let mut workers = JoinSet::new();
        for inner in cfg.steps.iter().cloned() {
            let runner = self.clone();
            let ctx = Arc::clone(ctx);
            let settings = settings.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            workers.spawn(async move {
                let result = runner.run_step_guarded(&inner, &ctx, &settings, &cancel).await;
                // The receiver is gone only when the parent gave up.
                let _ = tx.send(result).await;
            });
        }
        drop(tx);
        tracing::debug!(step = step.name.as_str(), workers = total, "parallel workers spawned");

        let mut results = Vec::with_capacity(total);
        while results.len() < total {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    workers.abort_all();
                    return Err(StepError::Cancelled);
                }
                received = rx.recv() => match received {
                    Some(result) => results.push(result),
                    None => break,
                },
            }
        }
        while workers.join_next().await.is_some() {}

        let mut partial = Map::new();
        let mut failures = Vec::new();
        for result in &results {
            if result.success {
                partial.insert(result.step_name.clone(), result.output.clone());
            } else {
                failures.push(format!(
                    "{}: {}",
                    result.step_name,
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
        for inner in &cfg.steps {
            if !results.iter().any(|r| r.step_name == inner.name) {
                failures.push(format!("{}: worker exited without a result", inner.name));
            }
        }

        if failures.is_empty() {
            Ok(StepOutput::new(Value::Object(partial)).with_metadata("workers", json!(total)))
        } else {
            failures.sort();
            Err(StepError::Parallel {
                failed: failures.len(),
                total,
                details: failures.join("; "),
                partial: Value::Object(partial),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ToolCall {
    tool: String,
    #[serde(default)]
    params: Map<String, Value>,
}

fn tool_protocol_prompt(tools: &[String]) -> String {
    let mut prompt = String::from("You can call the following tools:\n");
    for tool in tools {
        prompt.push_str(&format!("- {tool}\n"));
    }
    prompt.push_str(
        "\nTo call a tool, reply with only a JSON object of the form \
         {\"tool\": \"<name>\", \"params\": {...}}. \
         When you have the final answer, reply with plain text.",
    );
    prompt
}

/// Parse a model reply as a tool call. Code fences are tolerated.
fn parse_tool_call(content: &str) -> Option<ToolCall> {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        text = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    if !text.starts_with('{') {
        return None;
    }
    serde_json::from_str::<ToolCall>(text)
        .ok()
        .filter(|call| !call.tool.is_empty())
}

/// `AGENT_<KEY>` variables for every string entry of the data bag.
fn script_env(ctx: &ExecutionContext) -> BTreeMap<String, String> {
    ctx.data_snapshot()
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => {
                let name: String = key
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() {
                            c.to_ascii_uppercase()
                        } else {
                            '_'
                        }
                    })
                    .collect();
                Some((format!("{SCRIPT_ENV_PREFIX}{name}"), s))
            }
            _ => None,
        })
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
