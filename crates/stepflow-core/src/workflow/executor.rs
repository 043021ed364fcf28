//! Workflow engine: level-by-level DAG execution.
//!
//! `WorkflowEngine` validates a workflow, groups its steps into dependency
//! levels and runs the levels in order. Steps within a level run concurrently
//! on a `tokio::JoinSet` when the workflow allows it; the engine waits for the
//! whole level before starting the next one.
//!
//! # Execution flow
//!
//! 1. Validate the workflow and build the level plan.
//! 2. For each level, run every step through `StepRunner::run_step_guarded`.
//! 3. Record metrics for each finished step.
//! 4. Abort after the level drains if a step failed fatally.
//! 5. Run the output validator, if any, on the collected outputs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stepflow_types::config::EngineConfig;
use stepflow_types::result::{ExecutionMetrics, StepResult};
use stepflow_types::workflow::{Step, Workflow, WorkflowSettings};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::ExecutionContext;
use super::definition::{WorkflowError, validate_workflow};
use super::expression::ExpressionResolver;
use super::functions::FunctionRegistry;
use super::graph::build_levels;
use super::step_runner::{RunnerDeps, StepRunner};
use crate::ports::{
    DisplaySink, LlmClient, LlmClientDyn, OutputValidator, ScriptExecutor, ScriptExecutorDyn,
    ToolRegistry, TracingDisplaySink, ValidationPolicy,
};
use crate::transform::{TransformPipeline, TransformRegistry};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that end a workflow run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("step '{step}' failed: {error}")]
    StepFailed { step: String, error: String },

    #[error("workflow cancelled")]
    Cancelled,

    #[error("output validation failed: {0}")]
    OutputValidation(String),

    #[error("task join error: {0}")]
    Join(String),
}

// ---------------------------------------------------------------------------
// ExecutionSummary
// ---------------------------------------------------------------------------

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub workflow: String,
    pub run_id: Uuid,
    /// Step names per dependency level, in execution order.
    pub levels: Vec<Vec<String>>,
    /// Every published result, inner loop/parallel steps included.
    pub results: HashMap<String, StepResult>,
    /// Counters over top-level steps.
    pub metrics: ExecutionMetrics,
    pub duration: Duration,
    /// Set when the output validator failed under [`ValidationPolicy::Warn`].
    pub validation_warning: Option<String>,
}

impl ExecutionSummary {
    /// True when no top-level step failed.
    pub fn succeeded(&self) -> bool {
        self.metrics.failed_steps == 0
    }

    pub fn result(&self, step: &str) -> Option<&StepResult> {
        self.results.get(step)
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Runs workflows against a fixed set of collaborators.
pub struct WorkflowEngine {
    runner: StepRunner,
    config: EngineConfig,
    validator: Option<(Arc<dyn OutputValidator>, ValidationPolicy)>,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runner(&self) -> &StepRunner {
        &self.runner
    }

    /// Execute `workflow` against `ctx`.
    ///
    /// Fails fast on invalid workflows (cycles, unknown dependencies). A step
    /// failure is fatal unless the step sets `continue_on_error` or the
    /// workflow disables `stop_on_failure`; a fatal failure aborts the run
    /// once the current level has drained.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        ctx: Arc<ExecutionContext>,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary, EngineError> {
        validate_workflow(workflow)?;

        // Clone steps into owned levels so spawned tasks do not borrow `workflow`.
        let levels: Vec<Vec<Step>> = build_levels(&workflow.steps)?
            .into_iter()
            .map(|level| level.into_iter().cloned().collect())
            .collect();
        let level_names: Vec<Vec<String>> = levels
            .iter()
            .map(|level| level.iter().map(|s| s.name.clone()).collect())
            .collect();

        let settings = self.effective_settings(&workflow.settings);
        let run_id = ctx.run_id();
        let started = Instant::now();
        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name.as_str(),
            steps = workflow.steps.len(),
            levels = levels.len(),
            "starting workflow execution"
        );

        for (idx, level) in levels.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(run_id = %run_id, "workflow cancelled");
                return Err(EngineError::Cancelled);
            }
            tracing::debug!(
                run_id = %run_id,
                level = idx,
                steps = level.len(),
                "processing level"
            );

            let concurrent = settings.parallel_execution && level.len() > 1;
            let fatal = if concurrent {
                self.run_level_concurrent(level, &ctx, &settings, &cancel)
                    .await?
            } else {
                self.run_level_sequential(level, &ctx, &settings, &cancel)
                    .await
            };

            if let Some((step, error)) = fatal {
                if cancel.is_cancelled() {
                    tracing::info!(run_id = %run_id, "workflow cancelled");
                    return Err(EngineError::Cancelled);
                }
                tracing::info!(
                    run_id = %run_id,
                    workflow = workflow.name.as_str(),
                    step = step.as_str(),
                    "aborting workflow after step failure"
                );
                return Err(EngineError::StepFailed { step, error });
            }
        }

        let validation_warning = self.validate_outputs(&ctx)?;
        let metrics = ctx.metrics();
        let duration = started.elapsed();
        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name.as_str(),
            duration_ms = duration.as_millis() as u64,
            succeeded = metrics.successful_steps,
            failed = metrics.failed_steps,
            skipped = metrics.skipped_steps,
            "workflow execution finished"
        );

        Ok(ExecutionSummary {
            workflow: workflow.name.clone(),
            run_id,
            levels: level_names,
            results: ctx.results_snapshot(),
            metrics,
            duration,
            validation_warning,
        })
    }

    fn effective_settings(&self, settings: &WorkflowSettings) -> WorkflowSettings {
        let mut settings = settings.clone();
        settings.max_retries = settings.max_retries.max(self.config.default_max_attempts);
        settings
    }

    /// Run a level one step at a time, stopping at the first fatal failure.
    async fn run_level_sequential(
        &self,
        level: &[Step],
        ctx: &Arc<ExecutionContext>,
        settings: &WorkflowSettings,
        cancel: &CancellationToken,
    ) -> Option<(String, String)> {
        for step in level {
            let result = self
                .runner
                .run_step_guarded(step, ctx, settings, cancel)
                .await;
            ctx.record_metrics(&result);
            if is_fatal(step, &result, settings) {
                return Some((step.name.clone(), result.error.unwrap_or_default()));
            }
        }
        None
    }

    /// Run a level on a `JoinSet` and wait for every step before returning
    /// the first fatal failure (in declaration order).
    async fn run_level_concurrent(
        &self,
        level: &[Step],
        ctx: &Arc<ExecutionContext>,
        settings: &WorkflowSettings,
        cancel: &CancellationToken,
    ) -> Result<Option<(String, String)>, EngineError> {
        let mut join_set = JoinSet::new();
        for step in level {
            let runner = self.runner.clone();
            let step = step.clone();
            let ctx = Arc::clone(ctx);
            let settings = settings.clone();
            let token = cancel.clone();
            join_set.spawn(async move {
                runner.run_step_guarded(&step, &ctx, &settings, &token).await
            });
        }

        let mut finished: HashMap<String, StepResult> = HashMap::with_capacity(level.len());
        while let Some(joined) = join_set.join_next().await {
            let result = joined.map_err(|e| EngineError::Join(e.to_string()))?;
            ctx.record_metrics(&result);
            finished.insert(result.step_name.clone(), result);
        }

        Ok(level.iter().find_map(|step| {
            let result = finished.get(&step.name)?;
            is_fatal(step, result, settings)
                .then(|| (step.name.clone(), result.error.clone().unwrap_or_default()))
        }))
    }

    /// `Ok(Some(reason))` when validation failed under the warn policy.
    fn validate_outputs(&self, ctx: &ExecutionContext) -> Result<Option<String>, EngineError> {
        let Some((validator, policy)) = &self.validator else {
            return Ok(None);
        };
        match validator.validate(&ctx.outputs_json()) {
            Ok(()) => Ok(None),
            Err(reason) => match policy {
                ValidationPolicy::Stop => Err(EngineError::OutputValidation(reason)),
                ValidationPolicy::Warn => {
                    tracing::warn!(
                        run_id = %ctx.run_id(),
                        reason = reason.as_str(),
                        "workflow outputs failed validation"
                    );
                    Ok(Some(reason))
                }
            },
        }
    }
}

fn is_fatal(step: &Step, result: &StepResult, settings: &WorkflowSettings) -> bool {
    !result.success && !step.continue_on_error && settings.stop_on_failure
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`WorkflowEngine`]. Unset collaborators fall back to the
/// built-in function and transform tables, an empty tool registry and the
/// tracing display sink; `llm` and script steps fail as misconfigured when no
/// client or executor is given.
#[derive(Default)]
pub struct WorkflowEngineBuilder {
    config: EngineConfig,
    tools: ToolRegistry,
    llm: Option<Arc<dyn LlmClientDyn>>,
    scripts: Option<Arc<dyn ScriptExecutorDyn>>,
    display: Option<Arc<dyn DisplaySink>>,
    functions: Option<FunctionRegistry>,
    transforms: Option<TransformRegistry>,
    validator: Option<(Arc<dyn OutputValidator>, ValidationPolicy)>,
}

impl WorkflowEngineBuilder {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_llm<L: LlmClient + 'static>(mut self, llm: L) -> Self {
        self.llm = Some(Arc::new(llm));
        self
    }

    pub fn with_script_executor<S: ScriptExecutor + 'static>(mut self, executor: S) -> Self {
        self.scripts = Some(Arc::new(executor));
        self
    }

    pub fn with_display_sink<D: DisplaySink + 'static>(mut self, sink: D) -> Self {
        self.display = Some(Arc::new(sink));
        self
    }

    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = Some(transforms);
        self
    }

    pub fn with_output_validator<V: OutputValidator + 'static>(
        mut self,
        validator: V,
        policy: ValidationPolicy,
    ) -> Self {
        self.validator = Some((Arc::new(validator), policy));
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let resolver = Arc::new(ExpressionResolver::new(
            self.functions.unwrap_or_else(FunctionRegistry::builtin),
        ));
        let pipeline = TransformPipeline::new(
            Arc::new(self.transforms.unwrap_or_else(TransformRegistry::builtin)),
            Arc::clone(&resolver),
        );
        let runner = StepRunner::new(RunnerDeps {
            resolver,
            pipeline,
            tools: self.tools,
            llm: self.llm,
            scripts: self.scripts,
            display: self
                .display
                .unwrap_or_else(|| Arc::new(TracingDisplaySink)),
            script_timeout: Duration::from_secs(self.config.script_timeout_secs),
            blocked_commands: self.config.blocked_commands.clone(),
            max_script_size: self.config.max_script_size,
        });
        WorkflowEngine {
            runner,
            config: self.config,
            validator: self.validator,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
