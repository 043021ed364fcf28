//! Workflow domain types for stepflow.
//!
//! A `Workflow` is an ordered list of `Step`s forming a DAG through
//! `depends_on`. Documents carry each step's payload as an untyped `config`
//! bag next to a `type` tag; the bag is decoded into a typed `StepConfig`
//! variant once, at load time, so the engine never re-checks it ad hoc.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound for `loop` steps' `max_iterations`.
pub const MAX_LOOP_ITERATIONS: u32 = 100;

/// Default number of tool calls an `llm_with_tools` step may make.
pub const DEFAULT_MAX_TOOL_CALLS: u32 = 5;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A workflow: a named, ordered list of steps plus run-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Run-wide settings. Accepted as top-level document keys.
    #[serde(flatten)]
    pub settings: WorkflowSettings,
    /// Steps forming the workflow DAG.
    pub steps: Vec<Step>,
}

/// Top-level workflow settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Attempts per step when the step has no `retry` block (default 1).
    #[serde(default = "default_max_attempts")]
    pub max_retries: u32,
    /// Per-attempt timeout in seconds. `None` means unbounded.
    #[serde(default, alias = "step_timeout", skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,
    /// Run the steps of a dependency level concurrently (default true).
    #[serde(default = "default_true")]
    pub parallel_execution: bool,
    /// Abort the run on the first unrecovered step failure (default true).
    #[serde(default = "default_true")]
    pub stop_on_failure: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_attempts(),
            step_timeout_secs: None,
            parallel_execution: true,
            stop_on_failure: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    1
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single step in the workflow DAG.
///
/// Serialized through [`StepDocument`], which keeps the `type` + `config`
/// document shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepDocument", into = "StepDocument")]
pub struct Step {
    /// Step name, unique within a workflow.
    pub name: String,
    /// Typed step payload. The step type is derived from the variant.
    pub config: StepConfig,
    /// Names of steps this step depends on.
    pub depends_on: Vec<String>,
    /// Retry policy; falls back to the workflow's `max_retries`.
    pub retry: Option<RetryConfig>,
    /// Record failure and keep going instead of aborting the run.
    pub continue_on_error: bool,
    /// Skip-conditions (AND semantics).
    pub conditions: Vec<StepCondition>,
    /// Transforms applied before the step runs.
    pub context_transforms: Vec<Transform>,
    /// Transforms applied after the step succeeds.
    pub post_transforms: Vec<Transform>,
}

impl Step {
    /// Create a step with no dependencies, retries, conditions or transforms.
    pub fn new(name: impl Into<String>, config: StepConfig) -> Self {
        Self {
            name: name.into(),
            config,
            depends_on: Vec::new(),
            retry: None,
            continue_on_error: false,
            conditions: Vec::new(),
            context_transforms: Vec::new(),
            post_transforms: Vec::new(),
        }
    }

    /// Builder-style helper to set dependencies.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    /// The step's type tag.
    pub fn step_type(&self) -> StepType {
        self.config.step_type()
    }
}

/// The kind of step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Tool,
    Llm,
    LlmWithTools,
    Display,
    Script,
    Condition,
    Loop,
    Parallel,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Tool => "tool",
            StepType::Llm => "llm",
            StepType::LlmWithTools => "llm_with_tools",
            StepType::Display => "display",
            StepType::Script => "script",
            StepType::Condition => "condition",
            StepType::Loop => "loop",
            StepType::Parallel => "parallel",
        }
    }

    /// Whether a step of this type may run inside a `parallel` step.
    pub fn allowed_in_parallel(&self) -> bool {
        matches!(
            self,
            StepType::Tool | StepType::Llm | StepType::Display | StepType::Condition
        )
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step configuration payloads
// ---------------------------------------------------------------------------

/// Typed step configuration, one variant per [`StepType`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    Tool(ToolStepConfig),
    Llm(LlmStepConfig),
    LlmWithTools(LlmWithToolsStepConfig),
    Display(DisplayStepConfig),
    Script(ScriptStepConfig),
    Condition(ConditionStepConfig),
    Loop(LoopStepConfig),
    Parallel(ParallelStepConfig),
}

/// Invoke a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStepConfig {
    pub tool: String,
    /// Tool parameters. String values are template-rendered before the call.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

/// Single LLM completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmStepConfig {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// LLM completion that may call tools through a JSON call protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmWithToolsStepConfig {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Tools the model is allowed to call.
    pub tools: Vec<String>,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
}

fn default_max_tool_calls() -> u32 {
    DEFAULT_MAX_TOOL_CALLS
}

/// Show text to the user: either a rendered template or an LLM answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayStepConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// When set, the LLM answer to this prompt is displayed instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Run a shell script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStepConfig {
    /// Inline script body (template-rendered before validation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Take the script body from an upstream step's output. Always untrusted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_step: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Force untrusted scrutiny for an inline script by setting `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted: Option<bool>,
}

fn default_shell() -> String {
    "bash".to_string()
}

impl ScriptStepConfig {
    /// Inline scripts are trusted unless explicitly marked otherwise;
    /// scripts produced by another step never are.
    pub fn is_trusted_source(&self) -> bool {
        self.from_step.is_none() && self.trusted.unwrap_or(true)
    }
}

/// Evaluate a rendered boolean expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionStepConfig {
    pub condition: String,
}

/// Repeat an inner step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStepConfig {
    pub steps: Vec<Step>,
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub break_on: Vec<StepCondition>,
    /// Inner step name or data key whose value becomes the loop's output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_var: Option<String>,
}

/// Run inner steps concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelStepConfig {
    pub steps: Vec<Step>,
}

impl StepConfig {
    pub fn step_type(&self) -> StepType {
        match self {
            StepConfig::Tool(_) => StepType::Tool,
            StepConfig::Llm(_) => StepType::Llm,
            StepConfig::LlmWithTools(_) => StepType::LlmWithTools,
            StepConfig::Display(_) => StepType::Display,
            StepConfig::Script(_) => StepType::Script,
            StepConfig::Condition(_) => StepType::Condition,
            StepConfig::Loop(_) => StepType::Loop,
            StepConfig::Parallel(_) => StepType::Parallel,
        }
    }

    /// Decode an untyped config bag for the given step type and check the
    /// constraints serde cannot express.
    pub fn decode(
        step: &str,
        step_type: StepType,
        config: Map<String, Value>,
    ) -> Result<Self, StepConfigError> {
        let bag = Value::Object(config);
        let invalid = |reason: String| StepConfigError::Invalid {
            step: step.to_string(),
            step_type,
            reason,
        };
        let decoded = match step_type {
            StepType::Tool => StepConfig::Tool(from_bag(bag).map_err(invalid)?),
            StepType::Llm => StepConfig::Llm(from_bag(bag).map_err(invalid)?),
            StepType::LlmWithTools => {
                let cfg: LlmWithToolsStepConfig = from_bag(bag).map_err(invalid)?;
                if cfg.tools.is_empty() {
                    return Err(invalid("at least one tool must be listed".to_string()));
                }
                StepConfig::LlmWithTools(cfg)
            }
            StepType::Display => {
                let cfg: DisplayStepConfig = from_bag(bag).map_err(invalid)?;
                if cfg.content.is_none() && cfg.prompt.is_none() {
                    return Err(invalid("either 'content' or 'prompt' is required".to_string()));
                }
                StepConfig::Display(cfg)
            }
            StepType::Script => {
                let cfg: ScriptStepConfig = from_bag(bag).map_err(invalid)?;
                if cfg.script.is_some() == cfg.from_step.is_some() {
                    return Err(invalid(
                        "exactly one of 'script' or 'from_step' is required".to_string(),
                    ));
                }
                StepConfig::Script(cfg)
            }
            StepType::Condition => StepConfig::Condition(from_bag(bag).map_err(invalid)?),
            StepType::Loop => {
                let cfg: LoopStepConfig = from_bag(bag).map_err(invalid)?;
                if cfg.max_iterations == 0 || cfg.max_iterations > MAX_LOOP_ITERATIONS {
                    return Err(invalid(format!(
                        "max_iterations must be in 1..={MAX_LOOP_ITERATIONS}, got {}",
                        cfg.max_iterations
                    )));
                }
                if cfg.steps.is_empty() {
                    return Err(invalid("loop has no inner steps".to_string()));
                }
                StepConfig::Loop(cfg)
            }
            StepType::Parallel => {
                let cfg: ParallelStepConfig = from_bag(bag).map_err(invalid)?;
                if let Some(inner) = cfg
                    .steps
                    .iter()
                    .find(|s| !s.step_type().allowed_in_parallel())
                {
                    return Err(invalid(format!(
                        "inner step '{}' has type '{}', which cannot run inside parallel",
                        inner.name,
                        inner.step_type()
                    )));
                }
                StepConfig::Parallel(cfg)
            }
        };
        Ok(decoded)
    }

    /// Encode the typed config back into an untyped bag.
    pub fn to_bag(&self) -> Map<String, Value> {
        let encoded = match self {
            StepConfig::Tool(c) => serde_json::to_value(c),
            StepConfig::Llm(c) => serde_json::to_value(c),
            StepConfig::LlmWithTools(c) => serde_json::to_value(c),
            StepConfig::Display(c) => serde_json::to_value(c),
            StepConfig::Script(c) => serde_json::to_value(c),
            StepConfig::Condition(c) => serde_json::to_value(c),
            StepConfig::Loop(c) => serde_json::to_value(c),
            StepConfig::Parallel(c) => serde_json::to_value(c),
        };
        match encoded {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

fn from_bag<T: serde::de::DeserializeOwned>(bag: Value) -> Result<T, String> {
    serde_json::from_value(bag).map_err(|e| e.to_string())
}

/// Error raised while decoding a step document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepConfigError {
    #[error("step '{step}': invalid {step_type} config: {reason}")]
    Invalid {
        step: String,
        step_type: StepType,
        reason: String,
    },

    #[error("step name must not be empty")]
    EmptyName,
}

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

/// On-disk shape of a step: a `type` tag plus an untyped `config` bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<StepCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_transforms: Vec<Transform>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_transforms: Vec<Transform>,
}

impl TryFrom<StepDocument> for Step {
    type Error = StepConfigError;

    fn try_from(doc: StepDocument) -> Result<Self, Self::Error> {
        if doc.name.trim().is_empty() {
            return Err(StepConfigError::EmptyName);
        }
        let config = StepConfig::decode(&doc.name, doc.step_type, doc.config)?;
        Ok(Step {
            name: doc.name,
            config,
            depends_on: doc.depends_on,
            retry: doc.retry,
            continue_on_error: doc.continue_on_error,
            conditions: doc.conditions,
            context_transforms: doc.context_transforms,
            post_transforms: doc.post_transforms,
        })
    }
}

impl From<Step> for StepDocument {
    fn from(step: Step) -> Self {
        StepDocument {
            step_type: step.step_type(),
            config: step.config.to_bag(),
            name: step.name,
            depends_on: step.depends_on,
            retry: step.retry,
            continue_on_error: step.continue_on_error,
            conditions: step.conditions,
            context_transforms: step.context_transforms,
            post_transforms: step.post_transforms,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry, conditions, transforms
// ---------------------------------------------------------------------------

/// Retry configuration for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (default 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Comparison operator for skip and break conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    Empty,
    NotEmpty,
}

/// A field/operator/value guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCondition {
    /// Expression naming the value to test (e.g. `review` or `fetch.status`).
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: String,
}

/// A named data transform applied before or after a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Expression selecting the input value.
    pub source: String,
    /// Registered transformer name.
    pub transform: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    /// Destination key in the execution data bag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,
    /// Guard expression; the transform is skipped when it renders falsy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
