//! Workflow engine core: document parsing, DAG levels and step execution.
//!
//! - `definition` -- JSON/YAML parsing and structural validation
//! - `graph` -- dependency graph, level plan, cycle detection
//! - `context` -- per-run data bag, published step results and metrics
//! - `expression` / `functions` -- `{...}` template resolution and its function table
//! - `condition` -- skip, break and `condition` step evaluation
//! - `retry` -- attempt policy and backoff
//! - `step_runner` -- per-step state machine and step type handlers
//! - `executor` -- level-by-level workflow engine

pub mod condition;
pub mod context;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod functions;
pub mod graph;
pub mod retry;
pub mod step_runner;

pub use context::ExecutionContext;
pub use definition::{WorkflowError, load_workflow_file, validate_workflow};
pub use executor::{EngineError, ExecutionSummary, WorkflowEngine, WorkflowEngineBuilder};
pub use expression::{ExpressionError, ExpressionResolver};
pub use functions::FunctionRegistry;
pub use step_runner::{StepError, StepRunner};
