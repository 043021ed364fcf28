//! Per-run execution context.
//!
//! `ExecutionContext` is the shared state of one workflow run: a free-form
//! data bag (seeded from the caller and the environment, extended by
//! transforms), the published step results, and run metrics. It is shared
//! across concurrent steps behind an `Arc`; all maps are `DashMap`s so
//! readers never observe a half-written entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde_json::{Map, Value};
use stepflow_types::result::{ExecutionMetrics, StepResult};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Environment prefix picked up by [`ExecutionContext::seed_from_env`].
pub const DEFAULT_ENV_PREFIX: &str = "STEPFLOW_VAR_";

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Shared state of a single workflow run.
#[derive(Debug)]
pub struct ExecutionContext {
    run_id: Uuid,
    workflow_name: String,
    data: Arc<DashMap<String, Value>>,
    step_results: Arc<DashMap<String, StepResult>>,
    metrics: Arc<Mutex<ExecutionMetrics>>,
    /// Finalized but unpublished result, visible only through this view.
    pending: Option<StepResult>,
}

impl ExecutionContext {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            workflow_name: workflow_name.into(),
            data: Arc::new(DashMap::new()),
            step_results: Arc::new(DashMap::new()),
            metrics: Arc::new(Mutex::new(ExecutionMetrics::default())),
            pending: None,
        }
    }

    /// A view of the same run in which `result` is already visible.
    ///
    /// Data writes and metrics go to the shared run state; `result` itself
    /// stays private to the view until it is passed to
    /// [`publish_result`](Self::publish_result).
    pub fn with_pending(&self, result: StepResult) -> Self {
        Self {
            run_id: self.run_id,
            workflow_name: self.workflow_name.clone(),
            data: Arc::clone(&self.data),
            step_results: Arc::clone(&self.step_results),
            metrics: Arc::clone(&self.metrics),
            pending: Some(result),
        }
    }

    fn pending_for(&self, step: &str) -> Option<&StepResult> {
        self.pending.as_ref().filter(|r| r.step_name == step)
    }

    /// Create a context pre-seeded with data.
    pub fn with_data(workflow_name: impl Into<String>, data: Map<String, Value>) -> Self {
        let ctx = Self::new(workflow_name);
        for (key, value) in data {
            ctx.data.insert(key, value);
        }
        ctx
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    // -- data bag -----------------------------------------------------------

    pub fn insert_data(&self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.value().clone())
    }

    /// Copy of the whole data bag.
    pub fn data_snapshot(&self) -> Map<String, Value> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Seed data from environment variables starting with `prefix`.
    ///
    /// `STEPFLOW_VAR_REPO_URL=...` becomes the data key `repo_url`. Existing
    /// keys win. Returns the number of keys added.
    pub fn seed_from_env(&self, prefix: &str) -> usize {
        self.seed_from_vars(prefix, std::env::vars())
    }

    fn seed_from_vars(&self, prefix: &str, vars: impl Iterator<Item = (String, String)>) -> usize {
        let mut added = 0;
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(prefix) else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            let key = key.to_lowercase();
            if self.data.contains_key(&key) {
                continue;
            }
            self.data.insert(key, Value::String(value));
            added += 1;
        }
        added
    }

    // -- step results -------------------------------------------------------

    /// Publish a finalized step result, replacing any earlier one.
    pub fn publish_result(&self, result: StepResult) {
        self.step_results.insert(result.step_name.clone(), result);
    }

    /// The published result for `step`, successful or not.
    pub fn step_result(&self, step: &str) -> Option<StepResult> {
        if let Some(pending) = self.pending_for(step) {
            return Some(pending.clone());
        }
        self.step_results.get(step).map(|r| r.value().clone())
    }

    /// The output of `step`, only if it succeeded.
    pub fn step_output(&self, step: &str) -> Option<Value> {
        if let Some(pending) = self.pending_for(step) {
            return pending.success.then(|| pending.output.clone());
        }
        self.step_results
            .get(step)
            .filter(|r| r.success)
            .map(|r| r.output.clone())
    }

    pub fn has_result(&self, step: &str) -> bool {
        self.pending_for(step).is_some() || self.step_results.contains_key(step)
    }

    /// Copy of all published results keyed by step name. A pending result
    /// is not included.
    pub fn results_snapshot(&self) -> HashMap<String, StepResult> {
        self.step_results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// All step outputs as one JSON object (`{step_name: output}`).
    pub fn outputs_json(&self) -> Value {
        Value::Object(
            self.step_results
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().output.clone()))
                .collect(),
        )
    }

    // -- metrics ------------------------------------------------------------

    pub fn record_metrics(&self, result: &StepResult) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(result);
    }

    pub fn add_llm_usage(&self, tokens: u64, cost: f64) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_llm_usage(tokens, cost);
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
