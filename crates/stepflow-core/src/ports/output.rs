//! Display and output-validation ports.

use serde_json::Value;

/// Receives the text produced by `display` steps.
pub trait DisplaySink: Send + Sync {
    fn display(&self, step_name: &str, text: &str);
}

/// Default sink: emits display text as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDisplaySink;

impl DisplaySink for TracingDisplaySink {
    fn display(&self, step_name: &str, text: &str) {
        tracing::info!(step = step_name, "{text}");
    }
}

/// What to do when the final outputs fail validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// Fail the run.
    #[default]
    Stop,
    /// Log a warning and keep the run successful.
    Warn,
}

/// Checks a run's collected step outputs (`{step_name: output}`).
pub trait OutputValidator: Send + Sync {
    fn validate(&self, outputs: &Value) -> Result<(), String>;
}

impl<F> OutputValidator for F
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, outputs: &Value) -> Result<(), String> {
        self(outputs)
    }
}
