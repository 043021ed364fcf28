//! Step results and run metrics.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Output recorded for a step whose skip-conditions were not met.
pub const SKIPPED_OUTPUT: &str = "skipped - conditions not met";

/// The finalized outcome of one step's attempt set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    /// Untyped output: a string, a map, or any nested container.
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time across all attempts, including backoff.
    #[serde(with = "duration_millis", rename = "execution_time_ms")]
    pub execution_time: Duration,
    pub started_at: DateTime<Utc>,
    /// Free-form annotations (attempts, skip flag, loop iterations, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl StepResult {
    pub fn success(step_name: impl Into<String>, output: Value) -> Self {
        Self {
            step_name: step_name.into(),
            success: true,
            output,
            error: None,
            execution_time: Duration::ZERO,
            started_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn failure(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            execution_time: Duration::ZERO,
            started_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// A successful-but-skipped result.
    pub fn skipped(step_name: impl Into<String>) -> Self {
        Self::success(step_name, Value::String(SKIPPED_OUTPUT.to_string()))
            .with_metadata("skipped", Value::Bool(true))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_timing(mut self, started_at: DateTime<Utc>, execution_time: Duration) -> Self {
        self.started_at = started_at;
        self.execution_time = execution_time;
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.metadata
            .get("skipped")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Run-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_steps: u32,
    pub successful_steps: u32,
    pub failed_steps: u32,
    pub skipped_steps: u32,
    pub total_tokens: u64,
    pub total_cost: f64,
}

impl ExecutionMetrics {
    /// Count a finalized step result.
    pub fn record(&mut self, result: &StepResult) {
        self.total_steps += 1;
        if !result.success {
            self.failed_steps += 1;
        } else if result.is_skipped() {
            self.skipped_steps += 1;
        } else {
            self.successful_steps += 1;
        }
    }

    pub fn add_llm_usage(&mut self, tokens: u64, cost: f64) {
        self.total_tokens += tokens;
        self.total_cost += cost;
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skipped_result_shape() {
        let r = StepResult::skipped("notify");
        assert!(r.success);
        assert!(r.is_skipped());
        assert_eq!(r.output, json!(SKIPPED_OUTPUT));
        assert_eq!(r.metadata["skipped"], json!(true));
    }

    #[test]
    fn metrics_count_each_outcome_once() {
        let mut m = ExecutionMetrics::default();
        m.record(&StepResult::success("a", json!("ok")));
        m.record(&StepResult::skipped("b"));
        m.record(&StepResult::failure("c", "boom"));
        m.add_llm_usage(120, 0.5);
        m.add_llm_usage(30, 0.25);

        assert_eq!(m.total_steps, 3);
        assert_eq!(m.successful_steps, 1);
        assert_eq!(m.skipped_steps, 1);
        assert_eq!(m.failed_steps, 1);
        assert_eq!(m.total_tokens, 150);
        assert!((m.total_cost - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn execution_time_serializes_as_millis() {
        let r = StepResult::success("a", json!(1))
            .with_timing(Utc::now(), Duration::from_millis(1500));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["execution_time_ms"], json!(1500));
    }
}
