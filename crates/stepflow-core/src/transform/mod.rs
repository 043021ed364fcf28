//! Named data transforms.
//!
//! A [`Transformer`] maps an input value plus a parameter map to an output
//! value. Steps reference transformers by name in `context_transforms` (run
//! before the step) and `post_transforms` (run after it succeeds); the
//! [`pipeline::TransformPipeline`] resolves sources, checks guards and stores
//! results in the run's data bag.

pub mod builtins;
pub mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

pub use pipeline::TransformPipeline;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("unknown transform '{0}'")]
    UnknownTransform(String),

    #[error("transform '{transform}': invalid params: {reason}")]
    InvalidParams { transform: String, reason: String },

    #[error("transform '{transform}': invalid input: {reason}")]
    InvalidInput { transform: String, reason: String },

    #[error("transform source '{0}' not found")]
    SourceNotFound(String),
}

impl TransformError {
    pub(crate) fn params(transform: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            transform: transform.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn input(transform: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            transform: transform.to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transformer trait
// ---------------------------------------------------------------------------

/// A pure value-to-value transform.
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reject malformed parameters before any input is touched.
    fn validate_params(&self, _params: &Map<String, Value>) -> Result<(), TransformError> {
        Ok(())
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Transformers keyed by name.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transformers: HashMap<String, Arc<dyn Transformer>>,
}

impl TransformRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every built-in transformer.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(builtins::ExtractTransformer);
        registry.register(builtins::JsonParseTransformer);
        registry.register(builtins::AggregateTransformer);
        registry.register(builtins::FilterTransformer);
        registry.register(builtins::FormatTransformer);
        registry.register(builtins::MergeTransformer);
        registry.register(builtins::DedupeTransformer);
        registry.register(builtins::SortTransformer);
        registry.register(builtins::RegexExtractTransformer);
        registry.register(builtins::StringTransformer);
        registry
    }

    /// Register a transformer, replacing any with the same name.
    pub fn register<T: Transformer + 'static>(&mut self, transformer: T) {
        self.transformers
            .insert(transformer.name().to_string(), Arc::new(transformer));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transformers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transformers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Shout;

    impl Transformer for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }

        fn apply(&self, input: &Value, _params: &Map<String, Value>) -> Result<Value, TransformError> {
            Ok(json!(input.as_str().unwrap_or_default().to_uppercase()))
        }
    }

    #[test]
    fn builtin_registry_lists_all_transforms() {
        let registry = TransformRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec![
                "aggregate",
                "dedupe",
                "extract",
                "filter",
                "format",
                "json_parse",
                "merge",
                "regex_extract",
                "sort",
                "string"
            ]
        );
    }

    #[test]
    fn custom_transformer_registers() {
        let mut registry = TransformRegistry::empty();
        registry.register(Shout);
        let t = registry.get("shout").unwrap();
        assert_eq!(t.apply(&json!("hey"), &Map::new()).unwrap(), json!("HEY"));
        assert!(registry.get("extract").is_none());
    }
}
