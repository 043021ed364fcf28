//! Applies a step's transform list against the run context.

use std::sync::Arc;

use serde_json::Value;
use stepflow_types::workflow::Transform;

use super::{TransformError, TransformRegistry};
use crate::workflow::context::ExecutionContext;
use crate::workflow::expression::{ExpressionResolver, step_field};

/// Resolves sources, checks guards, applies transformers and stores results.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    registry: Arc<TransformRegistry>,
    resolver: Arc<ExpressionResolver>,
}

impl TransformPipeline {
    pub fn new(registry: Arc<TransformRegistry>, resolver: Arc<ExpressionResolver>) -> Self {
        Self { registry, resolver }
    }

    /// Apply `transforms` in order, stopping at the first error.
    pub fn apply_all(
        &self,
        transforms: &[Transform],
        ctx: &ExecutionContext,
    ) -> Result<(), TransformError> {
        for transform in transforms {
            self.apply(transform, ctx)?;
        }
        Ok(())
    }

    /// Apply one transform. Returns `None` when its guard renders falsy.
    pub fn apply(
        &self,
        transform: &Transform,
        ctx: &ExecutionContext,
    ) -> Result<Option<Value>, TransformError> {
        if let Some(guard) = &transform.condition {
            let rendered = self.resolver.render(guard, ctx);
            if !is_truthy(&rendered) {
                tracing::debug!(
                    transform = transform.transform.as_str(),
                    guard = guard.as_str(),
                    "transform guard is falsy, skipping"
                );
                return Ok(None);
            }
        }

        let transformer = self
            .registry
            .get(&transform.transform)
            .ok_or_else(|| TransformError::UnknownTransform(transform.transform.clone()))?;
        transformer.validate_params(&transform.params)?;

        let input = self.resolve_source(&transform.source, ctx)?;
        let output = transformer.apply(&input, &transform.params)?;

        if let Some(key) = &transform.store_as {
            ctx.insert_data(key.clone(), output.clone());
        }
        tracing::debug!(
            transform = transform.transform.as_str(),
            source = transform.source.as_str(),
            store_as = transform.store_as.as_deref().unwrap_or(""),
            "applied transform"
        );
        Ok(Some(output))
    }

    fn resolve_source(&self, source: &str, ctx: &ExecutionContext) -> Result<Value, TransformError> {
        let source = source.trim();
        let expr = match source.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(inner) if !inner.contains(['{', '}']) => inner.trim(),
            // Mixed text: render it as a template.
            _ if source.contains('{') => {
                return Ok(Value::String(self.resolver.render(source, ctx)));
            }
            _ => source,
        };

        if let Ok(value) = self.resolver.resolve(expr, ctx) {
            return Ok(value);
        }
        direct_lookup(expr, ctx).ok_or_else(|| TransformError::SourceNotFound(source.to_string()))
    }
}

/// Fallback lookup: any published step result (failed ones included), a
/// `step.field` pair, or a data key.
fn direct_lookup(expr: &str, ctx: &ExecutionContext) -> Option<Value> {
    if let Some(result) = ctx.step_result(expr) {
        return Some(result.output);
    }
    if let Some((step, field)) = expr.split_once('.') {
        if let Some(value) = ctx.step_result(step).and_then(|r| step_field(&r, field)) {
            return Some(value);
        }
    }
    ctx.get_data(expr)
}

/// Guard truthiness: "", "0", "false" and "no" (any case) are false.
pub fn is_truthy(rendered: &str) -> bool {
    let text = rendered.trim();
    !(text.is_empty()
        || text == "0"
        || text.eq_ignore_ascii_case("false")
        || text.eq_ignore_ascii_case("no"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use stepflow_types::result::StepResult;

    fn pipeline() -> TransformPipeline {
        TransformPipeline::new(
            Arc::new(TransformRegistry::builtin()),
            Arc::new(ExpressionResolver::default()),
        )
    }

    fn transform(source: &str, name: &str, params: Value, store_as: Option<&str>) -> Transform {
        Transform {
            source: source.to_string(),
            transform: name.to_string(),
            params: params.as_object().cloned().unwrap_or_else(Map::new),
            store_as: store_as.map(str::to_string),
            condition: None,
        }
    }

    #[test]
    fn stores_result_under_store_as() {
        let ctx = ExecutionContext::new("wf");
        ctx.publish_result(StepResult::success("fetch", json!("a\nb\n\nc")));
        let t = transform("fetch", "extract", json!({ "mode": "count" }), Some("line_count"));

        let out = pipeline().apply(&t, &ctx).unwrap();
        assert_eq!(out, Some(json!(3)));
        assert_eq!(ctx.get_data("line_count"), Some(json!(3)));
    }

    #[test]
    fn chained_transforms_see_earlier_results() {
        let ctx = ExecutionContext::new("wf");
        ctx.insert_data("raw", json!("{\"items\": [3, 1, 2]}"));
        let transforms = vec![
            transform("{raw}", "json_parse", json!({}), Some("parsed")),
            transform("parsed.items", "sort", json!({ "order": "desc" }), Some("sorted")),
        ];
        pipeline().apply_all(&transforms, &ctx).unwrap();
        assert_eq!(ctx.get_data("sorted"), Some(json!([3, 2, 1])));
    }

    #[test]
    fn falsy_guard_skips() {
        let ctx = ExecutionContext::new("wf");
        ctx.insert_data("enabled", json!("no"));
        ctx.insert_data("text", json!("hi"));
        let mut t = transform("text", "string", json!({ "operation": "upper" }), Some("out"));
        t.condition = Some("{enabled}".to_string());

        assert_eq!(pipeline().apply(&t, &ctx).unwrap(), None);
        assert!(ctx.get_data("out").is_none());

        ctx.insert_data("enabled", json!(true));
        assert_eq!(pipeline().apply(&t, &ctx).unwrap(), Some(json!("HI")));
    }

    #[test]
    fn failed_step_output_and_fields_reachable_by_fallback() {
        let ctx = ExecutionContext::new("wf");
        let mut failed = StepResult::failure("build", "exit 1");
        failed.output = json!("partial log");
        ctx.publish_result(failed);

        let p = pipeline();
        let t = transform("build", "string", json!({ "operation": "upper" }), None);
        assert_eq!(p.apply(&t, &ctx).unwrap(), Some(json!("PARTIAL LOG")));
    }

    #[test]
    fn mixed_template_source_is_rendered() {
        let ctx = ExecutionContext::new("wf");
        ctx.insert_data("name", json!("ada"));
        let t = transform("hello {name}", "string", json!({ "operation": "upper" }), None);
        assert_eq!(pipeline().apply(&t, &ctx).unwrap(), Some(json!("HELLO ADA")));
    }

    #[test]
    fn errors() {
        let ctx = ExecutionContext::new("wf");
        let p = pipeline();
        assert!(matches!(
            p.apply(&transform("x", "teleport", json!({}), None), &ctx),
            Err(TransformError::UnknownTransform(_))
        ));
        assert!(matches!(
            p.apply(&transform("missing", "string", json!({ "operation": "trim" }), None), &ctx),
            Err(TransformError::SourceNotFound(_))
        ));
        assert!(matches!(
            p.apply(&transform("x", "aggregate", json!({}), None), &ctx),
            Err(TransformError::InvalidParams { .. })
        ));
    }

    #[test]
    fn truthiness() {
        for falsy in ["", " 0 ", "false", "FALSE", "No"] {
            assert!(!is_truthy(falsy), "{falsy:?}");
        }
        for truthy in ["1", "yes", "true", "anything"] {
            assert!(is_truthy(truthy), "{truthy:?}");
        }
    }
}
