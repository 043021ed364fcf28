//! Workflow document parsing and validation.
//!
//! Workflows are authored as JSON or YAML documents. Step payloads are decoded
//! into typed configs during deserialization (see `stepflow_types::workflow`);
//! this module adds the cross-step checks: unique names (nested steps
//! included), known dependencies and an acyclic graph.

use std::collections::HashSet;
use std::path::Path;

use stepflow_types::workflow::{Step, StepConfig, Workflow};
use thiserror::Error;

use super::graph::validate_graph;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading or planning a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure, including invalid step configs.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Dependency graph contains a cycle; lists every unresolved step.
    #[error("circular dependency detected among steps: {}", steps.join(", "))]
    CircularDependency { steps: Vec<String> },

    /// A step references a step that does not exist.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and validate a JSON workflow document.
pub fn parse_workflow_json(json: &str) -> Result<Workflow, WorkflowError> {
    let workflow: Workflow =
        serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Parse and validate a YAML workflow document.
pub fn parse_workflow_yaml(yaml: &str) -> Result<Workflow, WorkflowError> {
    let workflow: Workflow =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Load a workflow file, choosing the format by extension (`.json`, else YAML).
pub fn load_workflow_file(path: &Path) -> Result<Workflow, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        parse_workflow_json(&content)
    } else {
        parse_workflow_yaml(&content)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a workflow.
///
/// Checks:
/// - Name is non-empty
/// - At least one step exists
/// - Step names are unique across the workflow, nested steps included
/// - Nested steps declare no `depends_on` (they run in declaration order)
/// - All `depends_on` references exist and the graph is acyclic
pub fn validate_workflow(workflow: &Workflow) -> Result<(), WorkflowError> {
    if workflow.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }

    if workflow.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    collect_names(&workflow.steps, &mut seen, false)?;

    validate_graph(&workflow.steps)
}

fn collect_names<'a>(
    steps: &'a [Step],
    seen: &mut HashSet<&'a str>,
    nested: bool,
) -> Result<(), WorkflowError> {
    for step in steps {
        if !seen.insert(step.name.as_str()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step name: '{}'",
                step.name
            )));
        }
        if nested && !step.depends_on.is_empty() {
            return Err(WorkflowError::ValidationError(format!(
                "nested step '{}' must not declare depends_on",
                step.name
            )));
        }
        match &step.config {
            StepConfig::Loop(cfg) => collect_names(&cfg.steps, seen, true)?,
            StepConfig::Parallel(cfg) => collect_names(&cfg.steps, seen, true)?,
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_types::workflow::StepType;

    const YAML: &str = r#"
name: release-notes
description: Summarize merged work
max_retries: 2
steps:
  - name: fetch
    type: tool
    config:
      tool: git_log
      params:
        since: "{since}"
  - name: summarize
    type: llm
    depends_on: [fetch]
    config:
      prompt: "Summarize:\n{fetch}"
  - name: show
    type: display
    depends_on: [summarize]
    config:
      content: "{summarize}"
"#;

    #[test]
    fn parses_yaml_document() {
        let wf = parse_workflow_yaml(YAML).unwrap();
        assert_eq!(wf.name, "release-notes");
        assert_eq!(wf.settings.max_retries, 2);
        assert_eq!(wf.steps.len(), 3);
        assert_eq!(wf.steps[1].step_type(), StepType::Llm);
        assert_eq!(wf.steps[2].depends_on, vec!["summarize"]);
    }

    #[test]
    fn parses_json_document() {
        let json = r#"{
            "name": "one",
            "steps": [{ "name": "hello", "type": "display", "config": { "content": "hi" } }]
        }"#;
        let wf = parse_workflow_json(json).unwrap();
        assert_eq!(wf.steps[0].name, "hello");
        assert!(wf.settings.parallel_execution);
    }

    #[test]
    fn rejects_duplicate_names_including_nested() {
        let json = r#"{
            "name": "dup",
            "steps": [
                { "name": "a", "type": "condition", "config": { "condition": "true" } },
                { "name": "fan", "type": "parallel", "config": { "steps": [
                    { "name": "a", "type": "condition", "config": { "condition": "true" } }
                ] } }
            ]
        }"#;
        let err = parse_workflow_json(json).unwrap_err();
        assert!(err.to_string().contains("duplicate step name: 'a'"), "got: {err}");
    }

    #[test]
    fn rejects_nested_dependencies() {
        let json = r#"{
            "name": "nested",
            "steps": [
                { "name": "rep", "type": "loop", "config": { "max_iterations": 2, "steps": [
                    { "name": "x", "type": "condition", "depends_on": ["y"], "config": { "condition": "true" } }
                ] } }
            ]
        }"#;
        let err = parse_workflow_json(json).unwrap_err();
        assert!(err.to_string().contains("must not declare depends_on"), "got: {err}");
    }

    #[test]
    fn rejects_unknown_dependency_and_cycles() {
        let unknown = r#"{ "name": "u", "steps": [
            { "name": "a", "type": "condition", "depends_on": ["ghost"], "config": { "condition": "true" } }
        ] }"#;
        assert!(matches!(
            parse_workflow_json(unknown).unwrap_err(),
            WorkflowError::UnknownDependency { .. }
        ));

        let cyclic = r#"{ "name": "c", "steps": [
            { "name": "a", "type": "condition", "depends_on": ["b"], "config": { "condition": "true" } },
            { "name": "b", "type": "condition", "depends_on": ["a"], "config": { "condition": "true" } }
        ] }"#;
        let err = parse_workflow_json(cyclic).unwrap_err();
        assert_eq!(
            err.to_string(),
            "circular dependency detected among steps: a, b"
        );
    }

    #[test]
    fn rejects_empty_workflow_and_bad_config() {
        let err = parse_workflow_json(r#"{ "name": "e", "steps": [] }"#).unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));

        let err = parse_workflow_json(
            r#"{ "name": "bad", "steps": [{ "name": "s", "type": "script", "config": {} }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::ParseError(_)));
    }

    #[test]
    fn loads_files_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("wf.yaml");
        std::fs::write(&yaml_path, YAML).unwrap();
        assert_eq!(load_workflow_file(&yaml_path).unwrap().steps.len(), 3);

        let json_path = dir.path().join("wf.json");
        std::fs::write(
            &json_path,
            r#"{ "name": "j", "steps": [{ "name": "s", "type": "condition", "config": { "condition": "true" } }] }"#,
        )
        .unwrap();
        assert_eq!(load_workflow_file(&json_path).unwrap().name, "j");

        let missing = load_workflow_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, WorkflowError::IoError(_)));
    }
}
