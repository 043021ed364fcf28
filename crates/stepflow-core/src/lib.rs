//! Workflow engine for stepflow.
//!
//! This crate holds the engine itself (dependency levels, the per-step state
//! machine, the expression resolver, transforms, script validation) and the
//! "ports" that callers implement: tools, LLM clients, script executors,
//! display sinks and output validators. It depends only on `stepflow-types`
//! -- never on `stepflow-infra` or any process/IO crate.

pub mod ports;
pub mod security;
pub mod transform;
pub mod workflow;
