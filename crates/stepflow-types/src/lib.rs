//! Shared domain types for stepflow.
//!
//! This crate contains the types exchanged between the engine and its callers:
//! workflow definitions, step results and metrics, script security types, and
//! engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod llm;
pub mod result;
pub mod security;
pub mod workflow;
