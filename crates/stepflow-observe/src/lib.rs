//! Observability setup for stepflow: structured logging through `tracing`,
//! optionally bridged to OpenTelemetry.

pub mod tracing_setup;

pub use tracing_setup::{TracingError, init_tracing, shutdown_tracing};
