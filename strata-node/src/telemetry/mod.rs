//! Strata Telemetry - Logging Setup
//!
//! Installs the `tracing` subscriber used by every crate in the workspace.

pub mod tracer;

pub use tracer::{init_tracing, TelemetryConfig, DEFAULT_FILTER};
