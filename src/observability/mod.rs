//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging via `tracing-subscriber`
//! - OpenTelemetry/OTLP metrics for storage operations

pub mod metrics;
pub mod tracing;
