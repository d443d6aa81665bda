//! Observability for the logical cluster labeler.
//!
//! Structured logging with span-based context: one span per reconciliation
//! cycle, nested spans per node mutation.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, TracingConfig};
