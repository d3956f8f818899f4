//! Observability module providing structured logging.
//!
//! Log output format (pretty, compact, JSON) and filtering are selected by
//! `[observability.logging]`; `RUST_LOG` overrides the configured filter.

mod tracing_init;

pub use tracing_init::*;
