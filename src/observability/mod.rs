//! Diagnostic logging for the orchestrator

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{dispatch_span, lifecycle_span, run_span};
