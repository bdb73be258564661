//! Logging setup for the harness, the runner binary and tests

pub mod logging;

pub use logging::{init_default_logging, init_logging, init_test_logging, LogFormat};

// Span macros for structured logging
pub use logging::{adapter_span, scenario_span};
