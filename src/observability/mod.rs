//! Observability for the session layer
//!
//! Structured logging setup built on the `tracing` ecosystem.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
