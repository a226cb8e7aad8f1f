//! Tracing setup shared by the app plugin backend: subscriber initialization,
//! optional OTLP export, and span builders for resource calls.

pub mod config;
pub mod otlp;
pub mod spans;

pub use config::{OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
