//! Utility types shared across the service.
//!
//! - [`b64`] - Base64 encoding/decoding for the `X-PAYMENT` header
//! - [`money_amount`] - Human-readable currency amount parsing
//! - [`sig_down`] - Graceful shutdown signal handling
//! - [`telemetry`] - OpenTelemetry tracing and metrics setup

pub mod b64;
pub mod money_amount;
pub mod sig_down;
pub mod telemetry;

pub use sig_down::*;
pub use telemetry::*;
