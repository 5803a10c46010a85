//! Manuscripta Observability
//!
//! This crate provides:
//! - Logging initialization (`tracing-subscriber`, plain or JSON)
//! - Prometheus export of the resilience counters

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{ObservabilityError, Result};
pub use metrics::PrometheusExporter;
