//! Observability for the reports gateway.
//!
//! - `metrics` - Prometheus metric definitions and recorder setup

pub mod metrics;

pub use metrics::init_metrics_recorder;
