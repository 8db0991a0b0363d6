//! HTTP request handlers for the reports gateway.

pub mod health;
pub mod metrics;
pub mod reports;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use reports::get_reports;
