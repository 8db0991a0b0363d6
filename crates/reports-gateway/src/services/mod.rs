//! Service layer for the reports gateway.
//!
//! - `report_gateway` - Identity-scoped report reads with retry and the
//!   store failure policy

pub mod report_gateway;

pub use report_gateway::{ReportGateway, RetryPolicy};
