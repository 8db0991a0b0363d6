//! Repository layer for the reports gateway.
//!
//! The analytics store sits behind the [`ReportStore`] trait so the service
//! layer can be exercised without a running ClickHouse.

pub mod reports;

pub use reports::{ClickHouseReportStore, ReportStore, StoreError};
