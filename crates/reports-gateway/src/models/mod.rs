//! Reports gateway models.

use clickhouse::Row;
use serde::{Deserialize, Serialize};

/// One device telemetry report from the `reports` table.
///
/// Field order matches the query's column order; rows are decoded
/// positionally. Serialized to JSON with these exact field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Row)]
pub struct Record {
    /// Owner of the device the report came from.
    pub user_email: String,

    pub prosthesis_id: String,

    pub signal_strength: f32,

    pub battery_percentage: i32,
}
