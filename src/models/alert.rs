use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for alerts table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub wallet: String,
    pub category: String,
    pub netuid: Option<i32>,
    /// Category name for category-concentration alerts.
    pub subject: Option<String>,
    pub severity: String,
    pub threshold: Decimal,
    pub actual: Decimal,
    pub message: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Alert status constants.
pub mod alert_status {
    pub const ACTIVE: &str = "active";
    pub const ACKNOWLEDGED: &str = "acknowledged";
    pub const RESOLVED: &str = "resolved";
}
