use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for trade_recommendations table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecommendation {
    pub id: Uuid,
    pub wallet: String,
    pub netuid: i32,
    pub direction: String,
    pub size: Decimal,
    pub trigger: String,
    pub reason: String,
    pub priority: i32,
    pub urgent: bool,
    pub status: String,
    pub parent_id: Option<Uuid>,
    pub tranche_index: Option<i32>,
    pub tranche_count: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl TradeRecommendation {
    /// Ladder parents summarise their tranches and carry no volume of their own.
    pub fn is_ladder_parent(&self) -> bool {
        self.tranche_count.is_some() && self.tranche_index.is_none()
    }
}

/// Recommendation status constants.
pub mod recommendation_status {
    pub const PENDING: &str = "pending";
    pub const EXECUTED: &str = "executed";
    pub const EXPIRED: &str = "expired";
}
