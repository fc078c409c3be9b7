pub mod alert;
pub mod pool;
pub mod position;
pub mod recommendation;
pub mod slippage;
pub mod snapshot;
pub mod viability_config;

pub use alert::Alert;
pub use pool::{Pool, PoolPrice, ROOT_NETUID, UNCATEGORIZED};
pub use position::Position;
pub use recommendation::TradeRecommendation;
pub use slippage::SlippageSample;
pub use snapshot::PortfolioSnapshot;
pub use viability_config::ViabilityConfig;

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TradeDirection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" | "stake" => Some(TradeDirection::Buy),
            "sell" | "unstake" => Some(TradeDirection::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SlippageDirection
// ---------------------------------------------------------------------------

/// Which side of the pool a slippage sample was measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlippageDirection {
    Stake,
    Unstake,
}

impl SlippageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlippageDirection::Stake => "stake",
            SlippageDirection::Unstake => "unstake",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stake" => Some(SlippageDirection::Stake),
            "unstake" => Some(SlippageDirection::Unstake),
            _ => None,
        }
    }
}

impl fmt::Display for SlippageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
