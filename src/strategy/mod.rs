pub mod engine;

pub use engine::{AssessmentSummary, MarketSnapshot, PortfolioAssessment, StrategyEngine};
