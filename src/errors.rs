/// Errors that abort a pass. Per-pool data problems and constraint
/// violations are reported as data and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("Viability config unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type StrategyResult<T> = Result<T, StrategyError>;
