pub mod constraint_monitor;
pub mod rebalance_pass;
pub mod recommendation_expiry;
pub mod scoring_pass;
pub mod snapshot_loader;
pub mod wallet_locks;

pub use wallet_locks::WalletLocks;
