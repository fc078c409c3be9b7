use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serialises passes per wallet.
///
/// The scoring, monitor and rebalance loops run concurrently; a wallet's
/// monitor tick and its weekly rebalance must not both plan trades from the
/// same positions. Different wallets never contend.
#[derive(Clone, Default)]
pub struct WalletLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, wallet: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().await;
        map.entry(wallet.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `wallet`. Released when the guard drops.
    pub async fn lock(&self, wallet: &str) -> OwnedMutexGuard<()> {
        let slot = self.slot(wallet).await;
        let guard = slot.lock_owned().await;
        tracing::debug!(wallet = %wallet, "Wallet lock acquired");
        guard
    }

    /// Take the lock only if no other pass holds it.
    pub async fn try_lock(&self, wallet: &str) -> Option<OwnedMutexGuard<()>> {
        let slot = self.slot(wallet).await;
        match slot.try_lock_owned() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::debug!(wallet = %wallet, "Wallet busy");
                None
            }
        }
    }

    /// Number of wallets seen so far.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_wallet_is_exclusive() {
        let locks = WalletLocks::new();
        let guard = locks.lock("5Fwallet").await;
        assert!(locks.try_lock("5Fwallet").await.is_none());
        drop(guard);
        assert!(locks.try_lock("5Fwallet").await.is_some());
    }

    #[tokio::test]
    async fn test_wallets_are_independent() {
        let locks = WalletLocks::new();
        let _a = locks.lock("5Fa").await;
        assert!(locks.try_lock("5Fb").await.is_some());
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let locks = WalletLocks::new();
        let other = locks.clone();
        let _guard = locks.lock("5Fwallet").await;
        assert!(other.try_lock("5Fwallet").await.is_none());
    }
}
