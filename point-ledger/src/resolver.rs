//! Wallet resolution: external address to internal wallet identity

use crate::error::{LedgerError, Result};
use crate::store::LedgerStore;
use crate::types::Wallet;
use std::sync::Arc;
use tracing::debug;

/// Longest address accepted. Stellar account ids are 56 characters, muxed
/// accounts 69.
const MAX_ADDRESS_LEN: usize = 128;

/// Normalize and validate an external wallet address
pub fn normalize_address(address: &str) -> Result<&str> {
    let address = address.trim();
    if address.is_empty() {
        return Err(LedgerError::Validation(
            "Wallet address is required".to_string(),
        ));
    }

    if address.len() > MAX_ADDRESS_LEN || address.chars().any(|c| !c.is_ascii_alphanumeric()) {
        return Err(LedgerError::Validation(format!(
            "Invalid wallet address: {}",
            address
        )));
    }

    Ok(address)
}

/// Maps addresses to wallets, creating them on first sight
#[derive(Clone)]
pub struct WalletResolver {
    store: Arc<dyn LedgerStore>,
}

impl WalletResolver {
    /// Resolver over `store`
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Existing or newly created wallet for `address`.
    ///
    /// The wallet and its zero balance are created by one conflict-tolerant
    /// upsert, so there is never a wallet without a balance row.
    pub async fn resolve(&self, address: &str) -> Result<Wallet> {
        let address = normalize_address(address)?;
        let wallet = self.store.upsert_wallet(address).await?;
        debug!(wallet_id = %wallet.id, address, "Resolved wallet");
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("  GABC  ").unwrap(), "GABC");
        assert!(normalize_address("").is_err());
        assert!(normalize_address("   ").is_err());
        assert!(normalize_address("G ABC").is_err());
        assert!(normalize_address(&"G".repeat(129)).is_err());
    }

    #[tokio::test]
    async fn test_resolve_creates_once() {
        let store = Arc::new(MemoryStore::new());
        let resolver = WalletResolver::new(store.clone());

        assert!(store.find_wallet("GNEW").await.unwrap().is_none());
        let first = resolver.resolve("GNEW").await.unwrap();
        let second = resolver.resolve(" GNEW ").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.wallet_count(), 1);
        assert_eq!(store.balance_count(), 1);
        assert!(store.find_wallet("GNEW").await.unwrap().is_some());
    }
}
