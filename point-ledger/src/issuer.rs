//! Token issuance port
//!
//! Finalizing a project issues its token on-chain. The ledger only needs the
//! issuer account back; building and submitting the Stellar transactions is
//! the collaborator's business.

use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{info, warn};

/// Parameters of a token issuance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenIssueParams {
    pub name: String,
    pub symbol: String,
    pub decimals: i32,
    pub total_supply: Decimal,
    pub mintable: bool,
    pub burnable: bool,
    /// Account receiving the supply
    pub distributor_public_key: String,
}

/// Result of a successful issuance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// Issuing account
    pub issuer_public_key: String,
    /// Asset code as issued
    pub asset_code: String,
}

/// Issues tokens on the external chain
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issue the token or fail; never partially succeeds from the caller's view
    async fn issue_token(&self, params: &TokenIssueParams) -> Result<IssuedToken>;
}

/// Deterministic issuer for tests and local runs.
///
/// Derives a Stellar-looking account id from the parameters.
#[derive(Debug, Default)]
pub struct MockTokenIssuer {
    fail: AtomicBool,
    issued: AtomicUsize,
    last: Mutex<Option<TokenIssueParams>>,
}

impl MockTokenIssuer {
    /// Issuer that succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent issuances fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of successful issuances
    pub fn issued_count(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Parameters of the most recent successful issuance
    pub fn last_issued(&self) -> Option<TokenIssueParams> {
        self.last.lock().clone()
    }

    fn derive_key(params: &TokenIssueParams) -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

        let mut hasher = Sha256::new();
        hasher.update(params.symbol.as_bytes());
        hasher.update(params.name.as_bytes());
        hasher.update(params.total_supply.to_string().as_bytes());
        hasher.update(params.distributor_public_key.as_bytes());
        let digest = hasher.finalize();

        let mut key = String::with_capacity(56);
        key.push('G');
        for i in 0..55 {
            let byte = digest[i % digest.len()] ^ (i as u8);
            key.push(ALPHABET[(byte % 32) as usize] as char);
        }
        key
    }
}

#[async_trait]
impl TokenIssuer for MockTokenIssuer {
    async fn issue_token(&self, params: &TokenIssueParams) -> Result<IssuedToken> {
        if self.fail.load(Ordering::SeqCst) {
            warn!("Mock issuer: simulated issuance failure for {}", params.symbol);
            return Err(LedgerError::Storage(
                "Token issuance failed: simulated failure".to_string(),
            ));
        }

        let issuer_public_key = Self::derive_key(params);
        self.issued.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(params.clone());
        info!(
            "Mock issuer: issued {} {} to {}",
            params.total_supply, params.symbol, params.distributor_public_key
        );

        Ok(IssuedToken {
            issuer_public_key,
            asset_code: params.symbol.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> TokenIssueParams {
        TokenIssueParams {
            name: "Nova".into(),
            symbol: "NOVA".into(),
            decimals: 7,
            total_supply: dec!(1000000),
            mintable: true,
            burnable: false,
            distributor_public_key: "GDIST".into(),
        }
    }

    #[tokio::test]
    async fn test_mock_issuer_is_deterministic() {
        let issuer = MockTokenIssuer::new();
        let a = issuer.issue_token(&params()).await.unwrap();
        let b = issuer.issue_token(&params()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.issuer_public_key.len(), 56);
        assert!(a.issuer_public_key.starts_with('G'));
        assert_eq!(issuer.issued_count(), 2);
        assert_eq!(issuer.last_issued(), Some(params()));
    }

    #[tokio::test]
    async fn test_mock_issuer_failure() {
        let issuer = MockTokenIssuer::new();
        issuer.set_failing(true);
        assert!(issuer.issue_token(&params()).await.is_err());
        assert_eq!(issuer.issued_count(), 0);
        assert!(issuer.last_issued().is_none());
    }
}
