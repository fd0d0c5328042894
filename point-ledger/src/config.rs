//! Economic constants and engine tuning

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// STAR awarded per XLM minted
    pub mint_rate: Decimal,

    /// STAR credited to the referrer per claimed referral
    pub referral_reward: Decimal,

    /// One-time bonus for early wallets
    pub initial_bonus: Decimal,

    /// Number of wallets eligible for the initial bonus
    pub initial_bonus_cap: i64,

    /// STAR credited to the participant per project participation
    pub participant_reward: Decimal,

    /// STAR credited to the creator per project participation
    pub creator_reward: Decimal,

    /// Fraction of a burn that is destroyed; the rest goes to the creator
    pub burn_destroy_share: Decimal,

    /// Whether minting is open
    pub minting_active: bool,

    /// Row lock wait bound for the in-memory store (milliseconds)
    pub lock_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mint_rate: Decimal::from(10),
            referral_reward: Decimal::from(5),
            initial_bonus: Decimal::from(10),
            initial_bonus_cap: 20_000,
            participant_reward: Decimal::ONE,
            creator_reward: Decimal::ONE,
            burn_destroy_share: Decimal::new(5, 1),
            minting_active: true,
            lock_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Check the constants are usable
    pub fn validate(&self) -> Result<(), String> {
        if self.mint_rate <= Decimal::ZERO {
            return Err("mint_rate must be positive".to_string());
        }

        if self.referral_reward < Decimal::ZERO
            || self.initial_bonus < Decimal::ZERO
            || self.participant_reward < Decimal::ZERO
            || self.creator_reward < Decimal::ZERO
        {
            return Err("rewards cannot be negative".to_string());
        }

        if self.burn_destroy_share < Decimal::ZERO || self.burn_destroy_share > Decimal::ONE {
            return Err("burn_destroy_share must be within [0, 1]".to_string());
        }

        if self.initial_bonus_cap < 0 {
            return Err("initial_bonus_cap cannot be negative".to_string());
        }

        if self.lock_timeout_ms == 0 {
            return Err("lock_timeout_ms must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mint_rate, Decimal::from(10));
        assert_eq!(config.burn_destroy_share.to_string(), "0.5");
    }

    #[test]
    fn test_rejects_bad_share() {
        let config = EngineConfig {
            burn_destroy_share: Decimal::from(2),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
