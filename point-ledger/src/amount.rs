//! Fixed-point arithmetic for STAR points, XLM and token allocations
//!
//! Points are kept at 2 decimal places, XLM and token quantities at 7 (the
//! Stellar stroop). Rounding is half away from zero everywhere.

use crate::error::{LedgerError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places of a STAR point quantity
pub const POINT_SCALE: u32 = 2;

/// Decimal places of an XLM or token quantity
pub const XLM_SCALE: u32 = 7;

/// Largest rounding error tolerated when an amount is snapped to cents
pub const PRECISION_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

/// Exclusive upper bound of an XLM quantity: 13 integer digits, the range of
/// a `NUMERIC(20,7)` column
pub const MAX_XLM_AMOUNT: Decimal = Decimal::from_parts(1_316_134_912, 2_328, 0, false, 0);

/// Exclusive upper bound of a STAR quantity: 18 integer digits, the range of
/// a `NUMERIC(20,2)` column
pub const MAX_POINT_AMOUNT: Decimal =
    Decimal::from_parts(2_808_348_672, 232_830_643, 0, false, 0);

/// Exclusive upper bound of a token supply: 23 integer digits, the range of
/// a `NUMERIC(30,7)` column
pub const MAX_TOKEN_SUPPLY: Decimal =
    Decimal::from_parts(4_135_583_744, 46_653_770, 5_421, false, 0);

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

fn overflow(what: &str) -> LedgerError {
    LedgerError::Validation(format!("{} is out of range", what))
}

/// Round a point quantity to cents
pub fn round_points(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(POINT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round an XLM or token quantity to stroops
pub fn round_xlm(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(XLM_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate a burn amount and return it snapped to cents.
///
/// Rejects non-positive amounts and amounts whose distance from the nearest
/// cent exceeds [`PRECISION_EPSILON`]. `10.005` is rejected, `10.00` passes.
pub fn validate_burn_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(
            "Burn amount must be a positive finite number".to_string(),
        ));
    }

    if amount >= MAX_POINT_AMOUNT {
        return Err(overflow("Burn amount"));
    }

    let rounded = round_points(amount);
    if (amount - rounded).abs() > PRECISION_EPSILON {
        return Err(LedgerError::Validation(
            "Burn amount can have at most 2 decimal places".to_string(),
        ));
    }

    if rounded <= Decimal::ZERO {
        return Err(LedgerError::Validation(
            "Burn amount rounds to zero".to_string(),
        ));
    }

    Ok(rounded)
}

/// Validate an XLM amount (positive, below [`MAX_XLM_AMOUNT`], at most 7
/// decimal places)
pub fn validate_xlm_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(
            "XLM amount must be positive".to_string(),
        ));
    }

    if amount >= MAX_XLM_AMOUNT {
        return Err(overflow("XLM amount"));
    }

    if amount.normalize().scale() > XLM_SCALE {
        return Err(LedgerError::Validation(format!(
            "XLM amount can have at most {} decimal places",
            XLM_SCALE
        )));
    }

    Ok(amount)
}

/// Points awarded for minting `xlm_amount` at `rate` STAR per XLM
pub fn mint_points(xlm_amount: Decimal, rate: Decimal) -> Result<Decimal> {
    let points = xlm_amount
        .checked_mul(rate)
        .map(round_points)
        .ok_or_else(|| overflow("Minted amount"))?;
    if points >= MAX_POINT_AMOUNT {
        return Err(overflow("Minted amount"));
    }
    Ok(points)
}

/// Outcome of splitting a burn between destruction and the project creator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnSplit {
    /// Points removed from circulation
    pub destroyed: Decimal,
    /// Points routed to the creator-earnings counter
    pub to_creator: Decimal,
}

/// Split a validated burn amount.
///
/// Each half is rounded independently, so for odd cent amounts the halves do
/// not re-sum to the input: burning `0.01` yields `0.01` destroyed and `0.01`
/// to the creator. Downstream project totals are built on this behaviour.
pub fn split_burn(amount: Decimal, destroy_share: Decimal) -> BurnSplit {
    BurnSplit {
        destroyed: round_points(amount * destroy_share),
        to_creator: round_points(amount * (Decimal::ONE - destroy_share)),
    }
}

/// Tokens reserved for the airdrop out of `total_supply`
pub fn airdrop_tokens(total_supply: Decimal, airdrop_percent: Decimal) -> Result<Decimal> {
    total_supply
        .checked_mul(airdrop_percent)
        .and_then(|v| v.checked_div(HUNDRED))
        .map(round_xlm)
        .ok_or_else(|| overflow("Airdrop supply"))
}

/// Share of a project's burns attributed to one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Percentage of all burned points (4 decimal places)
    pub percentage: Decimal,
    /// Airdrop tokens owed (7 decimal places)
    pub token_allocation: Decimal,
}

/// Proportional airdrop allocation: `(wallet / total) * airdrop`.
///
/// The share is taken first so the product stays within the airdrop.
/// Returns `Ok(None)` when nothing has been burned.
pub fn allocation(
    wallet_burned: Decimal,
    total_burned: Decimal,
    airdrop: Decimal,
) -> Result<Option<Allocation>> {
    if total_burned <= Decimal::ZERO {
        return Ok(None);
    }

    let share = wallet_burned
        .checked_div(total_burned)
        .ok_or_else(|| overflow("Burn share"))?;
    let percentage = share
        .checked_mul(HUNDRED)
        .ok_or_else(|| overflow("Burn share"))?
        .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
    let token_allocation = airdrop
        .checked_mul(share)
        .map(round_xlm)
        .ok_or_else(|| overflow("Token allocation"))?;

    Ok(Some(Allocation {
        percentage,
        token_allocation,
    }))
}

/// Normalized airdrop / liquidity / creator percentages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationPercents {
    /// Airdrop percentage
    pub airdrop: Decimal,
    /// Liquidity percentage
    pub liquidity: Decimal,
    /// Creator percentage (remainder to 100)
    pub creator: Decimal,
}

/// Normalize requested percentages.
///
/// Each input must lie in `0..=100`. When airdrop + liquidity exceeds 100
/// both are rescaled proportionally so they sum to 80; the creator keeps the
/// remainder.
pub fn normalize_percents(airdrop: Decimal, liquidity: Decimal) -> Result<AllocationPercents> {
    if airdrop < Decimal::ZERO || liquidity < Decimal::ZERO {
        return Err(LedgerError::Validation(
            "Allocation percentages must be non-negative".to_string(),
        ));
    }

    if airdrop > HUNDRED || liquidity > HUNDRED {
        return Err(LedgerError::Validation(
            "Allocation percentages cannot exceed 100".to_string(),
        ));
    }

    let total = airdrop
        .checked_add(liquidity)
        .ok_or_else(|| overflow("Allocation percentage"))?;
    let (airdrop, liquidity) = if total > HUNDRED {
        let cap = Decimal::from(80);
        (
            round_points(airdrop / total * cap),
            round_points(liquidity / total * cap),
        )
    } else {
        (airdrop, liquidity)
    };

    let creator = HUNDRED - airdrop - liquidity;
    if creator < Decimal::ZERO {
        return Err(LedgerError::Validation(
            "Invalid percentage allocation after normalization".to_string(),
        ));
    }

    Ok(AllocationPercents {
        airdrop,
        liquidity,
        creator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_burn_precision() {
        assert_eq!(validate_burn_amount(dec!(10.00)).unwrap(), dec!(10.00));
        assert!(matches!(
            validate_burn_amount(dec!(10.005)),
            Err(LedgerError::Validation(_))
        ));
        // Within epsilon of a cent
        assert_eq!(validate_burn_amount(dec!(10.0004)).unwrap(), dec!(10.00));
        assert!(validate_burn_amount(dec!(0)).is_err());
        assert!(validate_burn_amount(dec!(-5)).is_err());
        assert!(validate_burn_amount(dec!(0.0004)).is_err());
    }

    #[test]
    fn test_split_even_amount() {
        let split = split_burn(dec!(100.00), dec!(0.5));
        assert_eq!(split.destroyed, dec!(50.00));
        assert_eq!(split.to_creator, dec!(50.00));
    }

    #[test]
    fn test_split_odd_cent_rounds_each_half_up() {
        let split = split_burn(dec!(0.01), dec!(0.5));
        assert_eq!(split.destroyed, dec!(0.01));
        assert_eq!(split.to_creator, dec!(0.01));

        let split = split_burn(dec!(10.15), dec!(0.5));
        assert_eq!(split.destroyed, dec!(5.08));
        assert_eq!(split.to_creator, dec!(5.08));
    }

    #[test]
    fn test_mint_points() {
        assert_eq!(mint_points(dec!(12.5), dec!(10)).unwrap(), dec!(125.00));
        assert_eq!(mint_points(dec!(0.0000001), dec!(10)).unwrap(), dec!(0.00));
    }

    #[test]
    fn test_mint_points_overflow_is_rejected() {
        assert!(matches!(
            mint_points(Decimal::MAX, dec!(10)),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            mint_points(dec!(9999999999999), Decimal::MAX),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn test_bounds_match_column_ranges() {
        assert_eq!(MAX_XLM_AMOUNT, dec!(10000000000000));
        assert_eq!(MAX_POINT_AMOUNT, dec!(1000000000000000000));
        assert_eq!(MAX_TOKEN_SUPPLY, dec!(100000000000000000000000));
    }

    #[test]
    fn test_xlm_precision() {
        assert!(validate_xlm_amount(dec!(1.0000001)).is_ok());
        assert!(validate_xlm_amount(dec!(1.00000001)).is_err());
        assert!(validate_xlm_amount(dec!(1.50000000)).is_ok());
        assert!(validate_xlm_amount(Decimal::ZERO).is_err());
    }

    #[test]
    fn test_xlm_upper_bound() {
        assert!(validate_xlm_amount(dec!(9999999999999.9999999)).is_ok());
        assert!(validate_xlm_amount(dec!(10000000000000)).is_err());
        assert!(matches!(
            validate_xlm_amount(Decimal::MAX),
            Err(LedgerError::Validation(_))
        ));
        assert!(validate_burn_amount(Decimal::MAX).is_err());
    }

    #[test]
    fn test_allocation() {
        let airdrop = airdrop_tokens(dec!(1000000), dec!(20)).unwrap();
        assert_eq!(airdrop, dec!(200000));

        let a = allocation(dec!(25), dec!(100), airdrop).unwrap().unwrap();
        assert_eq!(a.percentage, dec!(25));
        assert_eq!(a.token_allocation, dec!(50000));

        let third = allocation(dec!(1), dec!(3), airdrop).unwrap().unwrap();
        assert_eq!(third.percentage, dec!(33.3333));
        assert_eq!(third.token_allocation, dec!(66666.6666667));

        assert!(allocation(dec!(0), dec!(0), airdrop).unwrap().is_none());
    }

    #[test]
    fn test_allocation_at_largest_supply() {
        let supply = MAX_TOKEN_SUPPLY - Decimal::ONE;
        let airdrop = airdrop_tokens(supply, dec!(100)).unwrap();
        assert_eq!(airdrop, supply);

        let a = allocation(dec!(999999999999999999.99), dec!(999999999999999999.99), airdrop)
            .unwrap()
            .unwrap();
        assert_eq!(a.token_allocation, supply);
        assert_eq!(a.percentage, dec!(100));
    }

    #[test]
    fn test_normalize_percents() {
        let p = normalize_percents(dec!(20), dec!(20)).unwrap();
        assert_eq!(p.creator, dec!(60));

        let p = normalize_percents(dec!(90), dec!(30)).unwrap();
        assert_eq!(p.airdrop, dec!(60.00));
        assert_eq!(p.liquidity, dec!(20.00));
        assert_eq!(p.creator, dec!(20.00));

        assert!(normalize_percents(dec!(-1), dec!(20)).is_err());
        assert!(normalize_percents(dec!(101), dec!(0)).is_err());
        assert!(normalize_percents(Decimal::MAX, Decimal::MAX).is_err());
    }
}
