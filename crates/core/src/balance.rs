//! Raw chain balance to decimal conversion.

use rust_decimal::Decimal;

use crate::error::{DomainError, DomainResult};

/// Plancks per DOT-like unit (12 decimals).
pub const DEFAULT_DENOMINATION: u128 = 1_000_000_000_000;

/// Maps raw integer balances onto decimal token amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceConverter {
    denominator: u128,
}

impl BalanceConverter {
    /// Create a converter dividing by `denominator`.
    ///
    /// A zero denominator is rejected.
    pub fn new(denominator: u128) -> DomainResult<Self> {
        if denominator == 0 {
            return Err(DomainError::ValidationError(
                "balance denominator must be non-zero".into(),
            ));
        }
        Self::checked_decimal(denominator, denominator)?;
        Ok(Self { denominator })
    }

    pub fn denominator(&self) -> u128 {
        self.denominator
    }

    /// Convert a raw balance into token units.
    pub fn to_decimal(&self, raw: u128) -> DomainResult<Decimal> {
        let value = Self::checked_decimal(raw, self.denominator)?;
        let denominator = Self::checked_decimal(self.denominator, self.denominator)?;
        value
            .checked_div(denominator)
            .map(|d| d.normalize())
            .ok_or(DomainError::BalanceOverflow {
                raw,
                denominator: self.denominator,
            })
    }

    /// Convert a Perbill (parts per billion) into a percentage.
    pub fn perbill_to_percent(perbill: u32) -> Decimal {
        Decimal::new(i64::from(perbill), 7).normalize()
    }

    fn checked_decimal(raw: u128, denominator: u128) -> DomainResult<Decimal> {
        i128::try_from(raw)
            .ok()
            .and_then(|v| Decimal::try_from_i128_with_scale(v, 0).ok())
            .ok_or(DomainError::BalanceOverflow { raw, denominator })
    }
}

impl Default for BalanceConverter {
    fn default() -> Self {
        Self {
            denominator: DEFAULT_DENOMINATION,
        }
    }
}
