//! Amounts of the ledger's native asset.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AmountError;

/// Drops per whole unit of the native asset.
pub const DROPS_PER_XRP: u64 = 1_000_000;

/// Maximum number of fractional digits a native amount can carry.
pub const MAX_FRACTION_DIGITS: u32 = 6;

/// An amount in drops, the smallest unit of the native asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Drops(u64);

impl Drops {
    pub fn new(drops: u64) -> Self {
        Self(drops)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// The same amount in whole units, e.g. `25000000` drops -> `25`.
    pub fn to_xrp(&self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(DROPS_PER_XRP)
    }

    /// Converts whole units to drops, refusing anything finer than one drop.
    pub fn from_xrp(value: Decimal) -> Result<Self, AmountError> {
        let value = value.normalize();
        if value.scale() > MAX_FRACTION_DIGITS {
            return Err(AmountError::TooPrecise(MAX_FRACTION_DIGITS));
        }
        value
            .checked_mul(Decimal::from(DROPS_PER_XRP))
            .and_then(|d| d.to_u64())
            .map(Self)
            .ok_or(AmountError::Overflow)
    }
}

impl std::fmt::Display for Drops {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Drops {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Parses a decimal amount in whole units and checks it against `ceiling`.
///
/// Accepts at most [`MAX_FRACTION_DIGITS`] significant fractional digits;
/// the amount must be strictly positive and not above `ceiling`.
pub fn parse_amount(amount: &str, ceiling: Decimal) -> Result<(Decimal, Drops), AmountError> {
    let value =
        Decimal::from_str(amount).map_err(|_| AmountError::NotANumber(amount.to_string()))?;
    let value = value.normalize();

    if value <= Decimal::ZERO {
        return Err(AmountError::NonPositive);
    }
    if value > ceiling {
        return Err(AmountError::AboveCeiling(ceiling.normalize().to_string()));
    }
    let drops = Drops::from_xrp(value)?;
    Ok((value, drops))
}
