//! Amount & safe arithmetic (component B): base-unit integers with checked
//! operations and fixed-point display conversion.
//!
//! Grounded in the teacher's `TxOutput { amount: u64, .. }` (Aevum-Bond
//! `bond-core/src/transaction.rs`), generalized with 128-bit accumulation so
//! summing many outputs cannot silently wrap before the final range check.

use crate::error::TxError;
use serde::{Deserialize, Serialize};

/// Base units per display unit (8 decimal places, as in Bitcoin-derived chains).
pub const BASE_UNITS_PER_COIN: u64 = 100_000_000;

/// Maximum representable amount, in base units, for any single output or sum.
pub const MAX_AMOUNT: u64 = 21_000_000 * BASE_UNITS_PER_COIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(pub u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(value: u64) -> Result<Self, TxError> {
        if value > MAX_AMOUNT {
            return Err(TxError::BadTxOutValue);
        }
        Ok(Amount(value))
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, TxError> {
        self.0
            .checked_add(other.0)
            .filter(|v| *v <= MAX_AMOUNT)
            .map(Amount)
            .ok_or(TxError::BadTxOutValue)
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, TxError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(TxError::BadTxOutValue)
    }

    /// Sums a sequence of amounts in `u128` headroom, then narrows back down
    /// with an explicit range check against `MAX_AMOUNT`.
    pub fn sum(amounts: impl IntoIterator<Item = Amount>) -> Result<Amount, TxError> {
        let mut total: u128 = 0;
        for a in amounts {
            total += a.0 as u128;
            if total > MAX_AMOUNT as u128 {
                return Err(TxError::BadTxOutValue);
            }
        }
        Ok(Amount(total as u64))
    }

    pub fn to_display_string(self) -> String {
        let whole = self.0 / BASE_UNITS_PER_COIN;
        let frac = self.0 % BASE_UNITS_PER_COIN;
        format!("{whole}.{frac:08}")
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}
