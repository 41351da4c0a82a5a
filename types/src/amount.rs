//! Value amounts.
//!
//! Amounts are fixed-point integers (u128) in the smallest indivisible unit.
//! Splitting and crediting never touch floating point.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// An amount of value in raw units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Divide into two parts whose sum is exactly `self`.
    ///
    /// The first part carries the odd remainder: `(ceil(n/2), floor(n/2))`.
    pub fn halves(self) -> (Self, Self) {
        let second = self.0 / 2;
        (Self(self.0 - second), Self(second))
    }
}

impl From<u64> for Amount {
    fn from(raw: u64) -> Self {
        Self(raw as u128)
    }
}

/// Saturating sum; ledger totals are bounded by custody so this never clips
/// in a consistent state.
impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
