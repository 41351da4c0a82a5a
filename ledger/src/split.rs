//! The two-way split rule.

use serde::{Deserialize, Serialize};
use splitter_types::Amount;

use crate::error::SplitterError;

/// Smallest deposit that yields two nonzero shares.
pub const MIN_SPLIT_AMOUNT: Amount = Amount::new(2);

/// The two credits produced by one deposit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitShares {
    /// Credited to the first recipient; carries any odd remainder.
    pub first: Amount,
    pub second: Amount,
}

/// Divide `amount` between two recipients.
///
/// `second = floor(amount / 2)` and `first = amount - second`, so the shares
/// always sum to `amount` and the first recipient gets the odd unit.
pub fn split_amount(amount: Amount) -> Result<SplitShares, SplitterError> {
    if amount < MIN_SPLIT_AMOUNT {
        return Err(SplitterError::AmountTooSmall { amount });
    }
    let (first, second) = amount.halves();
    Ok(SplitShares { first, second })
}
