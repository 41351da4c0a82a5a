//! The Funds Transport seam.
//!
//! The ledger never moves value itself. Inbound value arrives attached to a
//! call (`deposit_bare`, `split`); outbound value leaves through a
//! [`FundsTransport`] implementation.

use splitter_types::{Amount, PartyId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{party} rejected the transfer: {reason}")]
    Rejected { party: PartyId, reason: String },

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Outbound value movement on behalf of the ledger.
///
/// `send` is synchronous: it returns once the value has moved or the
/// transfer has definitively failed. The recipient may run arbitrary logic
/// on receipt, including calling back into the ledger before `send`
/// returns, so the ledger never holds its state lock across this call.
pub trait FundsTransport: Send + Sync {
    fn send(&self, to: &PartyId, amount: Amount) -> Result<(), TransferError>;
}
