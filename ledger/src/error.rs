use splitter_types::{Amount, PartyId};
use thiserror::Error;

use crate::transport::TransferError;

#[derive(Debug, Error)]
pub enum SplitterError {
    #[error("{caller} is not permitted to {operation}")]
    Unauthorized {
        caller: PartyId,
        operation: &'static str,
    },

    #[error("ledger is inactive")]
    LedgerInactive,

    #[error("amount {amount} cannot be split into two nonzero shares")]
    AmountTooSmall { amount: Amount },

    #[error("{party} has nothing to withdraw")]
    NothingToWithdraw { party: PartyId },

    #[error("transfer of {amount} to {party} failed")]
    TransferFailed {
        party: PartyId,
        amount: Amount,
        #[source]
        source: TransferError,
    },

    #[error("deactivation blocked: {pending} still owed to parties")]
    PendingCreditsOutstanding { pending: Amount },

    #[error("amount overflow while crediting {amount}")]
    AmountOverflow { amount: Amount },

    #[error("config error: {0}")]
    Config(String),
}
