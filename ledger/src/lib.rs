//! Value-splitting escrow ledger.
//!
//! A single owner routes deposits into the ledger; each deposit is split
//! between two recipients as withdrawable credit. Recipients pull their
//! credit through [`SplitLedger::withdraw`]; the owner may permanently
//! deactivate the ledger, which returns custody to the owner.
//!
//! Value leaves the ledger only through a [`FundsTransport`]. Every accepted
//! operation appends a [`LedgerEvent`] to an append-only history that
//! observers can [`replay`] to cross-check live state.

pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod replay;
pub mod snapshot;
pub mod split;
pub mod transport;

pub use config::{DeactivationPolicy, LedgerConfig, SplitPolicy};
pub use error::SplitterError;
pub use event::{EventBus, LedgerEvent};
pub use ledger::{DeactivationReceipt, LedgerStatus, SplitLedger, SplitReceipt, WithdrawReceipt};
pub use replay::{replay, ReplayError, ReplayedLedger};
pub use snapshot::LedgerSnapshot;
pub use split::{split_amount, SplitShares, MIN_SPLIT_AMOUNT};
pub use transport::{FundsTransport, TransferError};
