//! Fundamental types for the splitter ledger.
//!
//! This crate defines the types shared by every other crate in the workspace:
//! party identities and value amounts.

pub mod amount;
pub mod error;
pub mod party;

pub use amount::Amount;
pub use error::TypesError;
pub use party::PartyId;
