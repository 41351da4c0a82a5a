//! Nullable infrastructure for deterministic testing.
//!
//! The ledger's only external dependency is the Funds Transport. This crate
//! provides a test-friendly implementation that:
//! - Keeps party balances in memory
//! - Can be told to refuse, fail, or run receipt logic for chosen parties
//! - Never touches a real value network
//!
//! Usage: hand an `Arc<NullTransport>` to `SplitLedger::new` in tests and
//! simulations.

pub mod transport;

pub use transport::{NullTransport, PaymentError, ReceiveHook, SentTransfer};
