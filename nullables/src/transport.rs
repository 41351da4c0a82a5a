//! Nullable funds transport, an in-memory value bank.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use splitter_ledger::{FundsTransport, SplitterError, TransferError};
use splitter_types::{Amount, PartyId};
use thiserror::Error;

/// Logic a recipient runs when value arrives. Returning `Err` makes the
/// transfer fail and unwinds the credit.
pub type ReceiveHook = Arc<dyn Fn(&PartyId, Amount) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{party} holds {available}, cannot pay {needed}")]
    InsufficientFunds {
        party: PartyId,
        needed: Amount,
        available: Amount,
    },

    #[error(transparent)]
    Rejected(#[from] SplitterError),
}

/// A completed outbound transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentTransfer {
    pub to: PartyId,
    pub amount: Amount,
}

/// An in-memory value network for testing.
/// Thread-safe; no lock is held while receipt hooks run.
pub struct NullTransport {
    balances: Mutex<HashMap<PartyId, Amount>>,
    hooks: Mutex<HashMap<PartyId, ReceiveHook>>,
    refusing: Mutex<HashSet<PartyId>>,
    offline: AtomicBool,
    sent: Mutex<Vec<SentTransfer>>,
}

impl NullTransport {
    pub fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            hooks: Mutex::new(HashMap::new()),
            refusing: Mutex::new(HashSet::new()),
            offline: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Give a party spendable value.
    pub fn fund(&self, party: &PartyId, amount: Amount) {
        self.credit(party, amount);
    }

    pub fn balance_of(&self, party: &PartyId) -> Amount {
        self.balances
            .lock()
            .unwrap()
            .get(party)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    /// Run `hook` whenever `party` receives value. The hook runs after the
    /// value is credited and may call back into the ledger.
    pub fn on_receive(
        &self,
        party: &PartyId,
        hook: impl Fn(&PartyId, Amount) -> Result<(), String> + Send + Sync + 'static,
    ) {
        let hook: ReceiveHook = Arc::new(hook);
        self.hooks.lock().unwrap().insert(party.clone(), hook);
    }

    /// Make every transfer to `party` fail.
    pub fn refuse_transfers_to(&self, party: &PartyId) {
        self.refusing.lock().unwrap().insert(party.clone());
    }

    pub fn accept_transfers_to(&self, party: &PartyId) {
        self.refusing.lock().unwrap().remove(party);
    }

    /// While offline, every transfer fails with `TransferError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// All completed outbound transfers, in completion order.
    pub fn sent(&self) -> Vec<SentTransfer> {
        self.sent.lock().unwrap().clone()
    }

    pub fn total_sent_to(&self, party: &PartyId) -> Amount {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|t| &t.to == party)
            .map(|t| t.amount)
            .sum()
    }

    /// Attach `value` from `from` to a ledger call.
    ///
    /// The payer must hold `value`. It is debited before `call` runs, so
    /// concurrent payments cannot spend the same balance twice, and refunded
    /// if the call is rejected.
    pub fn pay<T>(
        &self,
        from: &PartyId,
        value: Amount,
        call: impl FnOnce() -> Result<T, SplitterError>,
    ) -> Result<T, PaymentError> {
        self.debit(from, value)?;
        call().map_err(|err| {
            self.credit(from, value);
            PaymentError::Rejected(err)
        })
    }

    fn credit(&self, party: &PartyId, amount: Amount) {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry(party.clone()).or_insert(Amount::ZERO);
        *entry = entry.saturating_add(amount);
    }

    fn debit(&self, party: &PartyId, amount: Amount) -> Result<(), PaymentError> {
        let mut balances = self.balances.lock().unwrap();
        let available = balances.get(party).copied().unwrap_or(Amount::ZERO);
        let remaining = available
            .checked_sub(amount)
            .ok_or_else(|| PaymentError::InsufficientFunds {
                party: party.clone(),
                needed: amount,
                available,
            })?;
        balances.insert(party.clone(), remaining);
        Ok(())
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FundsTransport for NullTransport {
    fn send(&self, to: &PartyId, amount: Amount) -> Result<(), TransferError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransferError::Unavailable("null transport is offline".into()));
        }
        if self.refusing.lock().unwrap().contains(to) {
            return Err(TransferError::Rejected {
                party: to.clone(),
                reason: "recipient refuses transfers".into(),
            });
        }

        self.credit(to, amount);
        let hook = self.hooks.lock().unwrap().get(to).cloned();
        if let Some(hook) = hook {
            if let Err(reason) = hook(to, amount) {
                if let Err(err) = self.debit(to, amount) {
                    tracing::warn!(party = %to, %amount, error = %err, "could not unwind reverted transfer");
                }
                tracing::debug!(party = %to, %amount, %reason, "receipt hook reverted transfer");
                return Err(TransferError::Rejected {
                    party: to.clone(),
                    reason,
                });
            }
        }
        self.sent.lock().unwrap().push(SentTransfer {
            to: to.clone(),
            amount,
        });
        Ok(())
    }
}
