//! The split ledger state machine.
//!
//! All mutable state sits behind one mutex, so every operation is a
//! whole-ledger serialized transaction. The only point where control leaves
//! the ledger is an outbound transfer; that call is made with the lock
//! released and after the state change it pays for has been committed.
//!
//! Events are published in the order their state changes were committed.
//! A withdrawal takes its place in that order when its credit is reserved,
//! so events committed while its transfer is running wait behind it.
//! Listeners are handed events after the state lock is dropped and may read
//! or call back into the ledger.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use splitter_types::{Amount, PartyId};

use crate::config::{DeactivationPolicy, LedgerConfig, SplitPolicy};
use crate::error::SplitterError;
use crate::event::{EventBus, LedgerEvent};
use crate::snapshot::LedgerSnapshot;
use crate::split::{split_amount, SplitShares};
use crate::transport::FundsTransport;

/// Lifecycle of a ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerStatus {
    Active,
    /// Deactivation accepted; residual custody is being forwarded to the
    /// owner. Reverts to `Active` only if that transfer fails.
    Closing,
    /// Terminal.
    Inactive,
}

/// Outcome of an accepted deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitReceipt {
    pub payer: PartyId,
    pub recipient_a: PartyId,
    pub recipient_b: PartyId,
    pub amount: Amount,
    pub shares: SplitShares,
}

/// Outcome of a completed withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub party: PartyId,
    pub amount: Amount,
}

/// Outcome of a completed deactivation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivationReceipt {
    pub owner: PartyId,
    pub returned: Amount,
    pub forfeited: Amount,
}

enum Slot {
    /// A withdrawal whose transfer has not returned.
    Reserved,
    Recorded(LedgerEvent),
    /// The reserved withdrawal failed; nothing to publish.
    Void,
}

struct LedgerState {
    status: LedgerStatus,
    /// Only nonzero credits are stored.
    credits: BTreeMap<PartyId, Amount>,
    custody: Amount,
    /// Debited from `credits` but not yet confirmed sent.
    in_flight: Amount,
    /// Published events, in commit order.
    history: Vec<LedgerEvent>,
    next_seq: u64,
    /// Slots waiting on an earlier reservation.
    unpublished: BTreeMap<u64, Slot>,
    /// Prefix of `history` already handed to listeners.
    delivered: usize,
}

impl LedgerState {
    fn ensure_active(&self) -> Result<(), SplitterError> {
        match self.status {
            LedgerStatus::Active => Ok(()),
            LedgerStatus::Closing | LedgerStatus::Inactive => Err(SplitterError::LedgerInactive),
        }
    }

    fn credit_of(&self, party: &PartyId) -> Amount {
        self.credits.get(party).copied().unwrap_or(Amount::ZERO)
    }

    fn total_credits(&self) -> Amount {
        self.credits.values().sum()
    }

    fn is_solvent(&self) -> bool {
        self.total_credits().saturating_add(self.in_flight) <= self.custody
    }

    fn record(&mut self, event: LedgerEvent) {
        let seq = self.reserve();
        self.resolve(seq, Slot::Recorded(event));
    }

    /// Claim the next position in the history for an event not known yet.
    fn reserve(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.unpublished.insert(seq, Slot::Reserved);
        seq
    }

    /// Fill a reserved position, then publish every leading slot that is no
    /// longer reserved.
    fn resolve(&mut self, seq: u64, slot: Slot) {
        self.unpublished.insert(seq, slot);
        while let Some(entry) = self.unpublished.first_entry() {
            if matches!(entry.get(), Slot::Reserved) {
                break;
            }
            if let Slot::Recorded(event) = entry.remove() {
                self.history.push(event);
            }
        }
    }

    /// Take `amount` into custody and credit both recipients. Nothing is
    /// mutated unless every step succeeds.
    fn credit_split(
        &mut self,
        payer: &PartyId,
        recipient_a: &PartyId,
        recipient_b: &PartyId,
        amount: Amount,
    ) -> Result<SplitShares, SplitterError> {
        let shares = split_amount(amount)?;
        let overflow = || SplitterError::AmountOverflow { amount };

        let custody = self.custody.checked_add(amount).ok_or_else(overflow)?;
        let credit_a = self
            .credit_of(recipient_a)
            .checked_add(shares.first)
            .ok_or_else(overflow)?;
        let base_b = if recipient_a == recipient_b {
            credit_a
        } else {
            self.credit_of(recipient_b)
        };
        let credit_b = base_b.checked_add(shares.second).ok_or_else(overflow)?;

        self.custody = custody;
        self.credits.insert(recipient_a.clone(), credit_a);
        self.credits.insert(recipient_b.clone(), credit_b);
        self.record(LedgerEvent::Split {
            payer: payer.clone(),
            recipient_a: recipient_a.clone(),
            recipient_b: recipient_b.clone(),
            amount,
        });
        debug_assert!(self.is_solvent());
        Ok(shares)
    }
}

/// A two-way value-splitting escrow ledger.
pub struct SplitLedger {
    owner: PartyId,
    recipient_a: PartyId,
    recipient_b: PartyId,
    split_policy: SplitPolicy,
    deactivation: DeactivationPolicy,
    transport: Arc<dyn FundsTransport>,
    state: Mutex<LedgerState>,
    /// Lock order: `bus` before `state`.
    bus: Mutex<EventBus>,
}

impl SplitLedger {
    /// Create an active ledger owned by `config.owner`, paying out through
    /// `transport`.
    pub fn new(config: &LedgerConfig, transport: Arc<dyn FundsTransport>) -> Self {
        let genesis = LedgerEvent::Initialized {
            owner: config.owner.clone(),
            recipient_a: config.recipient_a.clone(),
            recipient_b: config.recipient_b.clone(),
        };
        tracing::info!(
            owner = %config.owner,
            recipient_a = %config.recipient_a,
            recipient_b = %config.recipient_b,
            split_policy = ?config.split_policy,
            deactivation = ?config.deactivation,
            "split ledger initialized"
        );
        Self {
            owner: config.owner.clone(),
            recipient_a: config.recipient_a.clone(),
            recipient_b: config.recipient_b.clone(),
            split_policy: config.split_policy,
            deactivation: config.deactivation,
            transport,
            state: Mutex::new(LedgerState {
                status: LedgerStatus::Active,
                credits: BTreeMap::new(),
                custody: Amount::ZERO,
                in_flight: Amount::ZERO,
                history: vec![genesis],
                next_seq: 1,
                unpublished: BTreeMap::new(),
                delivered: 0,
            }),
            bus: Mutex::new(EventBus::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        // No user code runs under this lock, and every mutation is computed
        // before it is applied, so the state is consistent even if poisoned.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to notifications from genesis.
    ///
    /// The listener first receives every event already delivered, then each
    /// new event as it is published, exactly once and in history order.
    /// Must not be called from inside a listener.
    pub fn subscribe(&self, listener: impl Fn(&LedgerEvent) + Send + Sync + 'static) {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = {
            let state = self.state();
            state.history[..state.delivered].to_vec()
        };
        for event in &seen {
            listener(event);
        }
        bus.subscribe(Box::new(listener));
        drop(bus);
        self.deliver();
    }

    /// Hand published events to listeners with the state lock released.
    ///
    /// Whoever holds the bus drains the backlog. A caller that finds it busy,
    /// including a listener calling back into the ledger, leaves its events
    /// to the holder.
    fn deliver(&self) {
        loop {
            let bus = match self.bus.try_lock() {
                Ok(bus) => bus,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while let Some(event) = self.next_undelivered() {
                bus.emit(&event);
            }
            drop(bus);

            // Events published after the drain but before the bus was
            // released were left to us by their callers.
            let state = self.state();
            if state.delivered == state.history.len() {
                return;
            }
        }
    }

    fn next_undelivered(&self) -> Option<LedgerEvent> {
        let mut state = self.state();
        let event = state.history.get(state.delivered).cloned()?;
        state.delivered += 1;
        Some(event)
    }

    /// A plain value transfer with no operation selected.
    ///
    /// Only the owner may send value this way; it is split between the two
    /// recipients bound at construction. From anyone else the value is
    /// refused.
    pub fn deposit_bare(
        &self,
        caller: &PartyId,
        value: Amount,
    ) -> Result<SplitReceipt, SplitterError> {
        let shares = {
            let mut state = self.state();
            state.ensure_active()?;
            if *caller != self.owner {
                tracing::warn!(caller = %caller, amount = %value, "refused unsolicited deposit");
                return Err(SplitterError::Unauthorized {
                    caller: caller.clone(),
                    operation: "deposit",
                });
            }
            state.credit_split(caller, &self.recipient_a, &self.recipient_b, value)?
        };
        self.deliver();
        tracing::debug!(
            payer = %caller,
            amount = %value,
            first = %shares.first,
            second = %shares.second,
            "bare deposit split"
        );
        Ok(SplitReceipt {
            payer: caller.clone(),
            recipient_a: self.recipient_a.clone(),
            recipient_b: self.recipient_b.clone(),
            amount: value,
            shares,
        })
    }

    /// Split the attached `value` between two named recipients.
    pub fn split(
        &self,
        caller: &PartyId,
        recipient_a: &PartyId,
        recipient_b: &PartyId,
        value: Amount,
    ) -> Result<SplitReceipt, SplitterError> {
        let shares = {
            let mut state = self.state();
            state.ensure_active()?;
            if self.split_policy == SplitPolicy::OwnerOnly && *caller != self.owner {
                tracing::warn!(caller = %caller, amount = %value, "refused split from non-owner");
                return Err(SplitterError::Unauthorized {
                    caller: caller.clone(),
                    operation: "split",
                });
            }
            state.credit_split(caller, recipient_a, recipient_b, value)?
        };
        self.deliver();
        tracing::debug!(
            payer = %caller,
            recipient_a = %recipient_a,
            recipient_b = %recipient_b,
            amount = %value,
            "split accepted"
        );
        Ok(SplitReceipt {
            payer: caller.clone(),
            recipient_a: recipient_a.clone(),
            recipient_b: recipient_b.clone(),
            amount: value,
            shares,
        })
    }

    /// Pay the caller its full outstanding credit.
    ///
    /// The credit is zeroed and reserved before the transfer is issued, so a
    /// nested `withdraw` from the recipient's receipt logic finds nothing to
    /// withdraw. If the transfer fails the credit is restored.
    ///
    /// The `Withdrawn` event is ordered at the reservation, so it always
    /// carries the party's whole credit at that point in the history.
    pub fn withdraw(&self, caller: &PartyId) -> Result<WithdrawReceipt, SplitterError> {
        let (amount, seq) = {
            let mut state = self.state();
            state.ensure_active()?;
            let amount = state.credit_of(caller);
            if amount.is_zero() {
                return Err(SplitterError::NothingToWithdraw {
                    party: caller.clone(),
                });
            }
            state.credits.remove(caller);
            state.in_flight = state.in_flight.saturating_add(amount);
            (amount, state.reserve())
        };

        let outcome = self.transport.send(caller, amount);

        let result = {
            let mut state = self.state();
            state.in_flight = state.in_flight.saturating_sub(amount);
            match outcome {
                Ok(()) => {
                    state.custody = state.custody.saturating_sub(amount);
                    state.resolve(
                        seq,
                        Slot::Recorded(LedgerEvent::Withdrawn {
                            party: caller.clone(),
                            amount,
                        }),
                    );
                    debug_assert!(state.is_solvent());
                    tracing::info!(party = %caller, amount = %amount, "credit withdrawn");
                    Ok(WithdrawReceipt {
                        party: caller.clone(),
                        amount,
                    })
                }
                Err(source) => {
                    let restored = state.credit_of(caller).saturating_add(amount);
                    state.credits.insert(caller.clone(), restored);
                    state.resolve(seq, Slot::Void);
                    tracing::warn!(party = %caller, amount = %amount, error = %source, "withdrawal transfer failed, credit restored");
                    Err(SplitterError::TransferFailed {
                        party: caller.clone(),
                        amount,
                        source,
                    })
                }
            }
        };
        self.deliver();
        result
    }

    /// Permanently deactivate the ledger and return custody to the owner.
    pub fn deactivate(&self, caller: &PartyId) -> Result<DeactivationReceipt, SplitterError> {
        let (residual, forfeited) = {
            let mut state = self.state();
            state.ensure_active()?;
            if *caller != self.owner {
                return Err(SplitterError::Unauthorized {
                    caller: caller.clone(),
                    operation: "deactivate",
                });
            }
            let owed = state.total_credits();
            if !state.in_flight.is_zero() {
                return Err(SplitterError::PendingCreditsOutstanding {
                    pending: owed.saturating_add(state.in_flight),
                });
            }
            if !owed.is_zero() && self.deactivation == DeactivationPolicy::RequireSettled {
                return Err(SplitterError::PendingCreditsOutstanding { pending: owed });
            }
            state.status = LedgerStatus::Closing;
            (state.custody, owed)
        };

        if !residual.is_zero() {
            if let Err(source) = self.transport.send(&self.owner, residual) {
                self.state().status = LedgerStatus::Active;
                tracing::warn!(owner = %self.owner, amount = %residual, error = %source, "residual transfer failed, ledger stays active");
                return Err(SplitterError::TransferFailed {
                    party: self.owner.clone(),
                    amount: residual,
                    source,
                });
            }
        }

        {
            let mut state = self.state();
            state.status = LedgerStatus::Inactive;
            state.custody = Amount::ZERO;
            state.credits.clear();
            state.record(LedgerEvent::Deactivated {
                owner: self.owner.clone(),
                returned: residual,
                forfeited,
            });
        }
        self.deliver();
        tracing::info!(owner = %self.owner, returned = %residual, forfeited = %forfeited, "ledger deactivated");
        Ok(DeactivationReceipt {
            owner: self.owner.clone(),
            returned: residual,
            forfeited,
        })
    }

    // ── Read-only accessors ────────────────────────────────────────────

    pub fn owner(&self) -> &PartyId {
        &self.owner
    }

    /// The pair bare deposits are split between.
    pub fn recipients(&self) -> (&PartyId, &PartyId) {
        (&self.recipient_a, &self.recipient_b)
    }

    pub fn split_policy(&self) -> SplitPolicy {
        self.split_policy
    }

    pub fn deactivation_policy(&self) -> DeactivationPolicy {
        self.deactivation
    }

    pub fn credit_of(&self, party: &PartyId) -> Amount {
        self.state().credit_of(party)
    }

    pub fn is_active(&self) -> bool {
        self.state().status == LedgerStatus::Active
    }

    pub fn status(&self) -> LedgerStatus {
        self.state().status
    }

    /// Value currently held on behalf of all parties.
    pub fn custodial_balance(&self) -> Amount {
        self.state().custody
    }

    pub fn total_credits(&self) -> Amount {
        self.state().total_credits()
    }

    /// Value reserved for withdrawals whose transfer has not returned yet.
    pub fn pending_payouts(&self) -> Amount {
        self.state().in_flight
    }

    /// Every published notification, oldest first. Events committed while a
    /// withdrawal transfer is running appear once it returns.
    pub fn history(&self) -> Vec<LedgerEvent> {
        self.state().history.clone()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state();
        LedgerSnapshot {
            owner: self.owner.clone(),
            recipient_a: self.recipient_a.clone(),
            recipient_b: self.recipient_b.clone(),
            active: state.status == LedgerStatus::Active,
            custody: state.custody,
            in_flight: state.in_flight,
            credits: state.credits.clone(),
        }
    }
}
