//! Rebuild ledger state from its notification history.
//!
//! An observer that subscribed from genesis can fold every event it saw
//! into a [`ReplayedLedger`] and compare the result with the live ledger's
//! snapshot, independently of live reads.

use std::collections::BTreeMap;

use splitter_types::{Amount, PartyId};
use thiserror::Error;

use crate::event::LedgerEvent;
use crate::snapshot::LedgerSnapshot;
use crate::split::split_amount;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("history is empty or does not start with an initialized event")]
    MissingGenesis,

    #[error("event {index} re-initializes the ledger")]
    DuplicateGenesis { index: usize },

    #[error("event {index} ({kind}) follows deactivation")]
    AfterDeactivation { index: usize, kind: &'static str },

    #[error("event {index} splits an unsplittable amount {amount}")]
    Unsplittable { index: usize, amount: Amount },

    #[error("event {index} withdraws {amount} for {party} but only {credit} is owed")]
    Overdrawn {
        index: usize,
        party: PartyId,
        amount: Amount,
        credit: Amount,
    },

    #[error("event {index} withdraws {amount} for {party} but the whole credit was {credit}")]
    PartialWithdrawal {
        index: usize,
        party: PartyId,
        amount: Amount,
        credit: Amount,
    },

    #[error("event {index} returns {returned} but custody was {custody}")]
    CustodyMismatch {
        index: usize,
        returned: Amount,
        custody: Amount,
    },

    #[error("event {index} overflows custody")]
    Overflow { index: usize },
}

/// Ledger state reconstructed purely from events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayedLedger {
    pub owner: PartyId,
    pub recipient_a: PartyId,
    pub recipient_b: PartyId,
    pub active: bool,
    pub custody: Amount,
    pub credits: BTreeMap<PartyId, Amount>,
}

impl ReplayedLedger {
    fn genesis(owner: &PartyId, recipient_a: &PartyId, recipient_b: &PartyId) -> Self {
        Self {
            owner: owner.clone(),
            recipient_a: recipient_a.clone(),
            recipient_b: recipient_b.clone(),
            active: true,
            custody: Amount::ZERO,
            credits: BTreeMap::new(),
        }
    }

    pub fn credit_of(&self, party: &PartyId) -> Amount {
        self.credits.get(party).copied().unwrap_or(Amount::ZERO)
    }

    /// Fold one event into the state.
    pub fn apply(&mut self, index: usize, event: &LedgerEvent) -> Result<(), ReplayError> {
        if !self.active {
            return Err(ReplayError::AfterDeactivation {
                index,
                kind: event.kind(),
            });
        }
        match event {
            LedgerEvent::Initialized { .. } => Err(ReplayError::DuplicateGenesis { index }),
            LedgerEvent::Split {
                recipient_a,
                recipient_b,
                amount,
                ..
            } => {
                let shares = split_amount(*amount).map_err(|_| ReplayError::Unsplittable {
                    index,
                    amount: *amount,
                })?;
                self.custody = self
                    .custody
                    .checked_add(*amount)
                    .ok_or(ReplayError::Overflow { index })?;
                self.add_credit(index, recipient_a, shares.first)?;
                self.add_credit(index, recipient_b, shares.second)
            }
            LedgerEvent::Withdrawn { party, amount } => {
                // A withdrawal always pays out the whole nonzero credit.
                let credit = self.credit_of(party);
                if *amount > credit {
                    return Err(ReplayError::Overdrawn {
                        index,
                        party: party.clone(),
                        amount: *amount,
                        credit,
                    });
                }
                if *amount != credit || credit.is_zero() {
                    return Err(ReplayError::PartialWithdrawal {
                        index,
                        party: party.clone(),
                        amount: *amount,
                        credit,
                    });
                }
                self.credits.remove(party);
                self.custody = self.custody.checked_sub(*amount).ok_or(ReplayError::CustodyMismatch {
                    index,
                    returned: *amount,
                    custody: self.custody,
                })?;
                Ok(())
            }
            LedgerEvent::Deactivated {
                returned, forfeited, ..
            } => {
                let owed: Amount = self.credits.values().sum();
                if *returned != self.custody || *forfeited != owed {
                    return Err(ReplayError::CustodyMismatch {
                        index,
                        returned: *returned,
                        custody: self.custody,
                    });
                }
                self.custody = Amount::ZERO;
                self.credits.clear();
                self.active = false;
                Ok(())
            }
        }
    }

    fn add_credit(&mut self, index: usize, party: &PartyId, amount: Amount) -> Result<(), ReplayError> {
        let entry = self.credits.entry(party.clone()).or_insert(Amount::ZERO);
        *entry = entry.checked_add(amount).ok_or(ReplayError::Overflow { index })?;
        Ok(())
    }

    /// The replayed state as a snapshot. Replay cannot see in-flight payouts,
    /// so compare against a live snapshot taken while no withdrawal is running.
    pub fn to_snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            owner: self.owner.clone(),
            recipient_a: self.recipient_a.clone(),
            recipient_b: self.recipient_b.clone(),
            active: self.active,
            custody: self.custody,
            in_flight: Amount::ZERO,
            credits: self.credits.clone(),
        }
    }
}

/// Fold a full history, starting from its `Initialized` event.
pub fn replay(events: &[LedgerEvent]) -> Result<ReplayedLedger, ReplayError> {
    let mut state = match events.first() {
        Some(LedgerEvent::Initialized {
            owner,
            recipient_a,
            recipient_b,
        }) => ReplayedLedger::genesis(owner, recipient_a, recipient_b),
        _ => return Err(ReplayError::MissingGenesis),
    };
    for (index, event) in events.iter().enumerate().skip(1) {
        state.apply(index, event)?;
    }
    Ok(state)
}
