//! Notifications emitted by the ledger.
//!
//! Every accepted operation appends exactly one [`LedgerEvent`] to the
//! ledger's history. The history is append-only and, folded from genesis,
//! reconstructs the ledger's credits and custody (see [`crate::replay`]).

use serde::{Deserialize, Serialize};
use splitter_types::{Amount, PartyId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// The ledger was created.
    Initialized {
        owner: PartyId,
        recipient_a: PartyId,
        recipient_b: PartyId,
    },
    /// A deposit was accepted and split into two credits.
    Split {
        payer: PartyId,
        recipient_a: PartyId,
        recipient_b: PartyId,
        amount: Amount,
    },
    /// A party pulled its full credit.
    Withdrawn { party: PartyId, amount: Amount },
    /// The owner deactivated the ledger.
    Deactivated {
        owner: PartyId,
        /// Custody forwarded to the owner.
        returned: Amount,
        /// Unpaid credits folded into `returned` (forfeit policy only).
        forfeited: Amount,
    },
}

impl LedgerEvent {
    /// Name of the operation that produced this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "initialized",
            Self::Split { .. } => "split",
            Self::Withdrawn { .. } => "withdrawn",
            Self::Deactivated { .. } => "deactivated",
        }
    }
}

/// Fan-out of ledger events to subscribed listeners.
///
/// The ledger hands each published event to [`EventBus::emit`] once, with
/// its state lock released.
pub struct EventBus {
    listeners: Vec<Box<dyn Fn(&LedgerEvent) + Send + Sync>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: Box<dyn Fn(&LedgerEvent) + Send + Sync>) {
        self.listeners.push(listener);
    }

    pub fn emit(&self, event: &LedgerEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
