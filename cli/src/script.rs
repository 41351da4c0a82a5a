//! Scripted sessions: fund parties, then drive a ledger step by step.
//!
//! A session runs against a fresh ledger over a [`NullTransport`], so it is
//! a deterministic simulation of a deployment and the calls made against it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use splitter_ledger::{replay, LedgerConfig, LedgerEvent, LedgerSnapshot, SplitLedger};
use splitter_nullables::NullTransport;
use splitter_types::{Amount, PartyId};

#[derive(Clone, Debug, Deserialize)]
pub struct SessionScript {
    /// Starting balances held outside the ledger.
    #[serde(default)]
    pub fund: Vec<Funding>,
    #[serde(default)]
    pub step: Vec<Step>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Funding {
    pub party: PartyId,
    pub amount: u64,
}

/// One call against the ledger, made by `caller`.
#[derive(Clone, Debug, Deserialize)]
pub struct Step {
    pub caller: PartyId,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Plain value transfer with no split targets.
    Deposit { amount: u64 },
    Split {
        recipient_a: PartyId,
        recipient_b: PartyId,
        amount: u64,
    },
    Withdraw,
    Deactivate,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deposit { .. } => "deposit",
            Self::Split { .. } => "split",
            Self::Withdraw => "withdraw",
            Self::Deactivate => "deactivate",
        }
    }
}

impl SessionScript {
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading session script {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("parsing session script")
    }
}

#[derive(Debug, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub caller: PartyId,
    pub action: &'static str,
    pub accepted: bool,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub steps: Vec<StepOutcome>,
    pub history: Vec<LedgerEvent>,
    /// Balances held outside the ledger at the end of the session.
    pub balances: BTreeMap<PartyId, Amount>,
    pub ledger: LedgerSnapshot,
    pub snapshot_digest: String,
    /// Whether folding `history` reproduces `ledger`.
    pub replay_consistent: bool,
}

/// Deploy a ledger for `config`, apply `script` and report the result.
pub fn run_session(config: &LedgerConfig, script: &SessionScript) -> SessionReport {
    let transport = Arc::new(NullTransport::new());
    let ledger = SplitLedger::new(config, transport.clone());

    let mut known: BTreeSet<PartyId> = [
        config.owner.clone(),
        config.recipient_a.clone(),
        config.recipient_b.clone(),
    ]
    .into();
    for funding in &script.fund {
        transport.fund(&funding.party, Amount::from(funding.amount));
        known.insert(funding.party.clone());
    }

    let mut steps = Vec::with_capacity(script.step.len());
    for (index, step) in script.step.iter().enumerate() {
        let caller = &step.caller;
        known.insert(caller.clone());

        let result = match &step.action {
            Action::Deposit { amount } => {
                let value = Amount::from(*amount);
                transport
                    .pay(caller, value, || ledger.deposit_bare(caller, value))
                    .map(|r| format!("split {} into {} / {}", r.amount, r.shares.first, r.shares.second))
                    .map_err(|e| e.to_string())
            }
            Action::Split {
                recipient_a,
                recipient_b,
                amount,
            } => {
                known.insert(recipient_a.clone());
                known.insert(recipient_b.clone());
                let value = Amount::from(*amount);
                transport
                    .pay(caller, value, || ledger.split(caller, recipient_a, recipient_b, value))
                    .map(|r| format!("split {} into {} / {}", r.amount, r.shares.first, r.shares.second))
                    .map_err(|e| e.to_string())
            }
            Action::Withdraw => ledger
                .withdraw(caller)
                .map(|r| format!("paid {}", r.amount))
                .map_err(|e| e.to_string()),
            Action::Deactivate => ledger
                .deactivate(caller)
                .map(|r| format!("returned {} to owner ({} forfeited)", r.returned, r.forfeited))
                .map_err(|e| e.to_string()),
        };

        let action = step.action.name();
        let (accepted, detail) = match result {
            Ok(detail) => {
                tracing::info!(step = index, caller = %caller, action, %detail, "step accepted");
                (true, detail)
            }
            Err(detail) => {
                tracing::warn!(step = index, caller = %caller, action, %detail, "step rejected");
                (false, detail)
            }
        };
        steps.push(StepOutcome {
            index,
            caller: caller.clone(),
            action,
            accepted,
            detail,
        });
    }

    let history = ledger.history();
    let snapshot = ledger.snapshot();
    let replay_consistent = replay(&history)
        .map(|replayed| replayed.to_snapshot().digest() == snapshot.digest())
        .unwrap_or(false);

    SessionReport {
        steps,
        history,
        balances: known
            .iter()
            .map(|party| (party.clone(), transport.balance_of(party)))
            .collect(),
        snapshot_digest: snapshot.digest_hex(),
        ledger: snapshot,
        replay_consistent,
    }
}
