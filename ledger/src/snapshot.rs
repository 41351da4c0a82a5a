//! Ledger snapshots: a read-only view of the ledger at one instant.
//!
//! Observers compare a snapshot folded from the notification history (see
//! [`crate::replay`]) with one read from the live ledger. The digest is
//! computed deterministically from the snapshot contents, so two views of
//! the same state always hash equal.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use splitter_types::{Amount, PartyId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub owner: PartyId,
    pub recipient_a: PartyId,
    pub recipient_b: PartyId,
    pub active: bool,
    /// Value held by the ledger on behalf of all parties.
    pub custody: Amount,
    /// Value reserved for outbound transfers that have not completed yet.
    pub in_flight: Amount,
    /// Outstanding credits; parties owed nothing are absent.
    pub credits: BTreeMap<PartyId, Amount>,
}

impl LedgerSnapshot {
    /// Sum of all outstanding credits.
    pub fn total_credits(&self) -> Amount {
        self.credits.values().sum()
    }

    /// Whether custody covers every credit plus any in-flight payout.
    pub fn is_solvent(&self) -> bool {
        self.total_credits().saturating_add(self.in_flight) <= self.custody
    }

    /// Blake2b-256 digest of the snapshot.
    pub fn digest(&self) -> [u8; 32] {
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        fn put_party(hasher: &mut Blake2b<U32>, party: &PartyId) {
            hasher.update((party.as_str().len() as u64).to_le_bytes());
            hasher.update(party.as_str().as_bytes());
        }

        let mut hasher = Blake2b::<U32>::new();
        put_party(&mut hasher, &self.owner);
        put_party(&mut hasher, &self.recipient_a);
        put_party(&mut hasher, &self.recipient_b);
        hasher.update([self.active as u8]);
        hasher.update(self.custody.raw().to_le_bytes());
        hasher.update(self.in_flight.raw().to_le_bytes());
        hasher.update((self.credits.len() as u64).to_le_bytes());
        for (party, credit) in &self.credits {
            put_party(&mut hasher, party);
            hasher.update(credit.raw().to_le_bytes());
        }

        let result = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&result);
        out
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}
