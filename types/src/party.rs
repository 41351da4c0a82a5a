//! Party identity: the opaque account identifier that deposits, receives
//! credit and withdraws.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TypesError;

/// An account identifier supplied by the transport layer.
///
/// The ledger only compares and hashes these; it never derives authority
/// from anything a request payload says about identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartyId(String);

impl PartyId {
    /// Create a party id from a label.
    ///
    /// # Panics
    /// Panics if the label is empty or contains whitespace. Use
    /// [`PartyId::parse`] for untrusted input.
    pub fn new(raw: impl Into<String>) -> Self {
        let s = raw.into();
        assert!(Self::is_well_formed(&s), "party id must be non-empty and contain no whitespace");
        Self(s)
    }

    /// Parse a party id, rejecting malformed labels.
    pub fn parse(raw: &str) -> Result<Self, TypesError> {
        if Self::is_well_formed(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(TypesError::InvalidParty(raw.to_string()))
        }
    }

    /// Return the raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_well_formed(s: &str) -> bool {
        !s.is_empty() && !s.chars().any(char::is_whitespace)
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PartyId {
    type Error = TypesError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if Self::is_well_formed(&s) {
            Ok(Self(s))
        } else {
            Err(TypesError::InvalidParty(s))
        }
    }
}

impl From<PartyId> for String {
    fn from(party: PartyId) -> Self {
        party.0
    }
}
