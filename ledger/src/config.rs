//! Ledger configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::Path;

use splitter_types::PartyId;

use crate::SplitterError;

/// Who may call [`crate::SplitLedger::split`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Any party may route its own deposit through an explicit split.
    #[default]
    AnyPayer,
    /// Only the owner may call `split`.
    OwnerOnly,
}

/// What happens to unpaid credits when the owner deactivates the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationPolicy {
    /// Refuse to deactivate while any credit is outstanding.
    #[default]
    RequireSettled,
    /// Deactivate anyway; unpaid credits are returned to the owner with the
    /// rest of custody.
    ForfeitToOwner,
}

/// Configuration for a split ledger.
///
/// Can be loaded from a TOML file via [`LedgerConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// The custodian. Only the owner may make bare deposits or deactivate.
    pub owner: PartyId,

    /// First recipient of bare deposits; receives the odd unit.
    pub recipient_a: PartyId,

    /// Second recipient of bare deposits.
    pub recipient_b: PartyId,

    #[serde(default)]
    pub split_policy: SplitPolicy,

    #[serde(default)]
    pub deactivation: DeactivationPolicy,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LedgerConfig {
    /// A config with default policies.
    pub fn new(owner: PartyId, recipient_a: PartyId, recipient_b: PartyId) -> Self {
        Self {
            owner,
            recipient_a,
            recipient_b,
            split_policy: SplitPolicy::default(),
            deactivation: DeactivationPolicy::default(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }

    pub fn with_split_policy(mut self, policy: SplitPolicy) -> Self {
        self.split_policy = policy;
        self
    }

    pub fn with_deactivation(mut self, policy: DeactivationPolicy) -> Self {
        self.deactivation = policy;
        self
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, SplitterError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SplitterError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, SplitterError> {
        toml::from_str(s).map_err(|e| SplitterError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, SplitterError> {
        toml::to_string_pretty(self).map_err(|e| SplitterError::Config(e.to_string()))
    }
}
