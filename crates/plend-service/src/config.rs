use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use plend_fabric::JournalConfig;
use plend_ledger::DefaultTriggerPolicy;
use plend_types::Address;
use plend_watcher::{TriggerIdentity, WatcherConfig};

use crate::error::{ServiceError, ServiceResult};

/// Top-level configuration for a PrivLend node.
///
/// Scalar fields come before tables so the TOML rendering stays valid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name reported by the health endpoint and in logs.
    pub node_id: String,
    /// Account the deadline watcher signs default triggers as.
    pub keeper: Address,
    /// How often the event pump tails the ledger, in milliseconds.
    pub poll_interval_ms: u64,
    /// Who may call `trigger_default`.
    pub default_trigger: DefaultTriggerPolicy,
    pub watcher: WatcherConfig,
    /// Persist relayed events here. Without it, restart recovery re-reads
    /// the ledger from the beginning.
    pub journal: Option<JournalConfig>,
    pub server: ServerConfig,
    /// Starting token balances for the in-memory deployment.
    pub genesis: Vec<GenesisBalance>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node_id: "plend-local".into(),
            keeper: Address::derive("plend-keeper"),
            poll_interval_ms: 250,
            default_trigger: DefaultTriggerPolicy::default(),
            watcher: WatcherConfig::default(),
            journal: None,
            server: ServerConfig::default(),
            genesis: Vec::new(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(s: &str) -> ServiceResult<Self> {
        toml::from_str(s).map_err(|e| ServiceError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> ServiceResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> ServiceResult<String> {
        toml::to_string_pretty(self).map_err(|e| ServiceError::Config(e.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    /// Identity the watcher should trigger defaults as under the configured
    /// policy.
    pub fn trigger_identity(&self) -> TriggerIdentity {
        match self.default_trigger {
            DefaultTriggerPolicy::LenderOnly => TriggerIdentity::Lender,
            DefaultTriggerPolicy::AnyCaller | DefaultTriggerPolicy::LenderOrKeepers { .. } => {
                TriggerIdentity::Keeper(self.keeper)
            }
        }
    }
}

/// HTTP listener and authentication settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Whether requests without credentials may read.
    pub allow_anonymous_read: bool,
    /// Accounts trusted to register activity proofs.
    pub proof_oracles: Vec<Address>,
    /// Bearer tokens and the account each one authenticates as. With none
    /// configured the API is read-only.
    pub tokens: Vec<ApiToken>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8645)),
            allow_anonymous_read: true,
            proof_oracles: Vec::new(),
            tokens: Vec::new(),
        }
    }
}

/// A bearer token bound to one account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub account: Address,
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiToken")
            .field("token", &"<redacted>")
            .field("account", &self.account)
            .finish()
    }
}

/// A starting balance minted into the in-memory token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisBalance {
    pub account: Address,
    pub amount: u64,
}
