//! Node configuration
//!
//! Operator settings loaded from an optional TOML file. Consensus constants
//! are not configurable here; they come from [`ChainParams`] for the selected
//! network, with the payments key and test-fork height layered on top.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ChainParams, Network};
use crate::crypto::{PrivateKey, PublicKey, SignatureError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid masternode payments key: {0}")]
    Key(#[from] SignatureError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// Network to follow (main, testnet, regtest)
    pub network: Network,

    /// Address to listen on; the network's default port when unset
    pub listen: Option<SocketAddr>,

    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,

    /// Network masternode-payments public key (hex, x-only)
    pub masternode_payments_pubkey: Option<String>,

    /// Private key used to sign local winners (hex)
    pub masternode_payments_privkey: Option<String>,

    /// Tip height at which difficulty is reset for a live test fork
    pub live_fork_height: Option<u64>,

    /// Seconds between payment list cleanups
    pub cleanup_interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::Main,
            listen: None,
            log_level: "info".to_string(),
            masternode_payments_pubkey: None,
            masternode_payments_privkey: None,
            live_fork_height: None,
            cleanup_interval_secs: 60,
        }
    }
}

impl NodeConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Listen address, defaulting to all interfaces on the network port
    pub fn listen_addr(&self, params: &ChainParams) -> SocketAddr {
        self.listen
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], params.default_port)))
    }

    /// Consensus parameters for the configured network with operator overrides applied
    pub fn chain_params(&self) -> Result<ChainParams, ConfigError> {
        let mut params = ChainParams::for_network(self.network);
        if let Some(hex) = &self.masternode_payments_pubkey {
            params.payments.signer_key = Some(PublicKey::from_hex(hex)?);
        }
        if self.live_fork_height.is_some() {
            params.retarget.live_fork_height = self.live_fork_height;
        }
        Ok(params)
    }

    /// Local payments signing key, if configured
    pub fn payments_private_key(&self) -> Result<Option<PrivateKey>, ConfigError> {
        self.masternode_payments_privkey
            .as_deref()
            .map(PrivateKey::from_hex)
            .transpose()
            .map_err(ConfigError::from)
    }
}
