//! Server configuration, from environment variables with sane defaults.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use lantern_core::client::ClientConfig;

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP address the listener binds.
    pub bind_addr: SocketAddr,
    /// Per-connection cap on concurrently created transactions.
    pub max_transactions: usize,
    /// Grace period before a disconnected client's channels are swept.
    pub sweep_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_transactions: client.max_transactions,
            sweep_grace: client.sweep_grace,
        }
    }
}

impl ServerConfig {
    /// Read configuration from `LANTERN_BIND`, `LANTERN_MAX_TRANSACTIONS`
    /// and `LANTERN_SWEEP_GRACE_SECS`, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(bind) = std::env::var("LANTERN_BIND") {
            config.bind_addr =
                bind.parse().with_context(|| format!("invalid LANTERN_BIND {bind:?}"))?;
        }
        if let Ok(max) = std::env::var("LANTERN_MAX_TRANSACTIONS") {
            config.max_transactions = max
                .parse()
                .with_context(|| format!("invalid LANTERN_MAX_TRANSACTIONS {max:?}"))?;
        }
        if let Ok(secs) = std::env::var("LANTERN_SWEEP_GRACE_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid LANTERN_SWEEP_GRACE_SECS {secs:?}"))?;
            config.sweep_grace = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// The per-connection slice of this configuration.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig { max_transactions: self.max_transactions, sweep_grace: self.sweep_grace }
    }
}
