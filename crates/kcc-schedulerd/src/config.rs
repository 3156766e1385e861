use std::{fs, net::SocketAddr, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use kcc_core::BrokerConfig;
use kcc_observe::LogConfig;

/// Daemon configuration file. Every section is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub log: LogConfig,
    pub broker: BrokerConfig,
    /// Address agents and consumerds connect to.
    pub listen: SocketAddr,
    /// Address of the statistics and `/metrics` endpoints.
    pub http: SocketAddr,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            broker: BrokerConfig::default(),
            listen: SocketAddr::from(([0, 0, 0, 0], 9090)),
            http: SocketAddr::from(([127, 0, 0, 1], 9091)),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}
