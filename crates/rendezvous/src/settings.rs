//! Rendezvous settings, loadable from a JSON file.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use oscar_protocol::proxy::{DEFAULT_PROXY_HOST, DEFAULT_PROXY_PORT};
use serde::{Deserialize, Serialize};

use crate::error::RendezvousError;
use crate::types::ConnectionType;

/// SOCKS5 proxy used for every outbound connect when configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocksProxy {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl SocksProxy {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transfer settings. Every field has a default, so partial files work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lan_timeout_ms: u64,
    pub internet_timeout_ms: u64,
    pub incoming_timeout_ms: u64,
    pub proxy_timeout_ms: u64,

    /// Rendezvous relay host.
    pub proxy_host: String,
    pub proxy_port: u16,

    pub socks_proxy: Option<SocksProxy>,

    /// Local address the passive connector listens on.
    pub passive_bind: SocketAddr,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lan_timeout_ms: 10_000,
            internet_timeout_ms: 15_000,
            incoming_timeout_ms: 60_000,
            proxy_timeout_ms: 30_000,
            proxy_host: DEFAULT_PROXY_HOST.into(),
            proxy_port: DEFAULT_PROXY_PORT,
            socks_proxy: None,
            passive_bind: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, RendezvousError> {
        let content = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Time allowed to establish a connection of type `ct`.
    pub fn per_connection_timeout(&self, ct: ConnectionType) -> Duration {
        let ms = match ct {
            ConnectionType::Lan => self.lan_timeout_ms,
            ConnectionType::Internet => self.internet_timeout_ms,
            ConnectionType::Incoming => self.incoming_timeout_ms,
            ConnectionType::Proxy => self.proxy_timeout_ms,
        };
        Duration::from_millis(ms)
    }
}
