//! Static relay configuration.
//!
//! Loaded from a TOML file (`config.toml` in the platform config directory
//! unless `--config` says otherwise). A missing file means defaults: listen
//! on `0.0.0.0:8888`, no static UDP relays, VPN networks never expire.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8888;

/// One `PROXY UDP` rule: clients address `virtual_ip:real_port`, the relay
/// sends to `real_ip:real_port`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticRelayRule {
    pub virtual_ip: Ipv4Addr,
    pub real_ip: IpAddr,
    pub real_port: u16,
}

impl StaticRelayRule {
    pub fn real_addr(&self) -> SocketAddr {
        SocketAddr::new(self.real_ip, self.real_port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Listening port for WebSocket clients.
    pub port: u16,
    /// Listening address.
    pub bind: IpAddr,
    /// Forget VPN networks after this many seconds without any endpoint.
    /// Absent means networks live as long as the process.
    pub vpn_idle_expiry_secs: Option<u64>,
    /// Statically proxyable game servers, also advertised in the emulated
    /// server list.
    pub relays: Vec<StaticRelayRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            vpn_idle_expiry_secs: None,
            relays: Vec::new(),
        }
    }
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse relay config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`. Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };
        Self::from_toml(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    /// Load from `path` if given, else from [`Config::default_path`].
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// `<platform config dir>/game-relay/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "game-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Static rule for `virtual_ip:port`, if one is configured.
    pub fn relay_for(&self, virtual_ip: Ipv4Addr, port: u16) -> Option<&StaticRelayRule> {
        self.relays
            .iter()
            .find(|rule| rule.virtual_ip == virtual_ip && rule.real_port == port)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.relays {
            if rule.real_port == 0 {
                bail!("relay for {} has port 0", rule.virtual_ip);
            }
            if !seen.insert((rule.virtual_ip, rule.real_port)) {
                bail!(
                    "duplicate relay for {}:{}",
                    rule.virtual_ip,
                    rule.real_port
                );
            }
        }
        Ok(())
    }
}
