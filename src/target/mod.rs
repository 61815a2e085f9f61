//! What a session forwards its binary frames to once bound.
//!
//! A session binds at most one target, chosen by its first `VPN` or
//! `PROXY` command. All variants share the same contract: `forward` takes
//! one binary frame from the client, `close` tears the target down and
//! closes the owning connection.

pub mod directory;
pub mod udp;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use crate::config::Config;
use crate::error::RelayError;
use crate::vpn::VpnEndpoint;

pub use directory::DirectoryProxy;
pub use udp::StaticRelay;

/// Transport named in a `PROXY` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

/// Where a `PROXY` request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRoute {
    /// The emulated CONNECT proxy / server list.
    Directory,
    /// A static UDP relay to this real address.
    Udp(SocketAddr),
}

/// Resolve a `PROXY` request. Only TCP to the directory address and UDP to
/// a configured static relay are routable.
pub fn route(config: &Config, protocol: Protocol, ip: Ipv4Addr, port: u16) -> Option<ProxyRoute> {
    match protocol {
        Protocol::Tcp if SocketAddrV4::new(ip, port) == directory::DIRECTORY_ADDR => {
            Some(ProxyRoute::Directory)
        }
        Protocol::Udp => config
            .relay_for(ip, port)
            .map(|rule| ProxyRoute::Udp(rule.real_addr())),
        Protocol::Tcp => None,
    }
}

/// A bound target.
#[derive(Debug)]
pub enum Target {
    Directory(DirectoryProxy),
    Udp(StaticRelay),
    Vpn(Arc<VpnEndpoint>),
}

impl Target {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Directory(_) => "directory",
            Self::Udp(_) => "UDP",
            Self::Vpn(_) => "VPN",
        }
    }

    /// Forward one binary frame from the client.
    pub fn forward(&mut self, data: Vec<u8>) -> Result<(), RelayError> {
        match self {
            Self::Directory(proxy) => proxy.forward(&data),
            Self::Udp(relay) => {
                relay.forward(data);
                Ok(())
            }
            Self::Vpn(endpoint) => {
                endpoint.forward(data)?;
                Ok(())
            }
        }
    }

    pub fn close(self) {
        match self {
            Self::Directory(mut proxy) => proxy.close(),
            Self::Udp(relay) => relay.close(),
            Self::Vpn(endpoint) => endpoint.close(),
        }
    }
}
