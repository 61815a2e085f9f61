//! Process-wide relay state handed to every connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::Config;
use crate::session::{ClientSession, Frame, SessionHandle};
use crate::target::directory::server_list_json;
use crate::vpn::VpnRegistry;

/// Configuration, VPN registry and connection counter shared by all
/// sessions. One per process; passed around as `Arc<Relay>`.
#[derive(Debug)]
pub struct Relay {
    config: Config,
    vpns: VpnRegistry,
    server_list: Arc<str>,
    next_id: AtomicU64,
}

impl Relay {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let server_list = server_list_json(&config.relays)
            .context("Failed to render virtual server list")?
            .into();
        Ok(Self {
            config,
            vpns: VpnRegistry::new(),
            server_list,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vpns(&self) -> &VpnRegistry {
        &self.vpns
    }

    /// Pre-rendered `/list` payload.
    pub fn server_list(&self) -> Arc<str> {
        Arc::clone(&self.server_list)
    }

    /// Connection ids start at 1 and never repeat.
    pub fn next_client_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Start a session for a newly accepted connection. The receiver yields
    /// every frame to write back to the client and ends once the session
    /// closes.
    pub fn open_session(
        self: &Arc<Self>,
        ip_chain: Vec<String>,
    ) -> (ClientSession, UnboundedReceiver<Frame>) {
        let (handle, outbound) = SessionHandle::new(self.next_client_id());
        let session = ClientSession::new(Arc::clone(self), handle, ip_chain);
        (session, outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_increase_from_one() {
        let relay = Arc::new(Relay::new(Config::default()).unwrap());
        let (a, _rx_a) = relay.open_session(Vec::new());
        let (b, _rx_b) = relay.open_session(Vec::new());
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert_eq!(relay.next_client_id(), 3);
    }

    #[test]
    fn server_list_rendered_once() {
        let relay = Relay::new(Config::default()).unwrap();
        assert!(Arc::ptr_eq(&relay.server_list(), &relay.server_list()));
        assert!(relay.server_list().starts_with("{\"total\":{\"servers\":0"));
    }
}
