//! Per-connection state machine.
//!
//! A [`ClientSession`] starts unbound and reads text commands. `VPN` or a
//! routable `PROXY` binds a [`Target`]; from then on binary frames are
//! forwarded to it. Text frames keep going to the command parser even while
//! bound, which existing clients rely on for `MAKEVPN` after binding.
//!
//! Any [`RelayError`] closes this session and only this session.

pub mod command;
pub mod handle;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use command::Command;
pub use handle::{Frame, SessionHandle};

use crate::error::RelayError;
use crate::relay::Relay;
use crate::target::{self, DirectoryProxy, ProxyRoute, StaticRelay, Target};
use crate::util::sanitize;

pub struct ClientSession {
    relay: Arc<Relay>,
    handle: Arc<SessionHandle>,
    ip_chain: Vec<String>,
    target: Option<Target>,
}

impl ClientSession {
    pub fn new(relay: Arc<Relay>, handle: Arc<SessionHandle>, ip_chain: Vec<String>) -> Self {
        Self {
            relay,
            handle,
            ip_chain,
            target: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    /// Originating hops, client first.
    pub fn ip_chain(&self) -> &[String] {
        &self.ip_chain
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.handle.send_text(text);
    }

    /// Handle one inbound frame. Errors are logged and close the session.
    pub fn on_frame(&mut self, frame: Frame) {
        if self.is_closed() {
            debug!("frame after close ignored");
            return;
        }

        let result = match frame {
            Frame::Binary(data) => match self.target.as_mut() {
                Some(target) => target.forward(data),
                None => self.handle_command(&String::from_utf8_lossy(&data)),
            },
            Frame::Text(line) => self.handle_command(&line),
        };

        if let Err(e) = result {
            warn!("{e}; closing");
            self.close();
        }
    }

    /// Close the transport and the bound target. Idempotent.
    pub fn close(&mut self) {
        if self.handle.close() {
            debug!("closed");
        }
        if let Some(target) = self.target.take() {
            target.close();
        }
    }

    fn handle_command(&mut self, raw: &str) -> Result<(), RelayError> {
        let line = sanitize(raw);
        let response = match Command::parse(&line)? {
            Command::MakeVpn { game } => {
                let (server_code, client_code) = self.relay.vpns().make_vpn(&game);
                format!("NEWVPN {server_code} {client_code}")
            }
            Command::Vpn { code, bind_port } => {
                self.ensure_unbound()?;
                let endpoint = self
                    .relay
                    .vpns()
                    .connect(&code, Arc::clone(&self.handle), bind_port)
                    .ok_or(RelayError::UnknownVpnCode(code))?;
                info!("VPN connect to {}", endpoint.addr());
                self.target = Some(Target::Vpn(endpoint));
                "BIND OK".to_string()
            }
            Command::Proxy { protocol, ip, port } => {
                let Some(route) = target::route(self.relay.config(), protocol, ip, port) else {
                    info!("Proxy to {protocol} {ip}:{port} rejected");
                    self.send_text("PROXY FAIL");
                    return Ok(());
                };
                self.ensure_unbound()?;
                match self.bind_proxy(route) {
                    Some(target) => {
                        info!("Proxy to {protocol} {ip}:{port} via {} target", target.kind());
                        self.target = Some(target);
                        "PROXY OK".to_string()
                    }
                    None => "PROXY FAIL".to_string(),
                }
            }
        };
        self.send_text(response);
        Ok(())
    }

    fn bind_proxy(&self, route: ProxyRoute) -> Option<Target> {
        match route {
            ProxyRoute::Directory => Some(Target::Directory(DirectoryProxy::new(
                Arc::clone(&self.handle),
                self.relay.server_list(),
            ))),
            ProxyRoute::Udp(remote) => match StaticRelay::open(Arc::clone(&self.handle), remote) {
                Ok(relay) => Some(Target::Udp(relay)),
                Err(e) => {
                    warn!("{e:#}");
                    None
                }
            },
        }
    }

    fn ensure_unbound(&self) -> Result<(), RelayError> {
        match &self.target {
            Some(target) => Err(RelayError::AlreadyBound(target.kind())),
            None => Ok(()),
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}
