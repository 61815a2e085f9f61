//! One client connection joined to a VPN network.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::packet::{PacketError, PacketHeader};
use super::registry::VpnNetwork;
use crate::session::SessionHandle;

/// What happened to a forwarded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the session bound at this address.
    Delivered(SocketAddrV4),
    /// Nobody is bound at this address; the packet was dropped.
    Dropped(SocketAddrV4),
}

/// A session's seat in a [`VpnNetwork`], reachable at `addr`.
pub struct VpnEndpoint {
    network: Arc<VpnNetwork>,
    session: Arc<SessionHandle>,
    addr: SocketAddrV4,
    closed: AtomicBool,
}

impl VpnEndpoint {
    pub(crate) fn new(
        network: Arc<VpnNetwork>,
        session: Arc<SessionHandle>,
        addr: SocketAddrV4,
    ) -> Self {
        Self {
            network,
            session,
            addr,
            closed: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn network(&self) -> &Arc<VpnNetwork> {
        &self.network
    }

    /// Route one encapsulated packet from this endpoint's client.
    ///
    /// On delivery the header's address/port are overwritten with this
    /// endpoint's own, so the receiver sees who sent it. An unbound
    /// destination is not an error.
    pub fn forward(&self, mut frame: Vec<u8>) -> Result<Delivery, PacketError> {
        let header = PacketHeader::parse(&frame)?;

        let Some(remote) = self.network.route_addr(header.addr) else {
            debug!("{} -> {} (dropped)", self.addr, header.addr);
            return Ok(Delivery::Dropped(header.addr));
        };

        debug!("{} -> {}", self.addr, remote.addr);
        PacketHeader::stamp(&mut frame, self.addr);
        remote.session.send_binary(frame);
        Ok(Delivery::Delivered(remote.addr))
    }

    /// Leave the network and close the owning connection. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.network.unbind(self);
        self.session.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// The network holds its endpoints, so a derived Debug would recurse.
impl std::fmt::Debug for VpnEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VpnEndpoint")
            .field("network", &self.network.server_code())
            .field("session", &self.session.id())
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
