//! Plain UDP forwarding to a statically configured game server.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::SessionHandle;

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_535;

/// Datagrams queued for sending before new ones are dropped.
const SEND_QUEUE: usize = 256;

/// One connected UDP socket per session. Binary frames go out as single
/// datagrams; every datagram that comes back is sent to the client as a
/// binary frame.
#[derive(Debug)]
pub struct StaticRelay {
    remote: SocketAddr,
    session: Arc<SessionHandle>,
    outbound: mpsc::Sender<Vec<u8>>,
    sender: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

impl StaticRelay {
    /// Open an ephemeral socket connected to `remote` and start relaying
    /// replies to `session`. Must be called from within a tokio runtime.
    pub fn open(session: Arc<SessionHandle>, remote: SocketAddr) -> anyhow::Result<Self> {
        let local = match remote.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let std_socket = std::net::UdpSocket::bind(local)
            .with_context(|| format!("Failed to bind UDP socket for {remote}"))?;
        std_socket
            .connect(remote)
            .with_context(|| format!("Failed to connect UDP socket to {remote}"))?;
        std_socket
            .set_nonblocking(true)
            .context("Failed to make UDP socket non-blocking")?;
        let socket = Arc::new(
            UdpSocket::from_std(std_socket).context("Failed to register UDP socket")?,
        );

        let (outbound, queue) = mpsc::channel(SEND_QUEUE);
        let sender = tokio::spawn(send_loop(Arc::clone(&socket), queue, remote));
        let receiver = tokio::spawn(receive_loop(socket, Arc::clone(&session), remote));
        debug!("UDP relay to {remote} open");

        Ok(Self {
            remote,
            session,
            outbound,
            sender,
            receiver,
        })
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Queue one datagram without waiting. A full queue drops it, as the
    /// network would.
    pub fn forward(&self, data: Vec<u8>) {
        match self.outbound.try_send(data) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("UDP relay to {}: send queue full, dropped", self.remote);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("UDP relay to {}: sender gone, dropped", self.remote);
            }
        }
    }

    pub fn close(&self) {
        self.sender.abort();
        self.receiver.abort();
        self.session.close();
    }
}

impl Drop for StaticRelay {
    fn drop(&mut self) {
        self.sender.abort();
        self.receiver.abort();
    }
}

async fn send_loop(socket: Arc<UdpSocket>, mut queue: mpsc::Receiver<Vec<u8>>, remote: SocketAddr) {
    while let Some(datagram) = queue.recv().await {
        if let Err(e) = socket.send(&datagram).await {
            debug!("UDP relay to {remote}: send failed: {e}");
        }
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, session: Arc<SessionHandle>, remote: SocketAddr) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv(&mut buf).await {
            Ok(n) => {
                if !session.send_binary(buf[..n].to_vec()) {
                    break;
                }
            }
            // ICMP port unreachable surfaces as ConnectionRefused on the next
            // recv; the server may simply not be up yet.
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                debug!("UDP relay to {remote}: connection refused");
            }
            Err(e) => {
                warn!("UDP relay to {remote}: receive failed: {e}");
                session.close();
                break;
            }
        }
    }
}
