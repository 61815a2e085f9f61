//! Code table and per-network routing tables.
//!
//! `MAKEVPN` creates a [`VpnNetwork`] with two codes. Whoever presents the
//! server code joins as `172.16.0.1`; whoever presents the client code gets a
//! random `172.{16..=32}.x.y` address. Networks are isolated: an
//! endpoint only ever routes inside the network it joined.
//!
//! Locking: the registry's code table and each network's routing table have
//! their own mutex. Lock order is registry then network: [`VpnRegistry::connect`]
//! and [`VpnRegistry::evict_idle`] hold the registry lock while touching a
//! routing table, so eviction and binding never interleave. No lock is held
//! while delivering a frame.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::endpoint::VpnEndpoint;
use crate::session::SessionHandle;

/// Address handed to the side that joins with the server code.
pub const SERVER_ADDR: Ipv4Addr = Ipv4Addr::new(172, 16, 0, 1);

/// Random bytes per code; a code is these bytes as uppercase hex.
const CODE_BYTES: usize = 6;

/// Attempts at finding an unoccupied client address before overwriting.
const CLIENT_ADDR_ATTEMPTS: usize = 8;

/// Which half of a network a code grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Client,
}

/// Generate one connection code: 12 uppercase hex characters.
pub fn generate_code() -> String {
    hex::encode_upper(rand::random::<[u8; CODE_BYTES]>())
}

/// Pick an address in `172.{16..=32}.{1..=254}.{1..=254}`.
pub fn random_client_ip() -> Ipv4Addr {
    Ipv4Addr::new(
        172,
        rand::random_range(16..=32),
        rand::random_range(1..=254),
        rand::random_range(1..=254),
    )
}

#[derive(Debug)]
struct Routes {
    endpoints: HashMap<SocketAddrV4, Arc<VpnEndpoint>>,
    /// Set while no endpoint is bound.
    idle_since: Option<Instant>,
}

/// One virtual LAN created by `MAKEVPN`.
#[derive(Debug)]
pub struct VpnNetwork {
    server_code: String,
    client_code: String,
    game: String,
    routes: Mutex<Routes>,
}

impl VpnNetwork {
    fn new(server_code: String, client_code: String, game: &str) -> Self {
        Self {
            server_code,
            client_code,
            game: game.to_string(),
            routes: Mutex::new(Routes {
                endpoints: HashMap::new(),
                idle_since: Some(Instant::now()),
            }),
        }
    }

    pub fn server_code(&self) -> &str {
        &self.server_code
    }

    pub fn game(&self) -> &str {
        &self.game
    }

    /// Which side `code` joins as, if it belongs to this network.
    pub fn side(&self, code: &str) -> Option<Side> {
        if code == self.server_code {
            Some(Side::Server)
        } else if code == self.client_code {
            Some(Side::Client)
        } else {
            None
        }
    }

    /// Endpoint bound at `ip:port`, if any.
    pub fn route(&self, ip: Ipv4Addr, port: u16) -> Option<Arc<VpnEndpoint>> {
        self.route_addr(SocketAddrV4::new(ip, port))
    }

    pub fn route_addr(&self, addr: SocketAddrV4) -> Option<Arc<VpnEndpoint>> {
        self.routes.lock().endpoints.get(&addr).cloned()
    }

    /// Number of currently bound endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.routes.lock().endpoints.len()
    }

    /// Assign an address for `side`, create the endpoint and insert it.
    /// An endpoint already bound at the same address is replaced.
    pub(crate) fn bind(
        self: &Arc<Self>,
        side: Side,
        session: Arc<SessionHandle>,
        bind_port: u16,
    ) -> Arc<VpnEndpoint> {
        let mut routes = self.routes.lock();

        let addr = match side {
            Side::Server => SocketAddrV4::new(SERVER_ADDR, bind_port),
            Side::Client => {
                let mut addr = SocketAddrV4::new(random_client_ip(), bind_port);
                for _ in 1..CLIENT_ADDR_ATTEMPTS {
                    if !routes.endpoints.contains_key(&addr) {
                        break;
                    }
                    addr = SocketAddrV4::new(random_client_ip(), bind_port);
                }
                addr
            }
        };

        let endpoint = Arc::new(VpnEndpoint::new(Arc::clone(self), session, addr));
        if routes
            .endpoints
            .insert(addr, Arc::clone(&endpoint))
            .is_some()
        {
            debug!("VPN {}: replaced endpoint at {addr}", self.server_code);
        }
        routes.idle_since = None;
        endpoint
    }

    /// Remove `endpoint` from the table, unless its slot was since taken
    /// over by another endpoint.
    pub(crate) fn unbind(&self, endpoint: &VpnEndpoint) {
        let mut routes = self.routes.lock();
        let owned = routes
            .endpoints
            .get(&endpoint.addr())
            .is_some_and(|bound| std::ptr::eq(Arc::as_ptr(bound), endpoint));
        if owned {
            routes.endpoints.remove(&endpoint.addr());
        }
        if routes.endpoints.is_empty() && routes.idle_since.is_none() {
            routes.idle_since = Some(Instant::now());
        }
    }

    fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.routes
            .lock()
            .idle_since
            .map(|since| now.saturating_duration_since(since))
    }
}

/// All live VPN networks, indexed by both of their codes.
#[derive(Debug, Default)]
pub struct VpnRegistry {
    networks: Mutex<HashMap<String, Arc<VpnNetwork>>>,
}

impl VpnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a network for `game` and return `(server_code, client_code)`.
    ///
    /// Codes are regenerated until neither collides with a live code nor
    /// with each other.
    pub fn make_vpn(&self, game: &str) -> (String, String) {
        let mut networks = self.networks.lock();

        let server_code = loop {
            let code = generate_code();
            if !networks.contains_key(&code) {
                break code;
            }
        };
        let client_code = loop {
            let code = generate_code();
            if code != server_code && !networks.contains_key(&code) {
                break code;
            }
        };

        let network = Arc::new(VpnNetwork::new(
            server_code.clone(),
            client_code.clone(),
            game,
        ));
        networks.insert(server_code.clone(), Arc::clone(&network));
        networks.insert(client_code.clone(), network);

        info!("VPN {server_code} created for game '{game}'");
        (server_code, client_code)
    }

    /// Look up a network by either of its codes.
    pub fn lookup(&self, code: &str) -> Option<Arc<VpnNetwork>> {
        self.networks.lock().get(code).cloned()
    }

    /// Join the network behind `code` on `bind_port`.
    ///
    /// Returns `None` for an unknown code; the caller closes the connection.
    /// Binding happens under the registry lock, so a network is never
    /// evicted between lookup and bind.
    pub fn connect(
        &self,
        code: &str,
        session: Arc<SessionHandle>,
        bind_port: u16,
    ) -> Option<Arc<VpnEndpoint>> {
        let networks = self.networks.lock();
        let network = networks.get(code)?;
        let side = network.side(code)?;
        Some(network.bind(side, session, bind_port))
    }

    /// Number of live networks.
    pub fn len(&self) -> usize {
        self.networks.lock().len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.networks.lock().is_empty()
    }

    /// Drop networks that have had no bound endpoint for at least
    /// `max_idle`. Returns how many networks were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut networks = self.networks.lock();
        let expired: Vec<(String, String)> = networks
            .iter()
            .filter(|(code, network)| code.as_str() == network.server_code())
            .filter(|(_, network)| {
                network
                    .idle_for(now)
                    .is_some_and(|idle| idle >= max_idle)
            })
            .map(|(_, network)| (network.server_code.clone(), network.client_code.clone()))
            .collect();

        for (server_code, client_code) in &expired {
            networks.remove(server_code);
            networks.remove(client_code);
            debug!("VPN {server_code} expired after {max_idle:?} idle");
        }
        expired.len()
    }
}
