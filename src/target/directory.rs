//! Fake CONNECT proxy in front of a fake server-list host.
//!
//! The game client reaches its server list through an HTTP proxy at
//! `10.0.0.1:8080`. This target plays both roles: it accepts the single
//! `CONNECT servers.minetest.net:80` handshake, then answers `GET /geoip`
//! and `GET /list` itself, listing the statically relayed servers.
//!
//! Requests are never reassembled across frames: the client always sends a
//! whole request, terminated by an empty line, per frame.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::StaticRelayRule;
use crate::error::RelayError;
use crate::session::SessionHandle;
use crate::util::sanitize;

/// Where clients `PROXY TCP` to reach the emulated proxy.
pub const DIRECTORY_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 8080);

/// The only host the emulated proxy agrees to CONNECT to.
pub const CONNECT_HOST: &str = "servers.minetest.net";
pub const CONNECT_PORT: u16 = 80;

const CONNECTION_ESTABLISHED_REPLY: &[u8] =
    b"HTTP/1.0 200 Connection Established\r\nProxy-agent: Apache/2.4.41 (Ubuntu)\r\n\r\n";

const GEOIP_RESPONSE: &str = concat!(
    "HTTP/1.1 200 OK\n",
    "Server: nginx/1.24.0\n",
    "Date: %NOW%\n",
    "Content-Type: application/json\n",
    "Content-Length: 19\n",
    "Connection: keep-alive\n",
    "Cache-Control: max-age=604800, private\n",
    "Access-Control-Allow-Origin: *\n",
    "\n",
    "{\"continent\":\"NA\"}\n",
);

const LIST_RESPONSE: &str = concat!(
    "HTTP/1.1 200 OK\n",
    "Server: nginx/1.24.0\n",
    "Date: %NOW%\n",
    "Content-Type: application/json\n",
    "Content-Length: %LENGTH%\n",
    "Last-Modified: %NOW%\n",
    "Connection: keep-alive\n",
    "Access-Control-Allow-Origin: *\n",
    "\n",
    "%PAYLOAD%\n",
);

/// Protocol range advertised for every listed server.
const PROTO_MIN: u32 = 37;
const PROTO_MAX: u32 = 42;

// ── Server list payload ─────────────────────────────────────────────

#[derive(Serialize)]
struct ServerList {
    total: Totals,
    total_max: MaxTotals,
    list: Vec<ListedServer>,
}

#[derive(Serialize)]
struct Totals {
    servers: usize,
    clients: usize,
}

// `server` (singular) is what the real list service emits.
#[derive(Serialize)]
struct MaxTotals {
    server: usize,
    clients: usize,
}

#[derive(Serialize)]
struct ListedServer {
    address: String,
    ip: String,
    port: u16,
    proto_min: u32,
    proto_max: u32,
}

/// Render the `/list` JSON body for the configured static relays.
pub fn server_list_json(relays: &[StaticRelayRule]) -> serde_json::Result<String> {
    let list = ServerList {
        total: Totals {
            servers: relays.len(),
            clients: 0,
        },
        total_max: MaxTotals {
            server: relays.len(),
            clients: 0,
        },
        list: relays
            .iter()
            .map(|rule| ListedServer {
                address: rule.virtual_ip.to_string(),
                ip: rule.virtual_ip.to_string(),
                port: rule.real_port,
                proto_min: PROTO_MIN,
                proto_max: PROTO_MAX,
            })
            .collect(),
    };
    serde_json::to_string(&list)
}

/// RFC 1123 date as used in HTTP headers, e.g. `Sun, 18 Oct 2026 09:30:00 GMT`.
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

pub fn render_geoip(now: &str) -> String {
    GEOIP_RESPONSE.replace("%NOW%", now)
}

pub fn render_list(now: &str, payload: &str) -> String {
    // +1 for the newline after the payload.
    LIST_RESPONSE
        .replace("%NOW%", now)
        .replace("%LENGTH%", &(payload.len() + 1).to_string())
        .replace("%PAYLOAD%", payload)
}

// ── State machine ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingConnect,
    ServingHttp,
    Closed,
}

#[derive(Debug)]
pub struct DirectoryProxy {
    session: Arc<SessionHandle>,
    server_list: Arc<str>,
    phase: Phase,
}

impl DirectoryProxy {
    pub fn new(session: Arc<SessionHandle>, server_list: Arc<str>) -> Self {
        Self {
            session,
            server_list,
            phase: Phase::AwaitingConnect,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handle one frame from the client. Any error means the connection
    /// must be closed.
    pub fn forward(&mut self, data: &[u8]) -> Result<(), RelayError> {
        let text = String::from_utf8_lossy(data);
        let result = match self.phase {
            Phase::AwaitingConnect => self.handle_connect(&text),
            Phase::ServingHttp => self.handle_get(&text),
            Phase::Closed => {
                debug!("ignoring {} bytes after close", data.len());
                return Ok(());
            }
        };
        if result.is_err() {
            self.phase = Phase::Closed;
        }
        result
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.session.close();
    }

    fn handle_connect(&mut self, request: &str) -> Result<(), RelayError> {
        let line = request_line(request)?;
        let tokens: Vec<&str> = line.split(' ').collect();
        let [method, authority, version] = tokens[..] else {
            return Err(RelayError::MalformedHttp(format!(
                "CONNECT line has {} tokens",
                tokens.len()
            )));
        };
        if method != "CONNECT" || version != "HTTP/1.1" {
            return Err(RelayError::MalformedHttp(format!(
                "expected CONNECT request, got '{}'",
                sanitize(line)
            )));
        }

        let Some((host, port)) = authority.split_once(':') else {
            return Err(RelayError::MalformedHttp(format!(
                "CONNECT target '{}' lacks a port",
                sanitize(authority)
            )));
        };
        if port.contains(':') {
            return Err(RelayError::MalformedHttp(format!(
                "CONNECT target '{}' is not host:port",
                sanitize(authority)
            )));
        }
        let port: u16 = port.parse().map_err(|_| {
            RelayError::MalformedHttp(format!("bad CONNECT port '{}'", sanitize(port)))
        })?;

        if host != CONNECT_HOST || port != CONNECT_PORT {
            return Err(RelayError::ForbiddenConnect(format!(
                "{}:{port}",
                sanitize(host)
            )));
        }

        info!("Connected for server list");
        self.session
            .send_binary(CONNECTION_ESTABLISHED_REPLY.to_vec());
        self.phase = Phase::ServingHttp;
        Ok(())
    }

    fn handle_get(&mut self, request: &str) -> Result<(), RelayError> {
        let line = request_line(request)?;
        let mut tokens = line.split(' ');
        if tokens.next() != Some("GET") {
            return Err(RelayError::MalformedHttp(format!(
                "expected GET request, got '{}'",
                sanitize(line)
            )));
        }
        let path = match tokens.next() {
            Some(path) if !path.is_empty() => sanitize(path),
            _ => return Err(RelayError::MalformedHttp("GET without a path".into())),
        };

        let now = http_date();
        let response = if path.starts_with("/geoip") {
            render_geoip(&now)
        } else if path.starts_with("/list") {
            info!("Sending virtual server list");
            render_list(&now, &self.server_list)
        } else {
            return Err(RelayError::UnknownPath(path));
        };

        self.session.send_binary(response.into_bytes());
        Ok(())
    }
}

/// First line of a complete request, i.e. one ending in an empty line.
fn request_line(request: &str) -> Result<&str, RelayError> {
    if !request.ends_with("\r\n\r\n") {
        return Err(RelayError::MalformedHttp(
            "request is not terminated by an empty line".into(),
        ));
    }
    Ok(request.split("\r\n").next().unwrap_or_default())
}
