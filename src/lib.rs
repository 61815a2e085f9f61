//! WebSocket relay for browser-hosted game clients.
//!
//! Browser builds of UDP games can only open WebSockets. Each connection
//! speaks a one-line text protocol to pick what it wants to reach:
//!
//! - `PROXY ... UDP <ip> <port>`: a statically configured game server,
//! - `PROXY ... TCP 10.0.0.1 8080`: an emulated HTTP proxy serving the
//!   server list,
//! - `MAKEVPN` / `VPN`: a virtual LAN shared with other browser clients.
//!
//! After binding, binary frames are forwarded raw to the chosen target.

pub mod config;
pub mod error;
pub mod relay;
pub mod server;
pub mod session;
pub mod target;
pub mod util;
pub mod vpn;

pub use config::{Config, StaticRelayRule};
pub use error::RelayError;
pub use relay::Relay;
pub use session::{ClientSession, Frame, SessionHandle};
pub use target::Target;
