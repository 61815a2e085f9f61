//! Virtual LANs between browser clients.
//!
//! `MAKEVPN` registers a network with a server code and a client code;
//! `VPN <code> ...` binds the connection as an endpoint of that network.
//! From then on every binary frame is an encapsulated datagram (see
//! [`packet`]) routed to the peer bound at the header's address.

pub mod endpoint;
pub mod packet;
pub mod registry;

pub use endpoint::{Delivery, VpnEndpoint};
pub use packet::{PacketError, PacketHeader};
pub use registry::{Side, VpnNetwork, VpnRegistry, SERVER_ADDR};
