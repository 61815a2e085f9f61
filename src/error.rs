//! Errors that end a single client session.
//!
//! Every variant here is local to one connection: the session that produced
//! it logs the error and closes, the rest of the relay keeps running.
//! Negative-but-valid outcomes (`PROXY FAIL`, a VPN packet to an address
//! nobody is bound to) are not errors and never reach this type.

use crate::vpn::packet::PacketError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed command '{line}': {reason}")]
    MalformedCommand { line: String, reason: String },

    #[error("unhandled command: '{0}'")]
    UnknownCommand(String),

    #[error("unknown VPN code '{0}'")]
    UnknownVpnCode(String),

    #[error("session is already bound to a {0} target")]
    AlreadyBound(&'static str),

    #[error("malformed VPN packet: {0}")]
    MalformedPacket(#[from] PacketError),

    #[error("malformed HTTP request: {0}")]
    MalformedHttp(String),

    #[error("ignoring request to proxy to {0}")]
    ForbiddenConnect(String),

    #[error("invalid GET request for {0}")]
    UnknownPath(String),
}

impl RelayError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Self::MalformedCommand {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}
