//! Encapsulation header for virtual-LAN datagrams.
//!
//! ```text
//! offset 0  : u32     magic 0x778B4CF3
//! offset 4  : u8[4]   IPv4 address
//! offset 8  : u16     port
//! offset 10 : u16     payload length N
//! offset 12 : u8[N]   payload
//! ```
//!
//! All integers are big-endian. Clients fill the address/port with the
//! destination; the relay overwrites them with the sender's identity before
//! delivery, so the receiver reads them as the source.

use std::net::{Ipv4Addr, SocketAddrV4};

/// Leading magic of every encapsulated packet.
pub const MAGIC: u32 = 0x778B_4CF3;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("frame of {0} bytes is shorter than the 12-byte header")]
    Truncated(usize),

    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("header declares {declared} payload bytes but frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub addr: SocketAddrV4,
    pub payload_len: u16,
}

impl PacketHeader {
    /// Validate `frame` and decode its header.
    pub fn parse(frame: &[u8]) -> Result<Self, PacketError> {
        if frame.len() < HEADER_LEN {
            return Err(PacketError::Truncated(frame.len()));
        }

        let magic = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if magic != MAGIC {
            return Err(PacketError::BadMagic(magic));
        }

        let ip = Ipv4Addr::new(frame[4], frame[5], frame[6], frame[7]);
        let port = u16::from_be_bytes([frame[8], frame[9]]);
        let payload_len = u16::from_be_bytes([frame[10], frame[11]]);

        let actual = frame.len() - HEADER_LEN;
        if actual != usize::from(payload_len) {
            return Err(PacketError::LengthMismatch {
                declared: usize::from(payload_len),
                actual,
            });
        }

        Ok(Self {
            addr: SocketAddrV4::new(ip, port),
            payload_len,
        })
    }

    /// Overwrite the address and port fields of an already validated frame.
    pub fn stamp(frame: &mut [u8], addr: SocketAddrV4) {
        frame[4..8].copy_from_slice(&addr.ip().octets());
        frame[8..10].copy_from_slice(&addr.port().to_be_bytes());
    }
}

/// Build a complete frame addressed to `addr`.
///
/// Payloads longer than `u16::MAX` cannot be represented and are truncated.
pub fn encode(addr: SocketAddrV4, payload: &[u8]) -> Vec<u8> {
    let len = payload.len().min(usize::from(u16::MAX));
    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&MAGIC.to_be_bytes());
    frame.extend_from_slice(&addr.ip().octets());
    frame.extend_from_slice(&addr.port().to_be_bytes());
    frame.extend_from_slice(&(len as u16).to_be_bytes());
    frame.extend_from_slice(&payload[..len]);
    frame
}
