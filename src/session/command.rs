//! Text command grammar.
//!
//! ```text
//! MAKEVPN <game>
//! VPN <code> <ignored> <ignored> <ignored> <bindport>
//! PROXY <family> <TCP|UDP> <ipv4> <port>
//! PROXY <TCP|UDP> <ipv4> <port>
//! ```
//!
//! Lines are sanitized before parsing and split on single spaces. Trailing
//! extra tokens are ignored.

use std::net::Ipv4Addr;

use crate::error::RelayError;
use crate::target::Protocol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    MakeVpn { game: String },
    Vpn { code: String, bind_port: u16 },
    Proxy { protocol: Protocol, ip: Ipv4Addr, port: u16 },
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, RelayError> {
        let tokens: Vec<&str> = line.split(' ').collect();
        match tokens[0] {
            "MAKEVPN" => {
                let game = token(line, &tokens, 1, "game")?;
                Ok(Self::MakeVpn {
                    game: game.to_string(),
                })
            }
            "VPN" => {
                if tokens.len() < 6 {
                    return Err(RelayError::malformed(
                        line,
                        format!("expected 6 tokens, found {}", tokens.len()),
                    ));
                }
                let code = token(line, &tokens, 1, "code")?;
                let bind_port = parse_port(line, tokens[5])?;
                Ok(Self::Vpn {
                    code: code.to_string(),
                    bind_port,
                })
            }
            "PROXY" => {
                // Short form omits the address family token.
                let offset = match tokens.len() {
                    4 => 1,
                    n if n >= 5 => 2,
                    n => {
                        return Err(RelayError::malformed(
                            line,
                            format!("expected 5 tokens, found {n}"),
                        ))
                    }
                };
                let protocol = match tokens[offset] {
                    "TCP" => Protocol::Tcp,
                    "UDP" => Protocol::Udp,
                    other => {
                        return Err(RelayError::malformed(
                            line,
                            format!("unknown protocol '{other}'"),
                        ))
                    }
                };
                let ip: Ipv4Addr = tokens[offset + 1].parse().map_err(|_| {
                    RelayError::malformed(line, format!("bad IPv4 address '{}'", tokens[offset + 1]))
                })?;
                let port = parse_port(line, tokens[offset + 2])?;
                Ok(Self::Proxy { protocol, ip, port })
            }
            _ => Err(RelayError::UnknownCommand(line.to_string())),
        }
    }
}

fn token<'a>(
    line: &str,
    tokens: &[&'a str],
    index: usize,
    what: &str,
) -> Result<&'a str, RelayError> {
    match tokens.get(index) {
        Some(&t) if !t.is_empty() => Ok(t),
        _ => Err(RelayError::malformed(line, format!("missing {what}"))),
    }
}

/// Port in `1..=65535`.
fn parse_port(line: &str, raw: &str) -> Result<u16, RelayError> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(RelayError::malformed(line, format!("bad port '{raw}'"))),
    }
}
