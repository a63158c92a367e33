//! ---
//! msp_section: "03-transport"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Endpoint addressing for TCP and serial links."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::TransportError;

/// Baud rate used when a serial endpoint does not name one.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Where the flight controller (or a proxy/simulator) is reachable.
///
/// Accepted spellings:
///
/// | input | result |
/// |---|---|
/// | `tcp://host:port`, `host:port` | TCP |
/// | `54320` | TCP on `127.0.0.1:54320` |
/// | `serial:///dev/ttyACM0?baud=57600`, `/dev/ttyUSB0`, `COM3` | serial |
#[derive(Debug, Clone, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub enum Endpoint {
    /// TCP socket, `host:port`.
    Tcp {
        /// Address to connect to.
        addr: String,
    },
    /// Serial device.
    Serial {
        /// Device path.
        path: String,
        /// Line speed.
        baud_rate: u32,
    },
}

impl Endpoint {
    /// TCP endpoint.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Endpoint::Tcp { addr: addr.into() }
    }

    /// Serial endpoint.
    pub fn serial(path: impl Into<String>, baud_rate: u32) -> Self {
        Endpoint::Serial {
            path: path.into(),
            baud_rate,
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let invalid = || TransportError::InvalidEndpoint(s.to_string());
        if input.is_empty() {
            return Err(invalid());
        }
        if let Some(addr) = input.strip_prefix("tcp://") {
            return parse_host_port(addr).ok_or_else(invalid);
        }
        if let Some(rest) = input.strip_prefix("serial://") {
            let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
            if path.is_empty() {
                return Err(invalid());
            }
            let mut baud_rate = DEFAULT_BAUD_RATE;
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                match pair.split_once('=') {
                    Some(("baud", value)) => {
                        baud_rate = value.parse().map_err(|_| invalid())?;
                    }
                    _ => return Err(invalid()),
                }
            }
            return Ok(Endpoint::serial(path, baud_rate));
        }
        if let Ok(port) = input.parse::<u16>() {
            return Ok(Endpoint::tcp(format!("127.0.0.1:{port}")));
        }
        if input.starts_with('/') || input.to_ascii_uppercase().starts_with("COM") {
            return Ok(Endpoint::serial(input, DEFAULT_BAUD_RATE));
        }
        parse_host_port(input).ok_or_else(invalid)
    }
}

fn parse_host_port(addr: &str) -> Option<Endpoint> {
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(Endpoint::tcp(addr))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { addr } => write!(f, "tcp://{addr}"),
            Endpoint::Serial { path, baud_rate } => write!(f, "serial://{path}?baud={baud_rate}"),
        }
    }
}
