//! ---
//! msp_section: "01-wire-protocol"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Frame codec for the MSP V1 and V2 wire formats."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Numeric identifier selecting a request/response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandCode(pub u16);

impl CommandCode {
    /// V1 command byte announcing a tunnelled V2 body.
    pub const V2_ESCAPE: CommandCode = CommandCode(255);

    /// Wrap a raw code.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Whether the code can be carried directly in a V1 command byte.
    pub const fn fits_v1(self) -> bool {
        self.0 < Self::V2_ESCAPE.0
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for CommandCode {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<u8> for CommandCode {
    fn from(raw: u8) -> Self {
        Self(u16::from(raw))
    }
}

/// Direction marker carried in the third header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// `<`: host to flight controller.
    Request,
    /// `>`: flight controller reply.
    Response,
    /// `!`: flight controller rejected the command.
    Error,
}

impl Direction {
    /// Wire byte for this direction.
    pub const fn marker(self) -> u8 {
        match self {
            Direction::Request => b'<',
            Direction::Response => b'>',
            Direction::Error => b'!',
        }
    }

    /// Parse a wire byte.
    pub const fn from_marker(byte: u8) -> Option<Self> {
        match byte {
            b'<' => Some(Direction::Request),
            b'>' => Some(Direction::Response),
            b'!' => Some(Direction::Error),
            _ => None,
        }
    }
}

/// Frame layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    /// Legacy 8-bit command / 8-bit length layout.
    V1,
    /// Extended 16-bit command / 16-bit length layout with CRC-8.
    V2,
    /// V2 body tunnelled inside a V1 frame with command `255`.
    V2OverV1,
}

impl ProtocolVersion {
    /// Byte following the `$` sentinel.
    pub const fn protocol_marker(self) -> u8 {
        match self {
            ProtocolVersion::V1 | ProtocolVersion::V2OverV1 => b'M',
            ProtocolVersion::V2 => b'X',
        }
    }
}

/// A parsed wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Layout the frame arrived in.
    pub version: ProtocolVersion,
    /// Direction marker.
    pub direction: Direction,
    /// V2 flag byte; always zero for plain V1 frames.
    pub flags: u8,
    /// Command code (the inner code for tunnelled frames).
    pub code: CommandCode,
    /// Payload bytes.
    pub payload: Bytes,
    /// Length declared by the header.
    pub declared_len: usize,
    /// Checksum byte as received (the inner CRC for tunnelled frames).
    pub checksum: u8,
}

impl Frame {
    /// Build an outgoing frame; `declared_len` and `checksum` are filled in
    /// when the frame is encoded.
    pub fn new(
        version: ProtocolVersion,
        direction: Direction,
        code: CommandCode,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        Self {
            version,
            direction,
            flags: 0,
            code,
            declared_len: payload.len(),
            payload,
            checksum: 0,
        }
    }

    /// Whether the flight controller flagged this frame as an error reply.
    pub fn is_error(&self) -> bool {
        self.direction == Direction::Error
    }

    /// Encode this frame back into wire bytes.
    pub fn to_bytes(&self) -> Result<Bytes, crate::EncodeError> {
        crate::codec::encode_with_flags(
            self.version,
            self.direction,
            self.flags,
            self.code,
            &self.payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_markers_roundtrip() {
        for direction in [Direction::Request, Direction::Response, Direction::Error] {
            assert_eq!(Direction::from_marker(direction.marker()), Some(direction));
        }
        assert_eq!(Direction::from_marker(b'?'), None);
    }

    #[test]
    fn v1_range_stops_before_escape() {
        assert!(CommandCode(254).fits_v1());
        assert!(!CommandCode::V2_ESCAPE.fits_v1());
        assert!(!CommandCode(0x1F03).fits_v1());
    }
}
