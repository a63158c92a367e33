//! ---
//! msp_section: "01-wire-protocol"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Frame codec for the MSP V1 and V2 wire formats."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
//! Byte-level framing for the MultiWii Serial Protocol family.
//!
//! Two frame layouts are supported:
//!
//! ```text
//! V1: '$' 'M' <dir> len:u8 cmd:u8 payload[len] xor:u8
//! V2: '$' 'X' <dir> flags:u8 cmd:u16le len:u16le payload[len] crc8:u8
//! ```
//!
//! A V1 frame whose command byte is `255` tunnels a complete V2 body, which
//! lets V1-only links reach the extended command space.
#![warn(missing_docs)]

pub mod codec;
pub mod crc;
pub mod frame;

pub use codec::{
    encode, encode_request, DecoderStats, FrameDecoder, V1_MAX_PAYLOAD_LEN,
    V2_MAX_PAYLOAD_LEN, V2_OVER_V1_MAX_PAYLOAD_LEN,
};
pub use frame::{CommandCode, Direction, Frame, ProtocolVersion};

/// Errors raised while turning a command into wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The payload does not fit the length field of the chosen layout.
    #[error("payload of {len} bytes exceeds the {max} byte limit of {version:?} frames")]
    PayloadTooLarge {
        /// Payload length that was requested.
        len: usize,
        /// Maximum payload the layout can carry.
        max: usize,
        /// Layout that rejected the payload.
        version: ProtocolVersion,
    },
    /// The command code cannot be expressed in the chosen layout.
    #[error("command {code} cannot be carried by {version:?} frames")]
    CodeOutOfRange {
        /// Offending command code.
        code: CommandCode,
        /// Layout that rejected the code.
        version: ProtocolVersion,
    },
}

/// Malformed header or sentinel conditions detected while scanning a stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// The byte after `$` is neither `M` nor `X`.
    #[error("invalid protocol marker {0:#04x}")]
    InvalidProtocol(u8),
    /// The direction byte is not one of `<`, `>` or `!`.
    #[error("invalid direction marker {0:#04x}")]
    InvalidDirection(u8),
    /// Declared payload length exceeds the decoder limit.
    #[error("declared payload length {len} exceeds limit {max}")]
    PayloadTooLong {
        /// Declared length.
        len: usize,
        /// Configured decoder limit.
        max: usize,
    },
    /// A tunnelled V2 body does not agree with the enclosing V1 length.
    #[error("tunnelled V2 body declares {declared} payload bytes but carries {available}")]
    TunnelLength {
        /// Length declared by the inner V2 header.
        declared: usize,
        /// Payload bytes actually present.
        available: usize,
    },
}

/// Recoverable errors produced by [`FrameDecoder`]. The decoder keeps its
/// buffer consistent after either variant and can be polled again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Malformed header; the decoder resynchronised on the next `$`.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    /// Checksum or CRC mismatch; the frame was discarded.
    #[error("checksum mismatch on command {code}: expected {expected:#04x}, got {actual:#04x}")]
    Checksum {
        /// Command code read from the corrupted header.
        code: CommandCode,
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum byte carried by the frame.
        actual: u8,
    },
}
