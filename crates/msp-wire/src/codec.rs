//! ---
//! msp_section: "01-wire-protocol"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Frame codec for the MSP V1 and V2 wire formats."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::crc::{crc8_dvb_s2_slice, xor_checksum};
use crate::frame::{CommandCode, Direction, Frame, ProtocolVersion};
use crate::{DecodeError, EncodeError, FramingError};

/// Largest payload a V1 length byte can announce.
pub const V1_MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Largest payload a V2 length field can announce.
pub const V2_MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Largest payload that still fits a V2 body tunnelled through a V1 frame.
pub const V2_OVER_V1_MAX_PAYLOAD_LEN: usize = V1_MAX_PAYLOAD_LEN - V2_BODY_OVERHEAD;

const SENTINEL: u8 = b'$';
const V1_HEADER_LEN: usize = 5;
const V2_HEADER_LEN: usize = 8;
// flags + cmd16 + len16 + crc8
const V2_BODY_OVERHEAD: usize = 6;

/// Encode a frame with a zero V2 flag byte.
///
/// ```
/// use msp_wire::{encode, CommandCode, Direction, ProtocolVersion};
///
/// let bytes = encode(ProtocolVersion::V1, Direction::Request, CommandCode(102), &[]).unwrap();
/// assert_eq!(&bytes[..], &[0x24, 0x4D, 0x3C, 0x00, 0x66, 0x66]);
/// ```
pub fn encode(
    version: ProtocolVersion,
    direction: Direction,
    code: CommandCode,
    payload: &[u8],
) -> Result<Bytes, EncodeError> {
    encode_with_flags(version, direction, 0, code, payload)
}

/// Encode a host request, preferring the compact V1 layout whenever the code
/// and payload allow it.
pub fn encode_request(code: CommandCode, payload: &[u8]) -> Result<Bytes, EncodeError> {
    let version = if code.fits_v1() && payload.len() <= V1_MAX_PAYLOAD_LEN {
        ProtocolVersion::V1
    } else {
        ProtocolVersion::V2
    };
    encode(version, Direction::Request, code, payload)
}

pub(crate) fn encode_with_flags(
    version: ProtocolVersion,
    direction: Direction,
    flags: u8,
    code: CommandCode,
    payload: &[u8],
) -> Result<Bytes, EncodeError> {
    match version {
        ProtocolVersion::V1 => encode_v1(direction, code, payload),
        ProtocolVersion::V2 => encode_v2(direction, flags, code, payload),
        ProtocolVersion::V2OverV1 => encode_v2_over_v1(direction, flags, code, payload),
    }
}

fn encode_v1(direction: Direction, code: CommandCode, payload: &[u8]) -> Result<Bytes, EncodeError> {
    if !code.fits_v1() {
        return Err(EncodeError::CodeOutOfRange {
            code,
            version: ProtocolVersion::V1,
        });
    }
    if payload.len() > V1_MAX_PAYLOAD_LEN {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max: V1_MAX_PAYLOAD_LEN,
            version: ProtocolVersion::V1,
        });
    }
    let mut buf = BytesMut::with_capacity(V1_HEADER_LEN + payload.len() + 1);
    put_preamble(&mut buf, ProtocolVersion::V1, direction);
    buf.put_u8(payload.len() as u8);
    buf.put_u8(code.get() as u8);
    buf.put_slice(payload);
    let checksum = xor_checksum(&buf[3..]);
    buf.put_u8(checksum);
    Ok(buf.freeze())
}

fn encode_v2(
    direction: Direction,
    flags: u8,
    code: CommandCode,
    payload: &[u8],
) -> Result<Bytes, EncodeError> {
    if payload.len() > V2_MAX_PAYLOAD_LEN {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max: V2_MAX_PAYLOAD_LEN,
            version: ProtocolVersion::V2,
        });
    }
    let mut buf = BytesMut::with_capacity(V2_HEADER_LEN + payload.len() + 1);
    put_preamble(&mut buf, ProtocolVersion::V2, direction);
    put_v2_body(&mut buf, flags, code, payload);
    Ok(buf.freeze())
}

fn encode_v2_over_v1(
    direction: Direction,
    flags: u8,
    code: CommandCode,
    payload: &[u8],
) -> Result<Bytes, EncodeError> {
    if payload.len() > V2_OVER_V1_MAX_PAYLOAD_LEN {
        return Err(EncodeError::PayloadTooLarge {
            len: payload.len(),
            max: V2_OVER_V1_MAX_PAYLOAD_LEN,
            version: ProtocolVersion::V2OverV1,
        });
    }
    let body_len = V2_BODY_OVERHEAD + payload.len();
    let mut buf = BytesMut::with_capacity(V1_HEADER_LEN + body_len + 1);
    put_preamble(&mut buf, ProtocolVersion::V2OverV1, direction);
    buf.put_u8(body_len as u8);
    buf.put_u8(CommandCode::V2_ESCAPE.get() as u8);
    put_v2_body(&mut buf, flags, code, payload);
    let checksum = xor_checksum(&buf[3..]);
    buf.put_u8(checksum);
    Ok(buf.freeze())
}

fn put_preamble(buf: &mut BytesMut, version: ProtocolVersion, direction: Direction) {
    buf.put_u8(SENTINEL);
    buf.put_u8(version.protocol_marker());
    buf.put_u8(direction.marker());
}

fn put_v2_body(buf: &mut BytesMut, flags: u8, code: CommandCode, payload: &[u8]) {
    let start = buf.len();
    buf.put_u8(flags);
    buf.put_u16_le(code.get());
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    let crc = crc8_dvb_s2_slice(&buf[start..]);
    buf.put_u8(crc);
}

/// Counters describing what the decoder has seen so far.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames handed out successfully.
    pub frames: u64,
    /// Bytes skipped while looking for a `$` sentinel.
    pub garbage_bytes: u64,
    /// Frames dropped because of a checksum mismatch.
    pub checksum_errors: u64,
    /// Malformed headers encountered.
    pub framing_errors: u64,
}

enum Parse {
    Incomplete,
    Frame(Frame, usize),
    Invalid(DecodeError, usize),
}

/// Incremental decoder that turns an arbitrary chunked byte stream into
/// frames. Partial frames stay buffered between calls.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_payload_len: usize,
    stats: DecoderStats,
}

impl FrameDecoder {
    /// Decoder accepting any payload length the V2 layout can express.
    pub fn new() -> Self {
        Self::with_max_payload_len(V2_MAX_PAYLOAD_LEN)
    }

    /// Decoder that rejects V2 headers declaring more than `max_payload_len`
    /// bytes, so a corrupted length cannot stall the stream for 64 KiB.
    pub fn with_max_payload_len(max_payload_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(512),
            max_payload_len: max_payload_len.min(V2_MAX_PAYLOAD_LEN),
            stats: DecoderStats::default(),
        }
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Counters accumulated since construction.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drop any buffered partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Pull the next frame out of the buffer.
    ///
    /// Returns `None` when more bytes are needed. Errors are recoverable:
    /// the offending bytes are skipped and the next call resumes scanning.
    pub fn next_frame(&mut self) -> Option<Result<Frame, DecodeError>> {
        match self.buf.iter().position(|&b| b == SENTINEL) {
            Some(0) => {}
            Some(offset) => {
                self.stats.garbage_bytes += offset as u64;
                trace!(skipped = offset, "resynchronising on sentinel");
                self.buf.advance(offset);
            }
            None => {
                self.stats.garbage_bytes += self.buf.len() as u64;
                self.buf.clear();
                return None;
            }
        }

        match self.parse() {
            Parse::Incomplete => None,
            Parse::Frame(frame, consumed) => {
                self.buf.advance(consumed);
                self.stats.frames += 1;
                Some(Ok(frame))
            }
            Parse::Invalid(err, consumed) => {
                self.buf.advance(consumed);
                match err {
                    DecodeError::Checksum { .. } => self.stats.checksum_errors += 1,
                    DecodeError::Framing(_) => self.stats.framing_errors += 1,
                }
                Some(Err(err))
            }
        }
    }

    fn parse(&self) -> Parse {
        let buf = &self.buf[..];
        if buf.len() < 2 {
            return Parse::Incomplete;
        }
        let is_v2 = match buf[1] {
            b'M' => false,
            b'X' => true,
            other => return Parse::Invalid(FramingError::InvalidProtocol(other).into(), 1),
        };
        if buf.len() < 3 {
            return Parse::Incomplete;
        }
        let Some(direction) = Direction::from_marker(buf[2]) else {
            return Parse::Invalid(FramingError::InvalidDirection(buf[2]).into(), 1);
        };
        if is_v2 {
            self.parse_v2(buf, direction)
        } else {
            parse_v1(buf, direction)
        }
    }

    fn parse_v2(&self, buf: &[u8], direction: Direction) -> Parse {
        if buf.len() < V2_HEADER_LEN {
            return Parse::Incomplete;
        }
        let flags = buf[3];
        let code = CommandCode(u16::from_le_bytes([buf[4], buf[5]]));
        let len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
        if len > self.max_payload_len {
            let err = FramingError::PayloadTooLong {
                len,
                max: self.max_payload_len,
            };
            return Parse::Invalid(err.into(), 1);
        }
        let total = V2_HEADER_LEN + len + 1;
        if buf.len() < total {
            return Parse::Incomplete;
        }
        let expected = crc8_dvb_s2_slice(&buf[3..V2_HEADER_LEN + len]);
        let actual = buf[V2_HEADER_LEN + len];
        if expected != actual {
            return Parse::Invalid(
                DecodeError::Checksum {
                    code,
                    expected,
                    actual,
                },
                1,
            );
        }
        let frame = Frame {
            version: ProtocolVersion::V2,
            direction,
            flags,
            code,
            payload: Bytes::copy_from_slice(&buf[V2_HEADER_LEN..V2_HEADER_LEN + len]),
            declared_len: len,
            checksum: actual,
        };
        Parse::Frame(frame, total)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_v1(buf: &[u8], direction: Direction) -> Parse {
    if buf.len() < V1_HEADER_LEN {
        return Parse::Incomplete;
    }
    let len = buf[3] as usize;
    let code = CommandCode::from(buf[4]);
    let total = V1_HEADER_LEN + len + 1;
    if buf.len() < total {
        return Parse::Incomplete;
    }
    let expected = xor_checksum(&buf[3..V1_HEADER_LEN + len]);
    let actual = buf[V1_HEADER_LEN + len];
    if expected != actual {
        return Parse::Invalid(
            DecodeError::Checksum {
                code,
                expected,
                actual,
            },
            1,
        );
    }
    let payload = &buf[V1_HEADER_LEN..V1_HEADER_LEN + len];
    if code == CommandCode::V2_ESCAPE {
        return match parse_tunnelled_body(payload, direction) {
            Ok(frame) => Parse::Frame(frame, total),
            // The outer frame was intact, so skip all of it.
            Err(err) => Parse::Invalid(err, total),
        };
    }
    let frame = Frame {
        version: ProtocolVersion::V1,
        direction,
        flags: 0,
        code,
        payload: Bytes::copy_from_slice(payload),
        declared_len: len,
        checksum: actual,
    };
    Parse::Frame(frame, total)
}

fn parse_tunnelled_body(body: &[u8], direction: Direction) -> Result<Frame, DecodeError> {
    if body.len() < V2_BODY_OVERHEAD {
        return Err(FramingError::TunnelLength {
            declared: 0,
            available: 0,
        }
        .into());
    }
    let flags = body[0];
    let code = CommandCode(u16::from_le_bytes([body[1], body[2]]));
    let declared = u16::from_le_bytes([body[3], body[4]]) as usize;
    let available = body.len() - V2_BODY_OVERHEAD;
    if declared != available {
        return Err(FramingError::TunnelLength {
            declared,
            available,
        }
        .into());
    }
    let crc_at = 5 + declared;
    let expected = crc8_dvb_s2_slice(&body[..crc_at]);
    let actual = body[crc_at];
    if expected != actual {
        return Err(DecodeError::Checksum {
            code,
            expected,
            actual,
        });
    }
    Ok(Frame {
        version: ProtocolVersion::V2OverV1,
        direction,
        flags,
        code,
        payload: Bytes::copy_from_slice(&body[5..crc_at]),
        declared_len: declared,
        checksum: actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut FrameDecoder) -> Vec<Result<Frame, DecodeError>> {
        std::iter::from_fn(|| decoder.next_frame()).collect()
    }

    #[test]
    fn v1_request_with_empty_payload() {
        let bytes = encode(ProtocolVersion::V1, Direction::Request, CommandCode(102), &[])
            .expect("encode");
        assert_eq!(hex::encode(&bytes), "244d3c006666");
    }

    #[test]
    fn v2_request_uses_crc() {
        let bytes = encode(
            ProtocolVersion::V2,
            Direction::Request,
            CommandCode(0x1F03),
            &[],
        )
        .expect("encode");
        assert_eq!(hex::encode(&bytes), "24583c00031f000013");

        let bytes = encode(
            ProtocolVersion::V2,
            Direction::Request,
            CommandCode(100),
            &[0xAA, 0x55],
        )
        .expect("encode");
        assert_eq!(hex::encode(&bytes), "24583c0064000200aa55fc");
    }

    #[test]
    fn v1_rejects_oversized_payload_and_wide_codes() {
        let payload = vec![0u8; 256];
        assert!(matches!(
            encode(ProtocolVersion::V1, Direction::Request, CommandCode(1), &payload),
            Err(EncodeError::PayloadTooLarge { max: 255, .. })
        ));
        assert!(matches!(
            encode(ProtocolVersion::V1, Direction::Request, CommandCode(0x1F03), &[]),
            Err(EncodeError::CodeOutOfRange { .. })
        ));
        assert!(encode(ProtocolVersion::V1, Direction::Request, CommandCode(1), &payload[..255]).is_ok());
    }

    #[test]
    fn v2_rejects_payload_beyond_u16() {
        let payload = vec![0u8; V2_MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode(ProtocolVersion::V2, Direction::Request, CommandCode(1), &payload),
            Err(EncodeError::PayloadTooLarge { max: 65535, .. })
        ));
    }

    #[test]
    fn request_layout_selection() {
        assert_eq!(encode_request(CommandCode(106), &[]).unwrap()[1], b'M');
        assert_eq!(encode_request(CommandCode(0x1F03), &[]).unwrap()[1], b'X');
        assert_eq!(encode_request(CommandCode(200), &[0; 300]).unwrap()[1], b'X');
    }

    #[test]
    fn decodes_frames_split_across_chunks() {
        let bytes = encode(
            ProtocolVersion::V1,
            Direction::Response,
            CommandCode(108),
            &[1, 0, 2, 0, 90, 0],
        )
        .unwrap();
        let mut decoder = FrameDecoder::new();
        for byte in bytes.iter() {
            assert!(decoder.next_frame().is_none());
            decoder.extend(&[*byte]);
        }
        let frame = decoder.next_frame().expect("frame").expect("valid");
        assert_eq!(frame.code, CommandCode(108));
        assert_eq!(frame.direction, Direction::Response);
        assert_eq!(&frame.payload[..], &[1, 0, 2, 0, 90, 0]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn resyncs_after_garbage() {
        let frame = encode(ProtocolVersion::V2, Direction::Response, CommandCode(0x1F03), &[7, 8]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0x00, 0xFF, b'M', b'<', 0x13]);
        decoder.extend(&frame);
        let results = drain(&mut decoder);
        assert_eq!(results.len(), 1);
        let decoded = results[0].as_ref().expect("valid frame");
        assert_eq!(decoded.code, CommandCode(0x1F03));
        assert_eq!(decoder.stats().garbage_bytes, 5);
    }

    #[test]
    fn bad_markers_are_framing_errors_then_recover() {
        let frame = encode(ProtocolVersion::V1, Direction::Response, CommandCode(1), &[0, 1, 46]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"$Q");
        decoder.extend(b"$M?");
        decoder.extend(&frame);
        let results = drain(&mut decoder);
        assert!(matches!(
            results[0],
            Err(DecodeError::Framing(FramingError::InvalidProtocol(b'Q')))
        ));
        assert!(matches!(
            results[1],
            Err(DecodeError::Framing(FramingError::InvalidDirection(b'?')))
        ));
        assert_eq!(results[2].as_ref().unwrap().code, CommandCode(1));
        assert_eq!(decoder.stats().framing_errors, 2);
    }

    #[test]
    fn every_single_byte_corruption_is_a_checksum_error() {
        let bytes = encode(
            ProtocolVersion::V1,
            Direction::Response,
            CommandCode(106),
            &[2, 9, 0x10, 0x20, 0x30, 0x40],
        )
        .unwrap();
        // Offsets 0..=2 are the sentinel and markers, 3 is the length byte.
        for offset in 4..bytes.len() {
            let mut corrupted = bytes.to_vec();
            corrupted[offset] ^= 0x01;
            let mut decoder = FrameDecoder::new();
            decoder.extend(&corrupted);
            let first = decoder.next_frame().expect("a result");
            assert!(
                matches!(first, Err(DecodeError::Checksum { .. })),
                "offset {offset} was accepted"
            );
            assert!(drain(&mut decoder).iter().all(|r| r.is_err()));
        }
    }

    #[test]
    fn corrupted_frame_does_not_swallow_the_next_one() {
        let mut stream = encode(ProtocolVersion::V1, Direction::Response, CommandCode(2), b"BTFL")
            .unwrap()
            .to_vec();
        let last = stream.len() - 1;
        stream[last] ^= 0xFF;
        stream.extend_from_slice(
            &encode(ProtocolVersion::V1, Direction::Response, CommandCode(3), &[4, 5, 0]).unwrap(),
        );
        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);
        let results = drain(&mut decoder);
        assert!(matches!(results[0], Err(DecodeError::Checksum { .. })));
        let good: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
        assert_eq!(good.len(), 1);
        assert_eq!(good[0].code, CommandCode(3));
    }

    #[test]
    fn v2_over_v1_tunnel_roundtrip() {
        let bytes = encode(
            ProtocolVersion::V2OverV1,
            Direction::Request,
            CommandCode(0x1F03),
            &[1, 2, 3],
        )
        .unwrap();
        assert_eq!(&bytes[..3], b"$M<");
        assert_eq!(bytes[4], 255);
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.version, ProtocolVersion::V2OverV1);
        assert_eq!(frame.code, CommandCode(0x1F03));
        assert_eq!(&frame.payload[..], &[1, 2, 3]);
        assert_eq!(frame.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn tunnel_with_bad_inner_crc_is_rejected() {
        let mut bytes = encode(
            ProtocolVersion::V2OverV1,
            Direction::Response,
            CommandCode(0x1F03),
            &[9],
        )
        .unwrap()
        .to_vec();
        // Corrupt the inner CRC and patch the outer XOR so only the CRC fails.
        let crc_at = bytes.len() - 2;
        bytes[crc_at] ^= 0x10;
        let outer = bytes.len() - 1;
        bytes[outer] ^= 0x10;
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert!(matches!(
            decoder.next_frame(),
            Some(Err(DecodeError::Checksum { code: CommandCode(0x1F03), .. }))
        ));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn oversized_v2_length_is_a_framing_error() {
        let mut decoder = FrameDecoder::with_max_payload_len(64);
        decoder.extend(&[b'$', b'X', b'>', 0, 1, 0, 0xFF, 0xFF]);
        assert!(matches!(
            decoder.next_frame(),
            Some(Err(DecodeError::Framing(FramingError::PayloadTooLong { len: 65535, max: 64 })))
        ));
    }

    #[test]
    fn error_direction_is_preserved() {
        let bytes = encode(ProtocolVersion::V1, Direction::Error, CommandCode(160), &[]).unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert!(decoder.next_frame().unwrap().unwrap().is_error());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn any_frame() -> impl Strategy<Value = (ProtocolVersion, CommandCode, Vec<u8>)> {
            prop_oneof![
                (0u16..255, prop::collection::vec(any::<u8>(), 0..64))
                    .prop_map(|(code, payload)| (ProtocolVersion::V1, CommandCode(code), payload)),
                (any::<u16>(), prop::collection::vec(any::<u8>(), 0..300))
                    .prop_map(|(code, payload)| (ProtocolVersion::V2, CommandCode(code), payload)),
            ]
        }

        proptest! {
            #[test]
            fn decoder_resyncs_after_sentinel_free_garbage(
                garbage in prop::collection::vec(
                    any::<u8>().prop_filter("no sentinel", |b| *b != SENTINEL),
                    0..128,
                ),
                (version, code, payload) in any_frame(),
            ) {
                let bytes = encode(version, Direction::Response, code, &payload).unwrap();
                let mut decoder = FrameDecoder::new();
                decoder.extend(&garbage);
                decoder.extend(&bytes);

                let frame = decoder.next_frame().unwrap().unwrap();
                prop_assert_eq!(frame.version, version);
                prop_assert_eq!(frame.code, code);
                prop_assert_eq!(&frame.payload[..], &payload[..]);
                prop_assert_eq!(decoder.stats().garbage_bytes, garbage.len() as u64);
                prop_assert!(decoder.next_frame().is_none());
            }

            #[test]
            fn single_byte_flip_after_length_fails_the_checksum(
                code in 0u16..255,
                payload in prop::collection::vec(any::<u8>(), 0..64),
                offset in any::<prop::sample::Index>(),
                mask in 1u8..=255,
            ) {
                let mut bytes =
                    encode(ProtocolVersion::V1, Direction::Response, CommandCode(code), &payload)
                        .unwrap()
                        .to_vec();
                let at = 4 + offset.index(bytes.len() - 4);
                bytes[at] ^= mask;

                let mut decoder = FrameDecoder::new();
                decoder.extend(&bytes);
                let first = decoder.next_frame().unwrap();
                prop_assert!(
                    matches!(first, Err(DecodeError::Checksum { .. })),
                    "flip at {} gave {:?}",
                    at,
                    first
                );
            }
        }
    }
}
