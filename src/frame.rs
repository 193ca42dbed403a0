//! HTTP/2 frame parsing and serialization
//!
//! This module implements RFC 7540 Section 4 frame handling:
//! - 9-byte header encode/decode with the reserved bit masked off
//! - Typed decode of all ten frame kinds plus an `Unknown` carrier
//! - Padding stripped on decode, never produced on encode
//! - Payload bounds checked against the configured maximum frame size

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, ErrorCode, Result};
use crate::settings::Settings;

/// HTTP/2 frame header size (RFC 7540 Section 4.1)
pub const FRAME_HEADER_LEN: usize = 9;

/// Frame type octets (RFC 7540 Section 6)
pub const KIND_DATA: u8 = 0x0;
pub const KIND_HEADERS: u8 = 0x1;
pub const KIND_PRIORITY: u8 = 0x2;
pub const KIND_RST_STREAM: u8 = 0x3;
pub const KIND_SETTINGS: u8 = 0x4;
pub const KIND_PUSH_PROMISE: u8 = 0x5;
pub const KIND_PING: u8 = 0x6;
pub const KIND_GOAWAY: u8 = 0x7;
pub const KIND_WINDOW_UPDATE: u8 = 0x8;
pub const KIND_CONTINUATION: u8 = 0x9;

/// END_STREAM flag (DATA, HEADERS)
pub const FLAG_END_STREAM: u8 = 0x1;
/// ACK flag (SETTINGS, PING)
pub const FLAG_ACK: u8 = 0x1;
/// END_HEADERS flag (HEADERS, PUSH_PROMISE, CONTINUATION)
pub const FLAG_END_HEADERS: u8 = 0x4;
/// PADDED flag (DATA, HEADERS, PUSH_PROMISE)
pub const FLAG_PADDED: u8 = 0x8;
/// PRIORITY flag (HEADERS)
pub const FLAG_PRIORITY: u8 = 0x20;

/// A decoded HTTP/2 frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length (24 bits on the wire)
    pub length: usize,
    /// Frame type octet
    pub kind: u8,
    /// Frame flags
    pub flags: u8,
    /// Stream id (31 bits, reserved bit masked)
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parse a header from exactly `FRAME_HEADER_LEN` bytes
    #[inline]
    pub fn parse(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= FRAME_HEADER_LEN);
        let length =
            ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
        let stream_id = ((u32::from(bytes[5]) & 0x7f) << 24)
            | (u32::from(bytes[6]) << 16)
            | (u32::from(bytes[7]) << 8)
            | u32::from(bytes[8]);
        FrameHeader {
            length,
            kind: bytes[3],
            flags: bytes[4],
            stream_id,
        }
    }

    /// Encode the header into `dst`
    #[inline]
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8((self.length >> 16) as u8);
        dst.put_u8((self.length >> 8) as u8);
        dst.put_u8(self.length as u8);
        dst.put_u8(self.kind);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & 0x7fff_ffff);
    }
}

/// A decoded HTTP/2 frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// DATA (RFC 7540 Section 6.1)
    Data {
        stream_id: u32,
        data: Bytes,
        end_stream: bool,
    },
    /// HEADERS (Section 6.2); the fragment is an opaque header block
    Headers {
        stream_id: u32,
        fragment: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    /// PRIORITY (Section 6.3)
    Priority {
        stream_id: u32,
        dependency: u32,
        exclusive: bool,
        weight: u8,
    },
    /// RST_STREAM (Section 6.4)
    RstStream { stream_id: u32, code: ErrorCode },
    /// SETTINGS (Section 6.5)
    Settings { ack: bool, settings: Settings },
    /// PUSH_PROMISE (Section 6.6)
    PushPromise {
        stream_id: u32,
        promised_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    /// PING (Section 6.7)
    Ping { ack: bool, payload: [u8; 8] },
    /// GOAWAY (Section 6.8)
    GoAway {
        last_stream_id: u32,
        code: ErrorCode,
        debug_data: Bytes,
    },
    /// WINDOW_UPDATE (Section 6.9)
    WindowUpdate { stream_id: u32, increment: u32 },
    /// CONTINUATION (Section 6.10)
    Continuation {
        stream_id: u32,
        fragment: Bytes,
        end_headers: bool,
    },
    /// A frame kind this crate does not model
    Unknown {
        kind: u8,
        flags: u8,
        stream_id: u32,
        payload: Bytes,
    },
}

impl Frame {
    /// The stream id this frame is addressed to (0 for connection-level kinds)
    #[inline]
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    /// Whether this frame belongs to a single stream rather than the connection
    ///
    /// WINDOW_UPDATE counts only when addressed to a nonzero id; `Unknown`
    /// frames never count and fall to the connection-level catch-all.
    #[inline]
    pub fn is_stream_frame(&self) -> bool {
        match self {
            Frame::Data { .. }
            | Frame::Headers { .. }
            | Frame::Priority { .. }
            | Frame::RstStream { .. }
            | Frame::PushPromise { .. }
            | Frame::Continuation { .. } => true,
            Frame::WindowUpdate { stream_id, .. } => *stream_id != 0,
            _ => false,
        }
    }

    /// Frame kind name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Headers { .. } => "HEADERS",
            Frame::Priority { .. } => "PRIORITY",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::PushPromise { .. } => "PUSH_PROMISE",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Continuation { .. } => "CONTINUATION",
            Frame::Unknown { .. } => "UNKNOWN",
        }
    }

    /// Encode the frame into `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Data {
                stream_id,
                data,
                end_stream,
            } => {
                let flags = if *end_stream { FLAG_END_STREAM } else { 0 };
                header(data.len(), KIND_DATA, flags, *stream_id).encode(dst);
                dst.put_slice(data);
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
            } => {
                let mut flags = 0;
                if *end_stream {
                    flags |= FLAG_END_STREAM;
                }
                if *end_headers {
                    flags |= FLAG_END_HEADERS;
                }
                header(fragment.len(), KIND_HEADERS, flags, *stream_id).encode(dst);
                dst.put_slice(fragment);
            }
            Frame::Priority {
                stream_id,
                dependency,
                exclusive,
                weight,
            } => {
                header(5, KIND_PRIORITY, 0, *stream_id).encode(dst);
                let mut dep = dependency & 0x7fff_ffff;
                if *exclusive {
                    dep |= 0x8000_0000;
                }
                dst.put_u32(dep);
                dst.put_u8(*weight);
            }
            Frame::RstStream { stream_id, code } => {
                header(4, KIND_RST_STREAM, 0, *stream_id).encode(dst);
                dst.put_u32(code.as_u32());
            }
            Frame::Settings { ack, settings } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                let len = if *ack { 0 } else { settings.encoded_len() };
                header(len, KIND_SETTINGS, flags, 0).encode(dst);
                if !*ack {
                    settings.encode_into(dst);
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_id,
                fragment,
                end_headers,
            } => {
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                header(4 + fragment.len(), KIND_PUSH_PROMISE, flags, *stream_id).encode(dst);
                dst.put_u32(promised_id & 0x7fff_ffff);
                dst.put_slice(fragment);
            }
            Frame::Ping { ack, payload } => {
                let flags = if *ack { FLAG_ACK } else { 0 };
                header(8, KIND_PING, flags, 0).encode(dst);
                dst.put_slice(payload);
            }
            Frame::GoAway {
                last_stream_id,
                code,
                debug_data,
            } => {
                header(8 + debug_data.len(), KIND_GOAWAY, 0, 0).encode(dst);
                dst.put_u32(last_stream_id & 0x7fff_ffff);
                dst.put_u32(code.as_u32());
                dst.put_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                header(4, KIND_WINDOW_UPDATE, 0, *stream_id).encode(dst);
                dst.put_u32(increment & 0x7fff_ffff);
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let flags = if *end_headers { FLAG_END_HEADERS } else { 0 };
                header(fragment.len(), KIND_CONTINUATION, flags, *stream_id).encode(dst);
                dst.put_slice(fragment);
            }
            Frame::Unknown {
                kind,
                flags,
                stream_id,
                payload,
            } => {
                header(payload.len(), *kind, *flags, *stream_id).encode(dst);
                dst.put_slice(payload);
            }
        }
    }
}

#[inline]
fn header(length: usize, kind: u8, flags: u8, stream_id: u32) -> FrameHeader {
    FrameHeader {
        length,
        kind,
        flags,
        stream_id,
    }
}

/// Decode one frame from the front of `src`, if a complete one is buffered
///
/// Returns `Ok(None)` when more bytes are needed. On success the consumed
/// bytes are removed from `src`.
pub fn decode(src: &mut BytesMut, max_frame_size: u32) -> Result<Option<Frame>> {
    if src.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let head = FrameHeader::parse(&src[..FRAME_HEADER_LEN]);
    if head.length > max_frame_size as usize {
        return Err(Error::Codec("frame exceeds the maximum frame size"));
    }
    if src.len() < FRAME_HEADER_LEN + head.length {
        return Ok(None);
    }
    src.advance(FRAME_HEADER_LEN);
    let payload = src.split_to(head.length).freeze();
    decode_payload(head, payload).map(Some)
}

fn decode_payload(head: FrameHeader, mut payload: Bytes) -> Result<Frame> {
    match head.kind {
        KIND_DATA => {
            let data = strip_padding(head.flags, payload)?;
            Ok(Frame::Data {
                stream_id: head.stream_id,
                data,
                end_stream: head.flags & FLAG_END_STREAM != 0,
            })
        }
        KIND_HEADERS => {
            let mut body = strip_padding(head.flags, payload)?;
            if head.flags & FLAG_PRIORITY != 0 {
                if body.len() < 5 {
                    return Err(Error::Codec("HEADERS priority field truncated"));
                }
                body.advance(5);
            }
            Ok(Frame::Headers {
                stream_id: head.stream_id,
                fragment: body,
                end_stream: head.flags & FLAG_END_STREAM != 0,
                end_headers: head.flags & FLAG_END_HEADERS != 0,
            })
        }
        KIND_PRIORITY => {
            if payload.len() != 5 {
                return Err(Error::Codec("PRIORITY payload must be 5 octets"));
            }
            let raw = payload.get_u32();
            Ok(Frame::Priority {
                stream_id: head.stream_id,
                dependency: raw & 0x7fff_ffff,
                exclusive: raw & 0x8000_0000 != 0,
                weight: payload.get_u8(),
            })
        }
        KIND_RST_STREAM => {
            if payload.len() != 4 {
                return Err(Error::Codec("RST_STREAM payload must be 4 octets"));
            }
            Ok(Frame::RstStream {
                stream_id: head.stream_id,
                code: ErrorCode::from_u32(payload.get_u32()),
            })
        }
        KIND_SETTINGS => {
            let ack = head.flags & FLAG_ACK != 0;
            if ack && !payload.is_empty() {
                return Err(Error::Codec("SETTINGS ACK must carry no payload"));
            }
            let settings = if ack {
                Settings::default()
            } else {
                Settings::decode(&payload)?
            };
            Ok(Frame::Settings { ack, settings })
        }
        KIND_PUSH_PROMISE => {
            let mut body = strip_padding(head.flags, payload)?;
            if body.len() < 4 {
                return Err(Error::Codec("PUSH_PROMISE promised id truncated"));
            }
            let promised_id = body.get_u32() & 0x7fff_ffff;
            Ok(Frame::PushPromise {
                stream_id: head.stream_id,
                promised_id,
                fragment: body,
                end_headers: head.flags & FLAG_END_HEADERS != 0,
            })
        }
        KIND_PING => {
            if payload.len() != 8 {
                return Err(Error::Codec("PING payload must be 8 octets"));
            }
            let mut opaque = [0u8; 8];
            opaque.copy_from_slice(&payload);
            Ok(Frame::Ping {
                ack: head.flags & FLAG_ACK != 0,
                payload: opaque,
            })
        }
        KIND_GOAWAY => {
            if payload.len() < 8 {
                return Err(Error::Codec("GOAWAY payload must be at least 8 octets"));
            }
            let last_stream_id = payload.get_u32() & 0x7fff_ffff;
            let code = ErrorCode::from_u32(payload.get_u32());
            Ok(Frame::GoAway {
                last_stream_id,
                code,
                debug_data: payload,
            })
        }
        KIND_WINDOW_UPDATE => {
            if payload.len() != 4 {
                return Err(Error::Codec("WINDOW_UPDATE payload must be 4 octets"));
            }
            Ok(Frame::WindowUpdate {
                stream_id: head.stream_id,
                increment: payload.get_u32() & 0x7fff_ffff,
            })
        }
        KIND_CONTINUATION => Ok(Frame::Continuation {
            stream_id: head.stream_id,
            fragment: payload,
            end_headers: head.flags & FLAG_END_HEADERS != 0,
        }),
        kind => Ok(Frame::Unknown {
            kind,
            flags: head.flags,
            stream_id: head.stream_id,
            payload,
        }),
    }
}

/// Remove the pad-length octet and trailing padding when PADDED is set
fn strip_padding(flags: u8, mut payload: Bytes) -> Result<Bytes> {
    if flags & FLAG_PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::Codec("padded frame missing pad length"));
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len >= payload.len() + 1 {
        return Err(Error::Codec("padding exceeds frame payload"));
    }
    Ok(payload.slice(..payload.len() - pad_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        decode(&mut buf, 16384).unwrap().unwrap()
    }

    #[test]
    fn header_round_trip() {
        let head = FrameHeader {
            length: 1234,
            kind: KIND_HEADERS,
            flags: FLAG_END_STREAM | FLAG_END_HEADERS,
            stream_id: 42,
        };
        let mut buf = BytesMut::new();
        head.encode(&mut buf);
        assert_eq!(buf.len(), FRAME_HEADER_LEN);
        assert_eq!(FrameHeader::parse(&buf), head);
    }

    #[test]
    fn reserved_bit_masked_on_parse() {
        let head = FrameHeader {
            length: 0,
            kind: KIND_DATA,
            flags: 0,
            stream_id: 3,
        };
        let mut buf = BytesMut::new();
        head.encode(&mut buf);
        buf[5] |= 0x80;
        assert_eq!(FrameHeader::parse(&buf).stream_id, 3);
    }

    #[test]
    fn data_round_trip() {
        let frame = Frame::Data {
            stream_id: 1,
            data: Bytes::from_static(b"hello"),
            end_stream: true,
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn padded_data_stripped() {
        // 9-byte header, PADDED flag, pad length 3, "hi", 3 bytes padding
        let mut buf = BytesMut::new();
        FrameHeader {
            length: 6,
            kind: KIND_DATA,
            flags: FLAG_PADDED | FLAG_END_STREAM,
            stream_id: 5,
        }
        .encode(&mut buf);
        buf.put_u8(3);
        buf.put_slice(b"hi");
        buf.put_bytes(0, 3);

        match decode(&mut buf, 16384).unwrap().unwrap() {
            Frame::Data {
                stream_id,
                data,
                end_stream,
            } => {
                assert_eq!(stream_id, 5);
                assert_eq!(&data[..], b"hi");
                assert!(end_stream);
            }
            other => panic!("expected DATA, got {}", other.kind_name()),
        }
    }

    #[test]
    fn padding_overflow_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader {
            length: 2,
            kind: KIND_DATA,
            flags: FLAG_PADDED,
            stream_id: 5,
        }
        .encode(&mut buf);
        buf.put_u8(9);
        buf.put_u8(0);
        assert!(decode(&mut buf, 16384).is_err());
    }

    #[test]
    fn rst_stream_round_trip() {
        let frame = Frame::RstStream {
            stream_id: 7,
            code: ErrorCode::Cancel,
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn ping_round_trip() {
        let frame = Frame::Ping {
            ack: true,
            payload: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn ping_bad_length_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader {
            length: 4,
            kind: KIND_PING,
            flags: 0,
            stream_id: 0,
        }
        .encode(&mut buf);
        buf.put_u32(0);
        assert!(decode(&mut buf, 16384).is_err());
    }

    #[test]
    fn goaway_round_trip() {
        let frame = Frame::GoAway {
            last_stream_id: 9,
            code: ErrorCode::ProtocolError,
            debug_data: Bytes::from_static(b"unexpected frame"),
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn settings_round_trip() {
        let frame = Frame::Settings {
            ack: false,
            settings: Settings::default(),
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn headers_with_priority_field_skipped() {
        let mut buf = BytesMut::new();
        FrameHeader {
            length: 5 + 3,
            kind: KIND_HEADERS,
            flags: FLAG_PRIORITY | FLAG_END_HEADERS,
            stream_id: 3,
        }
        .encode(&mut buf);
        buf.put_u32(0x8000_0001);
        buf.put_u8(255);
        buf.put_slice(b"abc");

        match decode(&mut buf, 16384).unwrap().unwrap() {
            Frame::Headers { fragment, .. } => assert_eq!(&fragment[..], b"abc"),
            other => panic!("expected HEADERS, got {}", other.kind_name()),
        }
    }

    #[test]
    fn oversize_frame_rejected() {
        let mut buf = BytesMut::new();
        FrameHeader {
            length: 20000,
            kind: KIND_DATA,
            flags: 0,
            stream_id: 1,
        }
        .encode(&mut buf);
        assert!(decode(&mut buf, 16384).is_err());
    }

    #[test]
    fn incomplete_frame_waits() {
        let mut buf = BytesMut::new();
        FrameHeader {
            length: 10,
            kind: KIND_DATA,
            flags: 0,
            stream_id: 1,
        }
        .encode(&mut buf);
        buf.put_slice(b"part");
        assert!(decode(&mut buf, 16384).unwrap().is_none());
        // nothing consumed until the payload is complete
        assert_eq!(buf.len(), FRAME_HEADER_LEN + 4);
    }

    #[test]
    fn unknown_kind_passes_through() {
        let frame = Frame::Unknown {
            kind: 0xaa,
            flags: 0x2,
            stream_id: 11,
            payload: Bytes::from_static(b"xyz"),
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn stream_frame_classification() {
        assert!(Frame::Data {
            stream_id: 1,
            data: Bytes::new(),
            end_stream: false
        }
        .is_stream_frame());
        assert!(Frame::WindowUpdate {
            stream_id: 1,
            increment: 10
        }
        .is_stream_frame());
        assert!(!Frame::WindowUpdate {
            stream_id: 0,
            increment: 10
        }
        .is_stream_frame());
        assert!(!Frame::Ping {
            ack: false,
            payload: [0; 8]
        }
        .is_stream_frame());
    }
}
