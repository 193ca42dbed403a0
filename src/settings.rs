//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5.1)

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

// Settings identifiers.
const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
const SETTINGS_ENABLE_PUSH: u16 = 0x2;
const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;
const SETTINGS_MAX_HEADER_LIST_SIZE: u16 = 0x6;
const SETTINGS_ENABLE_CONNECT_PROTOCOL: u16 = 0x8;

/// HTTP/2 SETTINGS parameter block
///
/// The dispatcher treats settings as opaque configuration to forward;
/// applying them (window sizes, table sizes) is the frame layer's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1). Default 4096.
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2). Default 1 (enabled).
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3). Default unlimited.
    pub max_concurrent_streams: Option<u32>,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4). Default 65535.
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5). Default 16384.
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6). Default unlimited.
    pub max_header_list_size: Option<u32>,
    /// SETTINGS_ENABLE_CONNECT_PROTOCOL (0x8, RFC 8441). Absent by default.
    pub enable_connect_protocol: Option<bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: 65535,
            max_frame_size: 16384,
            max_header_list_size: None,
            enable_connect_protocol: None,
        }
    }
}

impl Settings {
    /// Encoded payload length in bytes
    pub fn encoded_len(&self) -> usize {
        let mut units = 4;
        if self.max_concurrent_streams.is_some() {
            units += 1;
        }
        if self.max_header_list_size.is_some() {
            units += 1;
        }
        if self.enable_connect_protocol.is_some() {
            units += 1;
        }
        units * 6
    }

    /// Encode as a sequence of 6-byte (id, value) units
    pub fn encode_into(&self, dst: &mut BytesMut) {
        put_setting(dst, SETTINGS_HEADER_TABLE_SIZE, self.header_table_size);
        put_setting(
            dst,
            SETTINGS_ENABLE_PUSH,
            if self.enable_push { 1 } else { 0 },
        );
        if let Some(v) = self.max_concurrent_streams {
            put_setting(dst, SETTINGS_MAX_CONCURRENT_STREAMS, v);
        }
        put_setting(dst, SETTINGS_INITIAL_WINDOW_SIZE, self.initial_window_size);
        put_setting(dst, SETTINGS_MAX_FRAME_SIZE, self.max_frame_size);
        if let Some(v) = self.max_header_list_size {
            put_setting(dst, SETTINGS_MAX_HEADER_LIST_SIZE, v);
        }
        if let Some(v) = self.enable_connect_protocol {
            put_setting(dst, SETTINGS_ENABLE_CONNECT_PROTOCOL, if v { 1 } else { 0 });
        }
    }

    /// Decode a SETTINGS payload of 6-byte units
    ///
    /// Unknown parameters are ignored (RFC 7540 Section 6.5.2).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() % 6 != 0 {
            return Err(Error::Codec("SETTINGS payload must be a multiple of 6"));
        }
        let mut settings = Settings::default();
        for unit in payload.chunks_exact(6) {
            let id = (u16::from(unit[0]) << 8) | u16::from(unit[1]);
            let value = (u32::from(unit[2]) << 24)
                | (u32::from(unit[3]) << 16)
                | (u32::from(unit[4]) << 8)
                | u32::from(unit[5]);
            match id {
                SETTINGS_HEADER_TABLE_SIZE => settings.header_table_size = value,
                SETTINGS_ENABLE_PUSH => {
                    if value > 1 {
                        return Err(Error::Codec("ENABLE_PUSH must be 0 or 1"));
                    }
                    settings.enable_push = value == 1;
                }
                SETTINGS_MAX_CONCURRENT_STREAMS => {
                    settings.max_concurrent_streams = Some(value);
                }
                SETTINGS_INITIAL_WINDOW_SIZE => {
                    if value > 0x7fff_ffff {
                        return Err(Error::Codec("INITIAL_WINDOW_SIZE exceeds 2^31-1"));
                    }
                    settings.initial_window_size = value;
                }
                SETTINGS_MAX_FRAME_SIZE => {
                    if !(16_384..=16_777_215).contains(&value) {
                        return Err(Error::Codec("MAX_FRAME_SIZE out of range"));
                    }
                    settings.max_frame_size = value;
                }
                SETTINGS_MAX_HEADER_LIST_SIZE => {
                    settings.max_header_list_size = Some(value);
                }
                SETTINGS_ENABLE_CONNECT_PROTOCOL => {
                    if value > 1 {
                        return Err(Error::Codec("ENABLE_CONNECT_PROTOCOL must be 0 or 1"));
                    }
                    settings.enable_connect_protocol = Some(value == 1);
                }
                _ => {}
            }
        }
        Ok(settings)
    }
}

#[inline]
fn put_setting(dst: &mut BytesMut, id: u16, value: u32) {
    dst.put_u16(id);
    dst.put_u32(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(settings: &Settings) -> BytesMut {
        let mut buf = BytesMut::new();
        settings.encode_into(&mut buf);
        buf
    }

    #[test]
    fn default_round_trip() {
        let settings = Settings::default();
        let buf = encode(&settings);
        assert_eq!(buf.len(), settings.encoded_len());
        assert_eq!(Settings::decode(&buf).unwrap(), settings);
    }

    #[test]
    fn full_round_trip() {
        let settings = Settings {
            header_table_size: 8192,
            enable_push: false,
            max_concurrent_streams: Some(100),
            initial_window_size: 1_048_576,
            max_frame_size: 32768,
            max_header_list_size: Some(65536),
            enable_connect_protocol: Some(true),
        };
        let buf = encode(&settings);
        assert_eq!(buf.len(), settings.encoded_len());
        assert_eq!(Settings::decode(&buf).unwrap(), settings);
    }

    #[test]
    fn ragged_payload_rejected() {
        assert!(Settings::decode(&[0, 1, 0, 0]).is_err());
    }

    #[test]
    fn invalid_enable_push_rejected() {
        let mut buf = BytesMut::new();
        put_setting(&mut buf, SETTINGS_ENABLE_PUSH, 2);
        assert!(Settings::decode(&buf).is_err());
    }

    #[test]
    fn invalid_window_size_rejected() {
        let mut buf = BytesMut::new();
        put_setting(&mut buf, SETTINGS_INITIAL_WINDOW_SIZE, 0x8000_0000);
        assert!(Settings::decode(&buf).is_err());
    }

    #[test]
    fn invalid_max_frame_size_rejected() {
        let mut buf = BytesMut::new();
        put_setting(&mut buf, SETTINGS_MAX_FRAME_SIZE, 100);
        assert!(Settings::decode(&buf).is_err());
    }

    #[test]
    fn unknown_setting_ignored() {
        let mut buf = BytesMut::new();
        put_setting(&mut buf, 0xff, 42);
        let decoded = Settings::decode(&buf).unwrap();
        assert_eq!(decoded, Settings::default());
    }
}
