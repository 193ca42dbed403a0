//! Error types for the dispatcher and the framing layer

use std::fmt;
use std::io;

/// Result type alias for dispatcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP/2 error codes (RFC 7540 Section 7)
///
/// These are the codes carried by RST_STREAM and GOAWAY frames on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown, no error
    NoError = 0x0,
    /// Protocol violation detected
    ProtocolError = 0x1,
    /// Unexpected internal error
    InternalError = 0x2,
    /// Flow-control limits violated
    FlowControlError = 0x3,
    /// SETTINGS not acknowledged in time
    SettingsTimeout = 0x4,
    /// Frame received on a closed stream
    StreamClosed = 0x5,
    /// Frame size outside the allowed bounds
    FrameSizeError = 0x6,
    /// Stream refused before any processing
    RefusedStream = 0x7,
    /// Stream no longer needed
    Cancel = 0x8,
    /// Header compression state compromised
    CompressionError = 0x9,
    /// CONNECT tunnel closed abnormally
    ConnectError = 0xa,
    /// Peer is generating excessive load
    EnhanceYourCalm = 0xb,
    /// Transport security properties inadequate
    InadequateSecurity = 0xc,
    /// HTTP/1.1 required instead
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Parse an error code from its wire value
    ///
    /// Unknown codes map to `InternalError` (RFC 7540 Section 7: treat as
    /// equivalent).
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            _ => ErrorCode::InternalError,
        }
    }

    /// Wire value of the code
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// RFC 7540 name of the code
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Dispatcher error types
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying transport
    Io(io::Error),
    /// Malformed or non-HTTP/2 traffic on the wire
    Codec(&'static str),
    /// Peer violated the protocol
    Protocol(&'static str),
    /// Connection closed
    ConnectionClosed,
    /// A stream with this id is already registered
    DuplicateStream(u32),
    /// A liveness PING is already in flight
    PingOutstanding,
    /// Pending read aborted by connection teardown
    Interrupted(ErrorCode),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Codec(msg) => write!(f, "codec error: {}", msg),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::ConnectionClosed => write!(f, "connection closed"),
            Error::DuplicateStream(id) => write!(f, "stream {} already registered", id),
            Error::PingOutstanding => write!(f, "a ping is already outstanding"),
            Error::Interrupted(code) => write!(f, "interrupted by teardown: {}", code),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::ConnectionClosed => {
                io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
            }
            other => io::Error::other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trip() {
        for raw in 0..=0xd {
            let code = ErrorCode::from_u32(raw);
            assert_eq!(code.as_u32(), raw);
        }
    }

    #[test]
    fn unknown_error_code_maps_to_internal() {
        assert_eq!(ErrorCode::from_u32(0xbeef), ErrorCode::InternalError);
    }

    #[test]
    fn error_code_names() {
        assert_eq!(ErrorCode::Cancel.name(), "CANCEL");
        assert_eq!(ErrorCode::StreamClosed.name(), "STREAM_CLOSED");
        assert_eq!(format!("{}", ErrorCode::ProtocolError), "PROTOCOL_ERROR (0x1)");
    }

    #[test]
    fn io_eof_becomes_connection_closed() {
        let e = Error::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(e, Error::ConnectionClosed));
    }

    #[test]
    fn display_formats() {
        assert_eq!(
            format!("{}", Error::DuplicateStream(7)),
            "stream 7 already registered"
        );
        assert_eq!(
            format!("{}", Error::Interrupted(ErrorCode::Cancel)),
            "interrupted by teardown: CANCEL (0x8)"
        );
    }
}
