//! Typed outbound frame emission
//!
//! A cheap clonable handle shared by the dispatcher and its collaborators.
//! Stream handlers hold one to emit frames for their own stream; the
//! dispatcher uses it for control traffic (RST_STREAM, GOAWAY, PING,
//! SETTINGS).

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{ErrorCode, Result};
use crate::frame::Frame;
use crate::settings::Settings;
use crate::transport::Transport;

/// Outbound frame writer over a shared transport
pub struct Writer<T> {
    transport: Arc<T>,
}

impl<T> Clone for Writer<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> Writer<T> {
    /// Create a writer over `transport`
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Send a PING frame with the given opaque payload
    pub async fn send_ping(&self, payload: [u8; 8]) -> Result<()> {
        self.transport
            .write(Frame::Ping {
                ack: false,
                payload,
            })
            .await
    }

    /// Send RST_STREAM for `stream_id` with `code`
    pub async fn reset(&self, stream_id: u32, code: ErrorCode) -> Result<()> {
        self.transport
            .write(Frame::RstStream { stream_id, code })
            .await
    }

    /// Send GOAWAY carrying `code` and the last stream id we promise to
    /// process
    pub async fn go_away(
        &self,
        last_stream_id: u32,
        code: ErrorCode,
        debug_data: Bytes,
    ) -> Result<()> {
        self.transport
            .write(Frame::GoAway {
                last_stream_id,
                code,
                debug_data,
            })
            .await
    }

    /// Send a SETTINGS frame
    pub async fn settings(&self, settings: Settings) -> Result<()> {
        self.transport
            .write(Frame::Settings {
                ack: false,
                settings,
            })
            .await
    }

    /// Send an arbitrary frame
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.transport.write(frame).await
    }
}
