//! # h2mux: HTTP/2 connection dispatcher
//!
//! The shared machinery that sits on one end of a single HTTP/2 transport
//! (client- or server-side) and multiplexes many concurrent logical streams
//! over it.
//!
//! ## What it does
//!
//! - **Demultiplexing**: one frame at a time, in transport read order, to
//!   connection control or the owning stream handler
//! - **Stream lifecycle**: every stream tracked from registration until its
//!   terminal signal fires, with a monotonic high-water mark of retired ids
//! - **Control responses**: RST_STREAM for local resets, failures, and late
//!   frames; GOAWAY on protocol errors and self-initiated shutdown
//! - **Liveness**: at-most-one-outstanding PING probe with a pluggable
//!   consecutive-miss policy that can declare the connection dead
//! - **Shutdown**: single-shot teardown that drains every open stream and
//!   interrupts the demux loop, so no stream is left dangling
//!
//! ## What it leaves to collaborators
//!
//! Stream handlers translate frames into messages, assemble header blocks,
//! and do flow-control accounting behind the [`StreamHandler`] trait. The
//! [`Demux`] trait decides whether a never-seen stream id opens a new
//! stream (the client/server difference). Applying SETTINGS and echoing
//! non-ACK PINGs belong to the framing layer underneath the [`Transport`].
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use h2mux::{Config, Dispatcher, FramedTransport, Liveness};
//!
//! let config = Config::builder()
//!     .liveness(Liveness::threshold())
//!     .build();
//!
//! let transport = Arc::new(FramedTransport::new(tls_stream, &config));
//! let dispatcher = Dispatcher::new(transport, admission, &config);
//!
//! dispatcher.register_stream(1, handler)?;
//! dispatcher.run().await?;
//! ```

pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod ping;
pub mod settings;
pub mod stream;
pub mod transport;
pub mod writer;

pub use dispatcher::{Demux, Dispatcher};
pub use error::{Error, ErrorCode, Result};
pub use frame::{Frame, FrameHeader};
pub use ping::{Liveness, PingResponse};
pub use settings::Settings;
pub use stream::{StreamEnd, StreamHandler, StreamId, StreamTerminal};
pub use transport::{FramedTransport, Transport};
pub use writer::Writer;

/// Default maximum frame payload size (RFC 7540 Section 4.2)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Maximum stream id value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// Stream id 0 addresses the connection itself
pub const CONNECTION_STREAM_ID: u32 = 0;

/// Configuration for a dispatcher and its transport
///
/// # Example
///
/// ```
/// use h2mux::{Config, Liveness};
///
/// let config = Config::builder()
///     .max_frame_size(32 * 1024)
///     .liveness(Liveness::threshold())
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Largest frame payload the transport will accept (default: 16KB)
    pub max_frame_size: u32,
    /// Failure-detector policy (default: disabled)
    pub liveness: Liveness,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            liveness: Liveness::Disabled,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for dispatcher configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the maximum accepted frame payload size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the failure-detector policy
    pub fn liveness(mut self, liveness: Liveness) -> Self {
        self.config.liveness = liveness;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dispatcher::{Demux, Dispatcher};
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::frame::Frame;
    pub use crate::stream::{StreamEnd, StreamHandler, StreamTerminal};
    pub use crate::transport::{FramedTransport, Transport};
    pub use crate::Config;
}
