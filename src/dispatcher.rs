//! The connection dispatcher: demultiplexing, stream lifecycle, shutdown
//!
//! [`Dispatcher`] sits on one end of a single HTTP/2 transport (client- or
//! server-side) and multiplexes many concurrent logical streams over it:
//!
//! - routes each inbound frame to connection control or to the owning
//!   stream's handler, in transport read order,
//! - tracks every active stream until its terminal signal fires,
//! - emits RST_STREAM / GOAWAY as stream and connection lifecycles unfold,
//! - drives the PING-based liveness policy,
//! - coordinates single-shot connection teardown so no stream is leaked.
//!
//! # Example
//!
//! ```ignore
//! use h2mux::{Config, Demux, Dispatcher, FramedTransport};
//!
//! let transport = Arc::new(FramedTransport::new(tls_stream, &config));
//! let dispatcher = Dispatcher::new(transport, admission, &config);
//!
//! // The returned future is the connection's lifetime.
//! let demuxing = tokio::spawn({
//!     let dispatcher = dispatcher.clone();
//!     async move { dispatcher.run().await }
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{Error, ErrorCode, Result};
use crate::frame::Frame;
use crate::ping::{Liveness, PingCoordinator, PingResponse};
use crate::settings::Settings;
use crate::stream::{Route, StreamEnd, StreamHandler, StreamId, StreamTable};
use crate::transport::Transport;
use crate::writer::Writer;
use crate::Config;

/// Admission seam for stream ids the dispatcher has never seen
///
/// A client admits ids that answer one of its outbound requests; a server
/// admits a HEADERS frame opening a new request. Everything else about the
/// new stream (building the handler, registering it) happens inside
/// `admit`, typically ending in a call to
/// [`Dispatcher::register_stream`].
pub trait Demux: Send + Sync + 'static {
    /// Handle a stream frame whose id is above the closed high-water mark
    /// and absent from the stream table
    fn admit(&self, frame: Frame) -> impl Future<Output = Result<()>> + Send;
}

/// Per-frame verdict of the demux loop
enum Flow {
    Continue,
    Stop,
}

/// HTTP/2 connection dispatcher over transport `T` with admission policy `D`
pub struct Dispatcher<T: Transport, D: Demux> {
    transport: Arc<T>,
    writer: Writer<T>,
    demux: D,
    streams: StreamTable,
    ping: PingCoordinator<T>,
    /// Write-once teardown flag; all shutdown actions gate on winning the flip
    closed: AtomicBool,
    /// Cause handed to the demux loop when its pending read is aborted
    interrupt: Mutex<Option<ErrorCode>>,
    shutdown: Notify,
    /// Highest stream id observed from the peer, stamped into GOAWAY
    last_remote_stream: AtomicU32,
    liveness: Liveness,
}

impl<T: Transport, D: Demux> Dispatcher<T, D> {
    /// Create a dispatcher over `transport` with admission policy `demux`
    pub fn new(transport: Arc<T>, demux: D, config: &Config) -> Arc<Self> {
        let writer = Writer::new(Arc::clone(&transport));
        let ping = PingCoordinator::new(Arc::clone(&transport), writer.clone());
        Arc::new(Self {
            transport,
            writer,
            demux,
            streams: StreamTable::new(),
            ping,
            closed: AtomicBool::new(false),
            interrupt: Mutex::new(None),
            shutdown: Notify::new(),
            last_remote_stream: AtomicU32::new(0),
            liveness: config.liveness,
        })
    }

    /// Register stream `id` with its handler
    ///
    /// Fails with [`Error::DuplicateStream`] if the id is already tracked
    /// and [`Error::ConnectionClosed`] once teardown has begun. On success
    /// the dispatcher subscribes to the handler's terminal signal and owns
    /// the table entry until that signal fires.
    pub fn register_stream(
        self: &Arc<Self>,
        id: StreamId,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        self.streams.insert_open(id, Arc::clone(&handler))?;
        // A teardown that raced this insert either claimed the entry in
        // its sweep or left it for us; the per-entry claim decides which
        // path delivers the one reset.
        if self.closed.load(Ordering::Acquire) {
            if let Some(handler) = self.streams.claim_open(id) {
                handler.reset(ErrorCode::Cancel, false);
            }
        }

        let this = Arc::clone(self);
        let terminal = handler.terminal();
        tokio::spawn(async move {
            let end = terminal.wait().await;
            this.observe_stream_end(id, end).await;
        });
        Ok(())
    }

    /// Number of tracked streams, draining entries included
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// The largest stream id known to have been retired
    pub fn closed_high_water(&self) -> u32 {
        self.streams.closed_high_water()
    }

    /// Whether connection teardown has begun
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Issue a liveness probe; see [`PingResponse`] for the outcomes
    pub fn ping(&self) -> PingResponse {
        self.ping.ping()
    }

    /// Send a SETTINGS frame
    pub async fn write_settings(&self, settings: Settings) -> Result<()> {
        self.writer.settings(settings).await
    }

    /// Hook for embedding code: the transport has died
    pub fn on_transport_close(&self) {
        if self.reset_streams(ErrorCode::Cancel) {
            debug!("transport closed underneath the connection");
        }
    }

    /// Tear down every open stream and interrupt the demux loop
    ///
    /// Single-shot: only the first caller per connection does any work and
    /// returns `true`. The sweep claims each `Open` entry as it resets it,
    /// and a registration racing the sweep claims its own entry through
    /// the same transition, so every handler observes exactly one
    /// `reset(code, local = false)`. Table entries are removed by their
    /// lifecycle observers, which can no longer emit RST_STREAM once the
    /// teardown flag is up.
    pub fn reset_streams(&self, code: ErrorCode) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!("tearing down connection: {}", code);
        for handler in self.streams.claim_all_open() {
            handler.reset(code, false);
        }
        self.ping.abort();
        *self.interrupt.lock() = Some(code);
        self.shutdown.notify_one();
        true
    }

    /// Initiate connection shutdown and tell the peer why
    ///
    /// Resets all open streams with CANCEL, then sends GOAWAY carrying
    /// `code`. If teardown was already under way this resolves immediately
    /// without emitting anything.
    pub async fn go_away(&self, code: ErrorCode) -> Result<()> {
        if self.reset_streams(ErrorCode::Cancel) {
            let last = self.last_remote_stream.load(Ordering::Acquire);
            info!("sending GOAWAY: {} (last stream {})", code, last);
            self.writer.go_away(last, code, Bytes::new()).await
        } else {
            Ok(())
        }
    }

    /// Read and route frames until the connection ends
    ///
    /// The returned future is the connection's lifetime: it resolves `Ok`
    /// on a peer GOAWAY or a clean close with no active streams, and with
    /// the decisive error otherwise. Locally initiated teardown surfaces as
    /// [`Error::Interrupted`] carrying the cause.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let probe = self.spawn_liveness();
        let outcome = self.demux_loop().await;
        if let Some(probe) = probe {
            probe.abort();
        }
        outcome
    }

    async fn demux_loop(&self) -> Result<()> {
        loop {
            let read = tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    let code = self.interrupt.lock().take().unwrap_or(ErrorCode::Cancel);
                    return Err(Error::Interrupted(code));
                }
                read = self.transport.read() => read,
            };
            match read {
                Ok(frame) => match self.dispatch(frame).await? {
                    Flow::Continue => {}
                    Flow::Stop => return Ok(()),
                },
                Err(e) => return self.read_failed(e).await,
            }
        }
    }

    async fn dispatch(&self, frame: Frame) -> Result<Flow> {
        trace!(
            "inbound {} (stream {})",
            frame.kind_name(),
            frame.stream_id()
        );
        if frame.is_stream_frame() {
            return self.dispatch_stream(frame).await;
        }
        match frame {
            Frame::GoAway {
                last_stream_id,
                code,
                ..
            } => {
                info!("peer GOAWAY: {} (last stream {})", code, last_stream_id);
                if self.reset_streams(ErrorCode::Cancel) {
                    self.transport.close().await;
                    return Ok(Flow::Stop);
                }
                Ok(Flow::Continue)
            }
            // Applying settings is the frame layer's concern.
            Frame::Settings { .. } => Ok(Flow::Continue),
            Frame::Ping { ack: true, .. } => {
                if !self.ping.ack() {
                    trace!("PING ACK with no probe outstanding");
                }
                Ok(Flow::Continue)
            }
            // Non-ACK PINGs are echoed by the framing layer below this one.
            Frame::Ping { ack: false, .. } => Ok(Flow::Continue),
            other => {
                warn!("unexpected {} at the connection level", other.kind_name());
                let _ = self.go_away(ErrorCode::ProtocolError).await;
                Err(Error::Protocol("frame kind not handled at the connection level"))
            }
        }
    }

    async fn dispatch_stream(&self, frame: Frame) -> Result<Flow> {
        let id = frame.stream_id();
        if id == 0 {
            warn!("{} frame addressed to stream 0", frame.kind_name());
            let _ = self.go_away(ErrorCode::ProtocolError).await;
            return Err(Error::Protocol("stream frame addressed to stream 0"));
        }
        self.last_remote_stream.fetch_max(id, Ordering::AcqRel);
        match self.streams.route(id) {
            Route::Open(handler) => handler.recv(frame),
            Route::Draining => {
                trace!("discarding {} for draining stream {}", frame.kind_name(), id);
            }
            Route::Vacant => {
                if id <= self.streams.closed_high_water() {
                    debug!("late {} for retired stream {}", frame.kind_name(), id);
                    if !self.closed.load(Ordering::Acquire) {
                        self.writer.reset(id, ErrorCode::StreamClosed).await?;
                    }
                } else {
                    self.demux.admit(frame).await?;
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn read_failed(&self, error: Error) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(error);
        }
        match error {
            Error::Codec(msg) => {
                warn!("non-HTTP/2 traffic on the transport: {}", msg);
                self.reset_streams(ErrorCode::Cancel);
                Ok(())
            }
            Error::ConnectionClosed if self.streams.is_empty() => {
                debug!("peer closed the connection with no active streams");
                self.reset_streams(ErrorCode::Cancel);
                Ok(())
            }
            error => {
                error!("transport read failed: {}", error);
                let _ = self.go_away(ErrorCode::InternalError).await;
                Err(error)
            }
        }
    }

    /// Maintain the table as a stream's terminal signal fires
    ///
    /// The replace-if-open guard keeps this observer from overwriting a
    /// disposition already chosen by connection teardown; the teardown flag
    /// keeps it from emitting RST_STREAM mid-teardown.
    async fn observe_stream_end(&self, id: StreamId, end: StreamEnd) {
        match end {
            StreamEnd::Ok | StreamEnd::RemoteReset(_) => {
                self.streams.remove(id);
            }
            StreamEnd::LocalReset(code) => {
                if self.streams.mark_local_reset(id) && !self.closed.load(Ordering::Acquire) {
                    debug!("stream {} locally reset: {}", id, code);
                    if let Err(e) = self.writer.reset(id, code).await {
                        debug!("RST_STREAM for stream {} not sent: {}", id, e);
                    }
                }
                self.streams.remove(id);
            }
            StreamEnd::Failed(cause) => {
                if self.streams.mark_failed(id) && !self.closed.load(Ordering::Acquire) {
                    warn!("stream {} failed: {}", id, cause);
                    if let Err(e) = self.writer.reset(id, ErrorCode::InternalError).await {
                        debug!("RST_STREAM for stream {} not sent: {}", id, e);
                    }
                }
                self.streams.remove(id);
            }
        }
    }

    fn spawn_liveness(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let Liveness::Threshold {
            interval,
            timeout,
            max_failures,
        } = self.liveness
        else {
            return None;
        };
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut misses = 0u32;
            loop {
                tokio::time::sleep(interval).await;
                if this.closed.load(Ordering::Acquire) {
                    return;
                }
                match tokio::time::timeout(timeout, this.ping()).await {
                    Ok(Ok(())) => misses = 0,
                    Ok(Err(Error::ConnectionClosed)) => return,
                    Ok(Err(e)) => {
                        misses += 1;
                        warn!(
                            target: "h2mux::failure_detector",
                            "probe failed ({}/{}): {}",
                            misses, max_failures, e
                        );
                    }
                    Err(_) => {
                        misses += 1;
                        warn!(
                            target: "h2mux::failure_detector",
                            "probe unanswered ({}/{})",
                            misses, max_failures
                        );
                    }
                }
                if misses >= max_failures {
                    error!(
                        target: "h2mux::failure_detector",
                        "peer declared dead after {} missed probes",
                        misses
                    );
                    let _ = this.go_away(ErrorCode::InternalError).await;
                    return;
                }
            }
        }))
    }
}

impl<T: Transport, D: Demux> fmt::Debug for Dispatcher<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("active_streams", &self.active_streams())
            .field("closed_high_water", &self.closed_high_water())
            .field("closed", &self.is_closed())
            .finish()
    }
}
