//! Transport abstraction and a framed implementation over byte streams
//!
//! The dispatcher drives any [`Transport`]: a frame-granular duplex channel
//! with an optional off-loop executor and a close signal. The crate ships
//! [`FramedTransport`], which layers the frame codec over any
//! `AsyncRead + AsyncWrite` byte stream (TCP, TLS, an in-memory duplex).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, Notify};

use crate::error::{Error, Result};
use crate::frame::{self, Frame};
use crate::Config;

/// Read buffer size for the framed transport
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// A frame-granular duplex transport for one HTTP/2 connection
///
/// The dispatcher is the only reader; writes may come from any task. An
/// implementation must therefore tolerate concurrent `write` calls and one
/// `read` call racing them.
pub trait Transport: Send + Sync + 'static {
    /// Read the next inbound frame
    ///
    /// Resolves to `Error::ConnectionClosed` once the peer has closed the
    /// channel, and to `Error::Codec` on non-HTTP/2 traffic.
    fn read(&self) -> impl Future<Output = Result<Frame>> + Send;

    /// Write one outbound frame
    fn write(&self, frame: Frame) -> impl Future<Output = Result<()>> + Send;

    /// An executor for work that must run off the demux loop
    ///
    /// `None` disables PING scheduling: the dispatcher degrades to treating
    /// every liveness probe as instantly satisfied.
    fn executor(&self) -> Option<Handle>;

    /// Close the transport
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Resolves when the transport has died, for any reason
    ///
    /// Embedding code wires this to the dispatcher's `on_transport_close`.
    fn closed(&self) -> impl Future<Output = ()> + Send;
}

/// Single-shot close flag with async waiters
struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn set(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    fn is_set(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

struct FrameReader<S> {
    half: ReadHalf<S>,
    buf: BytesMut,
}

/// [`Transport`] implementation speaking HTTP/2 frames over a byte stream
///
/// Reads are buffered and decoded incrementally; writes are encoded and
/// flushed per frame. The two halves are independently locked so a pending
/// read never blocks writers.
///
/// # Example
///
/// ```ignore
/// use h2mux::{Config, FramedTransport};
///
/// let stream = tokio::net::TcpStream::connect("127.0.0.1:8080").await?;
/// let transport = FramedTransport::new(stream, &Config::default());
/// ```
pub struct FramedTransport<S> {
    reader: Mutex<FrameReader<S>>,
    writer: Mutex<WriteHalf<S>>,
    max_frame_size: u32,
    executor: Option<Handle>,
    shutdown: CloseSignal,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap `stream`, capturing the ambient tokio runtime as the executor
    pub fn new(stream: S, config: &Config) -> Self {
        Self::with_executor(stream, config, Handle::try_current().ok())
    }

    /// Wrap `stream` with an explicit (or absent) off-loop executor
    pub fn with_executor(stream: S, config: &Config, executor: Option<Handle>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(FrameReader {
                half: read_half,
                buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            }),
            writer: Mutex::new(write_half),
            max_frame_size: config.max_frame_size,
            executor,
            shutdown: CloseSignal::new(),
        }
    }
}

impl<S> Transport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read(&self) -> Result<Frame> {
        let mut reader = self.reader.lock().await;
        let FrameReader { half, buf } = &mut *reader;
        loop {
            if let Some(frame) = frame::decode(buf, self.max_frame_size)? {
                return Ok(frame);
            }
            match half.read_buf(buf).await {
                Ok(0) => {
                    self.shutdown.set();
                    return Err(Error::ConnectionClosed);
                }
                Ok(_) => {}
                Err(e) => {
                    self.shutdown.set();
                    return Err(e.into());
                }
            }
        }
    }

    async fn write(&self, frame: Frame) -> Result<()> {
        if self.shutdown.is_set() {
            return Err(Error::ConnectionClosed);
        }
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    fn executor(&self) -> Option<Handle> {
        self.executor.clone()
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        self.shutdown.set();
    }

    async fn closed(&self) {
        self.shutdown.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use bytes::Bytes;

    fn pair() -> (FramedTransport<tokio::io::DuplexStream>, FramedTransport<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let config = Config::default();
        (
            FramedTransport::new(a, &config),
            FramedTransport::new(b, &config),
        )
    }

    #[tokio::test]
    async fn frame_travels_between_halves() {
        let (left, right) = pair();
        left.write(Frame::Ping {
            ack: false,
            payload: [9; 8],
        })
        .await
        .unwrap();

        match right.read().await.unwrap() {
            Frame::Ping { ack, payload } => {
                assert!(!ack);
                assert_eq!(payload, [9; 8]);
            }
            other => panic!("expected PING, got {}", other.kind_name()),
        }
    }

    #[tokio::test]
    async fn partial_frame_is_reassembled() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let config = Config::default();
        let right = FramedTransport::new(b, &config);

        let mut buf = BytesMut::new();
        Frame::Data {
            stream_id: 3,
            data: Bytes::from_static(b"split me"),
            end_stream: true,
        }
        .encode(&mut buf);

        let (mid, rest) = buf.split_at(5);
        let (mid, rest) = (mid.to_vec(), rest.to_vec());
        let mut raw = a;
        let reader = tokio::spawn(async move { right.read().await });
        raw.write_all(&mid).await.unwrap();
        tokio::task::yield_now().await;
        raw.write_all(&rest).await.unwrap();

        match reader.await.unwrap().unwrap() {
            Frame::Data { data, .. } => assert_eq!(&data[..], b"split me"),
            other => panic!("expected DATA, got {}", other.kind_name()),
        }
    }

    #[tokio::test]
    async fn eof_reports_closed_and_fires_signal() {
        let (left, right) = pair();
        left.close().await;
        drop(left);

        assert!(matches!(right.read().await, Err(Error::ConnectionClosed)));
        // the close signal must already be set
        right.closed().await;
    }

    #[tokio::test]
    async fn goaway_survives_the_wire() {
        let (left, right) = pair();
        left.write(Frame::GoAway {
            last_stream_id: 5,
            code: ErrorCode::EnhanceYourCalm,
            debug_data: Bytes::from_static(b"slow down"),
        })
        .await
        .unwrap();

        match right.read().await.unwrap() {
            Frame::GoAway {
                last_stream_id,
                code,
                debug_data,
            } => {
                assert_eq!(last_stream_id, 5);
                assert_eq!(code, ErrorCode::EnhanceYourCalm);
                assert_eq!(&debug_data[..], b"slow down");
            }
            other => panic!("expected GOAWAY, got {}", other.kind_name()),
        }
    }
}
