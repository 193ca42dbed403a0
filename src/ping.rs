//! Liveness probing: the PING coordinator and the failure-detector policy
//!
//! At most one PING is in flight at any time. A probe issued while another
//! is outstanding resolves immediately with `Error::PingOutstanding` and
//! leaves the in-flight probe untouched. An inbound PING ACK satisfies
//! exactly the probe that was outstanding when it was sent.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use pin_project_lite::pin_project;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::writer::Writer;

/// Default probe interval for [`Liveness::Threshold`]
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default per-probe timeout for [`Liveness::Threshold`]
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(4);

/// Default consecutive-miss budget for [`Liveness::Threshold`]
pub const DEFAULT_MAX_FAILURES: u32 = 2;

/// Failure-detector policy for a connection
///
/// `Disabled` is the null detector: it never declares the connection dead.
/// `Threshold` probes the peer on a fixed cadence and declares the
/// connection dead after `max_failures` consecutive probes go unanswered,
/// at which point the dispatcher self-initiates GOAWAY(INTERNAL_ERROR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Never declare failure
    Disabled,
    /// Periodic PING with a consecutive-miss budget
    Threshold {
        /// Time between probes
        interval: Duration,
        /// How long to wait for each ACK
        timeout: Duration,
        /// Consecutive misses before the connection is declared dead
        max_failures: u32,
    },
}

impl Liveness {
    /// Threshold policy with the default cadence
    pub fn threshold() -> Self {
        Liveness::Threshold {
            interval: DEFAULT_PING_INTERVAL,
            timeout: DEFAULT_PING_TIMEOUT,
            max_failures: DEFAULT_MAX_FAILURES,
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Liveness::Disabled
    }
}

type PingSlot = Arc<Mutex<Option<oneshot::Sender<Result<()>>>>>;

/// Tracks the single in-flight PING for a connection
pub(crate) struct PingCoordinator<T> {
    transport: Arc<T>,
    writer: Writer<T>,
    slot: PingSlot,
}

impl<T: Transport> PingCoordinator<T> {
    pub(crate) fn new(transport: Arc<T>, writer: Writer<T>) -> Self {
        Self {
            transport,
            writer,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Issue a liveness probe
    ///
    /// Without an off-loop executor the probe resolves satisfied at once:
    /// sending a PING from within the demux loop could never observe its
    /// own ACK, so the detector is fed "alive" instead of a deadlock.
    pub(crate) fn ping(&self) -> PingResponse {
        let (tx, rx) = oneshot::channel();
        match self.transport.executor() {
            None => {
                let _ = tx.send(Ok(()));
            }
            Some(handle) => {
                let slot = Arc::clone(&self.slot);
                let writer = self.writer.clone();
                handle.spawn(async move {
                    let rejected = {
                        let mut guard = slot.lock();
                        if guard.is_some() {
                            Some(tx)
                        } else {
                            *guard = Some(tx);
                            None
                        }
                    };
                    match rejected {
                        Some(tx) => {
                            let _ = tx.send(Err(Error::PingOutstanding));
                        }
                        None => {
                            if let Err(e) = writer.send_ping(opaque_payload()).await {
                                if let Some(tx) = slot.lock().take() {
                                    let _ = tx.send(Err(e));
                                }
                            }
                        }
                    }
                });
            }
        }
        PingResponse { rx }
    }

    /// Satisfy the outstanding probe, if any; returns whether one existed
    pub(crate) fn ack(&self) -> bool {
        match self.slot.lock().take() {
            Some(tx) => {
                let _ = tx.send(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Fail the outstanding probe on connection teardown
    pub(crate) fn abort(&self) {
        if let Some(tx) = self.slot.lock().take() {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }
    }
}

/// Opaque PING payload seeded from the wall clock
fn opaque_payload() -> [u8; 8] {
    use std::time::{SystemTime, UNIX_EPOCH};

    let mut seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    seed ^= seed << 13;
    seed ^= seed >> 7;
    seed ^= seed << 17;
    seed.to_be_bytes()
}

pin_project! {
    /// Completion of a liveness probe issued with `ping()`
    ///
    /// Resolves `Ok(())` on ACK (or immediately in degraded mode),
    /// `Err(Error::PingOutstanding)` when another probe was in flight, and
    /// `Err(Error::ConnectionClosed)` if the connection dies first.
    pub struct PingResponse {
        #[pin]
        rx: oneshot::Receiver<Result<()>>,
    }
}

impl Future for PingResponse {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().rx.poll(cx).map(|res| match res {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ConnectionClosed),
        })
    }
}
