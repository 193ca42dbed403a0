//! Per-stream collaborators and the concurrent stream table
//!
//! The dispatcher tracks every active stream in a [`StreamTable`] keyed by
//! stream id. Each entry is either `Open` (frames are delivered to the
//! handler) or a transient draining marker left behind after a local reset
//! or failure, kept only while stragglers from the peer may still arrive.
//! Retired ids are recorded in a monotonic high-water mark so late frames
//! can be rejected cheaply.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::error::{Error, ErrorCode, Result};
use crate::frame::Frame;

/// A 31-bit HTTP/2 stream identifier; id 0 addresses the connection
pub type StreamId = u32;

/// Terminal outcome of a stream, carried by its [`StreamTerminal`] signal
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    /// Both sides finished cleanly
    Ok,
    /// The peer reset the stream; no RST_STREAM is owed in return
    RemoteReset(ErrorCode),
    /// The local side cancelled the stream; an RST_STREAM must be sent
    /// unless the whole connection is already tearing down
    LocalReset(ErrorCode),
    /// The stream handler failed; reported to the peer as INTERNAL_ERROR
    Failed(String),
}

/// A single-shot asynchronous outcome, completed once by the stream handler
/// and awaited by the dispatcher's lifecycle observer
///
/// Cloning yields another handle to the same signal; any number of tasks may
/// `wait()` on it concurrently.
#[derive(Clone)]
pub struct StreamTerminal {
    inner: Arc<TerminalInner>,
}

struct TerminalInner {
    state: Mutex<Option<StreamEnd>>,
    notify: Notify,
}

impl StreamTerminal {
    /// Create an unresolved signal
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TerminalInner {
                state: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolve the signal; only the first caller wins
    ///
    /// Returns `true` if this call resolved it.
    pub fn complete(&self, end: StreamEnd) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.is_some() {
                return false;
            }
            *state = Some(end);
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// The resolved outcome, if any
    pub fn try_get(&self) -> Option<StreamEnd> {
        self.inner.state.lock().clone()
    }

    /// Wait until the signal resolves
    pub async fn wait(&self) -> StreamEnd {
        loop {
            // Register as a waiter before checking state so a concurrent
            // complete() cannot slip between the check and the await.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(end) = self.try_get() {
                return end;
            }
            notified.await;
        }
    }
}

impl Default for StreamTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StreamTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTerminal")
            .field("state", &self.try_get())
            .finish()
    }
}

/// A per-stream frame handler registered with the dispatcher
///
/// The dispatcher delivers inbound frames in transport read order via
/// `recv`, tears the stream down wholesale via `reset` during connection
/// shutdown, and observes the handler's terminal signal to maintain the
/// stream table. Translating frames into messages, assembling header
/// blocks, and flow-control accounting all live behind this trait.
pub trait StreamHandler: Send + Sync + 'static {
    /// Deliver one inbound frame addressed to this stream
    fn recv(&self, frame: Frame);

    /// Terminate the stream with `code`
    ///
    /// `local` is false when the dispatcher is tearing down the whole
    /// connection: the handler must not emit its own RST_STREAM in that
    /// case, only resolve its terminal signal. The dispatcher claims each
    /// stream's table entry before calling this, so teardown delivers it
    /// exactly once per stream.
    fn reset(&self, code: ErrorCode, local: bool);

    /// The stream's single-shot terminal signal
    fn terminal(&self) -> StreamTerminal;
}

/// State stored per tracked stream id
enum StreamEntry {
    /// The stream is alive; frames are delivered to the handler
    Open(Arc<dyn StreamHandler>),
    /// Local side already reset the stream; peer frames are discarded
    /// until the peer observes our RST_STREAM
    LocalReset,
    /// The stream failed locally; peer frames are discarded
    Failed,
}

/// Routing decision for an inbound stream frame
pub(crate) enum Route {
    /// No entry for this id
    Vacant,
    /// Deliver to this handler
    Open(Arc<dyn StreamHandler>),
    /// Entry exists but is draining; discard the frame
    Draining,
}

/// Concurrent map from stream id to stream state
///
/// Mutations are confined to put-if-absent, replace-if-open, and remove;
/// the one full sweep (connection shutdown) claims entries through the
/// same replace-if-open transition, so no entry can be claimed twice and
/// entries are never reopened.
pub(crate) struct StreamTable {
    entries: RwLock<HashMap<StreamId, StreamEntry>>,
    high_water: AtomicU32,
}

impl StreamTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            high_water: AtomicU32::new(0),
        }
    }

    /// Install `Open(handler)` at `id`; fails if the slot is occupied
    pub(crate) fn insert_open(&self, id: StreamId, handler: Arc<dyn StreamHandler>) -> Result<()> {
        match self.entries.write().entry(id) {
            Entry::Occupied(_) => Err(Error::DuplicateStream(id)),
            Entry::Vacant(slot) => {
                slot.insert(StreamEntry::Open(handler));
                Ok(())
            }
        }
    }

    /// Look up the routing disposition for `id`
    pub(crate) fn route(&self, id: StreamId) -> Route {
        match self.entries.read().get(&id) {
            None => Route::Vacant,
            Some(StreamEntry::Open(handler)) => Route::Open(Arc::clone(handler)),
            Some(StreamEntry::LocalReset) | Some(StreamEntry::Failed) => Route::Draining,
        }
    }

    /// Transition `id` from `Open` to `LocalReset`
    ///
    /// Returns `true` only if the entry was `Open`; a terminal disposition
    /// already chosen elsewhere is never overwritten.
    pub(crate) fn mark_local_reset(&self, id: StreamId) -> bool {
        self.mark(id, StreamEntry::LocalReset)
    }

    /// Transition `id` from `Open` to `Failed`
    pub(crate) fn mark_failed(&self, id: StreamId) -> bool {
        self.mark(id, StreamEntry::Failed)
    }

    fn mark(&self, id: StreamId, next: StreamEntry) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&id) {
            Some(StreamEntry::Open(_)) => {
                entries.insert(id, next);
                true
            }
            _ => false,
        }
    }

    /// Remove `id` and offer it to the closed high-water mark
    pub(crate) fn remove(&self, id: StreamId) {
        if self.entries.write().remove(&id).is_some() {
            self.high_water.fetch_max(id, Ordering::AcqRel);
        }
    }

    /// The largest stream id known to have been retired
    pub(crate) fn closed_high_water(&self) -> u32 {
        self.high_water.load(Ordering::Acquire)
    }

    /// Number of tracked entries, draining markers included
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no streams are tracked at all
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Claim every `Open` entry for teardown
    ///
    /// Each claimed entry transitions to `LocalReset`, so a racing
    /// registration or observer cannot claim it again. Entries stay in
    /// place and are removed by each stream's lifecycle observer.
    pub(crate) fn claim_all_open(&self) -> Vec<Arc<dyn StreamHandler>> {
        let mut entries = self.entries.write();
        let mut claimed = Vec::new();
        for entry in entries.values_mut() {
            if matches!(entry, StreamEntry::Open(_)) {
                let prior = std::mem::replace(entry, StreamEntry::LocalReset);
                if let StreamEntry::Open(handler) = prior {
                    claimed.push(handler);
                }
            }
        }
        claimed
    }

    /// Claim a single `Open` entry, with the same transition as the
    /// teardown sweep; whichever caller wins gets the handler
    pub(crate) fn claim_open(&self, id: StreamId) -> Option<Arc<dyn StreamHandler>> {
        let mut entries = self.entries.write();
        match entries.get(&id) {
            Some(StreamEntry::Open(handler)) => {
                let handler = Arc::clone(handler);
                entries.insert(id, StreamEntry::LocalReset);
                Some(handler)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;

    struct NullHandler {
        terminal: StreamTerminal,
        received: Mutex<Vec<Frame>>,
    }

    impl NullHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                terminal: StreamTerminal::new(),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    impl StreamHandler for NullHandler {
        fn recv(&self, frame: Frame) {
            self.received.lock().push(frame);
        }

        fn reset(&self, code: ErrorCode, _local: bool) {
            self.terminal.complete(StreamEnd::LocalReset(code));
        }

        fn terminal(&self) -> StreamTerminal {
            self.terminal.clone()
        }
    }

    #[test]
    fn duplicate_insert_rejected() {
        let table = StreamTable::new();
        table.insert_open(3, NullHandler::new()).unwrap();
        match table.insert_open(3, NullHandler::new()) {
            Err(Error::DuplicateStream(3)) => {}
            other => panic!("expected DuplicateStream, got {:?}", other.err()),
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn first_handler_undisturbed_by_duplicate() {
        let table = StreamTable::new();
        let first = NullHandler::new();
        table.insert_open(3, first.clone()).unwrap();
        let _ = table.insert_open(3, NullHandler::new());

        match table.route(3) {
            Route::Open(handler) => handler.recv(Frame::Data {
                stream_id: 3,
                data: Bytes::from_static(b"x"),
                end_stream: false,
            }),
            _ => panic!("expected the original open entry"),
        }
        assert_eq!(first.received.lock().len(), 1);
    }

    #[test]
    fn mark_is_open_guarded() {
        let table = StreamTable::new();
        table.insert_open(5, NullHandler::new()).unwrap();
        assert!(table.mark_local_reset(5));
        // already draining, the second transition loses
        assert!(!table.mark_failed(5));
        assert!(matches!(table.route(5), Route::Draining));
    }

    #[test]
    fn remove_offers_high_water() {
        let table = StreamTable::new();
        table.insert_open(7, NullHandler::new()).unwrap();
        table.insert_open(3, NullHandler::new()).unwrap();
        table.remove(7);
        assert_eq!(table.closed_high_water(), 7);
        // removing a lower id never regresses the mark
        table.remove(3);
        assert_eq!(table.closed_high_water(), 7);
        // removing an absent id is a no-op
        table.remove(99);
        assert_eq!(table.closed_high_water(), 7);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn claim_sweep_takes_each_open_entry_once() {
        let table = StreamTable::new();
        table.insert_open(1, NullHandler::new()).unwrap();
        table.insert_open(3, NullHandler::new()).unwrap();
        table.mark_local_reset(3);
        assert_eq!(table.claim_all_open().len(), 1);
        // everything is draining now; a second sweep finds nothing
        assert!(table.claim_all_open().is_empty());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn claim_open_is_exclusive() {
        let table = StreamTable::new();
        table.insert_open(5, NullHandler::new()).unwrap();
        assert!(table.claim_open(5).is_some());
        // the entry is claimed, not removed; later claims and marks lose
        assert!(table.claim_open(5).is_none());
        assert!(!table.mark_failed(5));
        assert!(matches!(table.route(5), Route::Draining));
        assert!(table.claim_open(99).is_none());
    }

    #[tokio::test]
    async fn terminal_completes_once() {
        let terminal = StreamTerminal::new();
        assert!(terminal.complete(StreamEnd::Ok));
        assert!(!terminal.complete(StreamEnd::LocalReset(ErrorCode::Cancel)));
        assert_eq!(terminal.try_get(), Some(StreamEnd::Ok));
        assert_eq!(terminal.wait().await, StreamEnd::Ok);
    }

    #[tokio::test]
    async fn terminal_wakes_concurrent_waiters() {
        let terminal = StreamTerminal::new();
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let t = terminal.clone();
            waiters.push(tokio::spawn(async move { t.wait().await }));
        }
        tokio::task::yield_now().await;
        terminal.complete(StreamEnd::RemoteReset(ErrorCode::Cancel));
        for waiter in waiters {
            assert_eq!(
                waiter.await.unwrap(),
                StreamEnd::RemoteReset(ErrorCode::Cancel)
            );
        }
    }
}
