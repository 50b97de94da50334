//! Connection state shared between the I/O task and offloaded workers.
//!
//! A [`Connection`] owns everything connection-scoped: the attribute store
//! holding decoder contexts, the queue of encoded outbound bytes, the queue
//! of decoded messages awaiting the handler, and a mailbox through which
//! worker threads hand back responses and errors. Workers never touch the
//! pipeline directly; they post to the mailbox and call
//! [`Connection::request_write`], which wakes the I/O task.

mod attributes;
mod registry;

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

pub use attributes::{AttributeKey, AttributeStore};
use bytes::Bytes;
pub use registry::ConnectionRegistry;
use tokio::sync::Notify;

use crate::{
    error::{HandlerError, PipelineError},
    message::Message,
};

/// Identifier assigned to a connection (the flow identifier).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Allocate a process-unique identifier.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "conn-{}", self.0) }
}

/// Shared handle to a connection, cloneable across threads.
pub type ConnectionHandle = Arc<Connection>;

/// Work posted to the I/O task from other threads.
pub(crate) enum MailboxItem {
    Write(Message),
    Error(HandlerError),
}

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State of one client connection.
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    attributes: Mutex<AttributeStore>,
    outbound: Mutex<VecDeque<Bytes>>,
    delivered: Mutex<VecDeque<Message>>,
    mailbox: Mutex<VecDeque<MailboxItem>>,
    write_ready: Notify,
    closing: AtomicBool,
    closed: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl Connection {
    /// Create a connection with the given identifier and peer address.
    #[must_use]
    pub fn new(id: ConnectionId, peer_addr: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            id,
            peer_addr,
            attributes: Mutex::new(AttributeStore::default()),
            outbound: Mutex::new(VecDeque::new()),
            delivered: Mutex::new(VecDeque::new()),
            mailbox: Mutex::new(VecDeque::new()),
            write_ready: Notify::new(),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    /// Create a connection with a fresh identifier and no socket, for tests
    /// and in-process pipelines.
    #[must_use]
    pub fn detached() -> Arc<Self> { Self::new(ConnectionId::next(), None) }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Remote address, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }

    /// Run `f` with exclusive access to the attribute store.
    ///
    /// Do not dispatch pipeline events from inside `f`.
    pub fn with_attributes<R>(&self, f: impl FnOnce(&mut AttributeStore) -> R) -> R {
        f(&mut lock(&self.attributes))
    }

    /// Queue encoded bytes for the socket. Called by the chain head.
    pub fn enqueue_outbound(&self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        lock(&self.outbound).push_back(bytes);
    }

    /// Take all queued outbound bytes in order.
    #[must_use]
    pub fn drain_outbound(&self) -> Vec<Bytes> { lock(&self.outbound).drain(..).collect() }

    /// Whether encoded bytes are waiting for the socket.
    #[must_use]
    pub fn has_outbound(&self) -> bool { !lock(&self.outbound).is_empty() }

    /// Hand a decoded message to the handler queue. Called by the chain tail.
    pub fn deliver(&self, message: Message) { lock(&self.delivered).push_back(message); }

    /// Pop the oldest decoded message awaiting the handler.
    #[must_use]
    pub fn next_delivered(&self) -> Option<Message> { lock(&self.delivered).pop_front() }

    /// Send an unencoded outbound message from any thread.
    ///
    /// The message is encoded by the pipeline on the I/O task.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] once the connection has closed.
    pub fn write(&self, message: impl Into<Message>) -> Result<(), PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::Closed);
        }
        lock(&self.mailbox).push_back(MailboxItem::Write(message.into()));
        self.request_write();
        Ok(())
    }

    /// Report a handler failure from any thread; it is dispatched through the
    /// chain's error event on the I/O task.
    pub fn report_error(&self, error: HandlerError) {
        if self.is_closed() {
            tracing::debug!(connection = %self.id, %error, "dropping error for closed connection");
            return;
        }
        lock(&self.mailbox).push_back(MailboxItem::Error(error));
        self.request_write();
    }

    pub(crate) fn drain_mailbox(&self) -> Vec<MailboxItem> { lock(&self.mailbox).drain(..).collect() }

    /// Register interest in writing. Safe to call from any thread.
    pub fn request_write(&self) { self.write_ready.notify_one(); }

    /// Wait until some thread calls [`Connection::request_write`].
    pub async fn write_requested(&self) { self.write_ready.notified().await; }

    /// Close the connection once queued outbound bytes are written.
    pub fn close_after_flush(&self) {
        self.closing.store(true, Ordering::Release);
        self.request_write();
    }

    /// Whether the connection should close after the current flush.
    #[must_use]
    pub fn should_close(&self) -> bool { self.closing.load(Ordering::Acquire) }

    /// Mark the connection as torn down. Later writes are refused.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.closing.store(true, Ordering::Release);
    }

    /// Whether the connection has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

    /// Record activity now. Called on every read and send.
    pub fn touch(&self) { self.touch_at(Instant::now()); }

    /// Record activity at `at`.
    pub fn touch_at(&self, at: Instant) {
        let mut last = lock(&self.last_activity);
        if at > *last {
            *last = at;
        }
    }

    /// Time of the most recent read or send.
    #[must_use]
    pub fn last_activity(&self) -> Instant { *lock(&self.last_activity) }

    /// How long the connection has been idle.
    #[must_use]
    pub fn idle_for(&self) -> Duration { self.idle_for_at(Instant::now()) }

    /// How long the connection has been idle as of `now`.
    #[must_use]
    pub fn idle_for_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
