//! # IoSession - One Logical Connection
//!
//! A session is created by a service when a channel is accepted or connected (or, for
//! datagrams, when the first packet from a new peer arrives) and lives until it is closed.
//!
//! ```text
//!   Created --session_opened--> Opened --close()/EOF/error--> Closing --> Closed
//!      |                                                        ^
//!      +--------------------------------------------------------+
//! ```
//!
//! Everything the application can call on a session is thread-safe: writes go into a
//! locked queue and wake the owning reactor, attribute access is locked, and traffic
//! suspension is an atomic mask. The reactor is the only consumer of the write queue.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::attribute::{AttributeKey, AttributeMap};
use crate::chain::FilterChain;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::future::{CloseFuture, WriteFuture};
use crate::handler::IoHandler;
use crate::write_request::{Message, WriteRequest};

/// Kind of transport the session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// A connected byte stream (TCP).
    Stream,
    /// Datagrams exchanged with a single peer (UDP).
    Datagram,
}

/// Which side created the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// Accepted by an acceptor.
    Accepted,
    /// Established by a connector.
    Connected,
}

/// The three idle kinds a session tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdleStatus {
    /// No reads for the threshold.
    ReaderIdle,
    /// No writes for the threshold.
    WriterIdle,
    /// Neither reads nor writes for the threshold.
    BothIdle,
}

impl IdleStatus {
    pub const ALL: [IdleStatus; 3] = [
        IdleStatus::ReaderIdle,
        IdleStatus::WriterIdle,
        IdleStatus::BothIdle,
    ];

    fn index(self) -> usize {
        match self {
            IdleStatus::ReaderIdle => 0,
            IdleStatus::WriterIdle => 1,
            IdleStatus::BothIdle => 2,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Opened = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Opened,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

const READ_SUSPENDED: u8 = 0b01;
const WRITE_SUSPENDED: u8 = 0b10;

struct IdleState {
    thresholds: [Option<Duration>; 3],
    last_fired: [Option<Instant>; 3],
    counts: [u32; 3],
    last_read: Instant,
    last_write: Instant,
}

impl IdleState {
    fn activity(&self, status: IdleStatus) -> Instant {
        match status {
            IdleStatus::ReaderIdle => self.last_read,
            IdleStatus::WriterIdle => self.last_write,
            IdleStatus::BothIdle => self.last_read.max(self.last_write),
        }
    }

    fn deadline(&self, status: IdleStatus) -> Option<Instant> {
        let threshold = self.thresholds[status.index()]?;
        let activity = self.activity(status);
        let reference = self.last_fired[status.index()].map_or(activity, |f| f.max(activity));
        Some(reference + threshold)
    }
}

#[derive(Default)]
struct Counters {
    read_bytes: AtomicU64,
    written_bytes: AtomicU64,
    read_messages: AtomicU64,
    written_messages: AtomicU64,
    scheduled_write_bytes: AtomicU64,
    scheduled_write_messages: AtomicU64,
}

fn saturating_sub(counter: &AtomicU64, n: u64) {
    let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
        Some(v.saturating_sub(n))
    });
}

/// One logical connection.
pub struct IoSession {
    id: u64,
    transport: TransportKind,
    role: SessionRole,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    config: SessionConfig,
    handler: Arc<dyn IoHandler>,
    chain: FilterChain,
    attributes: Mutex<AttributeMap>,
    write_queue: Mutex<VecDeque<WriteRequest>>,
    idle: Mutex<IdleState>,
    counters: Counters,
    created_at: Instant,
    traffic: AtomicU8,
    state: AtomicU8,
    close_requested: AtomicBool,
    close_now: AtomicBool,
    close_holds: AtomicUsize,
    close_future: CloseFuture,
    wakeup: Arc<Notify>,
}

/// Keeps a closing session's chain, attributes and close future alive until dropped.
///
/// Taken with [`IoSession::hold_close`] by filters that deliver `session_closed` on another
/// thread.
#[must_use = "the close completes as soon as the hold is dropped"]
pub struct CloseHold {
    session: Arc<IoSession>,
}

impl Drop for CloseHold {
    fn drop(&mut self) {
        self.session.release_close();
    }
}

impl fmt::Debug for CloseHold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHold")
            .field("session", &self.session.id)
            .finish()
    }
}

/// Builds an [`IoSession`]. Services use it for every channel they register; tests use it
/// to drive a chain without a socket.
pub struct IoSessionBuilder {
    id: u64,
    handler: Arc<dyn IoHandler>,
    transport: TransportKind,
    role: SessionRole,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    config: SessionConfig,
    wakeup: Option<Arc<Notify>>,
}

impl IoSessionBuilder {
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn role(mut self, role: SessionRole) -> Self {
        self.role = role;
        self
    }

    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = addr;
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Notifier the owning reactor waits on. Datagram sessions of one socket share it.
    pub fn wakeup(mut self, wakeup: Arc<Notify>) -> Self {
        self.wakeup = Some(wakeup);
        self
    }

    pub fn build(self) -> Arc<IoSession> {
        let now = Instant::now();
        let config = self.config;
        let thresholds = IdleStatus::ALL.map(|status| config.get_idle_time(status));
        Arc::new_cyclic(|weak: &Weak<IoSession>| IoSession {
            id: self.id,
            transport: self.transport,
            role: self.role,
            local_addr: self.local_addr,
            remote_addr: self.remote_addr,
            handler: self.handler,
            chain: FilterChain::new(weak.clone()),
            attributes: Mutex::new(AttributeMap::new()),
            write_queue: Mutex::new(VecDeque::new()),
            idle: Mutex::new(IdleState {
                thresholds,
                last_fired: [None; 3],
                counts: [0; 3],
                last_read: now,
                last_write: now,
            }),
            counters: Counters::default(),
            created_at: now,
            traffic: AtomicU8::new(0),
            state: AtomicU8::new(SessionState::Created as u8),
            close_requested: AtomicBool::new(false),
            close_now: AtomicBool::new(false),
            close_holds: AtomicUsize::new(0),
            close_future: CloseFuture::new(),
            wakeup: self.wakeup.unwrap_or_default(),
            config,
        })
    }
}

impl IoSession {
    /// Starts building a session with the given id and handler.
    pub fn builder(id: u64, handler: Arc<dyn IoHandler>) -> IoSessionBuilder {
        let unspecified = SocketAddr::from(([0, 0, 0, 0], 0));
        IoSessionBuilder {
            id,
            handler,
            transport: TransportKind::Stream,
            role: SessionRole::Accepted,
            local_addr: unspecified,
            remote_addr: unspecified,
            config: SessionConfig::default(),
            wakeup: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<dyn IoHandler> {
        &self.handler
    }

    /// The session's filter chain.
    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Opened and not yet closing.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Opened
    }

    /// Closing or closed; writes fail fast from here on.
    pub fn is_closing(&self) -> bool {
        self.state() >= SessionState::Closing
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Writes `message` through the filter chain.
    ///
    /// The returned future completes once the encoded bytes are flushed, or fails with
    /// `SessionClosed` if the session is closing or closes before that.
    pub fn write(&self, message: Message) -> WriteFuture {
        self.write_request(WriteRequest::new(message))
    }

    /// Writes a datagram to `destination` instead of the session's remote address.
    pub fn write_to(&self, message: Message, destination: SocketAddr) -> WriteFuture {
        self.write_request(WriteRequest::new(message).with_destination(destination))
    }

    fn write_request(&self, request: WriteRequest) -> WriteFuture {
        if self.is_closing() {
            trace!("session {} write rejected, session is closing", self.id);
            return WriteFuture::failed(Error::SessionClosed);
        }
        self.chain.fire_filter_write(request)
    }

    /// Closes the session.
    ///
    /// With `immediate == true` queued writes are discarded and their futures fail with
    /// `SessionClosed`. Otherwise the queue is flushed first. Repeated calls return the same
    /// future and have no further effect.
    pub fn close(&self, immediate: bool) -> CloseFuture {
        if self.is_closed() {
            return self.close_future.clone();
        }
        let previous = self.state.fetch_max(SessionState::Closing as u8, Ordering::AcqRel);
        if previous < SessionState::Closing as u8 {
            debug!(
                "session {} closing ({})",
                self.id,
                if immediate { "immediate" } else { "on flush" }
            );
        }
        if immediate {
            self.request_filter_close();
        } else {
            self.wakeup.notify_one();
        }
        self.close_future.clone()
    }

    /// Future completed once the session is fully closed.
    pub fn close_future(&self) -> CloseFuture {
        self.close_future.clone()
    }

    fn request_filter_close(&self) {
        if !self.close_requested.swap(true, Ordering::AcqRel) {
            self.chain.fire_filter_close();
        }
    }

    /// Reached the head of the chain: the reactor must drop the channel.
    pub(crate) fn mark_close_now(&self) {
        self.state.fetch_max(SessionState::Closing as u8, Ordering::AcqRel);
        self.close_now.store(true, Ordering::Release);
        self.wakeup.notify_one();
    }

    /// Closes without consulting the filter chain.
    pub(crate) fn force_close(&self) {
        self.close_requested.store(true, Ordering::Release);
        self.mark_close_now();
    }

    // Attributes

    pub fn get_attribute<T: Clone + Send + Sync + 'static>(
        &self,
        key: &AttributeKey<T>,
    ) -> Option<T> {
        self.attributes.lock().get(key)
    }

    /// Stores `value`, returning the previous one.
    pub fn set_attribute<T: Send + Sync + 'static>(
        &self,
        key: &AttributeKey<T>,
        value: T,
    ) -> Option<T> {
        self.attributes.lock().set(key, value)
    }

    pub fn set_attribute_if_absent<T: Send + Sync + 'static>(
        &self,
        key: &AttributeKey<T>,
        value: T,
    ) -> bool {
        self.attributes.lock().set_if_absent(key, value)
    }

    /// Returns the attribute, creating it with `init` first if absent.
    ///
    /// `init` runs without the attribute lock held; if two callers race, the first value
    /// stored wins and both receive it.
    pub fn get_or_insert_attribute<T, F>(&self, key: &AttributeKey<T>, init: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get_attribute(key) {
            return value;
        }
        let value = init();
        self.attributes.lock().get_or_insert_with(key, move || value)
    }

    pub fn remove_attribute<T: Send + Sync + 'static>(&self, key: &AttributeKey<T>) -> Option<T> {
        self.attributes.lock().remove(key)
    }

    pub fn contains_attribute<T>(&self, key: &AttributeKey<T>) -> bool {
        self.attributes.lock().contains(key)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.lock().keys().map(str::to_owned).collect()
    }

    // Traffic control

    /// Stops read events without closing; the kernel buffer absorbs further stream data.
    ///
    /// Datagram sessions share their socket with other peers, so datagrams that arrive for a
    /// read-suspended session are discarded rather than held back.
    pub fn suspend_read(&self) {
        self.traffic.fetch_or(READ_SUSPENDED, Ordering::AcqRel);
        self.wakeup.notify_one();
    }

    pub fn resume_read(&self) {
        self.traffic.fetch_and(!READ_SUSPENDED, Ordering::AcqRel);
        self.wakeup.notify_one();
    }

    /// Stops flushing the write queue; writes keep accumulating.
    pub fn suspend_write(&self) {
        self.traffic.fetch_or(WRITE_SUSPENDED, Ordering::AcqRel);
        self.wakeup.notify_one();
    }

    pub fn resume_write(&self) {
        self.traffic.fetch_and(!WRITE_SUSPENDED, Ordering::AcqRel);
        self.wakeup.notify_one();
    }

    pub fn is_read_suspended(&self) -> bool {
        self.traffic.load(Ordering::Acquire) & READ_SUSPENDED != 0
    }

    pub fn is_write_suspended(&self) -> bool {
        self.traffic.load(Ordering::Acquire) & WRITE_SUSPENDED != 0
    }

    // Idle

    /// Sets the idle threshold for `status`; `Duration::ZERO` disables it.
    pub fn set_idle_time(&self, status: IdleStatus, time: Duration) {
        let time = (!time.is_zero()).then_some(time);
        self.idle.lock().thresholds[status.index()] = time;
        self.wakeup.notify_one();
    }

    pub fn idle_time(&self, status: IdleStatus) -> Option<Duration> {
        self.idle.lock().thresholds[status.index()]
    }

    /// Consecutive idle notifications of `status` since the last matching activity.
    pub fn idle_count(&self, status: IdleStatus) -> u32 {
        self.idle.lock().counts[status.index()]
    }

    /// Idle kinds whose threshold elapsed at `now`.
    ///
    /// Each kind is reported at most once per threshold interval: the next report needs
    /// another full threshold of silence measured from the previous one.
    pub fn poll_idle(&self, now: Instant) -> Vec<IdleStatus> {
        let mut idle = self.idle.lock();
        let mut fired = Vec::new();
        for status in IdleStatus::ALL {
            if let Some(deadline) = idle.deadline(status) {
                if now >= deadline {
                    idle.last_fired[status.index()] = Some(now);
                    idle.counts[status.index()] += 1;
                    fired.push(status);
                }
            }
        }
        fired
    }

    /// Fires `session_idle` for every elapsed idle kind.
    pub fn check_idle(&self, now: Instant) {
        for status in self.poll_idle(now) {
            trace!("session {} is {:?}", self.id, status);
            self.chain.fire_session_idle(status);
        }
    }

    /// Earliest instant at which an idle check or a write timeout is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        let idle = {
            let idle = self.idle.lock();
            IdleStatus::ALL
                .into_iter()
                .filter_map(|status| idle.deadline(status))
                .min()
        };
        let write = self.config.write_timeout.and_then(|timeout| {
            self.write_queue
                .lock()
                .front()
                .map(|request| request.created() + timeout)
        });
        match (idle, write) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // Statistics

    pub fn creation_time(&self) -> Instant {
        self.created_at
    }

    pub fn last_read_time(&self) -> Instant {
        self.idle.lock().last_read
    }

    pub fn last_write_time(&self) -> Instant {
        self.idle.lock().last_write
    }

    pub fn last_io_time(&self) -> Instant {
        let idle = self.idle.lock();
        idle.last_read.max(idle.last_write)
    }

    pub fn read_bytes(&self) -> u64 {
        self.counters.read_bytes.load(Ordering::Relaxed)
    }

    pub fn written_bytes(&self) -> u64 {
        self.counters.written_bytes.load(Ordering::Relaxed)
    }

    pub fn read_messages(&self) -> u64 {
        self.counters.read_messages.load(Ordering::Relaxed)
    }

    pub fn written_messages(&self) -> u64 {
        self.counters.written_messages.load(Ordering::Relaxed)
    }

    /// Bytes queued but not yet written to the socket.
    pub fn scheduled_write_bytes(&self) -> u64 {
        self.counters.scheduled_write_bytes.load(Ordering::Relaxed)
    }

    pub fn scheduled_write_messages(&self) -> u64 {
        self.counters.scheduled_write_messages.load(Ordering::Relaxed)
    }

    pub(crate) fn record_message_received(&self) {
        self.counters.read_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_sent(&self) {
        self.counters.written_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Queues a request at the tail of the write queue. Called by the head of the chain.
    pub(crate) fn enqueue_write(&self, request: WriteRequest) -> Result<()> {
        if self.close_now.load(Ordering::Acquire) || self.is_closed() {
            return Err(Error::SessionClosed);
        }
        let bytes = request.buffer().map_or(0, |b| b.remaining()) as u64;
        {
            let mut queue = self.write_queue.lock();
            // `finish_close` marks the session closed before it drains the queue.
            if self.is_closed() {
                return Err(Error::SessionClosed);
            }
            if let Some(max) = self.config.max_write_queue {
                if queue.len() >= max {
                    return Err(Error::WriteQueueFull(max));
                }
            }
            queue.push_back(request);
        }
        self.counters
            .scheduled_write_bytes
            .fetch_add(bytes, Ordering::Relaxed);
        self.counters
            .scheduled_write_messages
            .fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_one();
        Ok(())
    }
}

/// Reactor-side operations. Services call these from the thread that owns the channel.
impl IoSession {
    /// Notifier the reactor waits on for writes, traffic changes and close requests.
    pub fn wakeup(&self) -> &Arc<Notify> {
        &self.wakeup
    }

    /// Fires `session_created`.
    pub fn fire_created(&self) {
        self.chain.fire_session_created();
    }

    /// Moves to `Opened` and fires `session_opened`.
    pub fn fire_opened(&self) {
        if self
            .state
            .compare_exchange(
                SessionState::Created as u8,
                SessionState::Opened as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            debug!("session {} opened: {} -> {}", self.id, self.local_addr, self.remote_addr);
            self.chain.fire_session_opened();
        }
    }

    /// Counts `n` freshly read bytes and injects them into the chain.
    pub fn fire_received(&self, buffer: crate::IoBuffer) {
        let n = buffer.remaining() as u64;
        self.counters.read_bytes.fetch_add(n, Ordering::Relaxed);
        {
            let mut idle = self.idle.lock();
            idle.last_read = Instant::now();
            idle.counts[IdleStatus::ReaderIdle.index()] = 0;
            idle.counts[IdleStatus::BothIdle.index()] = 0;
        }
        trace!("session {} read {} bytes", self.id, n);
        self.chain.fire_message_received(Box::new(buffer));
    }

    /// Routes a reactor-side fault to `exception_caught`.
    pub fn fire_exception(&self, err: Error) {
        self.chain.fire_exception_caught(err);
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_queue.lock().is_empty()
    }

    /// Removes the oldest queued request.
    pub fn poll_write(&self) -> Option<WriteRequest> {
        self.write_queue.lock().pop_front()
    }

    /// Puts a partially written request back at the head of the queue.
    pub fn requeue_write(&self, request: WriteRequest) {
        self.write_queue.lock().push_front(request);
    }

    /// Accounts `n` bytes written to the socket.
    pub fn record_written(&self, n: usize) {
        let n = n as u64;
        self.counters.written_bytes.fetch_add(n, Ordering::Relaxed);
        saturating_sub(&self.counters.scheduled_write_bytes, n);
        let mut idle = self.idle.lock();
        idle.last_write = Instant::now();
        idle.counts[IdleStatus::WriterIdle.index()] = 0;
        idle.counts[IdleStatus::BothIdle.index()] = 0;
    }

    /// Completes a fully flushed request and fires `message_sent`.
    pub fn write_completed(&self, request: WriteRequest) {
        saturating_sub(&self.counters.scheduled_write_messages, 1);
        request.future().complete(Ok(()));
        self.chain.fire_message_sent(request);
    }

    fn fail_request(&self, request: WriteRequest, err: Error) {
        let bytes = request.buffer().map_or(0, |b| b.remaining()) as u64;
        saturating_sub(&self.counters.scheduled_write_bytes, bytes);
        saturating_sub(&self.counters.scheduled_write_messages, 1);
        request.future().complete(Err(err));
    }

    /// Fails the oldest request if it outlived the write timeout, then closes the session.
    pub fn check_write_timeout(&self, now: Instant) -> bool {
        let Some(timeout) = self.config.write_timeout else {
            return false;
        };
        let expired = {
            let mut queue = self.write_queue.lock();
            match queue.front() {
                Some(request) if now.duration_since(request.created()) >= timeout => {
                    queue.pop_front()
                }
                _ => None,
            }
        };
        match expired {
            Some(request) => {
                debug!("session {} write timed out after {:?}", self.id, timeout);
                self.fail_request(request, Error::WriteTimeout(timeout));
                self.fire_exception(Error::WriteTimeout(timeout));
                self.close(true);
                true
            }
            None => false,
        }
    }

    /// Starts the final close once a graceful close has drained the queue.
    pub fn close_if_flushed(&self) {
        if self.is_closing() && !self.has_pending_writes() {
            self.request_filter_close();
        }
    }

    /// Whether the reactor must drop the channel now.
    pub fn should_close_now(&self) -> bool {
        self.close_now.load(Ordering::Acquire)
    }

    /// Completes the close after the channel has been dropped.
    ///
    /// Fails every queued write with `SessionClosed` and fires `session_closed` once. The
    /// chain and the attributes are cleared and the close future completes once every
    /// [`CloseHold`] taken during `session_closed` is released.
    pub fn finish_close(&self) {
        let previous = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        if previous == SessionState::Closed as u8 {
            return;
        }
        self.close_now.store(true, Ordering::Release);
        let pending: Vec<WriteRequest> = self.write_queue.lock().drain(..).collect();
        if !pending.is_empty() {
            debug!(
                "session {} discarding {} queued writes",
                self.id,
                pending.len()
            );
        }
        for request in pending {
            self.fail_request(request, Error::SessionClosed);
        }
        self.close_holds.fetch_add(1, Ordering::AcqRel);
        self.chain.fire_session_closed();
        self.release_close();
    }

    /// Delays the end of [`finish_close`](Self::finish_close) until the hold is dropped.
    pub fn hold_close(self: &Arc<Self>) -> CloseHold {
        self.close_holds.fetch_add(1, Ordering::AcqRel);
        CloseHold {
            session: Arc::clone(self),
        }
    }

    fn release_close(&self) {
        if self.close_holds.fetch_sub(1, Ordering::AcqRel) != 1 || !self.is_closed() {
            return;
        }
        self.chain.clear();
        self.attributes.lock().clear();
        debug!("session {} closed", self.id);
        self.close_future.complete(());
    }
}

impl fmt::Debug for IoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoSession")
            .field("id", &self.id)
            .field("transport", &self.transport)
            .field("role", &self.role)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::IoHandlerAdapter;
    use crate::IoBuffer;

    fn session() -> Arc<IoSession> {
        IoSession::builder(1, Arc::new(IoHandlerAdapter)).build()
    }

    #[test]
    fn test_read_idle_fires_once_per_threshold() {
        let session = session();
        let unit = Duration::from_millis(100);
        session.set_idle_time(IdleStatus::ReaderIdle, unit);
        let start = session.last_read_time();

        assert!(session.poll_idle(start + unit / 2).is_empty());
        assert_eq!(
            session.poll_idle(start + unit + Duration::from_millis(1)),
            vec![IdleStatus::ReaderIdle]
        );
        assert!(session.poll_idle(start + unit + Duration::from_millis(50)).is_empty());
        assert!(session.poll_idle(start + unit * 2).is_empty());
        assert_eq!(
            session.poll_idle(start + unit * 2 + Duration::from_millis(2)),
            vec![IdleStatus::ReaderIdle]
        );
        assert_eq!(session.idle_count(IdleStatus::ReaderIdle), 2);
    }

    #[test]
    fn test_unset_idle_kind_never_fires() {
        let session = session();
        let later = Instant::now() + Duration::from_secs(3600);
        assert!(session.poll_idle(later).is_empty());
        assert_eq!(session.next_deadline(), None);
    }

    #[test]
    fn test_traffic_mask() {
        let session = session();
        session.suspend_read();
        assert!(session.is_read_suspended());
        assert!(!session.is_write_suspended());
        session.suspend_write();
        session.resume_read();
        assert!(!session.is_read_suspended());
        assert!(session.is_write_suspended());
    }

    #[test]
    fn test_write_after_close_fails_fast() {
        let session = session();
        session.close(false);
        let future = session.write(Box::new(IoBuffer::from("late")));
        assert!(matches!(future.get(), Some(Err(Error::SessionClosed))));
    }

    #[test]
    fn test_finish_close_fails_queued_writes_and_is_idempotent() {
        let session = session();
        session.fire_opened();
        let futures: Vec<_> = (0..3)
            .map(|i| session.write(Box::new(vec![i as u8])))
            .collect();
        assert_eq!(session.scheduled_write_messages(), 3);

        let first = session.close(true);
        let second = session.close(true);
        assert!(session.should_close_now());
        session.finish_close();
        session.finish_close();

        assert!(first.is_done() && second.is_done());
        for future in futures {
            assert!(matches!(future.get(), Some(Err(Error::SessionClosed))));
        }
        assert_eq!(session.scheduled_write_messages(), 0);
        assert!(session.is_closed());
    }

    #[test]
    fn test_write_racing_close_never_stays_pending() {
        for _ in 0..200 {
            let session = session();
            session.fire_opened();
            let futures = Mutex::new(Vec::new());
            std::thread::scope(|scope| {
                for writer in 0..4u8 {
                    let session = &session;
                    let futures = &futures;
                    scope.spawn(move || {
                        for i in 0..16u8 {
                            let future = session.write(Box::new(vec![writer, i]));
                            futures.lock().push(future);
                        }
                    });
                }
                scope.spawn(|| {
                    session.close(true);
                    session.finish_close();
                });
            });
            for future in futures.into_inner() {
                assert!(matches!(future.get(), Some(Err(Error::SessionClosed))));
            }
            assert!(session.write_queue.lock().is_empty());
        }
    }

    #[test]
    fn test_bounded_write_queue() {
        let mut config = SessionConfig::default();
        config.max_write_queue(Some(1));
        let session = IoSession::builder(2, Arc::new(IoHandlerAdapter))
            .config(config)
            .build();
        assert!(session.write(Box::new(vec![1u8])).get().is_none());
        assert!(matches!(
            session.write(Box::new(vec![2u8])).get(),
            Some(Err(Error::WriteQueueFull(1)))
        ));
    }

    #[test]
    fn test_write_timeout_expires_oldest_request() {
        let mut config = SessionConfig::default();
        config.write_timeout(Some(Duration::from_millis(10)));
        let session = IoSession::builder(3, Arc::new(IoHandlerAdapter))
            .config(config)
            .build();
        let future = session.write(Box::new(vec![1u8]));
        let later = Instant::now() + Duration::from_millis(20);
        assert!(session.check_write_timeout(later));
        assert!(matches!(future.get(), Some(Err(Error::WriteTimeout(_)))));
        assert!(session.should_close_now());
    }
}
