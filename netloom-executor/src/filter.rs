//! Hands the rest of the chain over to an [`Executor`].
//!
//! Everything before an [`ExecutorFilter`] runs on the reactor thread; everything after it,
//! including the [`IoHandler`](netloom::IoHandler), runs on the executor. Events of one
//! session are queued and delivered one at a time in arrival order, so a handler never
//! sees two events of the same session concurrently or out of order. Different sessions
//! proceed in parallel.
//!
//! A dispatched `session_closed` holds the close open: the session's chain and attributes
//! stay in place and its close future completes only after the event has been delivered.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use log::{trace, warn};
use netloom::{
    AttributeKey, CloseHold, Error, FilterContext, IdleStatus, IoFilter, Message, Result,
    WriteRequest,
};
use parking_lot::Mutex;

use crate::pool::Executor;

/// Events an [`ExecutorFilter`] can dispatch.
///
/// `session_created` always runs on the reactor thread, before the session is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoEventType {
    SessionOpened,
    /// Delivered after every earlier event of the session. The close future completes once
    /// it has run.
    SessionClosed,
    SessionIdle,
    MessageReceived,
    MessageSent,
    ExceptionCaught,
    Write,
    Close,
}

impl IoEventType {
    /// Dispatched when no explicit set is given.
    pub const DEFAULT: [IoEventType; 6] = [
        IoEventType::SessionOpened,
        IoEventType::SessionClosed,
        IoEventType::SessionIdle,
        IoEventType::MessageReceived,
        IoEventType::MessageSent,
        IoEventType::ExceptionCaught,
    ];

    fn bit(self) -> u16 {
        1 << self as u16
    }
}

enum Event {
    Opened,
    Closed(CloseHold),
    Idle(IdleStatus),
    Received(Message),
    Sent(WriteRequest),
    Exception(Error),
    Write(WriteRequest),
    Close,
}

struct QueueState {
    events: VecDeque<(FilterContext, Event)>,
    running: bool,
}

/// Pending events of one session.
struct OrderedQueue {
    state: Mutex<QueueState>,
}

impl OrderedQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                running: false,
            }),
        }
    }

    /// Queues `event`; returns true when the caller must schedule a drain.
    fn push(&self, ctx: FilterContext, event: Event) -> bool {
        let mut state = self.state.lock();
        state.events.push_back((ctx, event));
        !std::mem::replace(&mut state.running, true)
    }

    fn drain(&self) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.events.pop_front() {
                    Some(next) => next,
                    None => {
                        state.running = false;
                        return;
                    }
                }
            };
            let (ctx, event) = next;
            deliver(&ctx, event);
        }
    }

    fn len(&self) -> usize {
        self.state.lock().events.len()
    }
}

fn deliver(ctx: &FilterContext, event: Event) {
    let mut write_future = None;
    let outcome = catch_unwind(AssertUnwindSafe(|| match event {
        Event::Opened => ctx.fire_session_opened(),
        Event::Closed(hold) => {
            let result = ctx.fire_session_closed();
            drop(hold);
            result
        }
        Event::Idle(status) => ctx.fire_session_idle(status),
        Event::Received(message) => ctx.fire_message_received(message),
        Event::Sent(request) => ctx.fire_message_sent(request),
        Event::Exception(cause) => ctx.fire_exception_caught(cause),
        Event::Write(request) => {
            write_future = Some(request.future().clone());
            ctx.fire_filter_write(request)
        }
        Event::Close => ctx.fire_filter_close(),
    }));
    let err = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(_) => Error::HandlerPanic(format!("event handler panicked after {}", ctx.name())),
    };
    let session = ctx.session();
    if let Some(future) = write_future {
        future.complete(Err(err.clone()));
        if matches!(err, Error::SessionClosed | Error::WriteQueueFull(_)) {
            return;
        }
    }
    trace!("session {} dispatched event failed: {}", session.id(), err);
    session.chain().fire_exception_caught(err);
}

/// Dispatches selected events to an [`Executor`], preserving per-session order.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use netloom::IoSession;
/// use netloom_executor::{ExecutorFilter, ThreadPool};
///
/// # fn install(session: &IoSession) -> std::io::Result<()> {
/// let pool = ThreadPool::new("handlers", 4)?;
/// session
///     .chain()
///     .add_last("executor", Arc::new(ExecutorFilter::new(pool)))
///     .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
/// # Ok(())
/// # }
/// ```
pub struct ExecutorFilter {
    executor: Arc<dyn Executor>,
    events: u16,
}

impl ExecutorFilter {
    /// Dispatches [`IoEventType::DEFAULT`].
    pub fn new(executor: impl Executor) -> Self {
        Self::with_events(executor, &IoEventType::DEFAULT)
    }

    pub fn with_events(executor: impl Executor, events: &[IoEventType]) -> Self {
        Self {
            executor: Arc::new(executor),
            events: events.iter().fold(0, |mask, event| mask | event.bit()),
        }
    }

    pub fn handles(&self, event: IoEventType) -> bool {
        self.events & event.bit() != 0
    }

    /// Events of `ctx`'s session waiting for the executor.
    pub fn queued(&self, ctx: &FilterContext) -> usize {
        ctx.session()
            .get_attribute(&Self::queue_key(ctx.name()))
            .map_or(0, |queue| queue.len())
    }

    fn queue_key(name: &str) -> AttributeKey<Arc<OrderedQueue>> {
        AttributeKey::named(format!("netloom.executor.{name}.queue"))
    }

    fn dispatch(&self, ctx: &FilterContext, event: Event) {
        let queue = ctx
            .session()
            .get_or_insert_attribute(&Self::queue_key(ctx.name()), || {
                Arc::new(OrderedQueue::new())
            });
        if !queue.push(ctx.clone(), event) {
            return;
        }
        let worker = Arc::clone(&queue);
        if let Err(err) = self.executor.execute(Box::new(move || worker.drain())) {
            warn!("session {} {}, delivering inline", ctx.session().id(), err);
            queue.drain();
        }
    }
}

impl fmt::Debug for ExecutorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorFilter")
            .field("events", &format_args!("{:#010b}", self.events))
            .finish()
    }
}

impl IoFilter for ExecutorFilter {
    fn session_opened(&self, ctx: &FilterContext) -> Result<()> {
        if !self.handles(IoEventType::SessionOpened) {
            return ctx.fire_session_opened();
        }
        self.dispatch(ctx, Event::Opened);
        Ok(())
    }

    fn session_closed(&self, ctx: &FilterContext) -> Result<()> {
        if !self.handles(IoEventType::SessionClosed) {
            return ctx.fire_session_closed();
        }
        self.dispatch(ctx, Event::Closed(ctx.session().hold_close()));
        Ok(())
    }

    fn session_idle(&self, ctx: &FilterContext, status: IdleStatus) -> Result<()> {
        if !self.handles(IoEventType::SessionIdle) {
            return ctx.fire_session_idle(status);
        }
        self.dispatch(ctx, Event::Idle(status));
        Ok(())
    }

    fn message_received(&self, ctx: &FilterContext, message: Message) -> Result<()> {
        if !self.handles(IoEventType::MessageReceived) {
            return ctx.fire_message_received(message);
        }
        self.dispatch(ctx, Event::Received(message));
        Ok(())
    }

    fn message_sent(&self, ctx: &FilterContext, request: WriteRequest) -> Result<()> {
        if !self.handles(IoEventType::MessageSent) {
            return ctx.fire_message_sent(request);
        }
        self.dispatch(ctx, Event::Sent(request));
        Ok(())
    }

    fn exception_caught(&self, ctx: &FilterContext, cause: Error) -> Result<()> {
        if !self.handles(IoEventType::ExceptionCaught) {
            return ctx.fire_exception_caught(cause);
        }
        self.dispatch(ctx, Event::Exception(cause));
        Ok(())
    }

    fn filter_write(&self, ctx: &FilterContext, request: WriteRequest) -> Result<()> {
        if !self.handles(IoEventType::Write) {
            return ctx.fire_filter_write(request);
        }
        self.dispatch(ctx, Event::Write(request));
        Ok(())
    }

    fn filter_close(&self, ctx: &FilterContext) -> Result<()> {
        if !self.handles(IoEventType::Close) {
            return ctx.fire_filter_close();
        }
        self.dispatch(ctx, Event::Close);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{ExecuteError, Job, ThreadPool};
    use netloom::{IoBuffer, IoHandler, IoSession};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Ordered {
        seen: Mutex<Vec<u8>>,
        threads: Mutex<Vec<Option<String>>>,
        busy: AtomicBool,
        overlapped: AtomicBool,
    }

    impl IoHandler for Ordered {
        fn message_received(&self, _session: &Arc<IoSession>, message: Message) -> Result<()> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            let buffer = message.downcast::<IoBuffer>().map_err(|_| {
                Error::ProtocolDecode("expected a buffer".into())
            })?;
            thread::sleep(Duration::from_millis(1));
            self.seen.lock().push(buffer.as_slice()[0]);
            self.threads
                .lock()
                .push(thread::current().name().map(str::to_owned));
            self.busy.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Closing {
        /// `(close future done, attribute still set)` as seen by `session_closed`.
        seen: Mutex<Option<(bool, bool)>>,
    }

    impl IoHandler for Closing {
        fn session_closed(&self, session: &Arc<IoSession>) -> Result<()> {
            thread::sleep(Duration::from_millis(20));
            let done = session.close(true).is_done();
            let kept = session.contains_attribute(&AttributeKey::<u32>::named("tag"));
            *self.seen.lock() = Some((done, kept));
            Ok(())
        }
    }

    struct Rejecting;

    impl Executor for Rejecting {
        fn execute(&self, _job: Job) -> std::result::Result<(), ExecuteError> {
            Err(ExecuteError::Shutdown)
        }
    }

    #[test]
    fn test_events_keep_session_order_off_the_caller_thread() {
        let handler = Arc::new(Ordered::default());
        let session = IoSession::builder(1, handler.clone()).build();
        let pool = Arc::new(ThreadPool::new("exec-filter", 4).unwrap());
        session
            .chain()
            .add_last("executor", Arc::new(ExecutorFilter::new(pool.clone())))
            .unwrap();

        for i in 0..20u8 {
            session.fire_received(IoBuffer::wrap(vec![i]));
        }
        pool.shutdown();

        assert_eq!(*handler.seen.lock(), (0..20).collect::<Vec<u8>>());
        assert!(!handler.overlapped.load(Ordering::SeqCst));
        assert!(handler
            .threads
            .lock()
            .iter()
            .all(|name| name.as_deref().is_some_and(|n| n.starts_with("exec-filter-"))));
    }

    #[test]
    fn test_dispatched_close_completes_after_delivery() {
        let handler = Arc::new(Closing::default());
        let session = IoSession::builder(4, handler.clone()).build();
        let pool = Arc::new(ThreadPool::new("exec-close", 1).unwrap());
        session
            .chain()
            .add_last("executor", Arc::new(ExecutorFilter::new(pool.clone())))
            .unwrap();
        session.set_attribute(&AttributeKey::named("tag"), 7u32);
        session.fire_opened();

        let closed = session.close(true);
        session.finish_close();
        assert!(session.is_closed());
        pool.shutdown();

        assert_eq!(*handler.seen.lock(), Some((false, true)));
        assert!(closed.is_done());
        assert!(session.attribute_names().is_empty());
        assert!(session.chain().is_empty());
    }

    #[test]
    fn test_unselected_events_stay_inline() {
        let filter = ExecutorFilter::with_events(Rejecting, &[IoEventType::MessageSent]);
        assert!(filter.handles(IoEventType::MessageSent));
        assert!(!filter.handles(IoEventType::MessageReceived));

        let handler = Arc::new(Ordered::default());
        let session = IoSession::builder(2, handler.clone()).build();
        session.chain().add_last("executor", Arc::new(filter)).unwrap();
        session.fire_received(IoBuffer::wrap(vec![9]));
        assert_eq!(*handler.seen.lock(), vec![9]);
    }

    #[test]
    fn test_rejected_dispatch_runs_inline() {
        let handler = Arc::new(Ordered::default());
        let session = IoSession::builder(3, handler.clone()).build();
        session
            .chain()
            .add_last("executor", Arc::new(ExecutorFilter::new(Rejecting)))
            .unwrap();
        session.fire_received(IoBuffer::wrap(vec![1]));
        session.fire_received(IoBuffer::wrap(vec![2]));
        assert_eq!(*handler.seen.lock(), vec![1, 2]);
    }
}
