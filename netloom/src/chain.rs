//! # FilterChain - Ordered, Mutable Pipeline per Session
//!
//! Each session owns one chain. The chain holds named entries between two fixed sinks:
//!
//! - **head**: the wire end. Outbound writes that reach it are queued on the session and
//!   the reactor is woken; an outbound close that reaches it makes the reactor drop the
//!   channel.
//! - **tail**: the application end. Inbound events that reach it invoke the session's
//!   [`IoHandler`](crate::IoHandler).
//!
//! Neither sink can be named, replaced or removed. Entries can be added, replaced and
//! removed at any time, including from inside a filter callback; the entry list is locked
//! only while the next hop is looked up, never while a filter runs.
//!
//! Every `fire_*` method here is an entry point: it catches errors and panics raised
//! anywhere downstream and turns them into `exception_caught` on the same session, so a
//! misbehaving filter never unwinds into the reactor.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, warn};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::filter::{FilterContext, IoFilter, Position};
use crate::future::WriteFuture;
use crate::session::{IdleStatus, IoSession};
use crate::write_request::{Message, WriteRequest};

/// Reserved name of the wire-side sink.
pub const HEAD_NAME: &str = "head";
/// Reserved name of the application-side sink.
pub const TAIL_NAME: &str = "tail";

pub(crate) struct Entry {
    id: u64,
    name: String,
    filter: Arc<dyn IoFilter>,
}

impl Entry {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn filter(&self) -> &Arc<dyn IoFilter> {
        &self.filter
    }
}

struct ChainInner {
    session: Weak<IoSession>,
    entries: RwLock<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
}

/// The filter chain of one session. Cloning yields another handle to the same chain.
#[derive(Clone)]
pub struct FilterChain {
    inner: Arc<ChainInner>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn guarded<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::HandlerPanic(panic_message(payload.as_ref()))),
    }
}

fn check_name(entries: &[Arc<Entry>], name: &str) -> Result<()> {
    if name == HEAD_NAME || name == TAIL_NAME {
        return Err(Error::ReservedFilterName(name.to_owned()));
    }
    if entries.iter().any(|entry| entry.name == name) {
        return Err(Error::DuplicateFilter(name.to_owned()));
    }
    Ok(())
}

fn index_of(entries: &[Arc<Entry>], name: &str) -> Result<usize> {
    entries
        .iter()
        .position(|entry| entry.name == name)
        .ok_or_else(|| Error::FilterNotFound(name.to_owned()))
}

impl FilterChain {
    pub(crate) fn new(session: Weak<IoSession>) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                session,
                entries: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The owning session, unless it has already been dropped.
    pub fn session(&self) -> Option<Arc<IoSession>> {
        self.inner.session.upgrade()
    }

    /// Inserts `filter` as the first entry after the head.
    pub fn add_first(&self, name: impl Into<String>, filter: Arc<dyn IoFilter>) -> Result<()> {
        self.insert(name.into(), filter, |_| Ok(0))
    }

    /// Inserts `filter` as the last entry before the tail.
    pub fn add_last(&self, name: impl Into<String>, filter: Arc<dyn IoFilter>) -> Result<()> {
        self.insert(name.into(), filter, |entries| Ok(entries.len()))
    }

    /// Inserts `filter` right before the entry named `base`.
    pub fn add_before(
        &self,
        base: &str,
        name: impl Into<String>,
        filter: Arc<dyn IoFilter>,
    ) -> Result<()> {
        self.insert(name.into(), filter, |entries| index_of(entries, base))
    }

    /// Inserts `filter` right after the entry named `base`.
    pub fn add_after(
        &self,
        base: &str,
        name: impl Into<String>,
        filter: Arc<dyn IoFilter>,
    ) -> Result<()> {
        self.insert(name.into(), filter, |entries| {
            index_of(entries, base).map(|idx| idx + 1)
        })
    }

    fn insert<F>(&self, name: String, filter: Arc<dyn IoFilter>, locate: F) -> Result<()>
    where
        F: Fn(&[Arc<Entry>]) -> Result<usize>,
    {
        {
            let entries = self.inner.entries.read();
            check_name(&entries, &name)?;
            locate(&entries)?;
        }
        filter.on_pre_add(self, &name)?;
        {
            let mut entries = self.inner.entries.write();
            check_name(&entries, &name)?;
            let index = locate(&entries)?;
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            entries.insert(
                index,
                Arc::new(Entry {
                    id,
                    name: name.clone(),
                    filter: Arc::clone(&filter),
                }),
            );
        }
        if let Err(err) = filter.on_post_add(self, &name) {
            self.detach(&name);
            return Err(err);
        }
        debug!("filter chain: added {}", name);
        Ok(())
    }

    fn detach(&self, name: &str) -> Option<Arc<dyn IoFilter>> {
        let mut entries = self.inner.entries.write();
        let index = entries.iter().position(|entry| entry.name == name)?;
        Some(Arc::clone(&entries.remove(index).filter))
    }

    /// Removes the entry named `name`, running the remove hooks.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn IoFilter>> {
        let filter = self
            .get(name)
            .ok_or_else(|| Error::FilterNotFound(name.to_owned()))?;
        filter.on_pre_remove(self, name)?;
        let removed = self
            .detach(name)
            .ok_or_else(|| Error::FilterNotFound(name.to_owned()))?;
        removed.on_post_remove(self, name)?;
        debug!("filter chain: removed {}", name);
        Ok(removed)
    }

    /// Swaps the filter of the entry named `name` in place, returning the old one.
    ///
    /// The entry keeps its position and identity; no lifecycle hooks run.
    pub fn replace(&self, name: &str, filter: Arc<dyn IoFilter>) -> Result<Arc<dyn IoFilter>> {
        let mut entries = self.inner.entries.write();
        let index = index_of(&entries, name)?;
        let old = Arc::clone(&entries[index].filter);
        let id = entries[index].id;
        entries[index] = Arc::new(Entry {
            id,
            name: name.to_owned(),
            filter,
        });
        Ok(old)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn IoFilter>> {
        self.inner
            .entries
            .read()
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| Arc::clone(&entry.filter))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .entries
            .read()
            .iter()
            .any(|entry| entry.name == name)
    }

    /// Entry names in inbound order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Removes every entry, tail side first, running the remove hooks.
    pub fn clear(&self) {
        for name in self.names().into_iter().rev() {
            if let Err(err) = self.remove(&name) {
                warn!("filter chain: removing {} failed: {}", name, err);
                self.detach(&name);
            }
        }
    }

    pub(crate) fn next_inbound(&self, position: &Position) -> Option<(Arc<Entry>, usize)> {
        let entries = self.inner.entries.read();
        let next = match position {
            Position::Head => 0,
            Position::Tail => return None,
            Position::Entry { entry, index } => entries
                .iter()
                .position(|e| e.id == entry.id)
                .map_or(*index, |idx| idx + 1),
        };
        entries.get(next).map(|entry| (Arc::clone(entry), next))
    }

    pub(crate) fn next_outbound(&self, position: &Position) -> Option<(Arc<Entry>, usize)> {
        let entries = self.inner.entries.read();
        let previous = match position {
            Position::Head => return None,
            Position::Tail => entries.len().checked_sub(1)?,
            Position::Entry { entry, index } => entries
                .iter()
                .position(|e| e.id == entry.id)
                .unwrap_or(*index)
                .checked_sub(1)?,
        };
        entries.get(previous).map(|entry| (Arc::clone(entry), previous))
    }

    fn dispatch<F>(&self, from: Position, event: &str, f: F)
    where
        F: FnOnce(&FilterContext) -> Result<()>,
    {
        let Some(session) = self.session() else {
            return;
        };
        let ctx = FilterContext::new(self.clone(), Arc::clone(&session), from);
        if let Err(err) = guarded(|| f(&ctx)) {
            debug!("session {} {} failed: {}", session.id(), event, err);
            self.fire_exception_caught(err);
        }
    }

    pub fn fire_session_created(&self) {
        self.dispatch(Position::Head, "session_created", |ctx| {
            ctx.fire_session_created()
        });
    }

    pub fn fire_session_opened(&self) {
        self.dispatch(Position::Head, "session_opened", |ctx| {
            ctx.fire_session_opened()
        });
    }

    pub fn fire_session_closed(&self) {
        self.dispatch(Position::Head, "session_closed", |ctx| {
            ctx.fire_session_closed()
        });
    }

    pub fn fire_session_idle(&self, status: IdleStatus) {
        self.dispatch(Position::Head, "session_idle", |ctx| {
            ctx.fire_session_idle(status)
        });
    }

    pub fn fire_message_received(&self, message: Message) {
        self.dispatch(Position::Head, "message_received", |ctx| {
            ctx.fire_message_received(message)
        });
    }

    pub fn fire_message_sent(&self, mut request: WriteRequest) {
        request.restore_message(HEAD_NAME);
        self.dispatch(Position::Head, "message_sent", |ctx| {
            ctx.fire_message_sent(request)
        });
    }

    /// Delivers `cause` to `exception_caught`, closing the session if that fails too.
    pub fn fire_exception_caught(&self, cause: Error) {
        let Some(session) = self.session() else {
            return;
        };
        let ctx = FilterContext::new(self.clone(), Arc::clone(&session), Position::Head);
        if let Err(err) = guarded(|| ctx.fire_exception_caught(cause)) {
            error!(
                "session {} exception_caught failed, closing: {}",
                session.id(),
                err
            );
            session.force_close();
        }
    }

    /// Sends `request` from the tail towards the head.
    ///
    /// Returns the request's future. A failure anywhere on the way fails the future; it is
    /// also reported to `exception_caught` unless it only means the session is closed or its
    /// write queue is full.
    pub fn fire_filter_write(&self, request: WriteRequest) -> WriteFuture {
        let future = request.future().clone();
        let Some(session) = self.session() else {
            future.complete(Err(Error::SessionClosed));
            return future;
        };
        let ctx = FilterContext::new(self.clone(), session, Position::Tail);
        if let Err(err) = guarded(|| ctx.fire_filter_write(request)) {
            future.complete(Err(err.clone()));
            if !matches!(err, Error::SessionClosed | Error::WriteQueueFull(_)) {
                self.fire_exception_caught(err);
            }
        }
        future
    }

    /// Sends a close request from the tail towards the head.
    pub fn fire_filter_close(&self) {
        let Some(session) = self.session() else {
            return;
        };
        let ctx = FilterContext::new(self.clone(), Arc::clone(&session), Position::Tail);
        if let Err(err) = guarded(|| ctx.fire_filter_close()) {
            self.fire_exception_caught(err);
            session.force_close();
        }
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entry(&HEAD_NAME)
            .entries(self.names())
            .entry(&TAIL_NAME)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::IoHandler;
    use crate::IoBuffer;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
    }

    impl IoFilter for Recorder {
        fn on_pre_add(&self, _chain: &FilterChain, name: &str) -> Result<()> {
            self.log.lock().push(format!("pre_add:{name}"));
            Ok(())
        }

        fn on_post_remove(&self, _chain: &FilterChain, name: &str) -> Result<()> {
            self.log.lock().push(format!("post_remove:{name}"));
            Ok(())
        }

        fn message_received(&self, ctx: &FilterContext, message: Message) -> Result<()> {
            self.log.lock().push(format!("{}:recv", self.name));
            ctx.fire_message_received(message)
        }

        fn filter_write(&self, ctx: &FilterContext, request: WriteRequest) -> Result<()> {
            self.log.lock().push(format!("{}:write", self.name));
            ctx.fire_filter_write(request)
        }
    }

    struct Remover {
        target: &'static str,
    }

    impl IoFilter for Remover {
        fn message_received(&self, ctx: &FilterContext, message: Message) -> Result<()> {
            ctx.chain().remove(self.target)?;
            ctx.fire_message_received(message)
        }
    }

    struct Failing;

    impl IoFilter for Failing {
        fn message_received(&self, _ctx: &FilterContext, _message: Message) -> Result<()> {
            Err(Error::ProtocolDecode("garbage".into()))
        }

        fn session_opened(&self, _ctx: &FilterContext) -> Result<()> {
            panic!("boom");
        }
    }

    struct RecordingHandler {
        log: Log,
        fail_exceptions: bool,
    }

    impl IoHandler for RecordingHandler {
        fn message_received(&self, _session: &Arc<IoSession>, _message: Message) -> Result<()> {
            self.log.lock().push("handler:recv".into());
            Ok(())
        }

        fn message_sent(&self, _session: &Arc<IoSession>, message: Message) -> Result<()> {
            let text = message
                .downcast_ref::<String>()
                .cloned()
                .unwrap_or_else(|| "?".into());
            self.log.lock().push(format!("handler:sent:{text}"));
            Ok(())
        }

        fn exception_caught(&self, _session: &Arc<IoSession>, cause: Error) -> Result<()> {
            self.log.lock().push(format!("handler:exception:{cause}"));
            if self.fail_exceptions {
                return Err(Error::HandlerPanic("handler gave up".into()));
            }
            Ok(())
        }
    }

    fn session_with_log(fail_exceptions: bool) -> (Arc<IoSession>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let handler = RecordingHandler {
            log: Arc::clone(&log),
            fail_exceptions,
        };
        (IoSession::builder(7, Arc::new(handler)).build(), log)
    }

    fn add_recorders(session: &Arc<IoSession>, log: &Log) {
        for name in ["a", "b", "c"] {
            let filter = Recorder {
                name,
                log: Arc::clone(log),
            };
            session.chain().add_last(name, Arc::new(filter)).unwrap();
        }
    }

    #[test]
    fn test_inbound_head_to_tail_outbound_tail_to_head() {
        let (session, log) = session_with_log(false);
        add_recorders(&session, &log);
        log.lock().clear();

        session
            .chain()
            .fire_message_received(Box::new(IoBuffer::from("x")));
        session.write(Box::new(vec![1u8]));

        assert_eq!(
            *log.lock(),
            vec![
                "a:recv",
                "b:recv",
                "c:recv",
                "handler:recv",
                "c:write",
                "b:write",
                "a:write"
            ]
        );
        assert!(session.has_pending_writes());
    }

    #[test]
    fn test_remove_during_dispatch_skips_removed_entry() {
        let (session, log) = session_with_log(false);
        add_recorders(&session, &log);
        session
            .chain()
            .add_first("remover", Arc::new(Remover { target: "b" }))
            .unwrap();
        log.lock().clear();

        session
            .chain()
            .fire_message_received(Box::new(IoBuffer::from("x")));
        assert_eq!(
            *log.lock(),
            vec!["post_remove:b", "a:recv", "c:recv", "handler:recv"]
        );
        assert_eq!(session.chain().names(), vec!["remover", "a", "c"]);
    }

    #[test]
    fn test_reserved_and_duplicate_names() {
        let (session, log) = session_with_log(false);
        add_recorders(&session, &log);
        let filter = || -> Arc<dyn IoFilter> {
            Arc::new(Remover { target: "none" })
        };
        assert!(matches!(
            session.chain().add_last("head", filter()),
            Err(Error::ReservedFilterName(_))
        ));
        assert!(matches!(
            session.chain().add_last("a", filter()),
            Err(Error::DuplicateFilter(_))
        ));
        assert!(matches!(
            session.chain().add_before("missing", "x", filter()),
            Err(Error::FilterNotFound(_))
        ));
        assert!(matches!(
            session.chain().remove("tail"),
            Err(Error::FilterNotFound(_))
        ));
        session.chain().add_after("a", "x", filter()).unwrap();
        assert_eq!(session.chain().names(), vec!["a", "x", "b", "c"]);
    }

    #[test]
    fn test_filter_error_and_panic_reach_exception_caught() {
        let (session, log) = session_with_log(false);
        session.chain().add_last("failing", Arc::new(Failing)).unwrap();

        session
            .chain()
            .fire_message_received(Box::new(IoBuffer::from("x")));
        session.fire_opened();

        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("handler:exception:protocol decode error"));
        assert!(log[1].contains("boom"));
        assert!(!session.should_close_now());
    }

    #[test]
    fn test_failing_exception_handler_closes_session() {
        let (session, _log) = session_with_log(true);
        session.chain().fire_exception_caught(Error::SessionClosed);
        assert!(session.should_close_now());
        assert!(session.is_closing());
    }

    #[test]
    fn test_message_sent_restores_original_message() {
        struct Upper;

        impl IoFilter for Upper {
            fn filter_write(&self, ctx: &FilterContext, mut request: WriteRequest) -> Result<()> {
                let text = request
                    .message()
                    .downcast_ref::<String>()
                    .cloned()
                    .unwrap_or_default();
                request.replace_message(ctx.name(), Box::new(IoBuffer::from(text.to_uppercase())));
                ctx.fire_filter_write(request)
            }

            fn message_sent(&self, ctx: &FilterContext, mut request: WriteRequest) -> Result<()> {
                request.restore_message(ctx.name());
                ctx.fire_message_sent(request)
            }
        }

        let (session, log) = session_with_log(false);
        session.chain().add_last("upper", Arc::new(Upper)).unwrap();
        session.write(Box::new(String::from("hi")));

        let request = session.poll_write().unwrap();
        assert_eq!(request.buffer().unwrap().as_slice(), b"HI");
        session.write_completed(request);
        assert_eq!(*log.lock(), vec!["handler:sent:hi"]);
        assert_eq!(session.written_messages(), 1);
    }

    #[test]
    fn test_clear_runs_remove_hooks_tail_first() {
        let (session, log) = session_with_log(false);
        add_recorders(&session, &log);
        log.lock().clear();
        session.chain().clear();
        assert!(session.chain().is_empty());
        assert_eq!(
            *log.lock(),
            vec!["post_remove:c", "post_remove:b", "post_remove:a"]
        );
    }
}
