//! One-shot completion futures for asynchronous session operations.
//!
//! An [`IoFuture`] is completed exactly once, from any thread. Interested parties can
//! either `.await` it or register a listener; listeners registered after completion run
//! inline on the caller's thread, listeners registered before run on the completing thread
//! after the internal lock is released, so a listener may itself issue new writes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::session::IoSession;

type Listener<T> = Box<dyn FnOnce(&T) + Send>;

struct State<T> {
    value: Option<T>,
    listeners: Vec<Listener<T>>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

/// A cloneable handle to a value that becomes available once.
pub struct IoFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for IoFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Default for IoFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> IoFuture<T> {
    /// A pending future.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    value: None,
                    listeners: Vec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// A future that is already complete.
    pub fn ready(value: T) -> Self {
        let future = Self::new();
        future.complete(value);
        future
    }

    /// Completes the future. Only the first completion wins; later calls return `false`.
    pub fn complete(&self, value: T) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener(&value);
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.lock().value.is_some()
    }

    /// The value, if complete.
    pub fn get(&self) -> Option<T> {
        self.inner.state.lock().value.clone()
    }

    /// Runs `listener` once the future completes.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let value = {
            let mut state = self.inner.state.lock();
            match &state.value {
                Some(value) => value.clone(),
                None => {
                    state.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(&value);
    }

    /// Waits for completion.
    pub async fn wait(&self) -> T {
        loop {
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            if let Some(value) = self.get() {
                return value;
            }
            notified.await;
        }
    }

    /// Waits for completion at most `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

impl<T: fmt::Debug> fmt::Debug for IoFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("IoFuture")
            .field("value", &state.value)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

/// Completion of one write request.
pub type WriteFuture = IoFuture<Result<()>>;

impl WriteFuture {
    /// A write future that already failed.
    pub fn failed(err: Error) -> Self {
        Self::ready(Err(err))
    }

    /// Whether the request was fully flushed to the socket.
    pub fn is_written(&self) -> bool {
        matches!(self.get(), Some(Ok(())))
    }
}

/// Completion of a session close.
pub type CloseFuture = IoFuture<()>;

/// Completion of a connect attempt.
///
/// Resolves to the opened session, or to `ConnectTimeout`, `ConnectRefused` or
/// `Cancelled`. No session is created for a failed attempt.
#[derive(Clone, Default)]
pub struct ConnectFuture {
    inner: IoFuture<Result<Arc<IoSession>>>,
}

impl ConnectFuture {
    pub fn new() -> Self {
        Self {
            inner: IoFuture::new(),
        }
    }

    /// Completes with the connected session. Returns `false` if already complete.
    pub fn set_session(&self, session: Arc<IoSession>) -> bool {
        self.inner.complete(Ok(session))
    }

    /// Completes with a failure. Returns `false` if already complete.
    pub fn set_error(&self, err: Error) -> bool {
        self.inner.complete(Err(err))
    }

    /// Cancels a pending attempt. Returns `false` if the attempt already finished.
    pub fn cancel(&self) -> bool {
        self.set_error(Error::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.get(), Some(Err(Error::Cancelled)))
    }

    pub fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    /// The session, if the attempt succeeded.
    pub fn session(&self) -> Option<Arc<IoSession>> {
        self.inner.get().and_then(|result| result.ok())
    }

    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&Result<Arc<IoSession>>) + Send + 'static,
    {
        self.inner.add_listener(listener);
    }

    pub async fn wait(&self) -> Result<Arc<IoSession>> {
        self.inner.wait().await
    }
}

impl fmt::Debug for ConnectFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectFuture")
            .field("done", &self.is_done())
            .finish()
    }
}
