//! Single-threaded executors for reactor workers.
//!
//! Every reactor worker runs one tokio current-thread runtime driving a [`LocalSet`], so
//! the sessions it owns never migrate between threads.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};

use core_affinity::{set_for_current, CoreId};
use log::{debug, warn};
use scoped_tls::scoped_thread_local;
use thiserror::Error;
use tokio::task::LocalSet;

scoped_thread_local!(static LOCAL: LocalSet);

/// Handle to a task started with [`spawn_local`].
///
/// Awaiting it yields the task's output, or a [`TaskError`] if it panicked or was
/// cancelled. Dropping it leaves the task running.
pub struct Task<T> {
    inner: tokio::task::JoinHandle<T>,
}

impl<T> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner)
            .poll(cx)
            .map(|result| result.map_err(TaskError::from))
    }
}

impl<T> Task<T> {
    /// Lets the task run to completion in the background.
    pub fn detach(self) {
        drop(self.inner);
    }

    /// Aborts the task at its next suspension point.
    pub fn cancel(self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Why a [`Task`] produced no output.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            TaskError::Cancelled
        } else {
            TaskError::Panicked(err.to_string())
        }
    }
}

/// Configures and starts a single-threaded executor.
///
/// ```rust,no_run
/// use netloom_executor::{spawn_local, LocalExecutorBuilder};
///
/// let handle = LocalExecutorBuilder::new()
///     .name("netloom-worker-0")
///     .spawn(|| async {
///         let task = spawn_local(async { 21 * 2 });
///         task.await.unwrap_or_default()
///     })
///     .unwrap();
/// assert_eq!(handle.join().unwrap().unwrap(), 42);
/// ```
#[derive(Debug, Default)]
pub struct LocalExecutorBuilder {
    core_id: Option<CoreId>,
    name: Option<String>,
}

impl LocalExecutorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the executor thread.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Pins the executor thread to `core_id`.
    pub fn core_id(mut self, core_id: CoreId) -> Self {
        self.core_id = Some(core_id);
        self
    }

    /// Runs `future` to completion on the current thread.
    pub fn run<T>(mut self, future: impl Future<Output = T>) -> io::Result<T> {
        if let Some(core_id) = self.core_id.take() {
            pin(core_id);
        }
        block_on_local(future)
    }

    /// Starts a new thread and runs the future built by `fut_gen` on it.
    ///
    /// The future is built on the new thread, so it does not need to be `Send`.
    pub fn spawn<G, F, T>(mut self, fut_gen: G) -> io::Result<JoinHandle<io::Result<T>>>
    where
        G: FnOnce() -> F + Send + 'static,
        F: Future<Output = T> + 'static,
        T: Send + 'static,
    {
        let core_id = self.core_id.take();
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.take() {
            builder = builder.name(name);
        }
        builder.spawn(move || {
            if let Some(core_id) = core_id {
                pin(core_id);
            }
            block_on_local(fut_gen())
        })
    }
}

fn pin(core_id: CoreId) {
    if set_for_current(core_id) {
        debug!(
            "{} pinned to core {}",
            thread::current().name().unwrap_or("executor"),
            core_id.id
        );
    } else {
        warn!("failed to pin executor thread to core {}", core_id.id);
    }
}

fn block_on_local<T>(future: impl Future<Output = T>) -> io::Result<T> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local_set = LocalSet::new();
    Ok(LOCAL.set(&local_set, || rt.block_on(local_set.run_until(future))))
}

/// Whether the current thread runs a [`LocalExecutorBuilder`] executor.
pub fn is_local_executor() -> bool {
    LOCAL.is_set()
}

/// Spawns a task on the current thread's executor.
///
/// # Panics
///
/// Panics outside an executor started by [`LocalExecutorBuilder`].
pub fn spawn_local<T: 'static>(future: impl Future<Output = T> + 'static) -> Task<T> {
    if !LOCAL.is_set() {
        panic!("`spawn_local()` must be called from a netloom local executor");
    }
    LOCAL.with(|local_set| Task {
        inner: local_set.spawn_local(future),
    })
}

/// Lets the other tasks of this executor run.
pub async fn yield_local() {
    tokio::task::yield_now().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_spawned_tasks_share_the_thread() {
        let total = LocalExecutorBuilder::new()
            .run(async {
                let counter = Rc::new(Cell::new(0));
                let tasks: Vec<_> = (1..=3)
                    .map(|i| {
                        let counter = counter.clone();
                        spawn_local(async move {
                            yield_local().await;
                            counter.set(counter.get() + i);
                        })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap();
                }
                counter.get()
            })
            .unwrap();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_named_thread() {
        let handle = LocalExecutorBuilder::new()
            .name("netloom-test-executor")
            .spawn(|| async {
                assert!(is_local_executor());
                thread::current().name().map(str::to_owned)
            })
            .unwrap();
        let name = handle.join().unwrap().unwrap();
        assert_eq!(name.as_deref(), Some("netloom-test-executor"));
    }

    #[test]
    fn test_cancelled_task_reports_error() {
        LocalExecutorBuilder::new()
            .run(async {
                let task = spawn_local(std::future::pending::<()>());
                let inner = task.inner;
                inner.abort();
                let err = Task { inner }.await.unwrap_err();
                assert!(matches!(err, TaskError::Cancelled));
            })
            .unwrap();
    }

    #[test]
    fn test_outside_executor() {
        assert!(!is_local_executor());
    }
}
