use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, trace};
use parking_lot::Mutex;
use thiserror::Error;

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why an [`Executor`] refused a job.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("executor is shut down")]
    Shutdown,
}

/// Runs jobs somewhere other than the calling thread.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: Job) -> Result<(), ExecuteError>;
}

impl Executor for tokio::runtime::Handle {
    fn execute(&self, job: Job) -> Result<(), ExecuteError> {
        self.spawn_blocking(job);
        Ok(())
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) -> Result<(), ExecuteError> {
        (**self).execute(job)
    }
}

/// Fixed-size pool of named threads fed by a shared job queue.
///
/// A panicking job is logged and does not take its thread down.
pub struct ThreadPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl ThreadPool {
    /// Starts `size` threads named `{name}-{index}`.
    pub fn new(name: impl Into<String>, size: usize) -> io::Result<Self> {
        let name = name.into();
        let size = size.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let pending = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let receiver = receiver.clone();
            let pending = pending.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || work(receiver, pending))?;
            workers.push(handle);
        }
        debug!("thread pool {} started with {} threads", name, size);
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            pending,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.workers.lock().len()
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stops accepting jobs, lets the queued ones finish and joins the threads.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("thread pool {} worker exited abnormally", self.name);
            }
        }
        debug!("thread pool {} shut down", self.name);
    }
}

fn work(receiver: Receiver<Job>, pending: Arc<AtomicUsize>) {
    while let Ok(job) = receiver.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(
                "job panicked on {}",
                thread::current().name().unwrap_or("pool thread")
            );
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    trace!(
        "{} exiting",
        thread::current().name().unwrap_or("pool thread")
    );
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) -> Result<(), ExecuteError> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(ExecuteError::Shutdown)?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        sender.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            ExecuteError::Shutdown
        })
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_runs_jobs_and_survives_panics() {
        let pool = ThreadPool::new("pool-test", 2).unwrap();
        let done = Arc::new(AtomicU32::new(0));
        pool.execute(Box::new(|| panic!("boom"))).unwrap();
        for _ in 0..10 {
            let done = done.clone();
            pool.execute(Box::new(move || {
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = ThreadPool::new("pool-test", 1).unwrap();
        assert_eq!(pool.size(), 1);
        pool.shutdown();
        assert!(matches!(
            pool.execute(Box::new(|| {})),
            Err(ExecuteError::Shutdown)
        ));
    }

    #[test]
    fn test_thread_names() {
        let pool = ThreadPool::new("named", 1).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.execute(Box::new(move || {
            let _ = tx.send(thread::current().name().map(str::to_owned));
        }))
        .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("named-0"));
    }
}
