//! Reactor workers.
//!
//! Each worker is a thread running a [`LocalExecutorBuilder`] executor. Jobs reach it over
//! an unbounded channel and typically `spawn_local` the I/O loop of one session or one
//! listening socket. A session stays on the worker that started it until it closes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use netloom::{Error, Result};
use netloom_executor::LocalExecutorBuilder;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{AssignmentStrategy, ServiceConfig};

pub(crate) type WorkerJob = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Worker {
    index: usize,
    jobs: Mutex<Option<mpsc::UnboundedSender<WorkerJob>>>,
    load: AtomicUsize,
}

impl Worker {
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Sessions currently owned.
    pub(crate) fn load(&self) -> usize {
        self.load.load(Ordering::Acquire)
    }

    pub(crate) fn submit(&self, job: WorkerJob) -> Result<()> {
        let jobs = self.jobs.lock();
        let sender = jobs.as_ref().ok_or(Error::ServiceDisposed)?;
        sender.send(job).map_err(|_| Error::ServiceDisposed)
    }
}

/// Counts one session on a worker for as long as it lives.
pub(crate) struct LoadGuard {
    worker: Arc<Worker>,
}

impl LoadGuard {
    pub(crate) fn new(worker: Arc<Worker>) -> Self {
        worker.load.fetch_add(1, Ordering::AcqRel);
        Self { worker }
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.worker.load.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    strategy: AssignmentStrategy,
    next: AtomicUsize,
}

impl WorkerPool {
    pub(crate) fn start(config: &ServiceConfig) -> Result<Self> {
        let cores = if config.get_pin_cores() {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        let mut workers = Vec::with_capacity(config.get_workers());
        for index in 0..config.get_workers() {
            let (tx, mut rx) = mpsc::unbounded_channel::<WorkerJob>();
            let mut builder = LocalExecutorBuilder::new()
                .name(format!("{}-{}", config.get_thread_name_prefix(), index));
            if !cores.is_empty() {
                builder = builder.core_id(cores[index % cores.len()]);
            }
            builder.spawn(move || async move {
                while let Some(job) = rx.recv().await {
                    job();
                }
                trace!("worker {} job channel closed", index);
            })?;
            workers.push(Arc::new(Worker {
                index,
                jobs: Mutex::new(Some(tx)),
                load: AtomicUsize::new(0),
            }));
        }
        debug!(
            "started {} reactor workers ({:?})",
            workers.len(),
            config.get_strategy()
        );
        Ok(Self {
            workers,
            strategy: config.get_strategy(),
            next: AtomicUsize::new(0),
        })
    }

    /// Picks the worker for a new session.
    pub(crate) fn assign(&self) -> Arc<Worker> {
        let index = match self.strategy {
            AssignmentStrategy::RoundRobin => {
                self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len()
            }
            AssignmentStrategy::LeastLoaded => self
                .workers
                .iter()
                .min_by_key(|worker| worker.load())
                .map_or(0, |worker| worker.index()),
        };
        Arc::clone(&self.workers[index])
    }

    pub(crate) fn loads(&self) -> Vec<usize> {
        self.workers.iter().map(|worker| worker.load()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Closes every job channel; each thread exits once its queued jobs ran.
    pub(crate) fn shutdown(&self) {
        for worker in &self.workers {
            worker.jobs.lock().take();
        }
    }
}
