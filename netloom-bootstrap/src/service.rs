//! State shared by every acceptor and connector: workers, managed sessions, the default
//! filter chain and the shutdown plumbing.

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use netloom::{
    DefaultFilterChainBuilder, Error, IoHandler, IoSession, Result, SessionRole, TransportKind,
    WriteFuture,
};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{broadcast, Notify};
use wg::AsyncWaitGroup;

use crate::config::ServiceConfig;
use crate::worker::WorkerPool;

pub(crate) struct ServiceCore {
    config: ServiceConfig,
    handler: Arc<dyn IoHandler>,
    chain_builder: Mutex<DefaultFilterChainBuilder>,
    sessions: Mutex<HashMap<u64, Arc<IoSession>>>,
    next_id: AtomicU64,
    pub(crate) workers: WorkerPool,
    close_tx: broadcast::Sender<()>,
    wg: AsyncWaitGroup,
    disposed: AtomicBool,
}

impl ServiceCore {
    pub(crate) fn start(config: ServiceConfig, handler: Arc<dyn IoHandler>) -> Result<Arc<Self>> {
        config.validate()?;
        let workers = WorkerPool::start(&config)?;
        let (close_tx, _) = broadcast::channel(1);
        Ok(Arc::new(Self {
            config,
            handler,
            chain_builder: Mutex::new(DefaultFilterChainBuilder::new()),
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            workers,
            close_tx,
            wg: AsyncWaitGroup::new(),
            disposed: AtomicBool::new(false),
        }))
    }

    pub(crate) fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(crate) fn handler(&self) -> &Arc<dyn IoHandler> {
        &self.handler
    }

    pub(crate) fn chain_builder(&self) -> MutexGuard<'_, DefaultFilterChainBuilder> {
        self.chain_builder.lock()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::ServiceDisposed);
        }
        Ok(())
    }

    /// Registers one more task the service must wait for on dispose.
    pub(crate) fn track(&self) -> TaskGuard {
        TaskGuard(self.wg.add(1))
    }

    pub(crate) fn shutdown_signal(
        &self,
        listener: Option<broadcast::Receiver<()>>,
    ) -> ShutdownSignal {
        ShutdownSignal {
            service: self.close_tx.subscribe(),
            listener,
            fired: false,
        }
    }

    /// Builds a session, installs the default filter chain and registers it.
    pub(crate) fn create_session(
        &self,
        transport: TransportKind,
        role: SessionRole,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        wakeup: Option<Arc<Notify>>,
    ) -> Result<Arc<IoSession>> {
        self.ensure_active()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut builder = IoSession::builder(id, Arc::clone(&self.handler))
            .transport(transport)
            .role(role)
            .local_addr(local_addr)
            .remote_addr(remote_addr)
            .config(self.config.get_session_config().clone());
        if let Some(wakeup) = wakeup {
            builder = builder.wakeup(wakeup);
        }
        let session = builder.build();
        let filters = self.chain_builder.lock().clone();
        filters.build_chain(session.chain())?;
        self.sessions.lock().insert(id, Arc::clone(&session));
        debug!(
            "session {} created ({:?}, {:?}) {} -> {}",
            id, transport, role, local_addr, remote_addr
        );
        Ok(session)
    }

    pub(crate) fn remove_session(&self, id: u64) {
        self.sessions.lock().remove(&id);
    }

    pub(crate) fn managed_sessions(&self) -> HashMap<u64, Arc<IoSession>> {
        self.sessions.lock().clone()
    }

    pub(crate) fn managed_session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub(crate) fn broadcast<M: Any + Send + Clone>(&self, message: M) -> Vec<WriteFuture> {
        let sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
        sessions
            .into_iter()
            .filter(|session| session.is_connected())
            .map(|session| session.write(Box::new(message.clone())))
            .collect()
    }

    /// Stops every loop, waits for the session tasks and stops the workers.
    pub(crate) async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            self.wg.wait().await;
            return;
        }
        debug!(
            "disposing service with {} managed sessions",
            self.managed_session_count()
        );
        if self.close_tx.send(()).is_err() {
            debug!("no running loops to stop");
        }
        for session in self.managed_sessions().into_values() {
            session.close(true);
        }
        self.wg.wait().await;
        self.workers.shutdown();
        let left = self.managed_session_count();
        if left > 0 {
            warn!("{} sessions still registered after dispose", left);
        }
    }
}

/// Marks a tracked task as finished when dropped.
pub(crate) struct TaskGuard(AsyncWaitGroup);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Fires once the service is disposed or, if given, the owning listener is unbound.
pub(crate) struct ShutdownSignal {
    service: broadcast::Receiver<()>,
    listener: Option<broadcast::Receiver<()>>,
    fired: bool,
}

impl ShutdownSignal {
    pub(crate) async fn triggered(&mut self) {
        if self.fired {
            return std::future::pending().await;
        }
        let service = &mut self.service;
        match &mut self.listener {
            Some(listener) => {
                tokio::select! {
                    _ = service.recv() => {}
                    _ = listener.recv() => {}
                }
            }
            None => {
                let _ = service.recv().await;
            }
        }
        self.fired = true;
    }
}

/// Operations common to every acceptor and connector.
///
/// Sessions created by the service get a copy of [`IoService::filter_chain`] and report to
/// the service's [`IoHandler`].
pub struct IoService {
    core: Arc<ServiceCore>,
}

impl IoService {
    pub(crate) fn new(core: Arc<ServiceCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<ServiceCore> {
        &self.core
    }

    pub fn handler(&self) -> &Arc<dyn IoHandler> {
        self.core.handler()
    }

    pub fn config(&self) -> &ServiceConfig {
        self.core.config()
    }

    /// Filters installed into every new session, in order.
    ///
    /// Changes apply to sessions created afterwards.
    pub fn filter_chain(&self) -> MutexGuard<'_, DefaultFilterChainBuilder> {
        self.core.chain_builder()
    }

    /// Open sessions by id.
    pub fn managed_sessions(&self) -> HashMap<u64, Arc<IoSession>> {
        self.core.managed_sessions()
    }

    pub fn managed_session_count(&self) -> usize {
        self.core.managed_session_count()
    }

    /// Writes a clone of `message` to every connected session.
    pub fn broadcast<M: Any + Send + Clone>(&self, message: M) -> Vec<WriteFuture> {
        self.core.broadcast(message)
    }

    /// Sessions owned by each reactor worker.
    pub fn worker_loads(&self) -> Vec<usize> {
        self.core.workers.loads()
    }

    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }

    /// Unbinds every listener, closes every session immediately and stops the workers.
    ///
    /// Completes once every session has fired `session_closed`. Must not be awaited from a
    /// reactor worker of the same service.
    pub async fn dispose(&self) {
        self.core.dispose().await
    }
}

impl std::fmt::Debug for IoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoService")
            .field("workers", &self.core.workers.len())
            .field("sessions", &self.core.managed_session_count())
            .field("disposed", &self.core.is_disposed())
            .finish()
    }
}
