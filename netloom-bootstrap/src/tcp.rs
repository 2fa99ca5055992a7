//! TCP acceptor and connector.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, trace, warn};
use netloom::{ConnectFuture, Error, IoHandler, Result, SessionRole, TransportKind};
use netloom_executor::spawn_local;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::broadcast;

use crate::config::ServiceConfig;
use crate::service::{IoService, ServiceCore, TaskGuard};
use crate::stream::run_stream_session;
use crate::worker::LoadGuard;

const LISTEN_BACKLOG: u32 = 1024;

fn listen(addr: SocketAddr, config: &ServiceConfig) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(config.get_reuse_address())?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

pub(crate) fn connect_error(addr: SocketAddr, err: io::Error) -> Error {
    match err.kind() {
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => Error::ConnectRefused {
            addr: addr.to_string(),
            cause: Arc::new(err),
        },
        _ => Error::from(err),
    }
}

/// Runs a freshly established stream as a session on the current worker.
async fn serve_stream(
    core: Arc<ServiceCore>,
    stream: TcpStream,
    role: SessionRole,
    listener: Option<broadcast::Receiver<()>>,
    connect: Option<ConnectFuture>,
) {
    let fail = |err: Error| {
        warn!("dropping {:?} stream: {}", role, err);
        if let Some(future) = &connect {
            future.set_error(err.clone());
        }
    };
    if core.config().get_nodelay() {
        if let Err(err) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {}", err);
        }
    }
    let addrs = stream.local_addr().and_then(|local| Ok((local, stream.peer_addr()?)));
    let (local_addr, remote_addr) = match addrs {
        Ok(addrs) => addrs,
        Err(err) => return fail(Error::from(err)),
    };
    let session =
        match core.create_session(TransportKind::Stream, role, local_addr, remote_addr, None) {
            Ok(session) => session,
            Err(err) => return fail(err),
        };
    let id = session.id();
    let shutdown = core.shutdown_signal(listener);
    run_stream_session(stream, session, shutdown, move |session| {
        if let Some(future) = connect {
            if !future.set_session(Arc::clone(session)) {
                debug!("session {} connect was cancelled, closing", session.id());
                session.close(true);
            }
        }
    })
    .await;
    core.remove_session(id);
}

/// Hands an accepted stream to the worker chosen by the assignment strategy.
fn dispatch_accepted(
    core: &Arc<ServiceCore>,
    stream: TcpStream,
    listener: Option<broadcast::Receiver<()>>,
) -> Result<()> {
    let stream = stream.into_std()?;
    let worker = core.workers.assign();
    let load = LoadGuard::new(Arc::clone(&worker));
    let task = core.track();
    let core = Arc::clone(core);
    worker.submit(Box::new(move || {
        spawn_local(async move {
            let _guards = (load, task);
            match TcpStream::from_std(stream) {
                Ok(stream) => {
                    serve_stream(core, stream, SessionRole::Accepted, listener, None).await
                }
                Err(err) => warn!("failed to register accepted stream: {}", err),
            }
        })
        .detach();
    }))
}

async fn accept_loop(
    listener: TcpListener,
    core: Arc<ServiceCore>,
    unbind: broadcast::Sender<()>,
    _task: TaskGuard,
) {
    let local_addr = listener.local_addr().ok();
    let mut shutdown = core.shutdown_signal(Some(unbind.subscribe()));
    let close_on_unbind = core.config().get_close_on_unbind();
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    trace!("accepted {} on {:?}", peer, local_addr);
                    let session_unbind = close_on_unbind.then(|| unbind.subscribe());
                    if let Err(err) = dispatch_accepted(&core, stream, session_unbind) {
                        warn!("dropping connection from {}: {}", peer, err);
                    }
                }
                Err(err) => warn!("accept on {:?} failed: {}", local_addr, err),
            }
        }
    }
    debug!("listener {:?} stopped", local_addr);
}

/// Accepts TCP connections and runs each as a session.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use netloom::{IoHandlerAdapter, Result};
/// use netloom_bootstrap::{ServiceConfig, TcpAcceptor};
///
/// # async fn run() -> Result<()> {
/// let acceptor = TcpAcceptor::new(ServiceConfig::default(), Arc::new(IoHandlerAdapter))?;
/// let addr = acceptor.bind("127.0.0.1:0".parse().unwrap())?;
/// println!("listening on {addr}");
/// acceptor.service().dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct TcpAcceptor {
    service: IoService,
    listeners: Mutex<HashMap<SocketAddr, broadcast::Sender<()>>>,
}

impl TcpAcceptor {
    /// Starts the reactor workers.
    pub fn new(config: ServiceConfig, handler: Arc<dyn IoHandler>) -> Result<Self> {
        Ok(Self {
            service: IoService::new(ServiceCore::start(config, handler)?),
            listeners: Mutex::new(HashMap::new()),
        })
    }

    pub fn service(&self) -> &IoService {
        &self.service
    }

    /// Starts listening on `addr` and returns the bound address.
    pub fn bind(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let core = Arc::clone(self.service.core());
        core.ensure_active()?;
        let (unbind_tx, _) = broadcast::channel(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<SocketAddr>>(1);
        let unbind = unbind_tx.clone();
        let task = core.track();
        let worker = core.workers.assign();
        worker.submit(Box::new(move || {
            spawn_local(async move {
                let listener = match listen(addr, core.config()) {
                    Ok(listener) => listener,
                    Err(err) => {
                        let _ = ready_tx.send(Err(Error::from(err)));
                        return;
                    }
                };
                let local_addr = listener.local_addr().map_err(Error::from);
                let bound = local_addr.is_ok();
                let _ = ready_tx.send(local_addr);
                if bound {
                    accept_loop(listener, core, unbind, task).await;
                }
            })
            .detach();
        }))?;
        let local_addr = ready_rx.recv().map_err(|_| Error::ServiceDisposed)??;
        self.listeners.lock().insert(local_addr, unbind_tx);
        debug!("bound {}", local_addr);
        Ok(local_addr)
    }

    /// Stops listening on `addr`. Returns false if it was not bound.
    ///
    /// With `close_on_unbind` the sessions accepted on it are closed immediately.
    pub fn unbind(&self, addr: SocketAddr) -> bool {
        match self.listeners.lock().remove(&addr) {
            Some(unbind) => {
                let _ = unbind.send(());
                debug!("unbound {}", addr);
                true
            }
            None => false,
        }
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.lock().keys().copied().collect()
    }
}

/// Opens TCP connections and runs each as a session.
pub struct TcpConnector {
    service: IoService,
}

impl TcpConnector {
    /// Starts the reactor workers.
    pub fn new(config: ServiceConfig, handler: Arc<dyn IoHandler>) -> Result<Self> {
        Ok(Self {
            service: IoService::new(ServiceCore::start(config, handler)?),
        })
    }

    pub fn service(&self) -> &IoService {
        &self.service
    }

    /// Connects to `addr` with the configured connect timeout.
    pub fn connect(&self, addr: SocketAddr) -> ConnectFuture {
        let timeout = self.service.config().get_connect_timeout();
        self.connect_with_timeout(addr, timeout)
    }

    /// Connects to `addr`.
    ///
    /// The future yields the session once it is opened. It fails with `ConnectTimeout`
    /// when `timeout` expires first, with `ConnectRefused` when the peer refuses, and with
    /// `Cancelled` when cancelled by the caller; no session is created in those cases.
    pub fn connect_with_timeout(
        &self,
        addr: SocketAddr,
        timeout: std::time::Duration,
    ) -> ConnectFuture {
        let future = ConnectFuture::new();
        let core = Arc::clone(self.service.core());
        if let Err(err) = core.ensure_active() {
            future.set_error(err);
            return future;
        }
        let worker = core.workers.assign();
        let load = LoadGuard::new(Arc::clone(&worker));
        let task = core.track();
        let pending = future.clone();
        let submitted = worker.submit(Box::new(move || {
            spawn_local(async move {
                let _guards = (load, task);
                let attempt = tokio::time::timeout(timeout, TcpStream::connect(addr));
                let stream = tokio::select! {
                    _ = pending.wait() => {
                        debug!("connect to {} cancelled", addr);
                        return;
                    }
                    attempt = attempt => match attempt {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(err)) => {
                            pending.set_error(connect_error(addr, err));
                            return;
                        }
                        Err(_) => {
                            pending.set_error(Error::ConnectTimeout {
                                addr: addr.to_string(),
                                timeout,
                            });
                            return;
                        }
                    }
                };
                serve_stream(core, stream, SessionRole::Connected, None, Some(pending)).await;
            })
            .detach();
        }));
        if let Err(err) = submitted {
            future.set_error(err);
        }
        future
    }
}
