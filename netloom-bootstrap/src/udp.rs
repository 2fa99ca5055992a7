//! UDP acceptor and connector.
//!
//! One socket is served by one loop on one worker. Every remote address seen on an accepting
//! socket gets its own session; each datagram is delivered as one [`IoBuffer`]. All sessions
//! of a socket share the socket's wakeup.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use log::{debug, trace, warn};
use netloom::{
    ConnectFuture, Error, IoBuffer, IoHandler, IoSession, Result, SessionRole, TransportKind,
};
use netloom_executor::spawn_local;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Notify};

use crate::config::ServiceConfig;
use crate::service::{IoService, ServiceCore, ShutdownSignal, TaskGuard};
use crate::stream::{fault, housekeeping, sleep_until};
use crate::tcp::connect_error;
use crate::worker::{LoadGuard, Worker};

struct Peer {
    session: Arc<IoSession>,
    _load: LoadGuard,
}

/// Sessions multiplexed over one socket.
struct Peers {
    core: Arc<ServiceCore>,
    worker: Arc<Worker>,
    wakeup: Arc<Notify>,
    local_addr: SocketAddr,
    connected: bool,
    accepting: bool,
    sessions: HashMap<SocketAddr, Peer>,
}

impl Peers {
    fn new(
        core: Arc<ServiceCore>,
        worker: Arc<Worker>,
        local_addr: SocketAddr,
        connected: bool,
    ) -> Self {
        Self {
            core,
            worker,
            wakeup: Arc::new(Notify::new()),
            local_addr,
            connected,
            accepting: !connected,
            sessions: HashMap::new(),
        }
    }

    fn open(&mut self, remote_addr: SocketAddr, role: SessionRole) -> Result<Arc<IoSession>> {
        let session = self.core.create_session(
            TransportKind::Datagram,
            role,
            self.local_addr,
            remote_addr,
            Some(Arc::clone(&self.wakeup)),
        )?;
        self.sessions.insert(
            remote_addr,
            Peer {
                session: Arc::clone(&session),
                _load: LoadGuard::new(Arc::clone(&self.worker)),
            },
        );
        session.fire_created();
        session.fire_opened();
        Ok(session)
    }

    /// Runs housekeeping and drops the sessions that finished closing.
    fn sweep(&mut self) {
        let done: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(_, peer)| housekeeping(&peer.session))
            .map(|(addr, _)| *addr)
            .collect();
        for addr in done {
            if let Some(peer) = self.sessions.remove(&addr) {
                peer.session.finish_close();
                self.core.remove_session(peer.session.id());
            }
        }
    }

    fn close_all(&self) {
        for peer in self.sessions.values() {
            peer.session.close(true);
        }
    }

    fn wants_write(&self) -> bool {
        self.sessions.values().any(|peer| {
            peer.session.has_pending_writes() && !peer.session.is_write_suspended()
        })
    }

    fn flush(&self, socket: &UdpSocket) {
        for peer in self.sessions.values() {
            if let Err(err) = self.flush_session(socket, &peer.session) {
                fault(&peer.session, err);
            }
        }
    }

    /// Sends queued datagrams until the queue is empty or the socket would block.
    fn flush_session(&self, socket: &UdpSocket, session: &IoSession) -> io::Result<()> {
        while !session.is_write_suspended() {
            let Some(mut request) = session.poll_write() else {
                break;
            };
            if request.buffer().map_or(true, |buffer| !buffer.has_remaining()) {
                session.write_completed(request);
                continue;
            }
            let destination = request.destination();
            let Some(buffer) = request.buffer_mut() else {
                continue;
            };
            let sent = match destination {
                None if self.connected => socket.try_send(buffer.as_slice()),
                _ => socket.try_send_to(
                    buffer.as_slice(),
                    destination.unwrap_or_else(|| session.remote_addr()),
                ),
            };
            match sent {
                Ok(n) => {
                    let remaining = buffer.remaining();
                    buffer.skip(remaining)?;
                    session.record_written(n);
                    session.write_completed(request);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    session.requeue_write(request);
                    break;
                }
                Err(err) => {
                    session.requeue_write(request);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn receive(&mut self, socket: &UdpSocket, buf: &mut [u8]) {
        let (n, from) = match socket.try_recv_from(buf) {
            Ok(received) => received,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return,
            Err(err) => return self.receive_failed(err),
        };
        let session = match self.sessions.get(&from) {
            Some(peer) => Arc::clone(&peer.session),
            None if self.accepting => match self.open(from, SessionRole::Accepted) {
                Ok(session) => session,
                Err(err) => {
                    warn!("dropping datagram from {}: {}", from, err);
                    return;
                }
            },
            None => {
                trace!("dropping datagram from unknown peer {}", from);
                return;
            }
        };
        if session.is_read_suspended() || session.is_closing() {
            debug!(
                "session {} dropped a {} byte datagram while not reading",
                session.id(),
                n
            );
            return;
        }
        session.fire_received(IoBuffer::from(&buf[..n]));
    }

    fn receive_failed(&self, err: io::Error) {
        match self.sessions.values().next() {
            Some(peer) if self.connected => fault(&peer.session, err),
            _ => warn!("receive on {} failed: {}", self.local_addr, err),
        }
    }
}

async fn unbound(listener: &mut Option<broadcast::Receiver<()>>) {
    match listener {
        Some(listener) => {
            let _ = listener.recv().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_datagram_loop(
    socket: UdpSocket,
    mut peers: Peers,
    mut shutdown: ShutdownSignal,
    mut unbind: Option<broadcast::Receiver<()>>,
    _task: TaskGuard,
) {
    let mut buf = vec![0u8; peers.core.config().get_max_datagram_size()];
    let close_on_unbind = peers.core.config().get_close_on_unbind();
    let wakeup = Arc::clone(&peers.wakeup);
    let mut listening = unbind.is_some();

    loop {
        peers.sweep();
        if !peers.accepting && peers.sessions.is_empty() {
            break;
        }
        let want_write = peers.wants_write();
        let deadline = peers
            .sessions
            .values()
            .filter_map(|peer| peer.session.next_deadline())
            .min();

        tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                peers.accepting = false;
                peers.close_all();
            }
            _ = unbound(&mut unbind), if listening => {
                listening = false;
                peers.accepting = false;
                if close_on_unbind {
                    peers.close_all();
                }
            }
            _ = wakeup.notified() => {}
            ready = socket.writable(), if want_write => match ready {
                Ok(()) => peers.flush(&socket),
                Err(err) => warn!("socket {} not writable: {}", peers.local_addr, err),
            },
            ready = socket.readable() => match ready {
                Ok(()) => peers.receive(&socket, &mut buf),
                Err(err) => peers.receive_failed(err),
            },
            _ = sleep_until(deadline) => {}
        }
    }
    debug!("datagram socket {} stopped", peers.local_addr);
}

/// Serves UDP peers on bound sockets, one session per remote address.
pub struct UdpAcceptor {
    service: IoService,
    listeners: Mutex<HashMap<SocketAddr, broadcast::Sender<()>>>,
}

impl UdpAcceptor {
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

    /// Binds a socket on `addr` and returns the bound address.
    pub fn bind(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let core = Arc::clone(self.service.core());
        core.ensure_active()?;
        let (unbind_tx, _) = broadcast::channel(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<SocketAddr>>(1);
        let unbind = unbind_tx.subscribe();
        let task = core.track();
        let worker = core.workers.assign();
        let owner = Arc::clone(&worker);
        worker.submit(Box::new(move || {
            spawn_local(async move {
                let socket = match UdpSocket::bind(addr).await {
                    Ok(socket) => socket,
                    Err(err) => {
                        let _ = ready_tx.send(Err(Error::from(err)));
                        return;
                    }
                };
                let local_addr = match socket.local_addr() {
                    Ok(local_addr) => local_addr,
                    Err(err) => {
                        let _ = ready_tx.send(Err(Error::from(err)));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(local_addr));
                let shutdown = core.shutdown_signal(None);
                let peers = Peers::new(core, owner, local_addr, false);
                run_datagram_loop(socket, peers, shutdown, Some(unbind), task).await;
            })
            .detach();
        }))?;
        let local_addr = ready_rx.recv().map_err(|_| Error::ServiceDisposed)??;
        self.listeners.lock().insert(local_addr, unbind_tx);
        debug!("bound datagram socket {}", local_addr);
        Ok(local_addr)
    }

    /// Stops accepting new peers on `addr`. Returns false if it was not bound.
    ///
    /// With `close_on_unbind` its sessions are closed immediately; otherwise the socket
    /// stays open until the last of them closes.
    pub fn unbind(&self, addr: SocketAddr) -> bool {
        match self.listeners.lock().remove(&addr) {
            Some(unbind) => {
                let _ = unbind.send(());
                debug!("unbound datagram socket {}", addr);
                true
            }
            None => false,
        }
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.lock().keys().copied().collect()
    }
}

/// Opens connected UDP sockets, one session each.
pub struct UdpConnector {
    service: IoService,
}

impl UdpConnector {
    /// Starts the reactor workers.
    pub fn new(config: ServiceConfig, handler: Arc<dyn IoHandler>) -> Result<Self> {
        Ok(Self {
            service: IoService::new(ServiceCore::start(config, handler)?),
        })
    }

    pub fn service(&self) -> &IoService {
        &self.service
    }

    /// Binds an ephemeral socket and connects it to `addr`.
    ///
    /// A refusing peer surfaces later as an `exception_caught` on the session, since UDP
    /// learns about it only from the first reply.
    pub fn connect(&self, addr: SocketAddr) -> ConnectFuture {
        let future = ConnectFuture::new();
        let core = Arc::clone(self.service.core());
        if let Err(err) = core.ensure_active() {
            future.set_error(err);
            return future;
        }
        let task = core.track();
        let worker = core.workers.assign();
        let owner = Arc::clone(&worker);
        let pending = future.clone();
        let submitted = worker.submit(Box::new(move || {
            spawn_local(async move {
                let any: SocketAddr = if addr.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let connected = async {
                    let socket = UdpSocket::bind(any).await?;
                    socket.connect(addr).await?;
                    let local_addr = socket.local_addr()?;
                    Ok::<_, io::Error>((socket, local_addr))
                };
                let (socket, local_addr) = match connected.await {
                    Ok(connected) => connected,
                    Err(err) => {
                        pending.set_error(connect_error(addr, err));
                        return;
                    }
                };
                if pending.is_cancelled() {
                    debug!("connect to {} cancelled", addr);
                    return;
                }
                let shutdown = core.shutdown_signal(None);
                let mut peers = Peers::new(core, owner, local_addr, true);
                match peers.open(addr, SessionRole::Connected) {
                    Ok(session) => {
                        if !pending.set_session(Arc::clone(&session)) {
                            session.close(true);
                        }
                    }
                    Err(err) => {
                        pending.set_error(err);
                        return;
                    }
                }
                run_datagram_loop(socket, peers, shutdown, None, task).await;
            })
            .detach();
        }));
        if let Err(err) = submitted {
            future.set_error(err);
        }
        future
    }
}
