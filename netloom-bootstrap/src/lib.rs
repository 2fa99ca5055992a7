#![warn(rust_2018_idioms)]

//! # netloom-bootstrap - Reactor workers, acceptors and connectors
//!
//! Runs [`IoSession`](netloom::IoSession)s over real sockets. A service starts a fixed set
//! of reactor workers, each a thread with its own single-threaded executor. Every socket is
//! owned by exactly one worker for its whole life; the worker reads into the session's
//! filter chain, flushes its write queue, checks idle and write timeouts, and fires
//! `session_closed` once the socket is gone.
//!
//! ```text
//!                 ┌──────────────── IoService ────────────────┐
//!   bind/connect  │ config · filter chain builder · sessions   │
//!  ─────────────► │                                            │
//!                 │  worker-0        worker-1        worker-N  │
//!                 │  ┌────────┐      ┌────────┐      ┌───────┐ │
//!                 │  │listener│      │session │ ...  │session│ │
//!                 │  │session │      │session │      │       │ │
//!                 │  └────────┘      └────────┘      └───────┘ │
//!                 └────────────────────────────────────────────┘
//! ```
//!
//! * [`TcpAcceptor`] / [`TcpConnector`] run one session per TCP connection.
//! * [`UdpAcceptor`] runs one session per remote address of a bound socket;
//!   [`UdpConnector`] runs one session per connected socket.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use netloom::{IoHandler, IoSession, Message, ProtocolCodecFilter, Result};
//! use netloom_bootstrap::{ServiceConfig, TcpAcceptor};
//! use netloom_codec::TextLineCodecFactory;
//! use netloom_executor::LocalExecutorBuilder;
//!
//! struct Echo;
//!
//! impl IoHandler for Echo {
//!     fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<()> {
//!         session.write(message);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let acceptor = TcpAcceptor::new(ServiceConfig::default(), Arc::new(Echo))?;
//!     acceptor.service().filter_chain().add_last(
//!         "codec",
//!         Arc::new(ProtocolCodecFilter::new(TextLineCodecFactory::default())),
//!     )?;
//!     acceptor.bind("127.0.0.1:9000".parse().unwrap())?;
//!     LocalExecutorBuilder::new().run(async {
//!         tokio::time::sleep(Duration::from_secs(60)).await;
//!         acceptor.service().dispose().await;
//!     })?;
//!     Ok(())
//! }
//! ```

pub(crate) mod config;
pub(crate) mod service;
pub(crate) mod stream;
pub(crate) mod tcp;
pub(crate) mod udp;
pub(crate) mod worker;

pub use config::{
    AssignmentStrategy, ServiceConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_DATAGRAM_SIZE,
};
pub use service::IoService;
pub use tcp::{TcpAcceptor, TcpConnector};
pub use udp::{UdpAcceptor, UdpConnector};
