//! # netloom - Session and Filter-Chain Core
//!
//! `netloom` is the core of an asynchronous network I/O framework: every connection is a
//! long-lived [`IoSession`], and application logic observes and transforms its traffic
//! through an ordered, mutable [`FilterChain`] that ends in an [`IoHandler`].
//!
//! This crate contains no sockets. The reactor that reads and writes channels lives in
//! `netloom-bootstrap`; concrete codecs live in `netloom-codec`.
//!
//! ## Core Concepts
//!
//! ### IoBuffer
//!
//! [`IoBuffer`] is the byte container with `position`, `limit`, `capacity` and `mark`,
//! auto-expansion, compaction and length-prefixed helpers.
//!
//! ### IoSession
//!
//! An [`IoSession`] carries identity, addresses, typed attributes, a traffic mask, idle
//! accounting, statistics and the outbound write queue. `write()` and `close()` are
//! asynchronous and return [`WriteFuture`] / [`CloseFuture`].
//!
//! ### IoFilter and FilterChain
//!
//! An [`IoFilter`] intercepts session events. Each method has a pass-through default; the
//! [`FilterContext`] it receives forwards the event to the next node in the event's
//! direction.
//!
//! ### Protocol Codecs
//!
//! [`ProtocolCodecFilter`] adapts a [`ProtocolCodecFactory`] so that the rest of the chain
//! sees decoded messages instead of bytes. [`CumulativeProtocolDecoder`] keeps partial
//! frames across reads.
//!
//! ## Event Flow
//!
//! ```text
//!                                                     | session.write() / close()
//!   +-------------------------------------------------+-------------------+
//!   |                        FilterChain              |                   |
//!   |                                                \|/                  |
//!   |    +------------------------------------------------------------+   |
//!   |    |                tail  (invokes IoHandler)                   |   |
//!   |    +------------------------------------------------------------+   |
//!   |              /|\                                |                   |
//!   |    +------------------------------------------------------------+   |
//!   |    |                ProtocolCodecFilter                         |   |
//!   |    +------------------------------------------------------------+   |
//!   |              /|\                                |                   |
//!   |       ctx.fire_message_received()        ctx.fire_filter_write()    |
//!   |              /|\                               \|/                  |
//!   |    +------------------------------------------------------------+   |
//!   |    |                LoggingFilter                               |   |
//!   |    +------------------------------------------------------------+   |
//!   |              /|\                                |                   |
//!   |    +------------------------------------------------------------+   |
//!   |    |                head  (queues writes, requests close)       |   |
//!   |    +------------------------------------------------------------+   |
//!   |              /|\                               \|/                  |
//!   +---------------+---------------------------------+-------------------+
//!                   |                                 |
//!            reactor read                       reactor write
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use netloom::{IoBuffer, IoHandler, IoSession, LoggingFilter, Message, Result};
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
//! let session = IoSession::builder(1, Arc::new(Echo)).build();
//! session
//!     .chain()
//!     .add_last("logger", Arc::new(LoggingFilter::default()))
//!     .unwrap();
//!
//! session.fire_received(IoBuffer::from("ping"));
//!
//! let queued = session.poll_write().unwrap();
//! assert_eq!(queued.buffer().unwrap().as_slice(), b"ping");
//! ```

#![warn(rust_2018_idioms)]

pub(crate) mod attribute;
pub(crate) mod buffer;
pub(crate) mod chain;
pub(crate) mod chain_builder;
pub mod codec;
pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod filter;
pub(crate) mod future;
pub(crate) mod handler;
pub(crate) mod logging;
pub(crate) mod session;
pub(crate) mod write_request;

pub use attribute::{AttributeKey, AttributeMap};
pub use buffer::{BufferReader, BufferResult, BufferWriter, ByteOrder, IoBuffer, PrefixWidth};
pub use chain::{FilterChain, HEAD_NAME, TAIL_NAME};
pub use chain_builder::DefaultFilterChainBuilder;
pub use codec::{
    CumulativeProtocolDecoder, FrameDecoder, ProtocolCodecFactory, ProtocolCodecFilter,
    ProtocolDecoder, ProtocolEncoder,
};
pub use config::{
    SessionConfig, DEFAULT_MAX_READ_BUFFER_SIZE, DEFAULT_MIN_READ_BUFFER_SIZE,
    DEFAULT_READ_BUFFER_SIZE,
};
pub use error::{BufferError, Error, Result};
pub use filter::{FilterContext, IoFilter};
pub use future::{CloseFuture, ConnectFuture, IoFuture, WriteFuture};
pub use handler::{IoHandler, IoHandlerAdapter};
pub use logging::{LogEvent, LoggingFilter};
pub use session::{
    CloseHold, IdleStatus, IoSession, IoSessionBuilder, SessionRole, SessionState,
    TransportKind,
};
pub use write_request::{Message, WriteRequest};
