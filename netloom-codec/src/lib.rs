//! # netloom-codec - Built-in Protocol Codecs
//!
//! Ready-made [`ProtocolCodecFactory`](netloom::ProtocolCodecFactory) implementations to
//! plug into a [`ProtocolCodecFilter`](netloom::ProtocolCodecFilter).
//!
//! ## Codecs
//!
//! - [`TextLineCodecFactory`]: UTF-8 lines terminated by `\n`, `\r\n` or a custom
//!   delimiter, with a maximum line length.
//! - [`PrefixedStringCodecFactory`]: UTF-8 strings behind a 1, 2 or 4 byte big-endian
//!   length prefix.
//! - [`PrefixedBytesCodecFactory`]: raw [`Bytes`](bytes::Bytes) records with the same
//!   framing.
//!
//! All decoders are built on [`CumulativeProtocolDecoder`](netloom::CumulativeProtocolDecoder),
//! so a frame split across any number of reads is reassembled before it reaches the
//! handler.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use netloom::{IoBuffer, IoHandler, IoSession, Message, ProtocolCodecFilter, Result};
//! use netloom_codec::TextLineCodecFactory;
//!
//! struct Upper;
//!
//! impl IoHandler for Upper {
//!     fn message_received(&self, session: &Arc<IoSession>, message: Message) -> Result<()> {
//!         if let Ok(line) = message.downcast::<String>() {
//!             session.write(Box::new(line.to_uppercase()));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! let session = IoSession::builder(1, Arc::new(Upper)).build();
//! session
//!     .chain()
//!     .add_last("codec", Arc::new(ProtocolCodecFilter::new(TextLineCodecFactory::new())))
//!     .unwrap();
//!
//! session.fire_received(IoBuffer::from("hel"));
//! session.fire_received(IoBuffer::from("lo\r\n"));
//!
//! let queued = session.poll_write().unwrap();
//! assert_eq!(queued.buffer().unwrap().as_slice(), b"HELLO\n");
//! ```

#![warn(rust_2018_idioms)]

pub(crate) mod prefixed;
pub(crate) mod text_line;

pub use prefixed::{
    PrefixedBytesCodecFactory, PrefixedBytesDecoder, PrefixedBytesEncoder,
    PrefixedStringCodecFactory, PrefixedStringDecoder, PrefixedStringEncoder, RecordState,
    DEFAULT_MAX_DATA_LENGTH,
};
pub use text_line::{
    LineDelimiter, LineScan, TextLineCodecFactory, TextLineDecoder, TextLineEncoder,
    DEFAULT_MAX_LINE_LENGTH,
};
