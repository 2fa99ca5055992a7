//! Error taxonomy shared by every netloom crate.
//!
//! Expected conditions (a short read, a peer lying about a frame length, a write to a
//! session that is already going away) are modelled as closed enumerations and returned
//! through [`Result`]. They never unwind the reactor.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Faults raised by [`IoBuffer`](crate::IoBuffer) operations.
///
/// All of them are local to the caller and recoverable by adjusting usage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// A read needed more bytes than are left before `limit`.
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow {
        /// Bytes the operation required.
        needed: usize,
        /// Bytes that were available.
        remaining: usize,
    },

    /// A write needed more room than is left before `limit` and the buffer cannot grow.
    #[error("buffer overflow: needed {needed} bytes, {remaining} remaining")]
    Overflow {
        /// Bytes the operation required.
        needed: usize,
        /// Bytes that were available.
        remaining: usize,
    },

    /// `reset()` was called without a prior `mark()`, or the mark was discarded.
    #[error("reset without a valid mark")]
    InvalidMark,

    /// A length prefix declared more payload than the configured maximum.
    #[error("frame of {len} bytes exceeds the maximum of {max}")]
    FrameTooLarge {
        /// Declared payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A length prefix width other than 1, 2 or 4 bytes.
    #[error("unsupported length prefix width {0}, expected 1, 2 or 4")]
    InvalidPrefixWidth(usize),

    /// A position or limit outside of the buffer bounds.
    #[error("position {position} outside of [0, {bound}]")]
    InvalidPosition {
        /// Requested index.
        position: usize,
        /// Largest acceptable index.
        bound: usize,
    },

    /// A string payload was not valid UTF-8.
    #[error("invalid UTF-8 in string payload")]
    CharacterCoding,
}

/// The crate-wide error type.
///
/// `Error` is `Clone` so that a single failure (a closed session, a broken pipe) can
/// complete any number of pending futures.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// See [`BufferError`].
    #[error("buffer fault: {0}")]
    Buffer(#[from] BufferError),

    /// A genuine socket fault (would-block never reaches this variant).
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Inbound bytes that can never become a valid frame.
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    /// An outbound message the encoder cannot represent.
    #[error("protocol encode error: {0}")]
    ProtocolEncode(String),

    /// The session is closing or closed.
    #[error("session closed")]
    SessionClosed,

    /// A connect attempt did not complete in time.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Remote address of the attempt.
        addr: String,
        /// The caller supplied deadline.
        timeout: Duration,
    },

    /// The remote end refused or reset the connect attempt.
    #[error("connect to {addr} refused: {cause}")]
    ConnectRefused {
        /// Remote address of the attempt.
        addr: String,
        /// Underlying socket error.
        cause: Arc<io::Error>,
    },

    /// The operation was cancelled by its owner.
    #[error("operation cancelled")]
    Cancelled,

    /// A bounded write queue had no room left.
    #[error("write queue is full ({0} requests)")]
    WriteQueueFull(usize),

    /// A write request stayed unflushed past the configured write timeout.
    #[error("write request not flushed within {0:?}")]
    WriteTimeout(Duration),

    /// No chain entry carries the requested name.
    #[error("no filter named \"{0}\" in chain")]
    FilterNotFound(String),

    /// A chain entry with the same name already exists.
    #[error("filter name \"{0}\" already in chain")]
    DuplicateFilter(String),

    /// `head` and `tail` belong to the chain itself.
    #[error("filter name \"{0}\" is reserved")]
    ReservedFilterName(String),

    /// A filter or handler panicked while processing an event.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    /// The owning service has been disposed.
    #[error("service disposed")]
    ServiceDisposed,

    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    /// Returns `true` for errors that mean the byte stream can no longer be interpreted.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::ProtocolDecode(_)
                | Error::ProtocolEncode(_)
                | Error::Buffer(BufferError::FrameTooLarge { .. })
        )
    }

    /// Returns the I/O error kind when this wraps a socket fault.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Error::Io(err) => Some(err.kind()),
            Error::ConnectRefused { cause, .. } => Some(cause.kind()),
            _ => None,
        }
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_shared_on_clone() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer").into();
        let cloned = err.clone();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::ConnectionReset));
        assert_eq!(cloned.io_kind(), Some(io::ErrorKind::ConnectionReset));
    }

    #[test]
    fn test_buffer_error_display() {
        let err = Error::from(BufferError::FrameTooLarge { len: 10, max: 4 });
        assert_eq!(
            err.to_string(),
            "buffer fault: frame of 10 bytes exceeds the maximum of 4"
        );
    }

    #[test]
    fn test_protocol_error_classification() {
        assert!(Error::ProtocolDecode("bad".into()).is_protocol_error());
        assert!(Error::from(BufferError::FrameTooLarge { len: 9, max: 8 }).is_protocol_error());
        assert!(!Error::SessionClosed.is_protocol_error());
    }
}
