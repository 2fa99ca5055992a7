//! Per-session configuration.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::IdleStatus;

/// Default read chunk, rounded up from a typical MTU.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 2048;
/// Lower bound for the adaptive read chunk.
pub const DEFAULT_MIN_READ_BUFFER_SIZE: usize = 64;
/// Upper bound for the adaptive read chunk.
pub const DEFAULT_MAX_READ_BUFFER_SIZE: usize = 65536;

/// Settings copied into every session a service creates.
///
/// ```rust
/// use std::time::Duration;
/// use netloom::{IdleStatus, SessionConfig};
///
/// let mut config = SessionConfig::default();
/// config
///     .read_buffer_size(4096)
///     .idle_time(IdleStatus::ReaderIdle, Duration::from_secs(30))
///     .max_write_queue(Some(128));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub(crate) read_buffer_size: usize,
    pub(crate) min_read_buffer_size: usize,
    pub(crate) max_read_buffer_size: usize,
    pub(crate) reader_idle_time: Option<Duration>,
    pub(crate) writer_idle_time: Option<Duration>,
    pub(crate) both_idle_time: Option<Duration>,
    pub(crate) max_write_queue: Option<usize>,
    pub(crate) write_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            min_read_buffer_size: DEFAULT_MIN_READ_BUFFER_SIZE,
            max_read_buffer_size: DEFAULT_MAX_READ_BUFFER_SIZE,
            reader_idle_time: None,
            writer_idle_time: None,
            both_idle_time: None,
            max_write_queue: None,
            write_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Initial size of the read chunk.
    pub fn read_buffer_size(&mut self, size: usize) -> &mut Self {
        self.read_buffer_size = size;
        self
    }

    /// Bounds for the adaptive read chunk.
    pub fn read_buffer_bounds(&mut self, min: usize, max: usize) -> &mut Self {
        self.min_read_buffer_size = min;
        self.max_read_buffer_size = max;
        self
    }

    /// Idle threshold for `status`; `Duration::ZERO` disables it.
    pub fn idle_time(&mut self, status: IdleStatus, time: Duration) -> &mut Self {
        let time = (!time.is_zero()).then_some(time);
        match status {
            IdleStatus::ReaderIdle => self.reader_idle_time = time,
            IdleStatus::WriterIdle => self.writer_idle_time = time,
            IdleStatus::BothIdle => self.both_idle_time = time,
        }
        self
    }

    /// Maximum queued write requests per session, `None` for unbounded.
    pub fn max_write_queue(&mut self, capacity: Option<usize>) -> &mut Self {
        self.max_write_queue = capacity;
        self
    }

    /// Deadline for a queued write to be flushed, `None` to disable.
    pub fn write_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.write_timeout = timeout;
        self
    }

    pub fn get_read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn get_min_read_buffer_size(&self) -> usize {
        self.min_read_buffer_size
    }

    pub fn get_max_read_buffer_size(&self) -> usize {
        self.max_read_buffer_size
    }

    pub fn get_idle_time(&self, status: IdleStatus) -> Option<Duration> {
        match status {
            IdleStatus::ReaderIdle => self.reader_idle_time,
            IdleStatus::WriterIdle => self.writer_idle_time,
            IdleStatus::BothIdle => self.both_idle_time,
        }
    }

    pub fn get_max_write_queue(&self) -> Option<usize> {
        self.max_write_queue
    }

    pub fn get_write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    /// Checks the read-buffer bounds and the write-queue capacity.
    pub fn validate(&self) -> Result<()> {
        if self.min_read_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "min read buffer size must be positive".into(),
            ));
        }
        if self.min_read_buffer_size > self.max_read_buffer_size {
            return Err(Error::InvalidConfig(format!(
                "min read buffer size {} exceeds max {}",
                self.min_read_buffer_size, self.max_read_buffer_size
            )));
        }
        if !(self.min_read_buffer_size..=self.max_read_buffer_size)
            .contains(&self.read_buffer_size)
        {
            return Err(Error::InvalidConfig(format!(
                "read buffer size {} outside [{}, {}]",
                self.read_buffer_size, self.min_read_buffer_size, self.max_read_buffer_size
            )));
        }
        if self.max_write_queue == Some(0) {
            return Err(Error::InvalidConfig(
                "write queue capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
