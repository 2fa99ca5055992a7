//! The I/O loop of one stream session.
//!
//! ```text
//!   fire_created / fire_opened
//!   loop {
//!       write timeouts, idle checks, graceful close once flushed
//!       select (biased) {
//!           shutdown signal   -> close(immediate)
//!           session wakeup    -> re-evaluate interest
//!           writable          -> flush the write queue
//!           readable          -> read one chunk into the chain
//!           next deadline     -> loop
//!       }
//!   }
//!   drop the socket, finish_close
//! ```

use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace, warn};
use netloom::{Error, IoBuffer, IoSession, SessionConfig};
use tokio::net::TcpStream;

use crate::service::ShutdownSignal;

/// Sizes the read chunk after the traffic of the session.
///
/// A read that fills the chunk doubles it; two reads in a row using less than half of it
/// halve it. The size stays within the configured bounds.
#[derive(Debug)]
pub(crate) struct ReadBufferSizer {
    size: usize,
    min: usize,
    max: usize,
    small_reads: u8,
}

impl ReadBufferSizer {
    pub(crate) fn new(config: &SessionConfig) -> Self {
        let min = config.get_min_read_buffer_size();
        let max = config.get_max_read_buffer_size();
        Self {
            size: config.get_read_buffer_size().clamp(min, max),
            min,
            max,
            small_reads: 0,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn record(&mut self, n: usize) {
        if n >= self.size {
            self.size = (self.size * 2).min(self.max);
            self.small_reads = 0;
        } else if n < self.size / 2 {
            self.small_reads += 1;
            if self.small_reads >= 2 {
                self.size = (self.size / 2).max(self.min);
                self.small_reads = 0;
            }
        } else {
            self.small_reads = 0;
        }
    }
}

/// Deadline for the next housekeeping pass, if any.
pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

/// Runs idle checks, write timeouts and graceful close. Returns true when the channel
/// must be dropped.
pub(crate) fn housekeeping(session: &IoSession) -> bool {
    let now = Instant::now();
    session.check_write_timeout(now);
    session.check_idle(now);
    session.close_if_flushed();
    session.should_close_now()
}

pub(crate) fn fault(session: &IoSession, err: io::Error) {
    warn!("session {} I/O error: {}", session.id(), err);
    session.fire_exception(Error::from(err));
    session.close(true);
}

/// Writes as much of the queue as the socket accepts without blocking.
fn flush(stream: &TcpStream, session: &IoSession) -> io::Result<()> {
    while !session.is_write_suspended() {
        let Some(mut request) = session.poll_write() else {
            break;
        };
        if request.buffer().map_or(true, |buffer| !buffer.has_remaining()) {
            session.write_completed(request);
            continue;
        }
        let Some(buffer) = request.buffer_mut() else {
            continue;
        };
        match stream.try_write(buffer.as_slice()) {
            Ok(n) => {
                buffer.skip(n)?;
                let done = !buffer.has_remaining();
                trace!("session {} wrote {} bytes", session.id(), n);
                session.record_written(n);
                if done {
                    session.write_completed(request);
                } else {
                    session.requeue_write(request);
                    break;
                }
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

pub(crate) async fn run_stream_session(
    stream: TcpStream,
    session: Arc<IoSession>,
    mut shutdown: ShutdownSignal,
    on_open: impl FnOnce(&Arc<IoSession>),
) {
    session.fire_created();
    session.fire_opened();
    on_open(&session);

    let wakeup = Arc::clone(session.wakeup());
    let mut sizer = ReadBufferSizer::new(session.config());
    let mut buf = vec![0u8; sizer.size()];

    loop {
        if housekeeping(&session) {
            break;
        }
        let want_write = session.has_pending_writes() && !session.is_write_suspended();
        let want_read = !session.is_read_suspended();
        let deadline = session.next_deadline();

        tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                debug!("session {} shutting down", session.id());
                session.close(true);
            }
            _ = wakeup.notified() => {}
            ready = stream.writable(), if want_write => {
                if let Err(err) = ready.and_then(|_| flush(&stream, &session)) {
                    fault(&session, err);
                }
            }
            ready = stream.readable(), if want_read => {
                if let Err(err) = ready {
                    fault(&session, err);
                    continue;
                }
                if buf.len() != sizer.size() {
                    buf.resize(sizer.size(), 0);
                }
                match stream.try_read(&mut buf) {
                    Ok(0) => {
                        debug!("session {} reached end of stream", session.id());
                        session.close(true);
                    }
                    Ok(n) => {
                        sizer.record(n);
                        session.fire_received(IoBuffer::from(&buf[..n]));
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                    Err(err) => fault(&session, err),
                }
            }
            _ = sleep_until(deadline) => {}
        }
    }

    drop(stream);
    session.finish_close();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer(initial: usize) -> ReadBufferSizer {
        let mut config = SessionConfig::default();
        config.read_buffer_size(initial).read_buffer_bounds(64, 1024);
        ReadBufferSizer::new(&config)
    }

    #[test]
    fn test_full_read_doubles_up_to_max() {
        let mut sizer = sizer(256);
        sizer.record(256);
        assert_eq!(sizer.size(), 512);
        sizer.record(512);
        sizer.record(1024);
        assert_eq!(sizer.size(), 1024);
    }

    #[test]
    fn test_two_small_reads_halve_down_to_min() {
        let mut sizer = sizer(256);
        sizer.record(10);
        assert_eq!(sizer.size(), 256);
        sizer.record(10);
        assert_eq!(sizer.size(), 128);
        sizer.record(100);
        sizer.record(10);
        assert_eq!(sizer.size(), 128);
        for _ in 0..8 {
            sizer.record(1);
        }
        assert_eq!(sizer.size(), 64);
    }
}
