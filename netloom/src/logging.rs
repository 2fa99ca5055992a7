//! A pass-through filter that logs every chain event.

use log::{log, log_enabled, Level};

use crate::error::{Error, Result};
use crate::filter::{FilterContext, IoFilter};
use crate::session::IdleStatus;
use crate::write_request::{Message, WriteRequest};
use crate::IoBuffer;

/// Events the [`LoggingFilter`] can log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogEvent {
    SessionCreated,
    SessionOpened,
    SessionClosed,
    SessionIdle,
    MessageReceived,
    MessageSent,
    ExceptionCaught,
    FilterWrite,
    FilterClose,
}

impl LogEvent {
    const COUNT: usize = 9;

    fn index(self) -> usize {
        self as usize
    }
}

const HEX_PREVIEW: usize = 32;

/// Logs each event at a configurable level, then forwards it unchanged.
///
/// Defaults: `exception_caught` at `Warn`, `filter_write`/`filter_close` at `Debug`,
/// everything else at `Info`. Passing `None` silences an event.
#[derive(Debug, Clone)]
pub struct LoggingFilter {
    target: String,
    levels: [Option<Level>; LogEvent::COUNT],
}

impl Default for LoggingFilter {
    fn default() -> Self {
        Self::new("netloom::logging")
    }
}

impl LoggingFilter {
    /// A filter logging under the given `log` target.
    pub fn new(target: impl Into<String>) -> Self {
        let mut levels = [Some(Level::Info); LogEvent::COUNT];
        levels[LogEvent::ExceptionCaught.index()] = Some(Level::Warn);
        levels[LogEvent::FilterWrite.index()] = Some(Level::Debug);
        levels[LogEvent::FilterClose.index()] = Some(Level::Debug);
        Self {
            target: target.into(),
            levels,
        }
    }

    pub fn with_level(mut self, event: LogEvent, level: Option<Level>) -> Self {
        self.levels[event.index()] = level;
        self
    }

    pub fn level(&self, event: LogEvent) -> Option<Level> {
        self.levels[event.index()]
    }

    fn emit(&self, ctx: &FilterContext, event: LogEvent, detail: impl FnOnce() -> String) {
        if let Some(level) = self.levels[event.index()] {
            if log_enabled!(target: self.target.as_str(), level) {
                log!(
                    target: self.target.as_str(),
                    level,
                    "[{}/{}] {:?}{}",
                    ctx.session().id(),
                    ctx.session().remote_addr(),
                    event,
                    detail()
                );
            }
        }
    }
}

fn describe(message: &Message) -> String {
    if let Some(buffer) = message.downcast_ref::<IoBuffer>() {
        format!(": {} bytes [{}]", buffer.remaining(), buffer.hex_dump(HEX_PREVIEW))
    } else if let Some(text) = message.downcast_ref::<String>() {
        format!(": {text:?}")
    } else {
        String::new()
    }
}

impl IoFilter for LoggingFilter {
    fn session_created(&self, ctx: &FilterContext) -> Result<()> {
        self.emit(ctx, LogEvent::SessionCreated, String::new);
        ctx.fire_session_created()
    }

    fn session_opened(&self, ctx: &FilterContext) -> Result<()> {
        self.emit(ctx, LogEvent::SessionOpened, String::new);
        ctx.fire_session_opened()
    }

    fn session_closed(&self, ctx: &FilterContext) -> Result<()> {
        self.emit(ctx, LogEvent::SessionClosed, String::new);
        ctx.fire_session_closed()
    }

    fn session_idle(&self, ctx: &FilterContext, status: IdleStatus) -> Result<()> {
        self.emit(ctx, LogEvent::SessionIdle, || format!(": {status:?}"));
        ctx.fire_session_idle(status)
    }

    fn message_received(&self, ctx: &FilterContext, message: Message) -> Result<()> {
        self.emit(ctx, LogEvent::MessageReceived, || describe(&message));
        ctx.fire_message_received(message)
    }

    fn message_sent(&self, ctx: &FilterContext, request: WriteRequest) -> Result<()> {
        self.emit(ctx, LogEvent::MessageSent, || describe(request.message()));
        ctx.fire_message_sent(request)
    }

    fn exception_caught(&self, ctx: &FilterContext, cause: Error) -> Result<()> {
        self.emit(ctx, LogEvent::ExceptionCaught, || format!(": {cause}"));
        ctx.fire_exception_caught(cause)
    }

    fn filter_write(&self, ctx: &FilterContext, request: WriteRequest) -> Result<()> {
        self.emit(ctx, LogEvent::FilterWrite, || describe(request.message()));
        ctx.fire_filter_write(request)
    }

    fn filter_close(&self, ctx: &FilterContext) -> Result<()> {
        self.emit(ctx, LogEvent::FilterClose, String::new);
        ctx.fire_filter_close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        let filter = LoggingFilter::default();
        assert_eq!(filter.level(LogEvent::ExceptionCaught), Some(Level::Warn));
        assert_eq!(filter.level(LogEvent::MessageReceived), Some(Level::Info));
        let filter = filter.with_level(LogEvent::MessageReceived, None);
        assert_eq!(filter.level(LogEvent::MessageReceived), None);
    }
}
