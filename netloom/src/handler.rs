//! The application callback surface.

use std::sync::Arc;

use log::warn;

use crate::error::{Error, Result};
use crate::session::{IdleStatus, IoSession};
use crate::write_request::Message;

/// Application logic attached to a service.
///
/// The tail of every filter chain invokes exactly these callbacks. All of them default
/// to doing nothing except [`exception_caught`](IoHandler::exception_caught), which logs
/// the cause. An `Err` returned from any callback other than `exception_caught` is routed
/// back into `exception_caught` for the same session; an `Err` from `exception_caught`
/// itself closes the session immediately.
pub trait IoHandler: Send + Sync + 'static {
    fn session_created(&self, _session: &Arc<IoSession>) -> Result<()> {
        Ok(())
    }

    fn session_opened(&self, _session: &Arc<IoSession>) -> Result<()> {
        Ok(())
    }

    fn session_closed(&self, _session: &Arc<IoSession>) -> Result<()> {
        Ok(())
    }

    fn session_idle(&self, _session: &Arc<IoSession>, _status: IdleStatus) -> Result<()> {
        Ok(())
    }

    /// A decoded message, or a raw [`IoBuffer`](crate::IoBuffer) if no codec is installed.
    fn message_received(&self, _session: &Arc<IoSession>, _message: Message) -> Result<()> {
        Ok(())
    }

    /// The object originally passed to [`IoSession::write`] has been flushed.
    fn message_sent(&self, _session: &Arc<IoSession>, _message: Message) -> Result<()> {
        Ok(())
    }

    fn exception_caught(&self, session: &Arc<IoSession>, cause: Error) -> Result<()> {
        warn!(
            "session {} ({}) unhandled exception: {}",
            session.id(),
            session.remote_addr(),
            cause
        );
        Ok(())
    }
}

/// A handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct IoHandlerAdapter;

impl IoHandler for IoHandlerAdapter {}
