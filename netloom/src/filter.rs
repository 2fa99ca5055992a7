//! # IoFilter - Interceptors in the Session Pipeline
//!
//! A filter sees every session event on its way between the reactor and the
//! [`IoHandler`](crate::IoHandler). Every method has a pass-through default, so a filter
//! only overrides the events it cares about.
//!
//! ```text
//!            inbound: created/opened/closed/idle, message_received, message_sent, exception
//!   reactor ──► head ──► filter A ──► filter B ──► filter C ──► tail ──► IoHandler
//!   socket  ◄── head ◄── filter A ◄── filter B ◄── filter C ◄── tail ◄── session.write()/close()
//!            outbound: filter_write, filter_close
//! ```
//!
//! The [`FilterContext`] passed to each method is the direction-aware controller: calling
//! `ctx.fire_*` hands the (possibly transformed) event to the next node. A filter may forward
//! unchanged, forward something else, forward several times, or not forward at all.
//!
//! The next node is resolved at the moment a filter forwards, so a filter removed while an
//! event is in flight upstream of it is skipped by that event.

use std::sync::Arc;

use crate::chain::{Entry, FilterChain};
use crate::error::{Error, Result};
use crate::session::{IdleStatus, IoSession};
use crate::write_request::{Message, WriteRequest};

/// An interceptor for session events.
///
/// Filter instances are shared by every session whose chain contains them, so per-session
/// state belongs in session attributes rather than in the filter.
pub trait IoFilter: Send + Sync + 'static {
    /// Called before the filter is inserted under `name`. An `Err` aborts the insertion.
    fn on_pre_add(&self, _chain: &FilterChain, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Called after the filter is inserted. An `Err` removes it again.
    fn on_post_add(&self, _chain: &FilterChain, _name: &str) -> Result<()> {
        Ok(())
    }

    fn on_pre_remove(&self, _chain: &FilterChain, _name: &str) -> Result<()> {
        Ok(())
    }

    fn on_post_remove(&self, _chain: &FilterChain, _name: &str) -> Result<()> {
        Ok(())
    }

    fn session_created(&self, ctx: &FilterContext) -> Result<()> {
        ctx.fire_session_created()
    }

    fn session_opened(&self, ctx: &FilterContext) -> Result<()> {
        ctx.fire_session_opened()
    }

    fn session_closed(&self, ctx: &FilterContext) -> Result<()> {
        ctx.fire_session_closed()
    }

    fn session_idle(&self, ctx: &FilterContext, status: IdleStatus) -> Result<()> {
        ctx.fire_session_idle(status)
    }

    fn message_received(&self, ctx: &FilterContext, message: Message) -> Result<()> {
        ctx.fire_message_received(message)
    }

    fn message_sent(&self, ctx: &FilterContext, request: WriteRequest) -> Result<()> {
        ctx.fire_message_sent(request)
    }

    fn exception_caught(&self, ctx: &FilterContext, cause: Error) -> Result<()> {
        ctx.fire_exception_caught(cause)
    }

    /// Outbound: a write travelling towards the socket.
    fn filter_write(&self, ctx: &FilterContext, request: WriteRequest) -> Result<()> {
        ctx.fire_filter_write(request)
    }

    /// Outbound: a close request travelling towards the socket.
    fn filter_close(&self, ctx: &FilterContext) -> Result<()> {
        ctx.fire_filter_close()
    }
}

#[derive(Clone)]
pub(crate) enum Position {
    Head,
    Entry { entry: Arc<Entry>, index: usize },
    Tail,
}

/// The controller handed to a filter for one event.
///
/// It knows the filter's place in the chain and forwards events to the neighbour in the
/// event's direction.
#[derive(Clone)]
pub struct FilterContext {
    chain: FilterChain,
    session: Arc<IoSession>,
    position: Position,
}

impl FilterContext {
    pub(crate) fn new(chain: FilterChain, session: Arc<IoSession>, position: Position) -> Self {
        Self {
            chain,
            session,
            position,
        }
    }

    /// The session the event belongs to.
    pub fn session(&self) -> &Arc<IoSession> {
        &self.session
    }

    pub fn chain(&self) -> &FilterChain {
        &self.chain
    }

    /// Name of the entry this context belongs to.
    pub fn name(&self) -> &str {
        match &self.position {
            Position::Head => crate::chain::HEAD_NAME,
            Position::Entry { entry, .. } => entry.name(),
            Position::Tail => crate::chain::TAIL_NAME,
        }
    }

    fn hop(&self, next: Option<(Arc<Entry>, usize)>) -> Option<(Arc<dyn IoFilter>, FilterContext)> {
        next.map(|(entry, index)| {
            let filter = Arc::clone(entry.filter());
            let ctx = FilterContext::new(
                self.chain.clone(),
                Arc::clone(&self.session),
                Position::Entry { entry, index },
            );
            (filter, ctx)
        })
    }

    fn inbound(&self) -> Option<(Arc<dyn IoFilter>, FilterContext)> {
        self.hop(self.chain.next_inbound(&self.position))
    }

    fn outbound(&self) -> Option<(Arc<dyn IoFilter>, FilterContext)> {
        self.hop(self.chain.next_outbound(&self.position))
    }

    pub fn fire_session_created(&self) -> Result<()> {
        match self.inbound() {
            Some((filter, ctx)) => filter.session_created(&ctx),
            None => self.session.handler().session_created(&self.session),
        }
    }

    pub fn fire_session_opened(&self) -> Result<()> {
        match self.inbound() {
            Some((filter, ctx)) => filter.session_opened(&ctx),
            None => self.session.handler().session_opened(&self.session),
        }
    }

    pub fn fire_session_closed(&self) -> Result<()> {
        match self.inbound() {
            Some((filter, ctx)) => filter.session_closed(&ctx),
            None => self.session.handler().session_closed(&self.session),
        }
    }

    pub fn fire_session_idle(&self, status: IdleStatus) -> Result<()> {
        match self.inbound() {
            Some((filter, ctx)) => filter.session_idle(&ctx, status),
            None => self.session.handler().session_idle(&self.session, status),
        }
    }

    pub fn fire_message_received(&self, message: Message) -> Result<()> {
        match self.inbound() {
            Some((filter, ctx)) => filter.message_received(&ctx, message),
            None => {
                self.session.record_message_received();
                self.session
                    .handler()
                    .message_received(&self.session, message)
            }
        }
    }

    pub fn fire_message_sent(&self, request: WriteRequest) -> Result<()> {
        match self.inbound() {
            Some((filter, ctx)) => filter.message_sent(&ctx, request),
            None => {
                self.session.record_message_sent();
                self.session
                    .handler()
                    .message_sent(&self.session, request.into_message())
            }
        }
    }

    pub fn fire_exception_caught(&self, cause: Error) -> Result<()> {
        match self.inbound() {
            Some((filter, ctx)) => filter.exception_caught(&ctx, cause),
            None => self.session.handler().exception_caught(&self.session, cause),
        }
    }

    pub fn fire_filter_write(&self, mut request: WriteRequest) -> Result<()> {
        match self.outbound() {
            Some((filter, ctx)) => filter.filter_write(&ctx, request),
            None => {
                request.normalize_to_buffer(crate::chain::HEAD_NAME)?;
                self.session.enqueue_write(request)
            }
        }
    }

    pub fn fire_filter_close(&self) -> Result<()> {
        match self.outbound() {
            Some((filter, ctx)) => filter.filter_close(&ctx),
            None => {
                self.session.mark_close_now();
                Ok(())
            }
        }
    }
}
