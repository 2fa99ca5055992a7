//! # Protocol Codec Adapter
//!
//! [`ProtocolCodecFilter`] turns a byte stream into protocol messages and back:
//!
//! ```text
//!   inbound:  IoBuffer ──► ProtocolDecoder::decode(buffer, state) ──► 0..n messages ──► next filter
//!   outbound: message  ──► ProtocolEncoder::encode(message)        ──► IoBuffer      ──► previous filter
//! ```
//!
//! A [`ProtocolCodecFactory`] supplies one decoder and one encoder per session. Decoder state
//! is created lazily on the first inbound buffer, kept in a session attribute under the
//! filter's entry name, handed to [`ProtocolDecoder::finish_decode`] when the session
//! closes, and dropped afterwards.
//!
//! A decode error means the stream can no longer be interpreted: the filter forwards the
//! messages decoded before the error, reports the error to `exception_caught` and closes the
//! session immediately. An error raised while one decoded message travels downstream is
//! reported the same way but leaves the session open, and the rest of the batch is still
//! delivered.
//!
//! Most decoders need to keep partial frames across reads. Implement [`FrameDecoder`] and
//! wrap it in a [`CumulativeProtocolDecoder`] to get that for free.

mod cumulative;

pub use cumulative::{CumulativeProtocolDecoder, CumulativeState, FrameDecoder};

use std::any::Any;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::attribute::AttributeKey;
use crate::buffer::IoBuffer;
use crate::error::Result;
use crate::filter::{FilterContext, IoFilter};
use crate::session::IoSession;
use crate::write_request::{Message, WriteRequest};

/// Turns inbound bytes into messages.
pub trait ProtocolDecoder: Send + Sync + 'static {
    /// Decoded message type.
    type Output: Send + 'static;
    /// Per-session state carried between `decode` calls.
    type State: Send + 'static;

    fn create_state(&self) -> Self::State;

    /// Decodes as many complete messages as `input` holds, appending them to `out`.
    ///
    /// Bytes left unread in `input` are discarded after the call unless the decoder saves
    /// them in `state`.
    fn decode(
        &self,
        session: &IoSession,
        input: &mut IoBuffer,
        state: &mut Self::State,
        out: &mut Vec<Self::Output>,
    ) -> Result<()>;

    /// Called once when the session closes, with whatever `state` remains.
    fn finish_decode(
        &self,
        _session: &IoSession,
        _state: &mut Self::State,
        _out: &mut Vec<Self::Output>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Turns outbound messages into bytes.
pub trait ProtocolEncoder: Send + Sync + 'static {
    /// Message type this encoder understands. Other messages pass by untouched.
    type Message: Any + Send;

    /// Produces the wire bytes, ready for reading (flipped).
    fn encode(&self, session: &IoSession, message: &Self::Message) -> Result<IoBuffer>;
}

/// Supplies the decoder and encoder for each session.
pub trait ProtocolCodecFactory: Send + Sync + 'static {
    type Decoder: ProtocolDecoder;
    type Encoder: ProtocolEncoder;

    fn decoder(&self, session: &IoSession) -> Self::Decoder;
    fn encoder(&self, session: &IoSession) -> Self::Encoder;
}

struct DecoderSlot<D: ProtocolDecoder> {
    decoder: D,
    state: D::State,
}

type SharedSlot<D> = Arc<Mutex<DecoderSlot<D>>>;

/// Adapts a [`ProtocolCodecFactory`] to the filter chain.
pub struct ProtocolCodecFilter<F: ProtocolCodecFactory> {
    factory: F,
}

impl<F: ProtocolCodecFactory> ProtocolCodecFilter<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    fn decoder_key(name: &str) -> AttributeKey<SharedSlot<F::Decoder>> {
        AttributeKey::named(format!("netloom.codec.{name}.decoder"))
    }

    fn encoder_key(name: &str) -> AttributeKey<Arc<F::Encoder>> {
        AttributeKey::named(format!("netloom.codec.{name}.encoder"))
    }

    fn decoder_slot(&self, ctx: &FilterContext) -> SharedSlot<F::Decoder> {
        let session = ctx.session();
        session.get_or_insert_attribute(&Self::decoder_key(ctx.name()), || {
            let decoder = self.factory.decoder(session);
            let state = decoder.create_state();
            Arc::new(Mutex::new(DecoderSlot { decoder, state }))
        })
    }

    fn encoder(&self, ctx: &FilterContext) -> Arc<F::Encoder> {
        let session = ctx.session();
        session.get_or_insert_attribute(&Self::encoder_key(ctx.name()), || {
            Arc::new(self.factory.encoder(session))
        })
    }

    /// Delivers every decoded message; a failing one is reported without dropping the rest.
    fn forward(ctx: &FilterContext, outputs: Vec<<F::Decoder as ProtocolDecoder>::Output>) {
        for output in outputs {
            if let Err(err) = ctx.fire_message_received(Box::new(output)) {
                let session = ctx.session();
                debug!("session {} message_received failed: {}", session.id(), err);
                session.chain().fire_exception_caught(err);
            }
        }
    }
}

impl<F: ProtocolCodecFactory> IoFilter for ProtocolCodecFilter<F> {
    fn message_received(&self, ctx: &FilterContext, message: Message) -> Result<()> {
        let mut input = match message.downcast::<IoBuffer>() {
            Ok(buffer) => *buffer,
            Err(other) => return ctx.fire_message_received(other),
        };
        let slot = self.decoder_slot(ctx);
        let mut outputs = Vec::new();
        let result = {
            let mut slot = slot.lock();
            let DecoderSlot { decoder, state } = &mut *slot;
            decoder.decode(ctx.session(), &mut input, state, &mut outputs)
        };
        Self::forward(ctx, outputs);
        if let Err(err) = result {
            let session = ctx.session();
            debug!("session {} decode failed: {}", session.id(), err);
            session.chain().fire_exception_caught(err);
            session.close(true);
        }
        Ok(())
    }

    fn session_closed(&self, ctx: &FilterContext) -> Result<()> {
        let key = Self::decoder_key(ctx.name());
        if let Some(slot) = ctx.session().remove_attribute(&key) {
            let mut outputs = Vec::new();
            let result = {
                let mut slot = slot.lock();
                let DecoderSlot { decoder, state } = &mut *slot;
                decoder.finish_decode(ctx.session(), state, &mut outputs)
            };
            Self::forward(ctx, outputs);
            if let Err(err) = result {
                ctx.session().chain().fire_exception_caught(err);
            }
        }
        ctx.session().remove_attribute(&Self::encoder_key(ctx.name()));
        ctx.fire_session_closed()
    }

    fn filter_write(&self, ctx: &FilterContext, mut request: WriteRequest) -> Result<()> {
        if request.message().is::<IoBuffer>() {
            return ctx.fire_filter_write(request);
        }
        let encoded = match request
            .message()
            .downcast_ref::<<F::Encoder as ProtocolEncoder>::Message>()
        {
            Some(message) => self.encoder(ctx).encode(ctx.session(), message)?,
            None => return ctx.fire_filter_write(request),
        };
        request.replace_message(ctx.name(), Box::new(encoded));
        ctx.fire_filter_write(request)
    }

    fn message_sent(&self, ctx: &FilterContext, mut request: WriteRequest) -> Result<()> {
        request.restore_message(ctx.name());
        ctx.fire_message_sent(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::handler::IoHandler;

    /// Single-byte decimal digits; anything else is a protocol violation.
    struct DigitDecoder;

    impl ProtocolDecoder for DigitDecoder {
        type Output = u8;
        type State = usize;

        fn create_state(&self) -> usize {
            0
        }

        fn decode(
            &self,
            _session: &IoSession,
            input: &mut IoBuffer,
            seen: &mut usize,
            out: &mut Vec<u8>,
        ) -> Result<()> {
            while input.has_remaining() {
                let byte = input.get_u8()?;
                if !byte.is_ascii_digit() {
                    return Err(Error::ProtocolDecode(format!("not a digit: {byte}")));
                }
                *seen += 1;
                out.push(byte - b'0');
            }
            Ok(())
        }

        fn finish_decode(
            &self,
            _session: &IoSession,
            seen: &mut usize,
            out: &mut Vec<u8>,
        ) -> Result<()> {
            out.push(*seen as u8 + 100);
            Ok(())
        }
    }

    struct DigitEncoder;

    impl ProtocolEncoder for DigitEncoder {
        type Message = u8;

        fn encode(&self, _session: &IoSession, digit: &u8) -> Result<IoBuffer> {
            Ok(IoBuffer::wrap(vec![b'0' + digit]))
        }
    }

    struct DigitCodec;

    impl ProtocolCodecFactory for DigitCodec {
        type Decoder = DigitDecoder;
        type Encoder = DigitEncoder;

        fn decoder(&self, _session: &IoSession) -> DigitDecoder {
            DigitDecoder
        }

        fn encoder(&self, _session: &IoSession) -> DigitEncoder {
            DigitEncoder
        }
    }

    #[derive(Default)]
    struct Collect {
        received: Mutex<Vec<u8>>,
        sent: Mutex<Vec<u8>>,
        errors: Mutex<Vec<String>>,
    }

    impl IoHandler for Arc<Collect> {
        fn message_received(&self, _session: &Arc<IoSession>, message: Message) -> Result<()> {
            if let Some(digit) = message.downcast_ref::<u8>() {
                self.received.lock().push(*digit);
            }
            Ok(())
        }

        fn message_sent(&self, _session: &Arc<IoSession>, message: Message) -> Result<()> {
            if let Some(digit) = message.downcast_ref::<u8>() {
                self.sent.lock().push(*digit);
            }
            Ok(())
        }

        fn exception_caught(&self, _session: &Arc<IoSession>, cause: Error) -> Result<()> {
            self.errors.lock().push(cause.to_string());
            Ok(())
        }
    }

    fn session() -> (Arc<IoSession>, Arc<Collect>) {
        let collect = Arc::new(Collect::default());
        let session = IoSession::builder(1, Arc::new(Arc::clone(&collect))).build();
        session
            .chain()
            .add_last("codec", Arc::new(ProtocolCodecFilter::new(DigitCodec)))
            .unwrap();
        (session, collect)
    }

    #[test]
    fn test_decode_splits_buffer_into_messages() {
        let (session, collect) = session();
        session.fire_received(IoBuffer::from("123"));
        session.fire_received(IoBuffer::from("4"));
        assert_eq!(*collect.received.lock(), vec![1, 2, 3, 4]);
        assert_eq!(session.read_messages(), 4);
        assert_eq!(session.read_bytes(), 4);
    }

    #[test]
    fn test_decode_error_forwards_prefix_then_closes() {
        let (session, collect) = session();
        session.fire_received(IoBuffer::from("12x3"));
        assert_eq!(*collect.received.lock(), vec![1, 2]);
        assert_eq!(collect.errors.lock().len(), 1);
        assert!(collect.errors.lock()[0].contains("not a digit"));
        assert!(session.should_close_now());
    }

    #[test]
    fn test_encode_and_restore_on_sent() {
        let (session, collect) = session();
        session.write(Box::new(7u8));
        let request = session.poll_write().unwrap();
        assert_eq!(request.buffer().unwrap().as_slice(), b"7");
        session.write_completed(request);
        assert_eq!(*collect.sent.lock(), vec![7]);
    }

    #[test]
    fn test_finish_decode_runs_on_close() {
        let (session, collect) = session();
        session.fire_opened();
        session.fire_received(IoBuffer::from("55"));
        session.close(true);
        session.finish_close();
        assert_eq!(*collect.received.lock(), vec![5, 5, 102]);
        assert!(session.attribute_names().is_empty());
    }
}
