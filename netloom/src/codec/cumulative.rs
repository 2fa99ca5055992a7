use log::trace;

use crate::buffer::IoBuffer;
use crate::error::{Error, Result};
use crate::session::IoSession;

use super::ProtocolDecoder;

const MIN_REMAINDER_CAPACITY: usize = 64;

/// Decodes one frame at a time out of an accumulated byte stream.
pub trait FrameDecoder: Send + Sync + 'static {
    type Output: Send + 'static;
    type State: Send + 'static;

    fn create_state(&self) -> Self::State;

    /// Tries to decode one frame from `input`.
    ///
    /// Returns `Ok(true)` after consuming a frame and `Ok(false)` when more bytes are
    /// needed. When returning `Ok(false)` the decoder either leaves `position` unchanged or
    /// records in `state` how far it got.
    fn decode_frame(
        &self,
        session: &IoSession,
        input: &mut IoBuffer,
        state: &mut Self::State,
        out: &mut Vec<Self::Output>,
    ) -> Result<bool>;

    /// Called on session close with the bytes that never formed a frame.
    fn finish(
        &self,
        _session: &IoSession,
        _remainder: &mut IoBuffer,
        _state: &mut Self::State,
        _out: &mut Vec<Self::Output>,
    ) -> Result<()> {
        Ok(())
    }
}

/// State of a [`CumulativeProtocolDecoder`]: undecoded bytes plus the frame decoder's own
/// sub-state.
pub struct CumulativeState<S> {
    remainder: Option<IoBuffer>,
    inner: S,
}

impl<S> CumulativeState<S> {
    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.remainder.as_ref().map_or(0, |r| r.position())
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

/// Keeps partial frames between reads and feeds complete ones to a [`FrameDecoder`].
///
/// With no leftover bytes the decoder runs directly on the incoming buffer; any tail that
/// does not form a frame is copied into an auto-expanding remainder. Later buffers are
/// appended to the remainder, which is compacted after each pass so it only ever holds one
/// partial frame.
pub struct CumulativeProtocolDecoder<D> {
    inner: D,
}

impl<D: FrameDecoder> CumulativeProtocolDecoder<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn drain(
        &self,
        session: &IoSession,
        buffer: &mut IoBuffer,
        state: &mut D::State,
        out: &mut Vec<D::Output>,
    ) -> Result<()> {
        while buffer.has_remaining() {
            let before = buffer.position();
            if !self.inner.decode_frame(session, buffer, state, out)? {
                break;
            }
            if buffer.position() == before {
                return Err(Error::ProtocolDecode(
                    "decoder reported a frame without consuming input".into(),
                ));
            }
        }
        Ok(())
    }
}

impl<D: FrameDecoder> ProtocolDecoder for CumulativeProtocolDecoder<D> {
    type Output = D::Output;
    type State = CumulativeState<D::State>;

    fn create_state(&self) -> Self::State {
        CumulativeState {
            remainder: None,
            inner: self.inner.create_state(),
        }
    }

    fn decode(
        &self,
        session: &IoSession,
        input: &mut IoBuffer,
        state: &mut Self::State,
        out: &mut Vec<Self::Output>,
    ) -> Result<()> {
        match state.remainder.take() {
            None => {
                self.drain(session, input, &mut state.inner, out)?;
                if input.has_remaining() {
                    let mut rest =
                        IoBuffer::allocate(input.remaining().max(MIN_REMAINDER_CAPACITY));
                    rest.set_auto_expand(true);
                    rest.put_buffer(input)?;
                    trace!("session {} buffered {} bytes", session.id(), rest.position());
                    state.remainder = Some(rest);
                }
            }
            Some(mut accumulated) => {
                accumulated.put_buffer(input)?;
                accumulated.flip();
                let result = self.drain(session, &mut accumulated, &mut state.inner, out);
                if accumulated.has_remaining() {
                    accumulated.compact();
                    state.remainder = Some(accumulated);
                }
                result?;
            }
        }
        Ok(())
    }

    fn finish_decode(
        &self,
        session: &IoSession,
        state: &mut Self::State,
        out: &mut Vec<Self::Output>,
    ) -> Result<()> {
        let mut remainder = match state.remainder.take() {
            Some(mut remainder) => {
                remainder.flip();
                remainder
            }
            None => IoBuffer::allocate(0),
        };
        self.inner
            .finish(session, &mut remainder, &mut state.inner, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PrefixWidth;
    use crate::handler::IoHandlerAdapter;
    use std::sync::Arc;

    struct Prefixed;

    impl FrameDecoder for Prefixed {
        type Output = Vec<u8>;
        type State = ();

        fn create_state(&self) {}

        fn decode_frame(
            &self,
            _session: &IoSession,
            input: &mut IoBuffer,
            _state: &mut (),
            out: &mut Vec<Vec<u8>>,
        ) -> Result<bool> {
            if !input.prefixed_data_available(PrefixWidth::Four, 1024)? {
                return Ok(false);
            }
            out.push(input.get_prefixed_bytes(PrefixWidth::Four, 1024)?);
            Ok(true)
        }
    }

    fn session() -> Arc<IoSession> {
        IoSession::builder(1, Arc::new(IoHandlerAdapter)).build()
    }

    #[test]
    fn test_frame_split_across_reads() {
        let session = session();
        let decoder = CumulativeProtocolDecoder::new(Prefixed);
        let mut state = decoder.create_state();
        let mut out = Vec::new();

        let mut first = IoBuffer::wrap(vec![0, 0, 0, 10, 1, 2, 3]);
        decoder
            .decode(&session, &mut first, &mut state, &mut out)
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(state.buffered(), 7);

        let mut second = IoBuffer::wrap(vec![4, 5, 6, 7, 8, 9, 10]);
        decoder
            .decode(&session, &mut second, &mut state, &mut out)
            .unwrap();
        assert_eq!(out, vec![(1..=10).collect::<Vec<u8>>()]);
        assert_eq!(state.buffered(), 0);
    }

    #[test]
    fn test_several_frames_and_a_tail_in_one_read() {
        let session = session();
        let decoder = CumulativeProtocolDecoder::new(Prefixed);
        let mut state = decoder.create_state();
        let mut out = Vec::new();

        let mut input = IoBuffer::wrap(vec![0, 0, 0, 1, 7, 0, 0, 0, 2, 8, 9, 0, 0]);
        decoder
            .decode(&session, &mut input, &mut state, &mut out)
            .unwrap();
        assert_eq!(out, vec![vec![7], vec![8, 9]]);
        assert_eq!(state.buffered(), 2);
    }

    #[test]
    fn test_oversized_frame_is_an_error() {
        let session = session();
        let decoder = CumulativeProtocolDecoder::new(Prefixed);
        let mut state = decoder.create_state();
        let mut out = Vec::new();

        let mut input = IoBuffer::wrap(vec![0x7F, 0xFF, 0xFF, 0xFF, 0]);
        let err = decoder
            .decode(&session, &mut input, &mut state, &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::Buffer(_)));
    }
}
