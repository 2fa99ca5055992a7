use bytes::Bytes;
use netloom::{
    BufferError, CumulativeProtocolDecoder, Error, FrameDecoder, IoBuffer, IoSession,
    PrefixWidth, ProtocolCodecFactory, ProtocolEncoder, Result,
};

/// Default payload guard for the length-prefixed codecs.
pub const DEFAULT_MAX_DATA_LENGTH: usize = 2048;

fn check_length(len: usize, width: PrefixWidth, max: usize) -> Result<()> {
    let limit = max.min(width.max_value());
    if len > limit {
        return Err(Error::ProtocolEncode(format!(
            "payload of {len} bytes exceeds the maximum of {limit}"
        )));
    }
    Ok(())
}

/// Decodes `String`s framed by a big-endian length prefix.
#[derive(Debug, Clone)]
pub struct PrefixedStringDecoder {
    width: PrefixWidth,
    max_data_length: usize,
}

impl PrefixedStringDecoder {
    pub fn new(width: PrefixWidth, max_data_length: usize) -> Self {
        Self {
            width,
            max_data_length,
        }
    }
}

impl FrameDecoder for PrefixedStringDecoder {
    type Output = String;
    type State = ();

    fn create_state(&self) {}

    fn decode_frame(
        &self,
        _session: &IoSession,
        input: &mut IoBuffer,
        _state: &mut (),
        out: &mut Vec<String>,
    ) -> Result<bool> {
        if !input.prefixed_data_available(self.width, self.max_data_length)? {
            return Ok(false);
        }
        out.push(input.get_prefixed_string(self.width, self.max_data_length)?);
        Ok(true)
    }
}

/// Encodes `String`s behind a big-endian length prefix.
#[derive(Debug, Clone)]
pub struct PrefixedStringEncoder {
    width: PrefixWidth,
    max_data_length: usize,
}

impl ProtocolEncoder for PrefixedStringEncoder {
    type Message = String;

    fn encode(&self, _session: &IoSession, text: &String) -> Result<IoBuffer> {
        check_length(text.len(), self.width, self.max_data_length)?;
        let mut buffer = IoBuffer::allocate(self.width.width() + text.len());
        buffer.put_prefixed_string(text, self.width)?;
        buffer.flip();
        Ok(buffer)
    }
}

/// Codec for length-prefixed UTF-8 strings.
#[derive(Debug, Clone)]
pub struct PrefixedStringCodecFactory {
    width: PrefixWidth,
    max_data_length: usize,
}

impl Default for PrefixedStringCodecFactory {
    fn default() -> Self {
        Self::new(PrefixWidth::Four, DEFAULT_MAX_DATA_LENGTH)
    }
}

impl PrefixedStringCodecFactory {
    pub fn new(width: PrefixWidth, max_data_length: usize) -> Self {
        Self {
            width,
            max_data_length,
        }
    }
}

impl ProtocolCodecFactory for PrefixedStringCodecFactory {
    type Decoder = CumulativeProtocolDecoder<PrefixedStringDecoder>;
    type Encoder = PrefixedStringEncoder;

    fn decoder(&self, _session: &IoSession) -> Self::Decoder {
        CumulativeProtocolDecoder::new(PrefixedStringDecoder::new(
            self.width,
            self.max_data_length,
        ))
    }

    fn encoder(&self, _session: &IoSession) -> Self::Encoder {
        PrefixedStringEncoder {
            width: self.width,
            max_data_length: self.max_data_length,
        }
    }
}

/// Progress through one length-prefixed record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordState {
    /// The prefix has not been read yet.
    #[default]
    WaitingForPrefix,
    /// The prefix was read; `len` payload bytes are outstanding.
    WaitingForPayload { len: usize },
}

/// Decodes raw records framed by a big-endian length prefix.
///
/// Unlike [`PrefixedStringDecoder`] it consumes the prefix as soon as it is complete and
/// remembers the declared length, so a large record waiting for its payload is never
/// re-parsed.
#[derive(Debug, Clone)]
pub struct PrefixedBytesDecoder {
    width: PrefixWidth,
    max_data_length: usize,
}

impl PrefixedBytesDecoder {
    pub fn new(width: PrefixWidth, max_data_length: usize) -> Self {
        Self {
            width,
            max_data_length,
        }
    }

    fn read_prefix(&self, input: &mut IoBuffer) -> Result<usize> {
        let len = match self.width {
            PrefixWidth::One => input.get_u8()? as usize,
            PrefixWidth::Two => {
                let mut raw = [0u8; 2];
                input.get_slice(&mut raw)?;
                u16::from_be_bytes(raw) as usize
            }
            PrefixWidth::Four => {
                let mut raw = [0u8; 4];
                input.get_slice(&mut raw)?;
                u32::from_be_bytes(raw) as usize
            }
        };
        Ok(len)
    }
}

impl FrameDecoder for PrefixedBytesDecoder {
    type Output = Bytes;
    type State = RecordState;

    fn create_state(&self) -> RecordState {
        RecordState::WaitingForPrefix
    }

    fn decode_frame(
        &self,
        _session: &IoSession,
        input: &mut IoBuffer,
        state: &mut RecordState,
        out: &mut Vec<Bytes>,
    ) -> Result<bool> {
        let len = match *state {
            RecordState::WaitingForPayload { len } => len,
            RecordState::WaitingForPrefix => {
                if input.remaining() < self.width.width() {
                    return Ok(false);
                }
                let len = self.read_prefix(input)?;
                if len > self.max_data_length {
                    return Err(BufferError::FrameTooLarge {
                        len,
                        max: self.max_data_length,
                    }
                    .into());
                }
                *state = RecordState::WaitingForPayload { len };
                len
            }
        };
        if input.remaining() < len {
            return Ok(false);
        }
        out.push(Bytes::from(input.get_bytes(len)?));
        *state = RecordState::WaitingForPrefix;
        Ok(true)
    }
}

/// Encodes `Bytes` records behind a big-endian length prefix.
#[derive(Debug, Clone)]
pub struct PrefixedBytesEncoder {
    width: PrefixWidth,
    max_data_length: usize,
}

impl ProtocolEncoder for PrefixedBytesEncoder {
    type Message = Bytes;

    fn encode(&self, _session: &IoSession, record: &Bytes) -> Result<IoBuffer> {
        check_length(record.len(), self.width, self.max_data_length)?;
        let mut buffer = IoBuffer::allocate(self.width.width() + record.len());
        buffer.put_prefixed_bytes(record, self.width)?;
        buffer.flip();
        Ok(buffer)
    }
}

/// Codec for length-prefixed binary records.
///
/// ```rust
/// use netloom::PrefixWidth;
/// use netloom_codec::PrefixedBytesCodecFactory;
///
/// let factory = PrefixedBytesCodecFactory::new(PrefixWidth::Two, 16 * 1024);
/// assert_eq!(factory.width(), PrefixWidth::Two);
/// ```
#[derive(Debug, Clone)]
pub struct PrefixedBytesCodecFactory {
    width: PrefixWidth,
    max_data_length: usize,
}

impl Default for PrefixedBytesCodecFactory {
    fn default() -> Self {
        Self::new(PrefixWidth::Four, DEFAULT_MAX_DATA_LENGTH)
    }
}

impl PrefixedBytesCodecFactory {
    pub fn new(width: PrefixWidth, max_data_length: usize) -> Self {
        Self {
            width,
            max_data_length,
        }
    }

    pub fn width(&self) -> PrefixWidth {
        self.width
    }

    pub fn max_data_length(&self) -> usize {
        self.max_data_length
    }
}

impl ProtocolCodecFactory for PrefixedBytesCodecFactory {
    type Decoder = CumulativeProtocolDecoder<PrefixedBytesDecoder>;
    type Encoder = PrefixedBytesEncoder;

    fn decoder(&self, _session: &IoSession) -> Self::Decoder {
        CumulativeProtocolDecoder::new(PrefixedBytesDecoder::new(
            self.width,
            self.max_data_length,
        ))
    }

    fn encoder(&self, _session: &IoSession) -> Self::Encoder {
        PrefixedBytesEncoder {
            width: self.width,
            max_data_length: self.max_data_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netloom::{IoHandlerAdapter, ProtocolDecoder};
    use std::sync::Arc;

    fn session() -> Arc<IoSession> {
        IoSession::builder(1, Arc::new(IoHandlerAdapter)).build()
    }

    #[test]
    fn test_string_frame_split_after_partial_payload() {
        let session = session();
        let factory = PrefixedStringCodecFactory::new(PrefixWidth::Four, 64);
        let decoder = factory.decoder(&session);
        let mut state = decoder.create_state();
        let mut out = Vec::new();

        let mut first = IoBuffer::wrap(vec![0, 0, 0, 10, b'a', b'b', b'c']);
        decoder
            .decode(&session, &mut first, &mut state, &mut out)
            .unwrap();
        assert!(out.is_empty());

        let mut second = IoBuffer::from("defghij");
        decoder
            .decode(&session, &mut second, &mut state, &mut out)
            .unwrap();
        assert_eq!(out, vec!["abcdefghij"]);
    }

    #[test]
    fn test_bytes_decoder_remembers_prefix() {
        let session = session();
        let factory = PrefixedBytesCodecFactory::new(PrefixWidth::Two, 64);
        let decoder = factory.decoder(&session);
        let mut state = decoder.create_state();
        let mut out = Vec::new();

        for chunk in [vec![0u8], vec![3], vec![1, 2], vec![3, 0, 1, 9]] {
            let mut input = IoBuffer::wrap(chunk);
            decoder
                .decode(&session, &mut input, &mut state, &mut out)
                .unwrap();
        }
        assert_eq!(out, vec![Bytes::from_static(&[1, 2, 3]), Bytes::from_static(&[9])]);
        assert_eq!(*state.inner(), RecordState::WaitingForPrefix);
    }

    #[test]
    fn test_bytes_decoder_rejects_oversized_record() {
        let session = session();
        let factory = PrefixedBytesCodecFactory::new(PrefixWidth::Four, 16);
        let decoder = factory.decoder(&session);
        let mut state = decoder.create_state();
        let mut out = Vec::new();

        let mut input = IoBuffer::wrap(vec![0x7F, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            decoder.decode(&session, &mut input, &mut state, &mut out),
            Err(Error::Buffer(BufferError::FrameTooLarge {
                len: 0x7FFF_FFFF,
                max: 16,
            }))
        ));
    }

    #[test]
    fn test_encoders_write_big_endian_prefix() {
        let session = session();
        let strings = PrefixedStringCodecFactory::new(PrefixWidth::Two, 64);
        let encoded = strings
            .encoder(&session)
            .encode(&session, &"hi".to_string())
            .unwrap();
        assert_eq!(encoded.as_slice(), &[0, 2, b'h', b'i']);

        let records = PrefixedBytesCodecFactory::new(PrefixWidth::One, 2);
        let encoder = records.encoder(&session);
        assert!(matches!(
            encoder.encode(&session, &Bytes::from_static(b"abc")),
            Err(Error::ProtocolEncode(_))
        ));
    }
}
