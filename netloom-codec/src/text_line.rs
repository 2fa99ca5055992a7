use log::debug;
use netloom::{
    CumulativeProtocolDecoder, Error, FrameDecoder, IoBuffer, IoSession, ProtocolCodecFactory,
    ProtocolEncoder, Result,
};

/// Default maximum length of a decoded line, delimiter excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// Line terminator of a [`TextLineCodecFactory`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LineDelimiter {
    /// Decodes `\n` and `\r\n`; encodes `\n`.
    Auto,
    /// `\n`
    Unix,
    /// `\r\n`
    Windows,
    /// Any non-empty byte sequence.
    Custom(Vec<u8>),
}

impl LineDelimiter {
    /// Bytes written after each encoded line.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            LineDelimiter::Auto | LineDelimiter::Unix => b"\n",
            LineDelimiter::Windows => b"\r\n",
            LineDelimiter::Custom(bytes) => bytes,
        }
    }

    /// Rejects an empty [`LineDelimiter::Custom`].
    pub fn validate(&self) -> Result<()> {
        if self.as_bytes().is_empty() {
            return Err(Error::InvalidConfig("empty custom line delimiter".to_owned()));
        }
        Ok(())
    }
}

/// Decodes UTF-8 text lines.
#[derive(Debug, Clone)]
pub struct TextLineDecoder {
    delimiter: LineDelimiter,
    max_line_length: usize,
}

/// How far a partial line has been scanned without finding its delimiter.
#[derive(Debug, Default)]
pub struct LineScan {
    scanned: usize,
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

impl TextLineDecoder {
    pub fn new(delimiter: LineDelimiter, max_line_length: usize) -> Result<Self> {
        delimiter.validate()?;
        Ok(Self {
            delimiter,
            max_line_length,
        })
    }

    /// Returns `(line_end, consumed)` for the first complete line in `data`.
    fn locate(&self, data: &[u8], from: usize) -> Option<(usize, usize)> {
        match &self.delimiter {
            LineDelimiter::Auto => {
                let newline = from + data[from..].iter().position(|b| *b == b'\n')?;
                let line_end = if newline > 0 && data[newline - 1] == b'\r' {
                    newline - 1
                } else {
                    newline
                };
                Some((line_end, newline + 1))
            }
            other => {
                let delimiter = other.as_bytes();
                let start = from.saturating_sub(delimiter.len().saturating_sub(1));
                find(data, delimiter, start).map(|at| (at, at + delimiter.len()))
            }
        }
    }
}

impl FrameDecoder for TextLineDecoder {
    type Output = String;
    type State = LineScan;

    fn create_state(&self) -> LineScan {
        LineScan::default()
    }

    fn decode_frame(
        &self,
        _session: &IoSession,
        input: &mut IoBuffer,
        scan: &mut LineScan,
        out: &mut Vec<String>,
    ) -> Result<bool> {
        let data = input.as_slice();
        let from = scan.scanned.min(data.len());
        let Some((line_end, consumed)) = self.locate(data, from) else {
            if data.len() > self.max_line_length + self.delimiter.as_bytes().len() {
                return Err(Error::ProtocolDecode(format!(
                    "line exceeds {} bytes without a delimiter",
                    self.max_line_length
                )));
            }
            scan.scanned = data.len();
            return Ok(false);
        };
        if line_end > self.max_line_length {
            return Err(Error::ProtocolDecode(format!(
                "line of {} bytes exceeds the maximum of {}",
                line_end, self.max_line_length
            )));
        }
        let line = std::str::from_utf8(&data[..line_end])
            .map_err(|err| Error::ProtocolDecode(format!("invalid UTF-8 in line: {err}")))?
            .to_owned();
        input.skip(consumed)?;
        scan.scanned = 0;
        out.push(line);
        Ok(true)
    }

    fn finish(
        &self,
        session: &IoSession,
        remainder: &mut IoBuffer,
        _scan: &mut LineScan,
        _out: &mut Vec<String>,
    ) -> Result<()> {
        if remainder.has_remaining() {
            debug!(
                "session {} discarding {} bytes of unterminated line",
                session.id(),
                remainder.remaining()
            );
        }
        Ok(())
    }
}

/// Encodes `String` messages followed by the delimiter.
#[derive(Debug, Clone)]
pub struct TextLineEncoder {
    delimiter: LineDelimiter,
}

impl TextLineEncoder {
    pub fn new(delimiter: LineDelimiter) -> Result<Self> {
        delimiter.validate()?;
        Ok(Self { delimiter })
    }
}

impl ProtocolEncoder for TextLineEncoder {
    type Message = String;

    fn encode(&self, _session: &IoSession, line: &String) -> Result<IoBuffer> {
        let delimiter = self.delimiter.as_bytes();
        let mut buffer = IoBuffer::allocate(line.len() + delimiter.len());
        buffer.put_slice(line.as_bytes())?.put_slice(delimiter)?;
        buffer.flip();
        Ok(buffer)
    }
}

/// Codec for newline-terminated UTF-8 text.
///
/// The decoder defaults to [`LineDelimiter::Auto`], the encoder to [`LineDelimiter::Unix`].
///
/// ```rust
/// use std::sync::Arc;
/// use netloom::ProtocolCodecFilter;
/// use netloom_codec::{LineDelimiter, TextLineCodecFactory};
///
/// let factory = TextLineCodecFactory::new()
///     .with_delimiter(LineDelimiter::Windows)?
///     .with_max_line_length(4096);
/// let _filter = Arc::new(ProtocolCodecFilter::new(factory));
/// # Ok::<(), netloom::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct TextLineCodecFactory {
    decoder_delimiter: LineDelimiter,
    encoder_delimiter: LineDelimiter,
    max_line_length: usize,
}

impl Default for TextLineCodecFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TextLineCodecFactory {
    pub fn new() -> Self {
        Self {
            decoder_delimiter: LineDelimiter::Auto,
            encoder_delimiter: LineDelimiter::Unix,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Uses `delimiter` for both directions.
    ///
    /// Fails with [`Error::InvalidConfig`] for an empty custom delimiter, as do the
    /// per-direction setters.
    pub fn with_delimiter(mut self, delimiter: LineDelimiter) -> Result<Self> {
        delimiter.validate()?;
        self.decoder_delimiter = delimiter.clone();
        self.encoder_delimiter = delimiter;
        Ok(self)
    }

    pub fn with_decoder_delimiter(mut self, delimiter: LineDelimiter) -> Result<Self> {
        delimiter.validate()?;
        self.decoder_delimiter = delimiter;
        Ok(self)
    }

    pub fn with_encoder_delimiter(mut self, delimiter: LineDelimiter) -> Result<Self> {
        delimiter.validate()?;
        self.encoder_delimiter = delimiter;
        Ok(self)
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }
}

impl ProtocolCodecFactory for TextLineCodecFactory {
    type Decoder = CumulativeProtocolDecoder<TextLineDecoder>;
    type Encoder = TextLineEncoder;

    fn decoder(&self, _session: &IoSession) -> Self::Decoder {
        CumulativeProtocolDecoder::new(TextLineDecoder {
            delimiter: self.decoder_delimiter.clone(),
            max_line_length: self.max_line_length,
        })
    }

    fn encoder(&self, _session: &IoSession) -> Self::Encoder {
        TextLineEncoder {
            delimiter: self.encoder_delimiter.clone(),
        }
    }
}
