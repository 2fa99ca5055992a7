//! # IoBuffer - Position/Limit Byte Container
//!
//! [`IoBuffer`] is the byte container that travels through the filter chain. It keeps the
//! familiar `0 <= position <= limit <= capacity` cursor model:
//!
//! ```text
//!  0                position               limit               capacity
//!  +--------------------+--------------------+-------------------+
//!  |   already read     |   remaining()      |   free / unused   |
//!  +--------------------+--------------------+-------------------+
//! ```
//!
//! - **Write mode**: `put_*` calls advance `position`; `limit == capacity`.
//! - **Read mode**: after [`IoBuffer::flip`], `get_*` calls advance `position` up to `limit`.
//! - [`IoBuffer::compact`] moves the unread bytes to the front so a partially consumed
//!   frame never forces the buffer to grow without bound.
//! - [`IoBuffer::mark`] / [`IoBuffer::reset`] bookmark a position for speculative parsing.
//!
//! The backing storage is reference counted. [`IoBuffer::duplicate`] and [`IoBuffer::slice`]
//! produce views with their own cursors over the same bytes; the storage lives as long as the
//! longest-lived view. Writing through a view whose storage is shared detaches that view onto
//! its own copy first, so no view ever observes a torn write from another owner.
//!
//! ## Example
//!
//! ```rust
//! use netloom::{IoBuffer, PrefixWidth};
//!
//! let mut buf = IoBuffer::allocate(16);
//! buf.set_auto_expand(true);
//! buf.put_u16(0xCAFE).unwrap();
//! buf.put_prefixed_string("hello", PrefixWidth::Two).unwrap();
//! buf.flip();
//!
//! assert_eq!(buf.get_u16().unwrap(), 0xCAFE);
//! assert_eq!(buf.get_prefixed_string(PrefixWidth::Two, 64).unwrap(), "hello");
//! assert!(!buf.has_remaining());
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::BufferError;

/// Result of a buffer operation.
pub type BufferResult<T> = std::result::Result<T, BufferError>;

const MIN_EXPAND_CAPACITY: usize = 16;

/// Byte order used by the multi-byte integer accessors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Network byte order (the default).
    #[default]
    BigEndian,
    /// Little endian.
    LittleEndian,
}

/// Width of a length prefix. Prefixes are always written in network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefixWidth {
    /// 1 byte, payloads up to 255 bytes.
    One,
    /// 2 bytes, payloads up to 65535 bytes.
    Two,
    /// 4 bytes, payloads up to `u32::MAX` bytes.
    Four,
}

impl PrefixWidth {
    /// Number of bytes the prefix occupies.
    pub fn width(self) -> usize {
        match self {
            PrefixWidth::One => 1,
            PrefixWidth::Two => 2,
            PrefixWidth::Four => 4,
        }
    }

    /// Largest payload length the prefix can express.
    pub fn max_value(self) -> usize {
        match self {
            PrefixWidth::One => u8::MAX as usize,
            PrefixWidth::Two => u16::MAX as usize,
            PrefixWidth::Four => u32::MAX as usize,
        }
    }
}

impl TryFrom<usize> for PrefixWidth {
    type Error = BufferError;

    fn try_from(width: usize) -> Result<Self, Self::Error> {
        match width {
            1 => Ok(PrefixWidth::One),
            2 => Ok(PrefixWidth::Two),
            4 => Ok(PrefixWidth::Four),
            other => Err(BufferError::InvalidPrefixWidth(other)),
        }
    }
}

/// A growable byte container with `position`, `limit`, `capacity` and `mark`.
pub struct IoBuffer {
    storage: Arc<Vec<u8>>,
    offset: usize,
    capacity: usize,
    position: usize,
    limit: usize,
    mark: Option<usize>,
    order: ByteOrder,
    auto_expand: bool,
    derived: bool,
}

macro_rules! numeric_accessors {
    ($($ty:ty => $get:ident, $put:ident, $get_at:ident, $put_at:ident;)*) => {
        $(
            #[doc = concat!("Reads a `", stringify!($ty), "` at `position` and advances past it.")]
            pub fn $get(&mut self) -> BufferResult<$ty> {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                self.get_slice(&mut raw)?;
                Ok(match self.order {
                    ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                    ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                })
            }

            #[doc = concat!("Writes a `", stringify!($ty), "` at `position` and advances past it.")]
            pub fn $put(&mut self, value: $ty) -> BufferResult<&mut Self> {
                let raw = match self.order {
                    ByteOrder::BigEndian => value.to_be_bytes(),
                    ByteOrder::LittleEndian => value.to_le_bytes(),
                };
                self.put_slice(&raw)
            }

            #[doc = concat!("Reads a `", stringify!($ty), "` at `index`, keeping `position`.")]
            pub fn $get_at(&self, index: usize) -> BufferResult<$ty> {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                self.copy_at(index, &mut raw)?;
                Ok(match self.order {
                    ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                    ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                })
            }

            #[doc = concat!("Writes a `", stringify!($ty), "` at `index`, keeping `position`.")]
            pub fn $put_at(&mut self, index: usize, value: $ty) -> BufferResult<&mut Self> {
                let raw = match self.order {
                    ByteOrder::BigEndian => value.to_be_bytes(),
                    ByteOrder::LittleEndian => value.to_le_bytes(),
                };
                self.put_slice_at(index, &raw)
            }
        )*
    };
}

impl IoBuffer {
    /// Allocates a zeroed buffer in write mode.
    pub fn allocate(capacity: usize) -> Self {
        Self::from_storage(vec![0u8; capacity], 0)
    }

    /// Wraps existing bytes in read mode: `position == 0`, `limit == capacity == len`.
    pub fn wrap(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self::from_storage(bytes, len)
    }

    fn from_storage(storage: Vec<u8>, limit: usize) -> Self {
        let capacity = storage.len();
        Self {
            storage: Arc::new(storage),
            offset: 0,
            capacity,
            position: 0,
            limit: if limit == 0 { capacity } else { limit },
            mark: None,
            order: ByteOrder::BigEndian,
            auto_expand: false,
            derived: false,
        }
    }

    /// Total number of bytes this view can address.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index of the next byte to read or write.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Moves `position`. A mark beyond the new position is discarded.
    pub fn set_position(&mut self, position: usize) -> BufferResult<&mut Self> {
        if position > self.limit {
            return Err(BufferError::InvalidPosition {
                position,
                bound: self.limit,
            });
        }
        self.position = position;
        if matches!(self.mark, Some(mark) if mark > position) {
            self.mark = None;
        }
        Ok(self)
    }

    /// First index that must not be read or written.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Moves `limit`, pulling `position` back if necessary.
    pub fn set_limit(&mut self, limit: usize) -> BufferResult<&mut Self> {
        if limit > self.capacity {
            return Err(BufferError::InvalidPosition {
                position: limit,
                bound: self.capacity,
            });
        }
        self.limit = limit;
        if self.position > limit {
            self.position = limit;
        }
        if matches!(self.mark, Some(mark) if mark > limit) {
            self.mark = None;
        }
        Ok(self)
    }

    /// Bytes between `position` and `limit`.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Whether any bytes remain between `position` and `limit`.
    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Byte order of the integer accessors.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Sets the byte order of the integer accessors.
    pub fn set_order(&mut self, order: ByteOrder) -> &mut Self {
        self.order = order;
        self
    }

    /// Whether a put past `limit` reallocates instead of failing.
    pub fn is_auto_expand(&self) -> bool {
        self.auto_expand && !self.derived
    }

    /// Enables or disables auto-expansion. Derived views (duplicates and slices) never expand.
    pub fn set_auto_expand(&mut self, auto_expand: bool) -> &mut Self {
        self.auto_expand = auto_expand;
        self
    }

    /// Whether this view was produced by [`duplicate`](Self::duplicate) or [`slice`](Self::slice).
    pub fn is_derived(&self) -> bool {
        self.derived
    }

    /// Switches from write mode to read mode.
    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.position;
        self.position = 0;
        self.mark = None;
        self
    }

    /// Resets the cursors for writing. The bytes themselves are left untouched.
    pub fn clear(&mut self) -> &mut Self {
        self.position = 0;
        self.limit = self.capacity;
        self.mark = None;
        self
    }

    /// Rewinds `position` to zero, keeping `limit`.
    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self.mark = None;
        self
    }

    /// Moves the unread bytes to the start of the buffer and switches to write mode.
    ///
    /// Afterwards the `n` previously unread bytes occupy `[0, n)`, `position == n` and
    /// `limit == capacity`, so further puts append after them; `flip()` makes them readable
    /// again from index 0.
    pub fn compact(&mut self) -> &mut Self {
        let unread = self.remaining();
        let start = self.position;
        if start > 0 && unread > 0 {
            self.view_mut().copy_within(start..start + unread, 0);
        }
        self.position = unread;
        self.limit = self.capacity;
        self.mark = None;
        self
    }

    /// Remembers the current position.
    pub fn mark(&mut self) -> &mut Self {
        self.mark = Some(self.position);
        self
    }

    /// Returns to the remembered position.
    pub fn reset(&mut self) -> BufferResult<&mut Self> {
        let mark = self.mark.ok_or(BufferError::InvalidMark)?;
        self.position = mark;
        Ok(self)
    }

    /// Advances `position` by `n` bytes.
    pub fn skip(&mut self, n: usize) -> BufferResult<&mut Self> {
        if self.remaining() < n {
            return Err(BufferError::Underflow {
                needed: n,
                remaining: self.remaining(),
            });
        }
        self.position += n;
        Ok(self)
    }

    /// A view with independent cursors sharing this buffer's storage.
    pub fn duplicate(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            offset: self.offset,
            capacity: self.capacity,
            position: self.position,
            limit: self.limit,
            mark: self.mark,
            order: self.order,
            auto_expand: false,
            derived: true,
        }
    }

    /// A view of `[position, limit)` whose index 0 is this buffer's `position`.
    pub fn slice(&self) -> Self {
        let remaining = self.remaining();
        Self {
            storage: Arc::clone(&self.storage),
            offset: self.offset + self.position,
            capacity: remaining,
            position: 0,
            limit: remaining,
            mark: None,
            order: self.order,
            auto_expand: false,
            derived: true,
        }
    }

    /// The readable bytes `[position, limit)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.view()[self.position..self.limit]
    }

    /// Copies the readable bytes into a [`Bytes`].
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_slice())
    }

    /// Absolute index of the first `byte` in `[position, limit)`.
    pub fn index_of(&self, byte: u8) -> Option<usize> {
        self.as_slice()
            .iter()
            .position(|b| *b == byte)
            .map(|idx| self.position + idx)
    }

    /// Reads exactly `dst.len()` bytes.
    pub fn get_slice(&mut self, dst: &mut [u8]) -> BufferResult<()> {
        let n = dst.len();
        if self.remaining() < n {
            return Err(BufferError::Underflow {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let start = self.position;
        dst.copy_from_slice(&self.view()[start..start + n]);
        self.position += n;
        Ok(())
    }

    /// Reads `n` bytes into a new vector.
    pub fn get_bytes(&mut self, n: usize) -> BufferResult<Vec<u8>> {
        if self.remaining() < n {
            return Err(BufferError::Underflow {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let mut out = vec![0u8; n];
        self.get_slice(&mut out)?;
        Ok(out)
    }

    /// Writes all of `src`, expanding if allowed.
    pub fn put_slice(&mut self, src: &[u8]) -> BufferResult<&mut Self> {
        let start = self.position;
        self.ensure_room(start, src.len())?;
        self.view_mut()[start..start + src.len()].copy_from_slice(src);
        self.position += src.len();
        Ok(self)
    }

    /// Copies the readable bytes of `src` into this buffer, consuming them from `src`.
    pub fn put_buffer(&mut self, src: &mut IoBuffer) -> BufferResult<&mut Self> {
        let n = src.remaining();
        let start = self.position;
        self.ensure_room(start, n)?;
        self.view_mut()[start..start + n].copy_from_slice(src.as_slice());
        self.position += n;
        src.position += n;
        Ok(self)
    }

    /// Writes `src` at `index` without moving `position`.
    pub fn put_slice_at(&mut self, index: usize, src: &[u8]) -> BufferResult<&mut Self> {
        self.ensure_room(index, src.len())?;
        self.view_mut()[index..index + src.len()].copy_from_slice(src);
        Ok(self)
    }

    fn copy_at(&self, index: usize, dst: &mut [u8]) -> BufferResult<()> {
        let end = index.saturating_add(dst.len());
        if end > self.limit {
            return Err(BufferError::Underflow {
                needed: dst.len(),
                remaining: self.limit.saturating_sub(index),
            });
        }
        dst.copy_from_slice(&self.view()[index..end]);
        Ok(())
    }

    numeric_accessors! {
        u8 => get_u8, put_u8, get_u8_at, put_u8_at;
        i8 => get_i8, put_i8, get_i8_at, put_i8_at;
        u16 => get_u16, put_u16, get_u16_at, put_u16_at;
        i16 => get_i16, put_i16, get_i16_at, put_i16_at;
        u32 => get_u32, put_u32, get_u32_at, put_u32_at;
        i32 => get_i32, put_i32, get_i32_at, put_i32_at;
        u64 => get_u64, put_u64, get_u64_at, put_u64_at;
        i64 => get_i64, put_i64, get_i64_at, put_i64_at;
    }

    fn prefix_at(&self, index: usize, width: PrefixWidth) -> BufferResult<usize> {
        let mut raw = [0u8; 4];
        let raw = &mut raw[..width.width()];
        self.copy_at(index, raw)?;
        Ok(raw.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize))
    }

    /// Whether a complete length-prefixed payload is readable at `position`.
    ///
    /// Fails with [`BufferError::FrameTooLarge`] as soon as the prefix is readable and declares
    /// more than `max_len` bytes.
    pub fn prefixed_data_available(
        &self,
        width: PrefixWidth,
        max_len: usize,
    ) -> BufferResult<bool> {
        if self.remaining() < width.width() {
            return Ok(false);
        }
        let len = self.prefix_at(self.position, width)?;
        if len > max_len {
            return Err(BufferError::FrameTooLarge { len, max: max_len });
        }
        Ok(self.remaining() - width.width() >= len)
    }

    /// Reads a length prefix and its payload.
    ///
    /// The declared length is checked against `max_len` before any payload allocation. On
    /// `FrameTooLarge` or `Underflow` the position is left where it was.
    pub fn get_prefixed_bytes(
        &mut self,
        width: PrefixWidth,
        max_len: usize,
    ) -> BufferResult<Vec<u8>> {
        let start = self.position;
        let len = self.prefix_at(start, width)?;
        if len > max_len {
            return Err(BufferError::FrameTooLarge { len, max: max_len });
        }
        let available = self.remaining() - width.width();
        if available < len {
            return Err(BufferError::Underflow {
                needed: len,
                remaining: available,
            });
        }
        self.position += width.width();
        self.get_bytes(len)
    }

    /// Writes a length prefix followed by `payload`.
    pub fn put_prefixed_bytes(
        &mut self,
        payload: &[u8],
        width: PrefixWidth,
    ) -> BufferResult<&mut Self> {
        let len = payload.len();
        if len > width.max_value() {
            return Err(BufferError::FrameTooLarge {
                len,
                max: width.max_value(),
            });
        }
        let prefix = (len as u32).to_be_bytes();
        let start = self.position;
        self.ensure_room(start, width.width() + len)?;
        self.put_slice(&prefix[4 - width.width()..])?;
        self.put_slice(payload)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn get_prefixed_string(
        &mut self,
        width: PrefixWidth,
        max_len: usize,
    ) -> BufferResult<String> {
        let raw = self.get_prefixed_bytes(width, max_len)?;
        String::from_utf8(raw).map_err(|_| BufferError::CharacterCoding)
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn put_prefixed_string(
        &mut self,
        value: &str,
        width: PrefixWidth,
    ) -> BufferResult<&mut Self> {
        self.put_prefixed_bytes(value.as_bytes(), width)
    }

    /// An [`io::Read`] adapter consuming the readable bytes.
    pub fn as_reader(&mut self) -> BufferReader<'_> {
        BufferReader { buffer: self }
    }

    /// An [`io::Write`] adapter appending at `position`.
    pub fn as_writer(&mut self) -> BufferWriter<'_> {
        BufferWriter { buffer: self }
    }

    /// Hex rendering of at most `max` readable bytes, for logging.
    pub fn hex_dump(&self, max: usize) -> String {
        let data = self.as_slice();
        let shown = data.len().min(max);
        let mut out = data[..shown]
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        if shown < data.len() {
            out.push_str("...");
        }
        out
    }

    fn view(&self) -> &[u8] {
        &self.storage[self.offset..self.offset + self.capacity]
    }

    fn view_mut(&mut self) -> &mut [u8] {
        let (offset, capacity) = (self.offset, self.capacity);
        &mut Arc::make_mut(&mut self.storage)[offset..offset + capacity]
    }

    fn ensure_room(&mut self, index: usize, len: usize) -> BufferResult<()> {
        let overflow = BufferError::Overflow {
            needed: len,
            remaining: self.limit.saturating_sub(index),
        };
        let end = index.checked_add(len).ok_or_else(|| overflow.clone())?;
        if end <= self.limit {
            return Ok(());
        }
        if !self.is_auto_expand() {
            return Err(overflow);
        }
        if end > self.capacity {
            let new_capacity = end.next_power_of_two().max(MIN_EXPAND_CAPACITY);
            Arc::make_mut(&mut self.storage).resize(new_capacity, 0);
            self.capacity = new_capacity;
        }
        self.limit = end;
        Ok(())
    }
}

impl Clone for IoBuffer {
    /// Deep copy of the readable bytes into a fresh, non-derived buffer.
    fn clone(&self) -> Self {
        let mut copy = IoBuffer::wrap(self.as_slice().to_vec());
        copy.order = self.order;
        copy.auto_expand = self.auto_expand;
        copy
    }
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IoBuffer[pos={} lim={} cap={}: {}]",
            self.position,
            self.limit,
            self.capacity,
            self.hex_dump(16)
        )
    }
}

impl PartialEq for IoBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for IoBuffer {}

impl From<Vec<u8>> for IoBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        IoBuffer::wrap(bytes)
    }
}

impl From<&[u8]> for IoBuffer {
    fn from(bytes: &[u8]) -> Self {
        IoBuffer::wrap(bytes.to_vec())
    }
}

impl From<&str> for IoBuffer {
    fn from(text: &str) -> Self {
        IoBuffer::wrap(text.as_bytes().to_vec())
    }
}

impl From<String> for IoBuffer {
    fn from(text: String) -> Self {
        IoBuffer::wrap(text.into_bytes())
    }
}

impl From<Bytes> for IoBuffer {
    fn from(bytes: Bytes) -> Self {
        IoBuffer::wrap(bytes.to_vec())
    }
}

impl From<BytesMut> for IoBuffer {
    fn from(bytes: BytesMut) -> Self {
        IoBuffer::wrap(bytes.to_vec())
    }
}

impl From<BufferError> for io::Error {
    fn from(err: BufferError) -> Self {
        let kind = match err {
            BufferError::Underflow { .. } => io::ErrorKind::UnexpectedEof,
            BufferError::Overflow { .. } => io::ErrorKind::WriteZero,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}

/// Reads from an [`IoBuffer`] through [`io::Read`].
pub struct BufferReader<'a> {
    buffer: &'a mut IoBuffer,
}

impl io::Read for BufferReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.buffer.remaining());
        self.buffer.get_slice(&mut out[..n])?;
        Ok(n)
    }
}

/// Writes into an [`IoBuffer`] through [`io::Write`].
pub struct BufferWriter<'a> {
    buffer: &'a mut IoBuffer,
}

impl io::Write for BufferWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = if self.buffer.is_auto_expand() {
            data.len()
        } else {
            data.len().min(self.buffer.remaining())
        };
        if n == 0 && !data.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "buffer is full"));
        }
        self.buffer.put_slice(&data[..n])?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_put_then_get_after_flip_returns_same_bytes() {
        let mut buf = IoBuffer::allocate(32);
        buf.put_u8(0x01).unwrap();
        buf.put_u16(0x0203).unwrap();
        buf.put_i32(-5).unwrap();
        buf.put_u64(u64::MAX - 1).unwrap();
        buf.put_slice(b"xyz").unwrap();
        buf.flip();

        assert_eq!(buf.get_u8().unwrap(), 0x01);
        assert_eq!(buf.get_u16().unwrap(), 0x0203);
        assert_eq!(buf.get_i32().unwrap(), -5);
        assert_eq!(buf.get_u64().unwrap(), u64::MAX - 1);
        assert_eq!(buf.get_bytes(3).unwrap(), b"xyz");
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_little_endian_order() {
        let mut buf = IoBuffer::allocate(4);
        buf.set_order(ByteOrder::LittleEndian);
        buf.put_u32(0x0102_0304).unwrap();
        buf.flip();
        assert_eq!(buf.as_slice(), &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(buf.get_u32().unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_absolute_access_does_not_move_position() {
        let mut buf = IoBuffer::allocate(8);
        buf.put_u32_at(4, 7).unwrap();
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.get_u32_at(4).unwrap(), 7);
        assert!(matches!(
            buf.get_u32_at(6),
            Err(BufferError::Underflow { .. })
        ));
    }

    #[test]
    fn test_get_past_limit_underflows() {
        let mut buf = IoBuffer::wrap(vec![1, 2]);
        assert_eq!(
            buf.get_u32(),
            Err(BufferError::Underflow {
                needed: 4,
                remaining: 2
            })
        );
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_put_past_limit_overflows_without_auto_expand() {
        let mut buf = IoBuffer::allocate(2);
        assert!(matches!(
            buf.put_u32(1),
            Err(BufferError::Overflow { needed: 4, .. })
        ));
    }

    #[test]
    fn test_auto_expand_grows_capacity() {
        let mut buf = IoBuffer::allocate(2);
        buf.set_auto_expand(true);
        buf.put_slice(&[9u8; 40]).unwrap();
        assert!(buf.capacity() >= 40);
        buf.flip();
        assert_eq!(buf.remaining(), 40);
    }

    #[test]
    fn test_compact_keeps_unread_bytes_at_front() {
        let mut buf = IoBuffer::allocate(8);
        buf.put_slice(b"abcdef").unwrap();
        buf.flip();
        buf.skip(4).unwrap();
        let unread = buf.as_slice().to_vec();

        buf.compact();
        assert_eq!(buf.position(), unread.len());
        assert_eq!(buf.limit(), buf.capacity());

        buf.put_slice(b"gh").unwrap();
        buf.flip();
        assert_eq!(buf.position(), 0);
        assert_eq!(&buf.as_slice()[..unread.len()], unread.as_slice());
        assert_eq!(buf.as_slice(), b"efgh");
    }

    #[test]
    fn test_mark_and_reset() {
        let mut buf = IoBuffer::wrap(b"hello".to_vec());
        assert_eq!(buf.reset().err(), Some(BufferError::InvalidMark));

        buf.skip(1).unwrap();
        buf.mark();
        buf.skip(3).unwrap();
        buf.reset().unwrap();
        assert_eq!(buf.position(), 1);

        buf.set_position(0).unwrap();
        assert_eq!(buf.reset().err(), Some(BufferError::InvalidMark));
    }

    #[test]
    fn test_prefixed_string_round_trip_for_each_width() {
        for width in [PrefixWidth::One, PrefixWidth::Two, PrefixWidth::Four] {
            let mut buf = IoBuffer::allocate(0);
            buf.set_auto_expand(true);
            buf.put_prefixed_string("netloom", width).unwrap();
            buf.flip();
            assert_eq!(buf.remaining(), width.width() + 7);
            assert!(buf.prefixed_data_available(width, 100).unwrap());
            assert_eq!(buf.get_prefixed_string(width, 100).unwrap(), "netloom");
        }
    }

    #[test]
    fn test_prefixed_read_rejects_oversized_frame_before_allocating() {
        let mut buf = IoBuffer::wrap(vec![0x7F, 0xFF, 0xFF, 0xFF, 1, 2, 3]);
        assert_eq!(
            buf.get_prefixed_bytes(PrefixWidth::Four, 1024),
            Err(BufferError::FrameTooLarge {
                len: 0x7FFF_FFFF,
                max: 1024
            })
        );
        assert_eq!(buf.position(), 0);
        assert!(matches!(
            buf.prefixed_data_available(PrefixWidth::Four, 1024),
            Err(BufferError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_prefixed_read_of_partial_frame_keeps_position() {
        let mut buf = IoBuffer::wrap(vec![0, 0, 0, 10, 1, 2, 3]);
        assert!(!buf.prefixed_data_available(PrefixWidth::Four, 64).unwrap());
        assert!(matches!(
            buf.get_prefixed_bytes(PrefixWidth::Four, 64),
            Err(BufferError::Underflow { needed: 10, .. })
        ));
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_prefix_width_from_usize() {
        assert_eq!(PrefixWidth::try_from(2), Ok(PrefixWidth::Two));
        assert_eq!(
            PrefixWidth::try_from(3),
            Err(BufferError::InvalidPrefixWidth(3))
        );
    }

    #[test]
    fn test_put_prefixed_rejects_payload_wider_than_prefix() {
        let mut buf = IoBuffer::allocate(512);
        let payload = vec![0u8; 300];
        assert!(matches!(
            buf.put_prefixed_bytes(&payload, PrefixWidth::One),
            Err(BufferError::FrameTooLarge { len: 300, max: 255 })
        ));
    }

    #[test]
    fn test_duplicate_has_independent_cursors() {
        let mut buf = IoBuffer::wrap(b"abcd".to_vec());
        let mut dup = buf.duplicate();
        dup.skip(2).unwrap();
        assert_eq!(buf.position(), 0);
        assert_eq!(dup.as_slice(), b"cd");
        buf.skip(1).unwrap();
        assert_eq!(buf.as_slice(), b"bcd");
    }

    #[test]
    fn test_slice_is_rebased_sub_view() {
        let mut buf = IoBuffer::wrap(b"0123456789".to_vec());
        buf.skip(3).unwrap();
        buf.set_limit(6).unwrap();
        let mut slice = buf.slice();
        assert_eq!(slice.capacity(), 3);
        assert_eq!(slice.get_u8().unwrap(), b'3');
        assert!(slice.is_derived());
        assert!(slice.put_slice_at(0, b"xxxx").is_err());
    }

    #[test]
    fn test_write_through_shared_view_detaches() {
        let buf = IoBuffer::wrap(b"abcd".to_vec());
        let mut dup = buf.duplicate();
        dup.put_u8_at(0, b'z').unwrap();
        assert_eq!(dup.as_slice(), b"zbcd");
        assert_eq!(buf.as_slice(), b"abcd");
    }

    #[test]
    fn test_reader_and_writer_adapters() {
        let mut buf = IoBuffer::allocate(4);
        buf.set_auto_expand(true);
        write!(buf.as_writer(), "line {}", 1).unwrap();
        buf.flip();

        let mut text = String::new();
        buf.as_reader().read_to_string(&mut text).unwrap();
        assert_eq!(text, "line 1");
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_index_of_is_absolute() {
        let mut buf = IoBuffer::wrap(b"ab\ncd\n".to_vec());
        buf.skip(3).unwrap();
        assert_eq!(buf.index_of(b'\n'), Some(5));
    }
}
