//! Outbound write requests.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::buffer::IoBuffer;
use crate::error::{Error, Result};
use crate::future::WriteFuture;

/// A message travelling through the filter chain.
///
/// Inbound, the reactor injects [`IoBuffer`]s and decoders replace them with protocol
/// objects. Outbound, the application writes protocol objects and encoders turn them back
/// into [`IoBuffer`]s before they reach the head of the chain.
pub type Message = Box<dyn Any + Send>;

/// One queued outbound message paired with its completion future.
pub struct WriteRequest {
    message: Message,
    future: WriteFuture,
    destination: Option<SocketAddr>,
    originals: Vec<(String, Message)>,
    created: Instant,
}

impl WriteRequest {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            future: WriteFuture::new(),
            destination: None,
            originals: Vec::new(),
            created: Instant::now(),
        }
    }

    /// Addresses a datagram to a specific peer.
    pub fn with_destination(mut self, destination: SocketAddr) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    /// Consumes the request, returning the current message.
    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn future(&self) -> &WriteFuture {
        &self.future
    }

    pub fn destination(&self) -> Option<SocketAddr> {
        self.destination
    }

    /// When the request was created.
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Swaps in `message`, remembering the previous one under `tag`.
    ///
    /// Encoders call this with their chain entry name so that
    /// [`restore_message`](Self::restore_message) on the `message_sent` path hands the
    /// application back the object it wrote.
    pub fn replace_message(&mut self, tag: &str, message: Message) {
        let previous = std::mem::replace(&mut self.message, message);
        self.originals.push((tag.to_owned(), previous));
    }

    /// Restores the message saved under `tag` if it is the most recent one.
    pub fn restore_message(&mut self, tag: &str) -> bool {
        match self.originals.last() {
            Some((top, _)) if top == tag => {
                if let Some((_, previous)) = self.originals.pop() {
                    self.message = previous;
                }
                true
            }
            _ => false,
        }
    }

    /// The outbound buffer, once every encoder has run.
    pub fn buffer(&self) -> Option<&IoBuffer> {
        self.message.downcast_ref::<IoBuffer>()
    }

    pub fn buffer_mut(&mut self) -> Option<&mut IoBuffer> {
        self.message.downcast_mut::<IoBuffer>()
    }

    /// Replaces a raw byte message with an equivalent [`IoBuffer`] under `tag`.
    ///
    /// Fails with `ProtocolEncode` if the message is neither an `IoBuffer` nor raw bytes,
    /// which means no encoder in the chain understood it.
    pub(crate) fn normalize_to_buffer(&mut self, tag: &str) -> Result<()> {
        if self.message.is::<IoBuffer>() {
            return Ok(());
        }
        let buffer = if let Some(bytes) = self.message.downcast_ref::<Vec<u8>>() {
            IoBuffer::from(bytes.as_slice())
        } else if let Some(bytes) = self.message.downcast_ref::<Bytes>() {
            IoBuffer::from(bytes.as_ref())
        } else if let Some(bytes) = self.message.downcast_ref::<BytesMut>() {
            IoBuffer::from(bytes.as_ref())
        } else if let Some(text) = self.message.downcast_ref::<&'static str>() {
            IoBuffer::from(*text)
        } else {
            return Err(Error::ProtocolEncode(
                "no encoder produced bytes for the written message".into(),
            ));
        };
        self.replace_message(tag, Box::new(buffer));
        Ok(())
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("buffer", &self.buffer())
            .field("destination", &self.destination)
            .field("stacked", &self.originals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_and_restore() {
        let mut request = WriteRequest::new(Box::new(String::from("hi")));
        request.replace_message("codec", Box::new(IoBuffer::from("hi\n")));
        assert!(request.buffer().is_some());

        assert!(!request.restore_message("other"));
        assert!(request.restore_message("codec"));
        assert_eq!(
            request.message().downcast_ref::<String>().map(String::as_str),
            Some("hi")
        );
    }

    #[test]
    fn test_normalize_raw_bytes() {
        let mut request = WriteRequest::new(Box::new(vec![1u8, 2, 3]));
        request.normalize_to_buffer("head").unwrap();
        assert_eq!(request.buffer().map(|b| b.as_slice().to_vec()), Some(vec![1, 2, 3]));
        assert!(request.restore_message("head"));
        assert!(request.message().is::<Vec<u8>>());
    }

    #[test]
    fn test_normalize_rejects_unencoded_objects() {
        let mut request = WriteRequest::new(Box::new(42u32));
        assert!(matches!(
            request.normalize_to_buffer("head"),
            Err(Error::ProtocolEncode(_))
        ));
    }
}
