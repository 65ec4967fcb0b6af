//! Byte collections passed between layers.

use std::fmt::{self, Display};

/// A byte collection passed up and down the stack.
///
/// When writing a networking layer, it is standard to append headers, remove
/// headers, and concatenate pieces of a message. A message provides these
/// capabilities and serves as the container for composing, sending, and
/// splitting byte sequences. Every layer in this simulation reframes its
/// payload into a fresh header record, so the storage is a single contiguous
/// buffer.
///
/// # Examples
///
/// ```
/// # use osi_core::message::Message;
/// let mut message = Message::new(b"Body");
/// message.header(b"Header");
/// assert_eq!(message.to_vec(), b"HeaderBody");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Message {
    bytes: Vec<u8>,
}

impl Message {
    /// Creates a new message with the given body content.
    pub fn new(body: impl AsRef<[u8]>) -> Self {
        Self {
            bytes: body.as_ref().to_vec(),
        }
    }

    /// Prepends the given header to the message.
    pub fn header(&mut self, header: impl AsRef<[u8]>) {
        let header = header.as_ref();
        self.bytes.splice(0..0, header.iter().copied());
    }

    /// Adds the given message to the end of this one.
    pub fn concatenate(&mut self, other: Message) {
        self.bytes.extend(other.bytes);
    }

    /// Removes the first `len` bytes from the message.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the message length.
    pub fn remove_front(&mut self, len: usize) {
        assert!(len <= self.bytes.len());
        self.bytes.drain(..len);
    }

    /// The length of the message.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the message contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns an iterator over the bytes of the entire message.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.bytes.iter().copied()
    }

    /// The message content as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// The message content as an owned byte vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.iter() {
            write!(f, "{byte:x} ")?;
        }
        Ok(())
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Message {}

impl From<Vec<u8>> for Message {
    fn from(val: Vec<u8>) -> Self {
        Self { bytes: val }
    }
}

impl From<&[u8]> for Message {
    fn from(val: &[u8]) -> Self {
        Message::new(val)
    }
}

impl<const L: usize> From<[u8; L]> for Message {
    fn from(val: [u8; L]) -> Self {
        Message::new(val)
    }
}

impl From<&str> for Message {
    fn from(val: &str) -> Self {
        Message::new(val.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_message() {
        let body = b"body";
        let message = Message::new(body);
        assert_eq!(message.len(), body.len());
        assert_eq!(&message.to_vec(), body);
    }

    #[test]
    fn header() {
        let mut message = Message::new(b"body");
        message.header("header");
        let expected = b"headerbody";
        assert_eq!(message.len(), expected.len());
        assert_eq!(&message.to_vec(), expected);
    }

    #[test]
    fn remove_headers() {
        let expected = b"body";
        let mut message = Message::new(expected);
        message.header(b"ipv4");
        message.header(b"tcp");
        message.remove_front(3);
        message.remove_front(4);
        assert_eq!(&message.to_vec(), expected);
    }

    #[test]
    fn concatenate() {
        let mut message = Message::new(b"Hello, ");
        message.concatenate(Message::new(b"world"));
        assert_eq!(&message.to_vec(), b"Hello, world");
    }

    #[test]
    fn empty_message() {
        let message = Message::default();
        assert!(message.is_empty());
        assert_eq!(message.len(), 0);
    }
}
