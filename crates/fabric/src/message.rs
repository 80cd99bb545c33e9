//! Message framing: a writer that accumulates one outgoing frame for a
//! connection, and a reader over a delivered frame.
//!
//! Primitive values are written big-endian; objects are MessagePack-encoded
//! in place, so a frame is a plain concatenation of fields with no envelope.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use raubzug_core::{PeerId, RaubzugError};

use crate::traits::Connection;

/// An outgoing message under construction.
pub struct WriteMessage {
    conn: Arc<dyn Connection>,
    buf: Vec<u8>,
}

impl WriteMessage {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self {
            conn,
            buf: Vec::with_capacity(64),
        }
    }

    /// Destination of this message.
    pub fn remote(&self) -> &PeerId {
        self.conn.remote()
    }

    pub fn write_byte(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_int(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Length-prefixed raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_object<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), RaubzugError> {
        rmp_serde::encode::write(&mut self.buf, value)?;
        Ok(())
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Hand the frame to the connection. Returns the number of bytes sent.
    pub fn finish(self) -> Result<u64, RaubzugError> {
        self.conn.deliver(self.buf)
    }
}

/// A delivered message, read front to back.
#[derive(Debug)]
pub struct ReadMessage {
    origin: PeerId,
    buf: Vec<u8>,
    pos: usize,
}

impl ReadMessage {
    pub fn new(origin: PeerId, buf: Vec<u8>) -> Self {
        Self { origin, buf, pos: 0 }
    }

    /// Sender of this message.
    pub fn origin(&self) -> &PeerId {
        &self.origin
    }

    /// Total size of the frame.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&[u8], RaubzugError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(RaubzugError::Truncated(format!(
                "{what} needs {n} bytes at offset {}, frame has {}",
                self.pos,
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_byte(&mut self) -> Result<u8, RaubzugError> {
        Ok(self.take(1, "byte")?[0])
    }

    pub fn read_int(&mut self) -> Result<i32, RaubzugError> {
        let raw = self.take(4, "int")?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, RaubzugError> {
        let raw = self.take(4, "length prefix")?;
        let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        Ok(self.take(len, "byte string")?.to_vec())
    }

    pub fn read_object<T: DeserializeOwned>(&mut self) -> Result<T, RaubzugError> {
        let mut rest = &self.buf[self.pos..];
        let before = rest.len();
        let value = rmp_serde::from_read(&mut rest)?;
        self.pos += before - rest.len();
        Ok(value)
    }

    /// Done reading. Returns the number of bytes that were never consumed.
    pub fn finish(self) -> usize {
        let unread = self.buf.len() - self.pos;
        if unread > 0 {
            tracing::warn!(origin = %self.origin, unread, "message finished with unread bytes");
        }
        unread
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use raubzug_core::Stamp;

    use super::*;

    struct Capture {
        remote: PeerId,
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl Connection for Capture {
        fn remote(&self) -> &PeerId {
            &self.remote
        }

        fn deliver(&self, frame: Vec<u8>) -> Result<u64, RaubzugError> {
            let len = frame.len() as u64;
            self.frames.lock().unwrap().push(frame);
            Ok(len)
        }
    }

    fn capture() -> Arc<Capture> {
        Arc::new(Capture {
            remote: PeerId::new("b", "d1"),
            frames: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn fields_read_back_in_order() {
        let conn = capture();
        let stamp = Stamp::new(PeerId::new("a", "d1"), 7);

        let mut m = WriteMessage::new(conn.clone());
        m.write_byte(20);
        m.write_int(-3);
        m.write_object(&stamp).unwrap();
        m.write_bytes(&[9, 8, 7]);
        let sent = m.finish().unwrap();

        let frame = conn.frames.lock().unwrap().pop().unwrap();
        assert_eq!(sent, frame.len() as u64);

        let mut r = ReadMessage::new(PeerId::new("a", "d1"), frame);
        assert_eq!(r.read_byte().unwrap(), 20);
        assert_eq!(r.read_int().unwrap(), -3);
        assert_eq!(r.read_object::<Stamp>().unwrap(), stamp);
        assert_eq!(r.read_bytes().unwrap(), vec![9, 8, 7]);
        assert_eq!(r.finish(), 0);
    }

    #[test]
    fn reading_past_the_end_is_truncated() {
        let mut r = ReadMessage::new(PeerId::new("a", "d1"), vec![1, 0]);
        assert_eq!(r.read_byte().unwrap(), 1);
        assert!(matches!(r.read_int(), Err(RaubzugError::Truncated(_))));
    }

    #[test]
    fn finish_reports_unread_bytes() {
        let mut r = ReadMessage::new(PeerId::new("a", "d1"), vec![1, 2, 3]);
        r.read_byte().unwrap();
        assert_eq!(r.finish(), 2);
    }
}
