//! Frame Codec
//!
//! Incremental decoder and encoder for [`Frame`]s, in the same shape as a
//! streaming parser: the caller appends network data to a buffer and calls
//! [`FrameCodec::decode`], which returns
//!
//! - `Ok(Some(frame))` - a complete frame; its bytes were trimmed from the buffer
//! - `Ok(None)` - the frame is incomplete; the buffer is untouched
//! - `Err(ProtocolError)` - the peer is not speaking this protocol
//!
//! Message boundaries are decided here, not in the connection core, which
//! only accumulates bytes.

use crate::protocol::frame::{Frame, Status, FIXED_HEADER_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors that can occur while decoding frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame does not start with the configured tag
    #[error("bad protocol tag")]
    BadTag,

    /// The declared body exceeds the request limit
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Encoder/decoder for tagged, length-prefixed frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    tag: Bytes,
    max_body: usize,
}

impl FrameCodec {
    /// Creates a codec for frames starting with `tag` whose bodies may be at
    /// most `max_body` bytes.
    pub fn new(tag: impl AsRef<[u8]>, max_body: usize) -> Self {
        Self {
            tag: Bytes::copy_from_slice(tag.as_ref()),
            max_body,
        }
    }

    /// Length of a frame header (tag plus fixed fields).
    pub fn header_len(&self) -> usize {
        self.tag.len() + FIXED_HEADER_LEN
    }

    /// Attempts to decode one frame from the front of `buf`.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let tag_len = self.tag.len();

        // A partial tag can already be rejected
        let seen = buf.len().min(tag_len);
        if buf[..seen] != self.tag[..seen] {
            return Err(ProtocolError::BadTag);
        }

        let header_len = self.header_len();
        if buf.len() < header_len {
            return Ok(None);
        }

        let mut header = &buf[tag_len..header_len];
        let command = header.get_u32();
        let status = Status::from_u8(header.get_u8());
        let length = header.get_u32() as usize;

        if length > self.max_body {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_body,
            });
        }

        if buf.len() < header_len + length {
            return Ok(None);
        }

        buf.advance(header_len);
        let body = buf.split_to(length).freeze();

        Ok(Some(Frame {
            command,
            status,
            body,
        }))
    }

    /// Appends an encoded frame to `out`.
    pub fn encode(&self, command: u32, status: Status, body: &[u8], out: &mut BytesMut) {
        out.reserve(self.header_len() + body.len());
        out.put_slice(&self.tag);
        out.put_u32(command);
        out.put_u8(status.as_u8());
        out.put_u32(body.len() as u32);
        out.put_slice(body);
    }

    /// Appends an encoded `frame` to `out`.
    pub fn encode_frame(&self, frame: &Frame, out: &mut BytesMut) {
        self.encode(frame.command, frame.status, &frame.body, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec::new("MERGE3.0", 1024)
    }

    fn encoded(command: u32, body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        codec().encode(command, Status::Ok, body, &mut buf);
        buf
    }

    #[test]
    fn test_decode_complete_frame() {
        let mut buf = encoded(7, b"hello");
        assert_eq!(buf.len(), 8 + 9 + 5);

        let frame = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.command, 7);
        assert_eq!(frame.status, Status::Ok);
        assert_eq!(&frame.body[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_leaves_buffer() {
        let full = encoded(1, b"payload");

        for cut in 0..full.len() {
            let mut buf = BytesMut::from(&full[..cut]);
            assert_eq!(codec().decode(&mut buf).unwrap(), None, "cut at {}", cut);
            assert_eq!(buf.len(), cut);
        }
    }

    #[test]
    fn test_decode_pipelined_frames() {
        let mut buf = encoded(1, b"first");
        buf.extend_from_slice(&encoded(2, b"second"));
        buf.extend_from_slice(&encoded(3, b"thi")[..10]);

        let first = codec().decode(&mut buf).unwrap().unwrap();
        let second = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!((first.command, &first.body[..]), (1, &b"first"[..]));
        assert_eq!((second.command, &second.body[..]), (2, &b"second"[..]));

        // The trailing partial frame stays buffered
        assert_eq!(codec().decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_bad_tag() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
        assert_eq!(codec().decode(&mut buf), Err(ProtocolError::BadTag));

        // Detected before the full tag arrives
        let mut buf = BytesMut::from(&b"MERX"[..]);
        assert_eq!(codec().decode(&mut buf), Err(ProtocolError::BadTag));
    }

    #[test]
    fn test_frame_too_large() {
        let small = FrameCodec::new("MERGE3.0", 4);
        let mut buf = encoded(1, b"too long");
        assert_eq!(
            small.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { size: 8, max: 4 })
        );
    }

    #[test]
    fn test_error_status_survives() {
        let mut buf = BytesMut::new();
        codec().encode(9, Status::UnknownCommand, b"unknown command", &mut buf);

        let frame = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.status, Status::UnknownCommand);
        assert!(frame.is_error());
    }
}
