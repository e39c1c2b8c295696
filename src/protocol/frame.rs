//! Frame Types
//!
//! Every request and response on the wire is one frame:
//!
//! ```text
//! ┌──────────────┬──────────────┬────────┬──────────────┬──────────────┐
//! │ tag (N bytes)│ command (u32)│ status │ length (u32) │ body         │
//! │ "MERGE3.0"   │ big-endian   │ (u8)   │ big-endian   │ length bytes │
//! └──────────────┴──────────────┴────────┴──────────────┴──────────────┘
//! ```
//!
//! Requests carry `Status::Ok`. Responses echo the request's command id.

use bytes::Bytes;
use std::fmt;

/// Width of the fixed header fields that follow the tag: command, status, length.
pub const FIXED_HEADER_LEN: usize = 4 + 1 + 4;

/// Status byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Request, or successful response
    Ok = 0,
    /// The handler failed, or the request was malformed
    Error = 1,
    /// No handler is registered for the command id
    UnknownCommand = 2,
}

impl Status {
    /// Decodes a status byte. Unknown values are treated as errors.
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0 => Status::Ok,
            2 => Status::UnknownCommand,
            _ => Status::Error,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command identifier
    pub command: u32,
    /// Status byte
    pub status: Status,
    /// Payload
    pub body: Bytes,
}

impl Frame {
    /// Creates a request frame.
    pub fn request(command: u32, body: impl Into<Bytes>) -> Self {
        Self {
            command,
            status: Status::Ok,
            body: body.into(),
        }
    }

    /// Returns true if this frame reports a failure.
    pub fn is_error(&self) -> bool {
        self.status != Status::Ok
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame(cmd={}, status={:?}, {} bytes)",
            self.command,
            self.status,
            self.body.len()
        )
    }
}
