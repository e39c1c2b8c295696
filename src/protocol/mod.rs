//! Wire Protocol
//!
//! The connection core only accumulates bytes into a per-connection buffer.
//! This module decides where one request ends and the next begins, and how a
//! request names the command it wants to run.
//!
//! ## Modules
//!
//! - `frame`: The `Frame` type and its `Status` byte
//! - `codec`: Incremental decoder and encoder for frames
//!
//! ## Example
//!
//! ```
//! use cmdbus::protocol::{FrameCodec, Status};
//! use bytes::BytesMut;
//!
//! let codec = FrameCodec::new("MERGE3.0", 1024);
//! let mut buf = BytesMut::new();
//! codec.encode(1, Status::Ok, b"hello", &mut buf);
//!
//! let frame = codec.decode(&mut buf).unwrap().unwrap();
//! assert_eq!(frame.command, 1);
//! assert_eq!(&frame.body[..], b"hello");
//! ```

pub mod codec;
pub mod frame;

pub use codec::{FrameCodec, ProtocolError};
pub use frame::{Frame, Status};
