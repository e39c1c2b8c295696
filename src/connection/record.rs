//! The Connection Record
//!
//! A [`Connection`] is created once when the pool is built and reused for
//! every client that is ever assigned to its slot. Its buffers keep their
//! capacity across tenants; only their logical length is reset.

use crate::reactor::Registration;
use bytes::BytesMut;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Identifies one tenancy of one pool slot.
///
/// The generation changes every time the slot is handed out, so an id held
/// past the slot's release (by a queued task, a late reader, a finished
/// worker) no longer matches and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub index: usize,
    pub generation: u32,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Free in the pool, or attached and waiting for input
    Idle = 0,
    /// Has buffered input queued for, or being processed by, a worker
    Working = 1,
    /// Failed or timed out while a worker owned it; awaiting reclamation
    Closed = 2,
}

impl ConnectionStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionStatus::Working,
            2 => ConnectionStatus::Closed,
            _ => ConnectionStatus::Idle,
        }
    }
}

/// A reusable connection record: socket, buffers and reactor registrations.
pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) stream: Option<Arc<TcpStream>>,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) reader: Option<Registration>,
    pub(crate) writer: Option<Registration>,
    pub(crate) recv: BytesMut,
    pub(crate) send: BytesMut,
    pub(crate) scratch: BytesMut,
    pub(crate) close_after_reply: bool,
}

impl Connection {
    pub(crate) fn new(index: usize, scratch_capacity: usize) -> Self {
        Self {
            id: ConnectionId {
                index,
                generation: 0,
            },
            stream: None,
            peer: None,
            reader: None,
            writer: None,
            recv: BytesMut::new(),
            send: BytesMut::new(),
            scratch: BytesMut::with_capacity(scratch_capacity),
            close_after_reply: false,
        }
    }

    /// Identifier of the current tenancy.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Address of the peer, while a socket is attached.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns true while a socket is attached.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Bytes received and not yet consumed by the protocol layer.
    pub fn recv(&self) -> &BytesMut {
        &self.recv
    }

    /// Pending outbound bytes.
    pub fn send_buf(&mut self) -> &mut BytesMut {
        &mut self.send
    }

    /// Handler workspace; empty at the start of every tenancy.
    pub fn scratch(&mut self) -> &mut BytesMut {
        &mut self.scratch
    }

    /// Closes the connection once the pending reply has been flushed.
    pub fn close_after_reply(&mut self) {
        self.close_after_reply = true;
    }

    /// Attaches an accepted socket to a freshly acquired record.
    pub(crate) fn attach(&mut self, stream: Arc<TcpStream>, peer: SocketAddr) {
        self.stream = Some(stream);
        self.peer = Some(peer);
    }

    /// Clears logical lengths, unregisters from the reactor and closes the
    /// socket. Buffer capacity is kept for the next tenant.
    pub(crate) fn reset(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.cancel();
        }
        if let Some(writer) = self.writer.take() {
            writer.cancel();
        }
        // The reader task holds the other reference; cancelling it drops that
        self.stream = None;
        self.peer = None;
        self.recv.clear();
        self.send.clear();
        self.scratch.clear();
        self.close_after_reply = false;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .field("recv", &self.recv.len())
            .field("send", &self.send.len())
            .finish()
    }
}
