//! What a handler sees while it runs.

use crate::connection::{Connection, ConnectionId};
use crate::protocol::{Frame, FrameCodec, Status};
use crate::server::ServerHandle;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;

/// The request being handled, the connection it arrived on, and the server.
pub struct CommandContext<'a> {
    request: &'a Frame,
    conn: &'a mut Connection,
    codec: &'a FrameCodec,
    server: &'a ServerHandle,
}

impl<'a> CommandContext<'a> {
    pub(crate) fn new(
        request: &'a Frame,
        conn: &'a mut Connection,
        codec: &'a FrameCodec,
        server: &'a ServerHandle,
    ) -> Self {
        Self {
            request,
            conn,
            codec,
            server,
        }
    }

    /// Identifier of the command being run.
    pub fn command(&self) -> u32 {
        self.request.command
    }

    /// Request payload.
    pub fn body(&self) -> &Bytes {
        &self.request.body
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.conn.peer()
    }

    /// The connection's scratch buffer, empty at the start of each tenancy.
    pub fn scratch(&mut self) -> &mut BytesMut {
        self.conn.scratch()
    }

    /// Raw access to the connection, for handlers that frame their own replies.
    pub fn connection(&mut self) -> &mut Connection {
        self.conn
    }

    /// Queues a successful response carrying `body`.
    pub fn reply(&mut self, body: &[u8]) {
        self.codec
            .encode(self.request.command, Status::Ok, body, self.conn.send_buf());
    }

    /// Queues an error response carrying `message`.
    pub fn reply_error(&mut self, message: &str) {
        self.codec.encode(
            self.request.command,
            Status::Error,
            message.as_bytes(),
            self.conn.send_buf(),
        );
    }

    /// Closes the connection once the queued responses have been written.
    pub fn close_after_reply(&mut self) {
        self.conn.close_after_reply();
    }

    /// The server this handler runs in.
    pub fn server(&self) -> &ServerHandle {
        self.server
    }
}
