//! Reactor-side socket glue: accepting clients and reading their input.
//!
//! Everything here runs on the reactor thread and never blocks. A reader
//! appends to the receive buffer, and as soon as it has something it marks
//! the connection `Working`, queues it and pauses; the worker resumes it
//! after the reply is flushed.

use crate::connection::{ConnectionId, ConnectionStatus};
use crate::reactor::ReadFlow;
use crate::server::ServerHandle;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, trace, warn};

/// Pause after a failed accept, so a persistent error (e.g. out of file
/// descriptors) does not spin the reactor.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts clients until the task is aborted.
pub(crate) async fn accept_loop(server: ServerHandle, listener: std::net::TcpListener) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to register listener: {}", e);
            server.shutdown();
            return;
        }
    };

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => accept(&server, stream, peer),
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Admits `stream` into the pool, or refuses it if the pool is exhausted.
fn accept(server: &ServerHandle, stream: TcpStream, peer: SocketAddr) {
    let pool = server.pool();

    let Some(id) = pool.acquire() else {
        warn!(%peer, "connection pool exhausted, refusing client");
        server.stats().connection_rejected();
        drop(stream);
        return;
    };

    if server.config().tcp_nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }
    }

    let stream = Arc::new(stream);
    if !pool.attach(id, Arc::clone(&stream), peer) {
        return;
    }

    let reader_server = server.clone();
    let reader = server
        .reactor()
        .register_readable(Arc::clone(&stream), move |stream| {
            on_readable(&reader_server, id, stream)
        });

    // The slot cannot have moved on: only this thread releases idle readers
    match pool.lock(id) {
        Some(mut conn) => conn.reader = Some(reader),
        None => reader.cancel(),
    }

    debug!(conn = %id, %peer, "client connected");
}

/// Drains the socket into the receive buffer.
fn on_readable(server: &ServerHandle, id: ConnectionId, stream: &TcpStream) -> ReadFlow {
    let pool = server.pool();
    let config = server.config();

    let Some(mut conn) = pool.lock(id) else {
        return ReadFlow::Stop;
    };
    if pool.status(id.index) != ConnectionStatus::Idle {
        // A worker owns the buffers until it resumes us
        return ReadFlow::Pause;
    }

    let mut received = 0;
    loop {
        conn.recv.reserve(config.read_chunk);
        match stream.try_read_buf(&mut conn.recv) {
            Ok(0) => {
                debug!(conn = %id, "client disconnected");
                pool.reclaim(conn);
                return ReadFlow::Stop;
            }
            Ok(n) => {
                received += n;
                server.stats().bytes_read(n);
                if conn.recv.len() > config.max_request_len {
                    warn!(
                        conn = %id,
                        buffered = conn.recv.len(),
                        max = config.max_request_len,
                        "request too large, closing connection"
                    );
                    pool.reclaim(conn);
                    return ReadFlow::Stop;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(conn = %id, error = %e, "read failed");
                pool.reclaim(conn);
                return ReadFlow::Stop;
            }
        }
    }

    if received == 0 {
        return ReadFlow::Continue;
    }

    trace!(conn = %id, bytes = received, buffered = conn.recv.len(), "input queued");
    pool.touch(id.index);
    pool.set_status(id.index, ConnectionStatus::Working);
    drop(conn);

    if pool.coordinator().push_task(id) {
        server.reactor().wake();
    }
    ReadFlow::Pause
}
