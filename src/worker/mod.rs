//! Worker Pool
//!
//! A fixed set of OS threads that run command handlers. Handlers may block,
//! so they never run on the reactor thread.
//!
//! ## Worker loop
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ loop:                                                    │
//! │   push self onto the ready-queue   (refused => exit)     │
//! │   wake the reactor                 (dispatcher runs)     │
//! │   block on the wake channel        (closed  => exit)     │
//! │   lock the connection, check the generation              │
//! │   decode + execute every complete frame                  │
//! │   flush the reply                                        │
//! │   keep-alive: Idle + resume reading                      │
//! │   or reclaim: close_after_reply / Closed / I/O error     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A worker only ever touches the one connection it was handed, and only
//! while holding that connection's lock.

use crate::commands::CommandContext;
use crate::connection::{Connection, ConnectionId, ConnectionStatus, ServerStats};
use crate::dispatch::ReadyWorker;
use crate::error::ServerError;
use crate::protocol::Status;
use crate::reactor::WriteFlow;
use crate::server::ServerHandle;
use bytes::Buf;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::MutexGuard;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

/// Body of the response sent for an unregistered command id.
const UNKNOWN_COMMAND: &[u8] = b"unknown command";

/// The worker threads.
#[derive(Debug)]
pub struct WorkerPool {
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `count` workers serving `server`.
    ///
    /// If a thread cannot be spawned, the workers already started are told
    /// to exit and joined before the error is returned.
    pub fn spawn(count: usize, server: &ServerHandle) -> Result<Self, ServerError> {
        let mut threads = Vec::with_capacity(count);

        for index in 0..count {
            let worker_server = server.clone();
            let spawned = thread::Builder::new()
                .name(format!("cmdbus-worker-{index}"))
                .spawn(move || run_worker(index, worker_server));

            match spawned {
                Ok(thread) => threads.push(thread),
                Err(err) => {
                    error!(worker = index, error = %err, "failed to spawn worker");
                    server.pool().coordinator().close_ready();
                    WorkerPool { threads }.join();
                    return Err(ServerError::WorkerSpawn(err));
                }
            }
        }

        debug!(workers = count, "worker pool started");
        Ok(Self { threads })
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Waits for every worker to exit. Workers exit once the ready-queue is
    /// closed and their current handler, if any, has returned.
    pub fn join(self) {
        for thread in self.threads {
            let name = thread.thread().name().unwrap_or("worker").to_string();
            if thread.join().is_err() {
                error!(worker = %name, "worker thread panicked");
            }
        }
    }
}

fn run_worker(index: usize, server: ServerHandle) {
    trace!(worker = index, "worker started");

    loop {
        let (ready, wake) = ReadyWorker::new(index);
        if server.pool().coordinator().push_ready(ready).is_err() {
            break;
        }
        server.reactor().wake();

        let Ok(conn) = wake.blocking_recv() else {
            break;
        };
        process(&server, conn);
    }

    trace!(worker = index, "worker exiting");
}

/// Serves one assignment.
fn process(server: &ServerHandle, id: ConnectionId) {
    let pool = server.pool();

    // Reclaimed and handed to a new tenant after dispatch
    let Some(mut conn) = pool.lock(id) else {
        trace!(conn = %id, "assignment is stale");
        return;
    };

    match pool.status(id.index) {
        ConnectionStatus::Idle => return,
        ConnectionStatus::Closed => {
            pool.reclaim(conn);
            return;
        }
        ConnectionStatus::Working => {}
    }

    serve_requests(server, &mut conn);

    if pool.status(id.index) == ConnectionStatus::Closed || !conn.is_open() {
        pool.reclaim(conn);
        return;
    }

    flush(server, conn);
}

/// Decodes every complete frame in the receive buffer and runs its handler,
/// appending the responses to the send buffer.
///
/// Stops early once a handler or a protocol error asks for the connection to
/// close, or once the reaper has marked it closed.
pub(crate) fn serve_requests(server: &ServerHandle, conn: &mut Connection) {
    let codec = server.codec();
    let stats = server.stats();
    let pool = server.pool();
    let index = conn.id.index;

    loop {
        let frame = match codec.decode(&mut conn.recv) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                warn!(conn = %conn.id, error = %err, "protocol error, closing after reply");
                let message = err.to_string();
                codec.encode(0, Status::Error, message.as_bytes(), &mut conn.send);
                conn.recv.clear();
                conn.close_after_reply = true;
                break;
            }
        };

        let Some(entry) = server.commands().get(frame.command) else {
            debug!(conn = %conn.id, command = frame.command, "unknown command");
            stats.unknown_command();
            codec.encode(
                frame.command,
                Status::UnknownCommand,
                UNKNOWN_COMMAND,
                &mut conn.send,
            );
            continue;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = CommandContext::new(&frame, conn, codec, server);
            entry.invoke(&mut ctx)
        }));
        stats.command_processed();

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(conn = %conn.id, command = entry.name(), error = %err, "command failed");
                let message = err.to_string();
                codec.encode(frame.command, Status::Error, message.as_bytes(), &mut conn.send);
            }
            Err(_) => {
                error!(conn = %conn.id, command = entry.name(), "command handler panicked");
                codec.encode(frame.command, Status::Error, b"internal error", &mut conn.send);
                conn.close_after_reply = true;
            }
        }

        if conn.close_after_reply || pool.status(index) == ConnectionStatus::Closed {
            break;
        }
    }
}

/// Writes as much of the send buffer as the socket takes without blocking.
///
/// Returns `Ok(true)` once the buffer is empty and `Ok(false)` if the socket
/// would block.
fn write_pending(conn: &mut Connection, stats: &ServerStats) -> io::Result<bool> {
    let Some(stream) = conn.stream.clone() else {
        return Err(io::ErrorKind::NotConnected.into());
    };

    while !conn.send.is_empty() {
        match stream.try_write(&conn.send) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                conn.send.advance(n);
                stats.bytes_written(n);
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(err) => return Err(err),
        }
    }

    Ok(true)
}

/// Flushes the reply; if the socket is full, hands the rest to the reactor.
fn flush(server: &ServerHandle, mut conn: MutexGuard<'_, Connection>) {
    let pool = server.pool();

    match write_pending(&mut conn, server.stats()) {
        Ok(true) => finish(server, conn),
        Ok(false) => {
            let Some(stream) = conn.stream.clone() else {
                pool.reclaim(conn);
                return;
            };
            trace!(conn = %conn.id, pending = conn.send.len(), "socket full, waiting to write");
            let id = conn.id;
            let writer_server = server.clone();
            conn.writer = Some(
                server
                    .reactor()
                    .register_writable(stream, move |_| on_writable(&writer_server, id)),
            );
        }
        Err(err) => {
            debug!(conn = %conn.id, error = %err, "write failed");
            pool.reclaim(conn);
        }
    }
}

/// Reactor-side continuation of a flush that would have blocked.
fn on_writable(server: &ServerHandle, id: ConnectionId) -> WriteFlow {
    let pool = server.pool();
    let Some(mut conn) = pool.lock(id) else {
        return WriteFlow::Done;
    };

    match write_pending(&mut conn, server.stats()) {
        Ok(true) => {
            // Finishing may reclaim, and reclaiming cancels the writer;
            // this task is exiting anyway.
            drop(conn.writer.take());
            finish(server, conn);
            WriteFlow::Done
        }
        Ok(false) => WriteFlow::Continue,
        Err(err) => {
            debug!(conn = %id, error = %err, "write failed");
            drop(conn.writer.take());
            pool.reclaim(conn);
            WriteFlow::Done
        }
    }
}

/// Ends a request cycle once the reply is fully written.
fn finish(server: &ServerHandle, conn: MutexGuard<'_, Connection>) {
    let pool = server.pool();
    let index = conn.id.index;

    pool.touch(index);

    // Losing the transition means the reaper marked it Closed meanwhile
    if conn.close_after_reply
        || !pool.transition(index, ConnectionStatus::Working, ConnectionStatus::Idle)
    {
        pool.reclaim(conn);
        return;
    }

    if let Some(reader) = &conn.reader {
        reader.resume();
    }
}
