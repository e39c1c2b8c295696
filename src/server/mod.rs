//! Server Module
//!
//! Ties the pieces together: one listener, one [`Reactor`], one
//! [`ConnectionPool`], one [`CommandTable`] and a [`WorkerPool`].
//!
//! ## Threads
//!
//! ```text
//!  reactor thread (the caller of Server::run)     worker threads x N
//!  ───────────────────────────────────────────     ─────────────────────
//!  accept   -> acquire / refuse                    wait on wake channel
//!  readable -> append, mark Working, push task     run handler (may block)
//!  before-sleep hook -> dispatch  ──assign────────> flush reply
//!  timer    -> reaper sweep                        keep-alive or reclaim
//! ```
//!
//! All state lives in one context object shared through [`ServerHandle`];
//! nothing is process-global.

mod io;

use crate::commands::CommandTable;
use crate::config::ServerConfig;
use crate::connection::{ConnectionPool, PoolStats, ServerStats};
use crate::dispatch::{dispatch, sweep, QueueLens};
use crate::error::ServerError;
use crate::protocol::FrameCodec;
use crate::reactor::{Reactor, ReactorHandle};
use crate::worker::WorkerPool;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

struct Shared {
    config: ServerConfig,
    pool: ConnectionPool,
    commands: CommandTable,
    codec: FrameCodec,
    stats: Arc<ServerStats>,
    reactor: ReactorHandle,
    running: AtomicBool,
}

/// Cloneable handle to a server's shared state, usable from any thread.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Stops the server: clears the running flag, closes the ready-queue so
    /// idle workers exit, and stops the reactor. Idempotent.
    ///
    /// Handlers already running are not interrupted; [`Server::run`] waits
    /// for them before returning.
    pub fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            info!("shutdown requested");
        }
        let woken = self.shared.pool.coordinator().close_ready();
        debug!(idle_workers = woken, "ready-queue closed");
        self.shared.reactor.stop();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    pub fn queue_lens(&self) -> QueueLens {
        self.shared.pool.coordinator().lens()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.shared.stats
    }

    pub fn commands(&self) -> &CommandTable {
        &self.shared.commands
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn reactor(&self) -> &ReactorHandle {
        &self.shared.reactor
    }

    pub(crate) fn pool(&self) -> &ConnectionPool {
        &self.shared.pool
    }

    pub(crate) fn codec(&self) -> &FrameCodec {
        &self.shared.codec
    }
}

/// A bound, not yet running server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    reactor: Reactor,
    handle: ServerHandle,
}

impl Server {
    /// Validates `config`, binds the listener and allocates the connection
    /// pool. Nothing is served until [`run`](Self::run).
    pub fn bind(config: ServerConfig, commands: CommandTable) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_address())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let reactor = Reactor::new()?;
        let stats = Arc::new(ServerStats::new());
        let pool = ConnectionPool::new(
            config.max_connections,
            config.scratch_capacity,
            Arc::clone(&stats),
        );
        let codec = FrameCodec::new(&config.protocol_tag, config.max_body_len());

        let handle = ServerHandle {
            shared: Arc::new(Shared {
                pool,
                commands,
                codec,
                stats,
                reactor: reactor.handle(),
                running: AtomicBool::new(true),
                config,
            }),
        };

        Ok(Self {
            listener,
            local_addr,
            reactor,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn reactor(&self) -> &ReactorHandle {
        self.handle.reactor()
    }

    /// Serves on the calling thread until [`ServerHandle::shutdown`].
    ///
    /// Returns after the reactor has stopped and every worker has joined;
    /// any sockets still attached are then closed.
    pub fn run(self) -> Result<(), ServerError> {
        let Server {
            listener,
            local_addr,
            reactor,
            handle,
        } = self;
        let config = handle.config().clone();
        let events = reactor.handle();

        let workers = WorkerPool::spawn(config.workers, &handle)?;

        let dispatcher = {
            let server = handle.clone();
            events.set_before_sleep(move || {
                let outcome = dispatch(server.pool(), server.config().response_timeout);
                if outcome.dispatched > 0 || outcome.reclaimed > 0 {
                    trace!(?outcome, "dispatch pass");
                }
            })
        };

        let reaper = {
            let server = handle.clone();
            let interval = config.response_timeout;
            events.register_timer(interval, move || {
                if !server.is_running() {
                    return None;
                }
                sweep(server.pool(), server.config().idle_threshold());
                Some(interval)
            })
        };

        let acceptor = events.spawn(io::accept_loop(handle.clone(), listener));

        info!(
            addr = %local_addr,
            workers = workers.len(),
            connections = config.max_connections,
            "server listening"
        );

        reactor.run();

        handle.shutdown();
        acceptor.abort();
        dispatcher.cancel();
        reaper.cancel();

        debug!("waiting for workers");
        workers.join();
        handle.pool().close_all();

        info!("server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::builtin::{ECHO, INFO, QUIT};
    use crate::commands::{CommandContext, CommandError};
    use crate::protocol::{Frame, Status};
    use bytes::{BufMut, BytesMut};
    use std::sync::atomic::AtomicUsize;
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    const SLOW: u32 = 100;
    const FAIL: u32 = 101;

    struct Running {
        addr: SocketAddr,
        handle: ServerHandle,
        thread: JoinHandle<Result<(), ServerError>>,
    }

    impl Running {
        fn stop(self) {
            self.handle.shutdown();
            tokio_test::assert_ok!(self.thread.join().unwrap());
        }
    }

    fn start(config: ServerConfig, commands: CommandTable) -> Running {
        let server = Server::bind(config.with_port(0), commands).unwrap();
        let addr = server.local_addr();
        let handle = server.handle();
        let thread = std::thread::spawn(move || server.run());
        Running {
            addr,
            handle,
            thread,
        }
    }

    fn start_default() -> Running {
        start(
            ServerConfig::new().with_workers(2),
            CommandTable::with_builtins().build(),
        )
    }

    struct Client {
        stream: TcpStream,
        codec: FrameCodec,
        buf: BytesMut,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(addr).await.unwrap(),
                codec: FrameCodec::new(crate::config::DEFAULT_PROTOCOL_TAG, 1 << 20),
                buf: BytesMut::new(),
            }
        }

        async fn send(&mut self, frame: Frame) {
            let mut out = BytesMut::new();
            self.codec.encode_frame(&frame, &mut out);
            self.stream.write_all(&out).await.unwrap();
        }

        /// Next response, or `None` once the server has closed the socket.
        async fn recv(&mut self) -> Option<Frame> {
            let deadline = Duration::from_secs(5);
            loop {
                if let Some(frame) = self.codec.decode(&mut self.buf).unwrap() {
                    return Some(frame);
                }
                let mut chunk = [0u8; 4096];
                match tokio::time::timeout(deadline, self.stream.read(&mut chunk)).await {
                    Ok(Ok(0)) | Ok(Err(_)) => return None,
                    Ok(Ok(n)) => self.buf.extend_from_slice(&chunk[..n]),
                    Err(_) => panic!("timed out waiting for a response"),
                }
            }
        }

        async fn call(&mut self, frame: Frame) -> Frame {
            self.send(frame).await;
            self.recv().await.expect("connection closed")
        }
    }

    #[tokio::test]
    async fn test_echo() {
        let server = start_default();
        let mut client = Client::connect(server.addr).await;

        let response = client.call(Frame::request(ECHO, "hello")).await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(&response.body[..], b"hello");

        // Keep-alive: the same connection serves a second request
        let response = client.call(Frame::request(ECHO, "again")).await;
        assert_eq!(&response.body[..], b"again");

        server.stop();
    }

    #[tokio::test]
    async fn test_pipelined_requests_answered_in_order() {
        let server = start_default();
        let mut client = Client::connect(server.addr).await;

        let mut out = BytesMut::new();
        for body in ["one", "two", "three"] {
            client
                .codec
                .encode_frame(&Frame::request(ECHO, body), &mut out);
        }
        client.stream.write_all(&out).await.unwrap();

        for body in ["one", "two", "three"] {
            let response = client.recv().await.unwrap();
            assert_eq!(&response.body[..], body.as_bytes());
        }

        server.stop();
    }

    #[tokio::test]
    async fn test_request_split_across_reads() {
        let server = start_default();
        let mut client = Client::connect(server.addr).await;

        let mut out = BytesMut::new();
        client
            .codec
            .encode_frame(&Frame::request(ECHO, "split in three parts"), &mut out);

        // Header, then part of the body, then the rest, with pauses between
        for part in [&out[..6], &out[6..20], &out[20..]] {
            client.stream.write_all(part).await.unwrap();
            client.stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let response = client.recv().await.unwrap();
        assert_eq!(&response.body[..], b"split in three parts");

        server.stop();
    }

    #[tokio::test]
    async fn test_pool_exhaustion_refuses_extra_client() {
        let server = start(
            ServerConfig::new().with_workers(2).with_max_connections(2),
            CommandTable::with_builtins().build(),
        );

        let mut first = Client::connect(server.addr).await;
        let mut second = Client::connect(server.addr).await;
        first.call(Frame::request(ECHO, "a")).await;
        second.call(Frame::request(ECHO, "b")).await;

        let mut third = Client::connect(server.addr).await;
        assert!(third.recv().await.is_none());
        assert_eq!(
            server
                .handle
                .stats()
                .connections_rejected
                .load(Ordering::Relaxed),
            1
        );

        // The admitted clients are unaffected
        let response = first.call(Frame::request(ECHO, "still here")).await;
        assert_eq!(&response.body[..], b"still here");

        let stats = server.handle.pool_stats();
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.free, 0);

        server.stop();
    }

    #[tokio::test]
    async fn test_quit_waits_for_in_flight_handlers() {
        let started = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let mut builder = CommandTable::with_builtins();
        {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            builder
                .register_fn(SLOW, "slow", move |ctx: &mut CommandContext<'_>| {
                    started.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(200));
                    finished.store(true, Ordering::SeqCst);
                    ctx.reply(b"done");
                    Ok(())
                })
                .unwrap();
        }
        let server = start(ServerConfig::new().with_workers(2), builder.build());

        let mut slow = Client::connect(server.addr).await;
        slow.send(Frame::request(SLOW, "")).await;
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut quitter = Client::connect(server.addr).await;
        let response = quitter.call(Frame::request(QUIT, "")).await;
        assert_eq!(&response.body[..], b"OK");

        tokio_test::assert_ok!(server.thread.join().unwrap());
        assert!(finished.load(Ordering::SeqCst));
        assert!(!server.handle.is_running());

        // Every socket was closed on the way out
        let stats = server.handle.pool_stats();
        assert_eq!(stats.free, stats.capacity);
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_connection_open() {
        let server = start_default();
        let mut client = Client::connect(server.addr).await;

        let response = client.call(Frame::request(999, "?")).await;
        assert_eq!(response.command, 999);
        assert_eq!(response.status, Status::UnknownCommand);

        let response = client.call(Frame::request(ECHO, "ok")).await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(
            server.handle.stats().unknown_commands.load(Ordering::Relaxed),
            1
        );

        server.stop();
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_response() {
        let mut builder = CommandTable::with_builtins();
        builder
            .register_fn(FAIL, "fail", |ctx: &mut CommandContext<'_>| {
                Err(CommandError::InvalidArgument(format!(
                    "{} bytes is not enough",
                    ctx.body().len()
                )))
            })
            .unwrap();
        let server = start(ServerConfig::new().with_workers(1), builder.build());
        let mut client = Client::connect(server.addr).await;

        let response = client.call(Frame::request(FAIL, "x")).await;
        assert!(response.is_error());
        assert_eq!(&response.body[..], b"invalid argument: 1 bytes is not enough");

        let response = client.call(Frame::request(ECHO, "after")).await;
        assert_eq!(&response.body[..], b"after");

        server.stop();
    }

    #[tokio::test]
    async fn test_bad_tag_closes_connection() {
        let server = start_default();
        let mut client = Client::connect(server.addr).await;

        client
            .stream
            .write_all(b"GET / HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let response = client.recv().await.unwrap();
        assert!(response.is_error());
        assert!(client.recv().await.is_none());

        server.stop();
    }

    #[tokio::test]
    async fn test_blocking_handler_does_not_stall_other_clients() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = CommandTable::with_builtins();
        {
            let calls = Arc::clone(&calls);
            builder
                .register_fn(SLOW, "slow", move |ctx: &mut CommandContext<'_>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(500));
                    ctx.reply(b"slow");
                    Ok(())
                })
                .unwrap();
        }
        let server = start(ServerConfig::new().with_workers(2), builder.build());

        let mut slow = Client::connect(server.addr).await;
        slow.send(Frame::request(SLOW, "")).await;
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut fast = Client::connect(server.addr).await;
        let began = Instant::now();
        fast.call(Frame::request(ECHO, "quick")).await;
        assert!(began.elapsed() < Duration::from_millis(400));

        assert_eq!(&slow.recv().await.unwrap().body[..], b"slow");
        server.stop();
    }

    #[tokio::test]
    async fn test_idle_connection_reaped_and_slot_reused() {
        let server = start(
            ServerConfig::new()
                .with_workers(1)
                .with_max_connections(1)
                .with_response_timeout(Duration::from_millis(50)),
            CommandTable::with_builtins().build(),
        );

        let mut idle = Client::connect(server.addr).await;
        idle.call(Frame::request(ECHO, "hi")).await;

        // Untouched for well over twice the timeout
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(idle.recv().await.is_none());
        assert!(
            server
                .handle
                .stats()
                .connections_timed_out
                .load(Ordering::Relaxed)
                >= 1
        );

        // The only slot is free again
        let mut next = Client::connect(server.addr).await;
        let response = next.call(Frame::request(ECHO, "reused")).await;
        assert_eq!(&response.body[..], b"reused");

        server.stop();
    }

    #[tokio::test]
    async fn test_info_reflects_live_connections() {
        let server = start_default();
        let mut client = Client::connect(server.addr).await;

        let response = client.call(Frame::request(INFO, "")).await;
        let text = String::from_utf8(response.body.to_vec()).unwrap();
        assert!(text.contains("active_connections:1"));
        assert!(text.contains("pool_working:1"));

        server.stop();
    }

    #[tokio::test]
    async fn test_frame_at_request_limit_is_served() {
        let config = ServerConfig::new()
            .with_workers(1)
            .with_read_chunk(1024)
            .with_max_request_len(1024);
        let body = vec![b'x'; config.max_body_len()];
        let server = start(config, CommandTable::with_builtins().build());
        let mut client = Client::connect(server.addr).await;

        // Header plus body is exactly max_request_len bytes
        let response = client.call(Frame::request(ECHO, body.clone())).await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(&response.body[..], &body[..]);

        server.stop();
    }

    #[tokio::test]
    async fn test_body_over_limit_gets_error_reply() {
        let config = ServerConfig::new()
            .with_workers(1)
            .with_read_chunk(1024)
            .with_max_request_len(1024);
        let too_long = config.max_body_len() + 1;
        let server = start(config, CommandTable::with_builtins().build());
        let mut client = Client::connect(server.addr).await;

        // Only the header: the declared length alone is enough to refuse it
        let mut header = BytesMut::new();
        header.put_slice(crate::config::DEFAULT_PROTOCOL_TAG.as_bytes());
        header.put_u32(ECHO);
        header.put_u8(Status::Ok.as_u8());
        header.put_u32(too_long as u32);
        client.stream.write_all(&header).await.unwrap();

        let response = client.recv().await.unwrap();
        assert!(response.is_error());
        assert!(String::from_utf8_lossy(&response.body).contains("frame too large"));
        assert!(client.recv().await.is_none());

        server.stop();
    }

    #[tokio::test]
    async fn test_client_disconnect_frees_slot() {
        let server = start(
            ServerConfig::new().with_workers(1).with_max_connections(1),
            CommandTable::with_builtins().build(),
        );

        let mut first = Client::connect(server.addr).await;
        first.call(Frame::request(ECHO, "bye")).await;
        assert_eq!(server.handle.pool_stats().free, 0);
        drop(first);

        let deadline = Instant::now() + Duration::from_secs(5);
        while server.handle.pool_stats().free < 1 {
            assert!(Instant::now() < deadline, "slot never returned to the pool");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            server
                .handle
                .stats()
                .active_connections
                .load(Ordering::Relaxed),
            0
        );

        let mut second = Client::connect(server.addr).await;
        let response = second.call(Frame::request(ECHO, "hello again")).await;
        assert_eq!(&response.body[..], b"hello again");

        server.stop();
    }

    #[test]
    fn test_bind_rejects_invalid_config() {
        let config = ServerConfig::new().with_port(0).with_workers(0);
        let result = Server::bind(config, CommandTable::with_builtins().build());
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
