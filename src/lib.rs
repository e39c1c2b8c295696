//! # cmdbus - A Bounded-Concurrency TCP Command Server Core
//!
//! cmdbus serves small, latency-sensitive command protocols with hard caps
//! on everything: a fixed number of connections, a fixed number of worker
//! threads, and a receive limit per connection. Under load it refuses new
//! clients and times out stale requests instead of growing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              cmdbus                                     │
//! │                                                                         │
//! │  reactor thread                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Listener   │───>│ Connection  │───>│ Task queue  │                  │
//! │  │  (accept)   │    │    Pool     │    │   (FIFO)    │                  │
//! │  └─────────────┘    └──────▲──────┘    └──────┬──────┘                  │
//! │                            │                  │ before-sleep hook       │
//! │  ┌─────────────┐           │           ┌──────▼──────┐                  │
//! │  │   Reaper    │───────────┘           │ Dispatcher  │                  │
//! │  │  (timer)    │   reclaim             └──────┬──────┘                  │
//! │  └─────────────┘                              │ assign + signal         │
//! │ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─│─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ │
//! │  worker threads x N                           ▼                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │ decode frame -> CommandTable lookup -> handler (may block)       │   │
//! │  │ -> flush reply -> keep-alive or reclaim                          │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use cmdbus::commands::{CommandContext, CommandTable};
//! use cmdbus::config::ServerConfig;
//! use cmdbus::server::Server;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut commands = CommandTable::with_builtins();
//!     commands.register_fn(100, "reverse", |ctx: &mut CommandContext<'_>| {
//!         let mut body = ctx.body().to_vec();
//!         body.reverse();
//!         ctx.reply(&body);
//!         Ok(())
//!     })?;
//!
//!     let server = Server::bind(ServerConfig::new(), commands.build())?;
//!     server.run()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Built-in Commands
//!
//! - `1` echo: replies with the request body
//! - `2` quit: replies `OK` and shuts the server down
//! - `3` info: `key:value` lines with pool, queue and command statistics
//!
//! ## Module Overview
//!
//! - [`reactor`]: single-threaded event loop over a current-thread Tokio runtime
//! - [`connection`]: connection records and the fixed pool
//! - [`dispatch`]: coordination queues, the dispatcher and the reaper
//! - [`worker`]: the worker threads
//! - [`commands`]: the command table and built-in commands
//! - [`protocol`]: request/response framing
//! - [`server`]: wiring and lifecycle
//!
//! ## Design Highlights
//!
//! ### Single ownership
//!
//! A connection record is owned by exactly one of the idle queue, the
//! reactor, the task queue, or one worker. Ids carry a generation counter,
//! so a stale id held across a release can never touch the next tenant.
//!
//! ### Handoff without a lost wakeup
//!
//! A ready worker parks on a fresh one-shot channel. The dispatcher sends the
//! connection id through it, which is the assignment and the signal at once.
//! Closing the ready-queue drops every sender, waking idle workers to exit.

pub mod alloc;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod reactor;
pub mod server;
pub mod worker;

// Re-export commonly used types for convenience
pub use commands::{Command, CommandContext, CommandError, CommandTable};
pub use config::ServerConfig;
pub use error::ServerError;
pub use protocol::{Frame, FrameCodec, Status};
pub use server::{Server, ServerHandle};

/// The default port cmdbus listens on
pub const DEFAULT_PORT: u16 = 12318;

/// The default host cmdbus binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of cmdbus
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
