//! Command Module
//!
//! The dispatch table that workers consult for every request.
//!
//! ## Architecture
//!
//! ```text
//! Receive buffer
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameCodec     │  (protocol module)
//! └────────┬────────┘
//!          │ command id
//!          ▼
//! ┌─────────────────┐
//! │  CommandTable   │  (this module)
//! │                 │
//! │  - Lookup       │
//! │  - Invoke       │
//! │  - Count        │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Command handler │  may block; runs on a worker thread
//! └─────────────────┘
//! ```
//!
//! An id with no entry is not a fault: the worker answers with an
//! `UnknownCommand` response and keeps the connection open.
//!
//! ## Example
//!
//! ```
//! use cmdbus::commands::{CommandTable, CommandContext};
//!
//! let mut builder = CommandTable::with_builtins();
//! builder
//!     .register_fn(100, "upper", |ctx: &mut CommandContext<'_>| {
//!         let upper = ctx.body().to_ascii_uppercase();
//!         ctx.reply(&upper);
//!         Ok(())
//!     })
//!     .unwrap();
//! let table = builder.build();
//! assert!(table.get(100).is_some());
//! ```

pub mod builtin;
pub mod context;
pub mod table;

pub use builtin::{EchoCommand, InfoCommand, QuitCommand};
pub use context::CommandContext;
pub use table::{
    Command, CommandEntry, CommandError, CommandResult, CommandTable, CommandTableBuilder,
    FnCommand,
};
