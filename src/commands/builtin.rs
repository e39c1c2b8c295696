//! Built-in Commands
//!
//! | Id | Name   | Behaviour                                              |
//! |----|--------|--------------------------------------------------------|
//! | 1  | `echo` | Replies with the request body                          |
//! | 2  | `quit` | Replies `OK`, then shuts the server down               |
//! | 3  | `info` | Replies with `key:value` lines describing the server   |

use crate::alloc;
use crate::commands::context::CommandContext;
use crate::commands::table::{Command, CommandResult, CommandTableBuilder};
use std::fmt::Write;
use tracing::info;

/// Id of the `echo` command.
pub const ECHO: u32 = 1;
/// Id of the `quit` command.
pub const QUIT: u32 = 2;
/// Id of the `info` command.
pub const INFO: u32 = 3;

/// Replies with the request body.
#[derive(Debug, Default)]
pub struct EchoCommand;

impl Command for EchoCommand {
    fn name(&self) -> &str {
        "echo"
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> CommandResult {
        let body = ctx.body().clone();
        ctx.reply(&body);
        Ok(())
    }
}

/// Stops the server. In-flight handlers on other workers finish first.
#[derive(Debug, Default)]
pub struct QuitCommand;

impl Command for QuitCommand {
    fn name(&self) -> &str {
        "quit"
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> CommandResult {
        info!(peer = ?ctx.peer(), "quit requested by client");
        ctx.reply(b"OK");
        ctx.close_after_reply();
        ctx.server().shutdown();
        Ok(())
    }
}

/// Reports pool, queue, connection and command statistics.
#[derive(Debug, Default)]
pub struct InfoCommand;

impl Command for InfoCommand {
    fn name(&self) -> &str {
        "info"
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> CommandResult {
        let server = ctx.server();
        let pool = server.pool_stats();
        let queues = server.queue_lens();

        let mut out = String::new();
        let _ = writeln!(out, "version:{}", crate::VERSION);
        let _ = writeln!(out, "pool_capacity:{}", pool.capacity);
        let _ = writeln!(out, "pool_free:{}", pool.free);
        let _ = writeln!(out, "pool_reading:{}", pool.reading);
        let _ = writeln!(out, "pool_working:{}", pool.working);
        let _ = writeln!(out, "pool_closed:{}", pool.closed);
        let _ = writeln!(out, "tasks_queued:{}", queues.tasks);
        let _ = writeln!(out, "workers_ready:{}", queues.ready);

        for (name, value) in server.stats().snapshot() {
            let _ = writeln!(out, "{}:{}", name, value);
        }

        for entry in server.commands().entries() {
            let _ = writeln!(
                out,
                "cmd_{}:calls={},usec={}",
                entry.name(),
                entry.calls(),
                entry.total_time().as_micros()
            );
        }

        let memory = alloc::usage();
        if memory.blocks > 0 {
            let _ = writeln!(out, "used_memory:{}", memory.bytes);
            let _ = writeln!(out, "used_blocks:{}", memory.blocks);
        }

        ctx.reply(out.as_bytes());
        Ok(())
    }
}

pub(crate) fn register_builtins(builder: &mut CommandTableBuilder) {
    builder.insert(ECHO, Box::new(EchoCommand));
    builder.insert(QUIT, Box::new(QuitCommand));
    builder.insert(INFO, Box::new(InfoCommand));
}
