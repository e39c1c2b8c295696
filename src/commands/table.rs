//! The Command Table
//!
//! Maps command identifiers to handlers. The table is built once, before the
//! server starts, through [`CommandTableBuilder`]; registering the same id
//! twice is a startup error. After [`build`](CommandTableBuilder::build) the
//! table is immutable and read by every worker without locking. Only the
//! per-command counters change, and those are atomics.

use crate::commands::context::CommandContext;
use crate::error::ServerError;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors a handler can return. Each becomes an `Error` response; the
/// connection stays open.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The request body was not what the command expects
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The command could not complete
    #[error("{0}")]
    Failed(String),
}

/// Result type for command handlers.
pub type CommandResult = Result<(), CommandError>;

/// A command handler.
///
/// `execute` runs on a worker thread and may block for as long as it needs;
/// the connection it serves is not touched by anyone else meanwhile.
pub trait Command: Send + Sync {
    /// Name used in logs and statistics.
    fn name(&self) -> &str;

    /// Handles one request.
    fn execute(&self, ctx: &mut CommandContext<'_>) -> CommandResult;
}

/// Adapts a closure into a [`Command`].
pub struct FnCommand<F> {
    name: String,
    f: F,
}

impl<F> Command for FnCommand<F>
where
    F: Fn(&mut CommandContext<'_>) -> CommandResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: &mut CommandContext<'_>) -> CommandResult {
        (self.f)(ctx)
    }
}

/// One registered command and its invocation counters.
pub struct CommandEntry {
    id: u32,
    handler: Box<dyn Command>,
    calls: AtomicU64,
    micros: AtomicU64,
}

impl CommandEntry {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.handler.name()
    }

    /// Number of completed invocations.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Total time spent in the handler.
    pub fn total_time(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Relaxed))
    }

    /// Runs the handler and records the call.
    pub(crate) fn invoke(&self, ctx: &mut CommandContext<'_>) -> CommandResult {
        let start = std::time::Instant::now();
        let result = self.handler.execute(ctx);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.micros
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        result
    }
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("calls", &self.calls())
            .finish()
    }
}

/// Collects commands before the server starts.
#[derive(Debug, Default)]
pub struct CommandTableBuilder {
    entries: HashMap<u32, CommandEntry>,
}

impl CommandTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `id`.
    ///
    /// # Errors
    ///
    /// [`ServerError::DuplicateCommand`] if `id` is already taken.
    pub fn register<C>(&mut self, id: u32, handler: C) -> Result<&mut Self, ServerError>
    where
        C: Command + 'static,
    {
        if self.entries.contains_key(&id) {
            return Err(ServerError::DuplicateCommand {
                id,
                name: handler.name().to_string(),
            });
        }

        self.insert(id, Box::new(handler));
        Ok(self)
    }

    pub(crate) fn insert(&mut self, id: u32, handler: Box<dyn Command>) {
        self.entries.insert(
            id,
            CommandEntry {
                id,
                handler,
                calls: AtomicU64::new(0),
                micros: AtomicU64::new(0),
            },
        );
    }

    /// Registers a closure under `id`.
    pub fn register_fn<F>(
        &mut self,
        id: u32,
        name: impl Into<String>,
        f: F,
    ) -> Result<&mut Self, ServerError>
    where
        F: Fn(&mut CommandContext<'_>) -> CommandResult + Send + Sync + 'static,
    {
        self.register(
            id,
            FnCommand {
                name: name.into(),
                f,
            },
        )
    }

    /// Freezes the table.
    pub fn build(self) -> CommandTable {
        CommandTable {
            entries: self.entries,
        }
    }
}

/// Immutable map from command id to handler.
#[derive(Debug)]
pub struct CommandTable {
    entries: HashMap<u32, CommandEntry>,
}

impl CommandTable {
    /// Starts an empty table.
    pub fn builder() -> CommandTableBuilder {
        CommandTableBuilder::new()
    }

    /// Starts a table holding the built-in commands.
    pub fn with_builtins() -> CommandTableBuilder {
        let mut builder = CommandTableBuilder::new();
        crate::commands::builtin::register_builtins(&mut builder);
        builder
    }

    pub fn get(&self, id: u32) -> Option<&CommandEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, ordered by id.
    pub fn entries(&self) -> Vec<&CommandEntry> {
        let mut entries: Vec<&CommandEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.id);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut CommandContext<'_>) -> CommandResult {
        Ok(())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut builder = CommandTable::builder();
        builder.register_fn(10, "ten", noop).unwrap();
        builder.register_fn(20, "twenty", noop).unwrap();
        let table = builder.build();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(10).unwrap().name(), "ten");
        assert_eq!(table.get(20).unwrap().name(), "twenty");
        assert!(table.get(30).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut builder = CommandTable::builder();
        builder.register_fn(1, "first", noop).unwrap();

        let err = builder.register_fn(1, "second", noop).unwrap_err();
        match err {
            ServerError::DuplicateCommand { id, name } => {
                assert_eq!(id, 1);
                assert_eq!(name, "second");
            }
            other => panic!("unexpected error: {other}"),
        }

        // The first registration is untouched
        assert_eq!(builder.build().get(1).unwrap().name(), "first");
    }

    #[test]
    fn test_builtins_collide_with_user_ids() {
        let mut builder = CommandTable::with_builtins();
        assert!(builder.register_fn(1, "mine", noop).is_err());
        builder.register_fn(100, "mine", noop).unwrap();

        let table = builder.build();
        let ids: Vec<u32> = table.entries().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 100]);
    }

    #[test]
    fn test_entries_start_with_zero_counters() {
        let table = CommandTable::with_builtins().build();
        for entry in table.entries() {
            assert_eq!(entry.calls(), 0);
            assert_eq!(entry.total_time(), Duration::ZERO);
        }
    }
}
