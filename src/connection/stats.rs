//! Server-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Total number of connections accepted into the pool
    pub connections_accepted: AtomicU64,
    /// Connections refused because the pool was exhausted
    pub connections_rejected: AtomicU64,
    /// Currently attached connections
    pub active_connections: AtomicU64,
    /// Connections reclaimed by a timeout check
    pub connections_timed_out: AtomicU64,
    /// Total commands executed
    pub commands_processed: AtomicU64,
    /// Requests naming an unregistered command
    pub unknown_commands: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_timed_out(&self) {
        self.connections_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_command(&self) {
        self.unknown_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns `(name, value)` pairs for every counter.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            (
                "connections_accepted",
                self.connections_accepted.load(Ordering::Relaxed),
            ),
            (
                "connections_rejected",
                self.connections_rejected.load(Ordering::Relaxed),
            ),
            (
                "active_connections",
                self.active_connections.load(Ordering::Relaxed),
            ),
            (
                "connections_timed_out",
                self.connections_timed_out.load(Ordering::Relaxed),
            ),
            (
                "commands_processed",
                self.commands_processed.load(Ordering::Relaxed),
            ),
            (
                "unknown_commands",
                self.unknown_commands.load(Ordering::Relaxed),
            ),
            ("bytes_read", self.bytes_read.load(Ordering::Relaxed)),
            ("bytes_written", self.bytes_written.load(Ordering::Relaxed)),
        ]
    }
}
