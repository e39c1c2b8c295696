//! Server-level errors.
//!
//! Only startup can fail with these. Once the server is serving, I/O and
//! protocol failures are handled where they are detected (reactor callback
//! or worker loop) and never cross the reactor/worker boundary.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors surfaced by [`Server::bind`](crate::server::Server::bind),
/// [`Server::run`](crate::server::Server::run) and command registration.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error while binding or building the reactor
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration was rejected
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Two commands were registered under the same identifier
    #[error("command id {id} registered twice (second registration: '{name}')")]
    DuplicateCommand { id: u32, name: String },

    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(std::io::Error),
}
