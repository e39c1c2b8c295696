//! Server Configuration
//!
//! All tunables of the server live in [`ServerConfig`]. The library never
//! reads command-line arguments or files; the binary builds a config and
//! hands it to [`Server::bind`](crate::server::Server::bind).
//!
//! ## Defaults
//!
//! | Field              | Default      |
//! |--------------------|--------------|
//! | `host`             | `127.0.0.1`  |
//! | `port`             | `12318`      |
//! | `workers`          | 16           |
//! | `max_connections`  | 32           |
//! | `response_timeout` | 5 s          |
//! | `max_request_len`  | 1 MiB        |
//! | `read_chunk`       | 16 KiB       |
//! | `scratch_capacity` | 64 KiB       |
//! | `protocol_tag`     | `MERGE3.0`   |

use crate::protocol::frame::FIXED_HEADER_LEN;
use std::time::Duration;
use thiserror::Error;

/// Default number of worker threads.
pub const DEFAULT_WORKERS: usize = 16;

/// Default size of the connection pool.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// Default response timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default cap on buffered request bytes per connection (1 MiB).
pub const DEFAULT_MAX_REQUEST_LEN: usize = 1 << 20;

/// Default number of bytes reserved before each socket read (16 KiB).
pub const DEFAULT_READ_CHUNK: usize = 16 * 1024;

/// Default capacity reserved for each connection's scratch buffer.
pub const DEFAULT_SCRATCH_CAPACITY: usize = 64 * 1024;

/// Default protocol tag that starts every frame.
pub const DEFAULT_PROTOCOL_TAG: &str = "MERGE3.0";

/// Errors reported by [`ServerConfig::validate`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A numeric field that must be positive was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// The frame tag was empty
    #[error("protocol tag must not be empty")]
    EmptyProtocolTag,

    /// The request cap is smaller than one read
    #[error("max_request_len ({max_request_len}) must be at least read_chunk ({read_chunk})")]
    RequestLimitTooSmall {
        max_request_len: usize,
        read_chunk: usize,
    },

    /// The request cap leaves no room for a body after the frame header
    #[error("max_request_len ({max_request_len}) must exceed the frame header ({header_len})")]
    RequestLimitBelowHeader {
        max_request_len: usize,
        header_len: usize,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Size of the connection pool; accepts beyond it are refused
    pub max_connections: usize,
    /// How long a request may wait for a worker; twice this is the reaper's
    /// idle threshold
    pub response_timeout: Duration,
    /// Maximum number of buffered request bytes per connection
    pub max_request_len: usize,
    /// Bytes reserved in the receive buffer before each read
    pub read_chunk: usize,
    /// Capacity reserved for each connection's scratch buffer
    pub scratch_capacity: usize,
    /// Tag that starts every frame
    pub protocol_tag: String,
    /// Whether to set `TCP_NODELAY` on accepted sockets
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_request_len: DEFAULT_MAX_REQUEST_LEN,
            read_chunk: DEFAULT_READ_CHUNK,
            scratch_capacity: DEFAULT_SCRATCH_CAPACITY,
            protocol_tag: DEFAULT_PROTOCOL_TAG.to_string(),
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_max_request_len(mut self, len: usize) -> Self {
        self.max_request_len = len;
        self
    }

    pub fn with_read_chunk(mut self, len: usize) -> Self {
        self.read_chunk = len;
        self
    }

    pub fn with_protocol_tag(mut self, tag: impl Into<String>) -> Self {
        self.protocol_tag = tag.into();
        self
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Size of a frame header with this config's tag.
    pub fn frame_header_len(&self) -> usize {
        self.protocol_tag.len() + FIXED_HEADER_LEN
    }

    /// Largest body a request frame may declare: a maximal frame, header
    /// included, fills exactly `max_request_len` bytes of receive buffer.
    pub fn max_body_len(&self) -> usize {
        self.max_request_len.saturating_sub(self.frame_header_len())
    }

    /// The reaper's threshold: connections untouched for longer are reclaimed.
    pub fn idle_threshold(&self) -> Duration {
        self.response_timeout * 2
    }

    /// Checks that the configuration describes a usable server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Zero("workers"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        if self.response_timeout.is_zero() {
            return Err(ConfigError::Zero("response_timeout"));
        }
        if self.read_chunk == 0 {
            return Err(ConfigError::Zero("read_chunk"));
        }
        if self.protocol_tag.is_empty() {
            return Err(ConfigError::EmptyProtocolTag);
        }
        if self.max_request_len < self.read_chunk {
            return Err(ConfigError::RequestLimitTooSmall {
                max_request_len: self.max_request_len,
                read_chunk: self.read_chunk,
            });
        }
        if self.max_request_len <= self.frame_header_len() {
            return Err(ConfigError::RequestLimitBelowHeader {
                max_request_len: self.max_request_len,
                header_len: self.frame_header_len(),
            });
        }
        Ok(())
    }
}
