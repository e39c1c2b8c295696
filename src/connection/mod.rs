//! Connection Module
//!
//! Connection records and the fixed pool that owns them.
//!
//! ## Lifecycle
//!
//! ```text
//!  accept ──> acquire ──> attach + register readable
//!                              │
//!             ┌────────────────┘
//!             ▼
//!     Idle (reading) ──input──> Working ──handler + flush──┐
//!        ▲      │                  │                      │
//!        │      │ EOF / error      │ reaper / error       │
//!        │      ▼                  ▼                      │
//!        │   release <──────── Closed                     │
//!        │      │                                         │
//!        │      ▼                                         │
//!        │  idle queue                                    │
//!        └──────────────────── keep-alive ────────────────┘
//! ```
//!
//! ## Ownership
//!
//! A record belongs to exactly one of: the idle queue, the reactor (while
//! reading), the task queue, or one worker. Ids carry a generation so that a
//! holder that has lost ownership can tell.

pub mod pool;
pub mod record;
pub mod stats;

pub use pool::{ConnectionPool, PoolStats};
pub use record::{Connection, ConnectionId, ConnectionStatus};
pub use stats::ServerStats;
