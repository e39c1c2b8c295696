//! The Reaper
//!
//! A periodic sweep over the whole pool that reclaims connections nobody is
//! going to finish: idle clients that stopped talking, and connections
//! stranded in the `Working` state. It is a coarse safety net on top of the
//! dispatcher's own timeout check.
//!
//! Only slots outside both queues are candidates. A candidate untouched for
//! longer than the threshold is reclaimed on the spot, unless a worker is
//! inside a handler on it; that one is marked `Closed` and its worker
//! reclaims it as soon as the handler returns, so the record never has two
//! owners.

use crate::connection::{ConnectionPool, ConnectionStatus};
use std::time::Duration;
use tracing::{debug, info};

/// What one sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    /// Connections reclaimed immediately
    pub reclaimed: usize,
    /// Connections marked `Closed` for their worker to reclaim
    pub marked: usize,
}

/// Sweeps the pool once, reclaiming every unqueued slot idle for longer than
/// `threshold`.
pub fn sweep(pool: &ConnectionPool, threshold: Duration) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();

    for index in pool.coordinator().unqueued() {
        let idle = pool.idle_for(index);
        if idle <= threshold {
            continue;
        }

        match pool.try_lock_slot(index) {
            Some(conn) => {
                debug!(
                    conn = %conn.id(),
                    idle_ms = idle.as_millis() as u64,
                    "reaping stale connection"
                );
                pool.reclaim(conn);
                pool.server_stats().connection_timed_out();
                outcome.reclaimed += 1;
            }
            // Only a worker mid-request is marked; a holder that just went
            // back to Idle keeps its connection
            None => {
                if pool.transition(index, ConnectionStatus::Working, ConnectionStatus::Closed) {
                    debug!(slot = index, "handler overran, marking connection closed");
                    outcome.marked += 1;
                }
            }
        }
    }

    if outcome.reclaimed > 0 || outcome.marked > 0 {
        info!(
            reclaimed = outcome.reclaimed,
            marked = outcome.marked,
            "reaper sweep"
        );
    }

    outcome
}
