//! The Dispatcher
//!
//! Pairs queued connections with ready workers. It runs on the reactor
//! thread as the before-sleep hook and therefore never blocks: when no worker
//! is ready, the head task goes back to the head of the queue and the pass
//! ends. The next wake (a worker becoming ready, new input arriving) runs
//! another pass.
//!
//! ```text
//!   task queue ──pop──> [stale? closed? timed out?] ──yes──> release
//!                                 │ no
//!                                 ▼
//!   ready-queue ──pop──> worker? ──none──> requeue at head, end pass
//!                                 │
//!                                 ▼
//!                       assign + signal (one send)
//! ```

use crate::connection::{ConnectionPool, ConnectionStatus};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// What one dispatch pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    /// Tasks handed to a worker
    pub dispatched: usize,
    /// Tasks reclaimed because they were closed or too old
    pub reclaimed: usize,
    /// True if the pass ended with tasks still queued for lack of a worker
    pub starved: bool,
}

/// Runs one dispatch pass.
///
/// A task is reclaimed instead of dispatched when its connection is `Closed`
/// or has waited longer than `timeout` since its last input.
pub fn dispatch(pool: &ConnectionPool, timeout: Duration) -> DispatchOutcome {
    let coordinator = pool.coordinator();
    let mut outcome = DispatchOutcome::default();

    while let Some(conn) = coordinator.pop_task() {
        // Released and reused while queued
        if !pool.is_current(conn) {
            trace!(conn = %conn, "dropping stale task");
            continue;
        }

        let status = pool.status(conn.index);
        let waited = pool.idle_for(conn.index);
        if status == ConnectionStatus::Closed || waited > timeout {
            if status != ConnectionStatus::Closed {
                warn!(
                    conn = %conn,
                    waited_ms = waited.as_millis() as u64,
                    "request timed out waiting for a worker"
                );
                pool.server_stats().connection_timed_out();
            }
            pool.release(conn);
            outcome.reclaimed += 1;
            continue;
        }

        let Some(worker) = coordinator.pop_ready() else {
            coordinator.requeue_task(conn);
            outcome.starved = true;
            break;
        };

        let worker_index = worker.index;
        match worker.assign(conn) {
            Ok(()) => {
                trace!(conn = %conn, worker = worker_index, "task dispatched");
                outcome.dispatched += 1;
            }
            Err(conn) => {
                // The worker exited between queueing itself and now
                debug!(worker = worker_index, "ready worker gone, retrying task");
                coordinator.requeue_task(conn);
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, ServerStats};
    use crate::dispatch::ReadyWorker;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn pool(capacity: usize) -> ConnectionPool {
        ConnectionPool::new(capacity, 0, Arc::new(ServerStats::new()))
    }

    fn queue_task(pool: &ConnectionPool) -> ConnectionId {
        let id = pool.acquire().unwrap();
        pool.set_status(id.index, ConnectionStatus::Working);
        assert!(pool.coordinator().push_task(id));
        id
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_starved_task_stays_queued_until_worker_ready() {
        let pool = pool(2);
        let task = queue_task(&pool);

        // No worker ready: the task must survive the pass
        let outcome = dispatch(&pool, TIMEOUT);
        assert_eq!(outcome.dispatched, 0);
        assert!(outcome.starved);
        assert_eq!(pool.coordinator().lens().tasks, 1);

        // A worker becomes ready; the very next pass hands it over
        let (worker, mut rx) = ReadyWorker::new(0);
        pool.coordinator().push_ready(worker).unwrap();
        let outcome = dispatch(&pool, TIMEOUT);
        assert_eq!(outcome.dispatched, 1);
        assert!(!outcome.starved);
        assert_eq!(rx.try_recv().unwrap(), task);
        assert_eq!(pool.coordinator().lens().tasks, 0);
    }

    #[test]
    fn test_dispatch_is_fifo() {
        let pool = pool(3);
        let first = queue_task(&pool);
        let second = queue_task(&pool);
        let third = queue_task(&pool);

        let (w1, mut rx1) = ReadyWorker::new(0);
        pool.coordinator().push_ready(w1).unwrap();
        dispatch(&pool, TIMEOUT);
        assert_eq!(rx1.try_recv().unwrap(), first);

        let (w2, mut rx2) = ReadyWorker::new(1);
        let (w3, mut rx3) = ReadyWorker::new(2);
        pool.coordinator().push_ready(w2).unwrap();
        pool.coordinator().push_ready(w3).unwrap();
        dispatch(&pool, TIMEOUT);
        assert_eq!(rx2.try_recv().unwrap(), second);
        assert_eq!(rx3.try_recv().unwrap(), third);
    }

    #[test]
    fn test_closed_task_is_reclaimed() {
        let pool = pool(1);
        let task = queue_task(&pool);
        pool.set_status(task.index, ConnectionStatus::Closed);

        let (worker, mut rx) = ReadyWorker::new(0);
        pool.coordinator().push_ready(worker).unwrap();

        let outcome = dispatch(&pool, TIMEOUT);
        assert_eq!(outcome.reclaimed, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(pool.stats().free, 1);
        // The worker is still waiting for real work
        assert_eq!(pool.coordinator().lens().ready, 1);
    }

    #[test]
    fn test_timed_out_task_is_reclaimed() {
        let pool = pool(1);
        queue_task(&pool);
        std::thread::sleep(Duration::from_millis(20));

        let outcome = dispatch(&pool, Duration::from_millis(5));
        assert_eq!(outcome.reclaimed, 1);
        assert_eq!(pool.stats().free, 1);
        assert_eq!(
            pool.server_stats().connections_timed_out.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_gone_worker_does_not_lose_task() {
        let pool = pool(1);
        let task = queue_task(&pool);

        let (gone, rx) = ReadyWorker::new(0);
        drop(rx);
        pool.coordinator().push_ready(gone).unwrap();
        let (alive, mut alive_rx) = ReadyWorker::new(1);
        pool.coordinator().push_ready(alive).unwrap();

        let outcome = dispatch(&pool, TIMEOUT);
        assert_eq!(outcome.dispatched, 1);
        assert_eq!(alive_rx.try_recv().unwrap(), task);
    }
}
