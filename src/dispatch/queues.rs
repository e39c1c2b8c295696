//! Coordination State
//!
//! The idle queue, the task queue and the ready-queue share one lock. Every
//! operation here holds it for O(1) work (the reaper's scan is the one O(N)
//! exception) and never across a handler call or a socket operation.
//!
//! A slot index is in at most one of {idle queue, task queue}; the `queued`
//! flags enforce that, so a pushed slot can never be pushed again until it has
//! been popped.

use crate::connection::ConnectionId;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Locks `mutex`, ignoring poisoning: every structure guarded this way is
/// left consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A worker waiting in the ready-queue.
///
/// Sending on `wake` is both the assignment and the signal, so the
/// assignment is always visible to the worker before it runs. Dropping the
/// sender without sending tells the worker to exit.
#[derive(Debug)]
pub struct ReadyWorker {
    pub index: usize,
    pub wake: oneshot::Sender<ConnectionId>,
}

impl ReadyWorker {
    /// Creates a ready-queue entry and the receiver its worker blocks on.
    pub fn new(index: usize) -> (Self, oneshot::Receiver<ConnectionId>) {
        let (wake, rx) = oneshot::channel();
        (Self { index, wake }, rx)
    }

    /// Hands `conn` to the worker. Gives the id back if the worker is gone.
    pub fn assign(self, conn: ConnectionId) -> Result<(), ConnectionId> {
        self.wake.send(conn)
    }
}

/// Lengths of the three queues at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueLens {
    pub idle: usize,
    pub tasks: usize,
    pub ready: usize,
}

struct Queues {
    idle: VecDeque<usize>,
    tasks: VecDeque<ConnectionId>,
    ready: VecDeque<ReadyWorker>,
    queued: Vec<bool>,
    accepting_workers: bool,
}

/// The lock-protected queues shared by the reactor and the workers.
pub struct Coordinator {
    inner: Mutex<Queues>,
}

impl Coordinator {
    /// Creates the queues for a pool of `capacity` slots, all of them idle.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Queues {
                idle: (0..capacity).collect(),
                tasks: VecDeque::new(),
                ready: VecDeque::new(),
                queued: vec![true; capacity],
                accepting_workers: true,
            }),
        }
    }

    pub fn pop_idle(&self) -> Option<usize> {
        let mut q = lock(&self.inner);
        let index = q.idle.pop_front()?;
        q.queued[index] = false;
        Some(index)
    }

    /// Returns `index` to the idle queue unless it is already queued.
    pub fn push_idle(&self, index: usize) -> bool {
        let mut q = lock(&self.inner);
        if q.queued[index] {
            return false;
        }
        q.queued[index] = true;
        q.idle.push_back(index);
        true
    }

    /// Appends a task unless its slot is already queued.
    pub fn push_task(&self, conn: ConnectionId) -> bool {
        let mut q = lock(&self.inner);
        if q.queued[conn.index] {
            return false;
        }
        q.queued[conn.index] = true;
        q.tasks.push_back(conn);
        true
    }

    pub fn pop_task(&self) -> Option<ConnectionId> {
        let mut q = lock(&self.inner);
        let conn = q.tasks.pop_front()?;
        q.queued[conn.index] = false;
        Some(conn)
    }

    /// Puts a task that could not be dispatched back at the head, ahead of
    /// everything queued after it.
    pub fn requeue_task(&self, conn: ConnectionId) {
        let mut q = lock(&self.inner);
        if !q.queued[conn.index] {
            q.queued[conn.index] = true;
            q.tasks.push_front(conn);
        }
    }

    /// Adds a worker to the ready-queue. Gives the entry back once
    /// [`close_ready`](Self::close_ready) has been called.
    pub fn push_ready(&self, worker: ReadyWorker) -> Result<(), ReadyWorker> {
        let mut q = lock(&self.inner);
        if !q.accepting_workers {
            return Err(worker);
        }
        q.ready.push_back(worker);
        Ok(())
    }

    pub fn pop_ready(&self) -> Option<ReadyWorker> {
        lock(&self.inner).ready.pop_front()
    }

    /// Stops accepting workers and drops every waiting entry, which wakes
    /// those workers with a closed channel. Returns how many were waiting.
    pub fn close_ready(&self) -> usize {
        let drained: Vec<ReadyWorker> = {
            let mut q = lock(&self.inner);
            q.accepting_workers = false;
            q.ready.drain(..).collect()
        };
        drained.len()
    }

    pub fn is_accepting_workers(&self) -> bool {
        lock(&self.inner).accepting_workers
    }

    pub fn is_queued(&self, index: usize) -> bool {
        lock(&self.inner).queued[index]
    }

    /// Slot indexes that are in neither the idle queue nor the task queue.
    pub fn unqueued(&self) -> Vec<usize> {
        let q = lock(&self.inner);
        q.queued
            .iter()
            .enumerate()
            .filter(|(_, queued)| !**queued)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn lens(&self) -> QueueLens {
        let q = lock(&self.inner);
        QueueLens {
            idle: q.idle.len(),
            tasks: q.tasks.len(),
            ready: q.ready.len(),
        }
    }
}
