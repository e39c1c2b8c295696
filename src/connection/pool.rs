//! Connection Pool
//!
//! A fixed array of [`Connection`] records allocated once at startup. The pool
//! never grows: when the idle queue is empty, [`ConnectionPool::acquire`]
//! returns `None` and the caller must refuse the client.
//!
//! ## Slot layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Slot i                                                   │
//! │   status      AtomicU8   Idle | Working | Closed         │
//! │   generation  AtomicU32  bumped on every acquire         │
//! │   touched     AtomicU64  ms since pool creation          │
//! │   conn        Mutex<Connection>  held by the owner only  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The status, generation and timestamp can be read without the record's
//! lock, which lets the reactor check a slot while a worker is running a
//! handler on it. The record itself is only ever locked by its current owner:
//! the reactor while the connection is idle or reading, the assigned worker
//! while it is working.

use crate::connection::record::{Connection, ConnectionId, ConnectionStatus};
use crate::connection::stats::ServerStats;
use crate::dispatch::queues::{lock, Coordinator};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::trace;

/// Counts of slots per state at one instant.
///
/// `free + reading + working + closed == capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub capacity: usize,
    /// Idle and in the idle queue
    pub free: usize,
    /// Idle with a client attached
    pub reading: usize,
    pub working: usize,
    pub closed: usize,
}

struct Slot {
    status: AtomicU8,
    generation: AtomicU32,
    touched: AtomicU64,
    conn: Mutex<Connection>,
}

/// Fixed-size pool of connection records.
pub struct ConnectionPool {
    slots: Box<[Slot]>,
    coordinator: Coordinator,
    stats: Arc<ServerStats>,
    epoch: Instant,
}

impl ConnectionPool {
    /// Allocates `capacity` records, each with `scratch_capacity` bytes of
    /// scratch space reserved, and puts them all in the idle queue.
    pub fn new(capacity: usize, scratch_capacity: usize, stats: Arc<ServerStats>) -> Self {
        let slots = (0..capacity)
            .map(|index| Slot {
                status: AtomicU8::new(ConnectionStatus::Idle as u8),
                generation: AtomicU32::new(0),
                touched: AtomicU64::new(0),
                conn: Mutex::new(Connection::new(index, scratch_capacity)),
            })
            .collect();

        Self {
            slots,
            coordinator: Coordinator::new(capacity),
            stats,
            epoch: Instant::now(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The queues guarded by the coordination lock.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn server_stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Takes a record from the idle queue, starting a new tenancy.
    pub fn acquire(&self) -> Option<ConnectionId> {
        let index = self.coordinator.pop_idle()?;
        let slot = &self.slots[index];

        let mut conn = lock(&slot.conn);
        let generation = slot.generation.load(Ordering::Acquire).wrapping_add(1);
        slot.generation.store(generation, Ordering::Release);
        conn.id = ConnectionId { index, generation };
        conn.reset();
        slot.status
            .store(ConnectionStatus::Idle as u8, Ordering::Release);
        self.touch(index);

        trace!(conn = %conn.id, "connection acquired");
        Some(conn.id)
    }

    /// Attaches an accepted socket to a freshly acquired record.
    pub fn attach(&self, id: ConnectionId, stream: Arc<TcpStream>, peer: SocketAddr) -> bool {
        match self.lock(id) {
            Some(mut conn) => {
                conn.attach(stream, peer);
                self.stats.connection_opened();
                true
            }
            None => false,
        }
    }

    /// Returns a record to the idle queue: clears buffer lengths, closes the
    /// socket if one is attached, and sets the status to `Idle`.
    ///
    /// Releasing an already idle record changes nothing; releasing with an id
    /// from an earlier tenancy is ignored. Returns true if a socket was closed.
    pub fn release(&self, id: ConnectionId) -> bool {
        match self.lock(id) {
            Some(conn) => self.reclaim(conn),
            None => false,
        }
    }

    /// [`release`](Self::release) for a caller already holding the record.
    pub(crate) fn reclaim(&self, mut conn: MutexGuard<'_, Connection>) -> bool {
        let index = conn.id.index;
        let was_open = conn.is_open();
        conn.reset();
        self.set_status(index, ConnectionStatus::Idle);
        drop(conn);

        if was_open {
            self.stats.connection_closed();
        }
        self.coordinator.push_idle(index);
        trace!(slot = index, closed = was_open, "connection released");
        was_open
    }

    /// Locks the record behind `id`, or returns `None` if the slot has moved
    /// on to another tenancy.
    pub(crate) fn lock(&self, id: ConnectionId) -> Option<MutexGuard<'_, Connection>> {
        let conn = lock(&self.slots.get(id.index)?.conn);
        (conn.id == id).then_some(conn)
    }

    /// Locks slot `index` only if nobody else holds it.
    pub(crate) fn try_lock_slot(&self, index: usize) -> Option<MutexGuard<'_, Connection>> {
        match self.slots.get(index)?.conn.try_lock() {
            Ok(conn) => Some(conn),
            Err(TryLockError::Poisoned(poisoned)) => Some(PoisonError::into_inner(poisoned)),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Returns true if `id` still names the slot's current tenancy.
    pub fn is_current(&self, id: ConnectionId) -> bool {
        self.slots
            .get(id.index)
            .map(|slot| slot.generation.load(Ordering::Acquire) == id.generation)
            .unwrap_or(false)
    }

    pub fn status(&self, index: usize) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.slots[index].status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, index: usize, status: ConnectionStatus) {
        self.slots[index].status.store(status as u8, Ordering::Release);
    }

    /// Moves slot `index` from `from` to `to`. Fails, changing nothing, if
    /// the slot is no longer in `from`.
    pub(crate) fn transition(
        &self,
        index: usize,
        from: ConnectionStatus,
        to: ConnectionStatus,
    ) -> bool {
        self.slots[index]
            .status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Records activity on slot `index`.
    pub(crate) fn touch(&self, index: usize) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.slots[index].touched.store(now, Ordering::Release);
    }

    /// Time since slot `index` was acquired or last received data.
    pub fn idle_for(&self, index: usize) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let touched = self.slots[index].touched.load(Ordering::Acquire);
        Duration::from_millis(now.saturating_sub(touched))
    }

    /// Counts slots per state.
    pub fn stats(&self) -> PoolStats {
        let free = self.coordinator.lens().idle;
        let mut stats = PoolStats {
            capacity: self.capacity(),
            ..PoolStats::default()
        };

        for index in 0..self.capacity() {
            match self.status(index) {
                ConnectionStatus::Idle => stats.reading += 1,
                ConnectionStatus::Working => stats.working += 1,
                ConnectionStatus::Closed => stats.closed += 1,
            }
        }
        stats.free = free.min(stats.reading);
        stats.reading -= stats.free;
        stats
    }

    /// Closes every attached socket. Used once the server has stopped.
    pub(crate) fn close_all(&self) {
        for index in 0..self.capacity() {
            let conn = lock(&self.slots[index].conn);
            if conn.is_open() {
                self.reclaim(conn);
            }
        }
    }
}
