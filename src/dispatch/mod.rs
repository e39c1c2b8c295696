//! Dispatch Module
//!
//! Everything that moves work between the reactor and the workers.
//!
//! ## Architecture
//!
//! ```text
//!        reactor thread                         worker threads
//! ┌───────────────────────────┐          ┌─────────────────────────┐
//! │ readable ──push──┐        │          │ push self ──┐           │
//! │                  ▼        │          │             ▼           │
//! │        ┌──────────────┐   │  lock    │     ┌──────────────┐    │
//! │        │  task queue  │◄──┼──────────┼────►│ ready-queue  │    │
//! │        └──────┬───────┘   │          │     └──────┬───────┘    │
//! │               │           │          │            │            │
//! │   dispatcher (before sleep) pairs head task with head worker   │
//! │               └───────── assign + signal ─────────┘            │
//! │                           │          │                         │
//! │ reaper (timer) sweeps the whole pool │                         │
//! └───────────────────────────┘          └─────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `queues`: The coordination lock and the queues it guards
//! - `dispatcher`: The per-iteration pairing pass
//! - `reaper`: The periodic stale-connection sweep

pub mod dispatcher;
pub mod queues;
pub mod reaper;

pub use dispatcher::{dispatch, DispatchOutcome};
pub use queues::{Coordinator, QueueLens, ReadyWorker};
pub use reaper::{sweep, SweepOutcome};
