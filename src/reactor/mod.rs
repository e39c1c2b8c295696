//! Reactor
//!
//! A single-threaded event loop that multiplexes socket readiness and timers.
//! It is a thin adapter over a current-thread Tokio runtime: every
//! registration becomes a task on that runtime, so every callback runs on the
//! thread that called [`Reactor::run`].
//!
//! ## Contract
//!
//! ```text
//! register_readable(stream, cb)   cb(&stream) -> ReadFlow { Continue | Pause | Stop }
//! register_writable(stream, cb)   cb(&stream) -> WriteFlow { Continue | Done }
//! register_timer(interval, cb)    cb() -> Option<next interval>   (None stops the timer)
//! set_before_sleep(cb)            cb() runs after every wake(), before the loop waits
//! Registration::cancel()          unregister
//! run() / stop()
//! ```
//!
//! Callbacks must not block: they share the reactor thread with every other
//! registration. Registering from another thread is fine; [`ReactorHandle`]
//! is `Send + Sync`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// What a readable callback wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFlow {
    /// Wait for the next readiness notification
    Continue,
    /// Stop watching until [`Registration::resume`] is called
    Pause,
    /// Unregister
    Stop,
}

/// What a writable callback wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFlow {
    /// Wait for the next writability notification
    Continue,
    /// Unregister
    Done,
}

/// Handle to a registered callback.
///
/// Dropping a registration does *not* cancel it; call [`cancel`](Self::cancel).
#[derive(Debug)]
pub struct Registration {
    abort: AbortHandle,
    resume: Arc<Notify>,
}

impl Registration {
    /// Unregisters the callback. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Wakes a reader that returned [`ReadFlow::Pause`].
    ///
    /// A resume issued before the reader pauses is remembered.
    pub fn resume(&self) {
        self.resume.notify_one();
    }

    /// Returns true once the callback has unregistered or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

struct Inner {
    runtime: tokio::runtime::Handle,
    stop: Notify,
    stopped: AtomicBool,
    wake: Notify,
}

/// Cloneable, thread-safe handle to a [`Reactor`].
#[derive(Clone)]
pub struct ReactorHandle {
    inner: Arc<Inner>,
}

impl ReactorHandle {
    /// Spawns a future onto the reactor thread.
    pub fn spawn<F>(&self, future: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.runtime.spawn(future).abort_handle()
    }

    /// Calls `on_ready` each time `stream` becomes readable.
    pub fn register_readable<F>(&self, stream: Arc<TcpStream>, mut on_ready: F) -> Registration
    where
        F: FnMut(&TcpStream) -> ReadFlow + Send + 'static,
    {
        let resume = Arc::new(Notify::new());
        let paused = Arc::clone(&resume);

        let abort = self.spawn(async move {
            loop {
                // Errors surface again from the read inside the callback
                let _ = stream.readable().await;
                match on_ready(&stream) {
                    ReadFlow::Continue => {}
                    ReadFlow::Pause => paused.notified().await,
                    ReadFlow::Stop => break,
                }
            }
        });

        Registration { abort, resume }
    }

    /// Calls `on_ready` each time `stream` becomes writable, until it returns
    /// [`WriteFlow::Done`].
    pub fn register_writable<F>(&self, stream: Arc<TcpStream>, mut on_ready: F) -> Registration
    where
        F: FnMut(&TcpStream) -> WriteFlow + Send + 'static,
    {
        let abort = self.spawn(async move {
            loop {
                let _ = stream.writable().await;
                if on_ready(&stream) == WriteFlow::Done {
                    break;
                }
            }
        });

        Registration {
            abort,
            resume: Arc::new(Notify::new()),
        }
    }

    /// Calls `on_tick` after `interval`, then again after each interval it
    /// returns, until it returns `None`.
    pub fn register_timer<F>(&self, interval: Duration, mut on_tick: F) -> Registration
    where
        F: FnMut() -> Option<Duration> + Send + 'static,
    {
        let abort = self.spawn(async move {
            let mut next = interval;
            loop {
                tokio::time::sleep(next).await;
                match on_tick() {
                    Some(interval) => next = interval,
                    None => break,
                }
            }
        });

        Registration {
            abort,
            resume: Arc::new(Notify::new()),
        }
    }

    /// Installs the hook that runs once at startup and again after every
    /// [`wake`](Self::wake), before the loop goes back to waiting.
    ///
    /// Wakes that arrive while the hook is running coalesce into one more run.
    pub fn set_before_sleep<F>(&self, mut hook: F) -> Registration
    where
        F: FnMut() + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let abort = self.spawn(async move {
            loop {
                hook();
                inner.wake.notified().await;
            }
        });

        Registration {
            abort,
            resume: Arc::new(Notify::new()),
        }
    }

    /// Schedules another run of the before-sleep hook.
    pub fn wake(&self) {
        trace!("reactor woken");
        self.inner.wake.notify_one();
    }

    /// Asks [`Reactor::run`] to return. Idempotent; a stop issued before
    /// `run` is called makes `run` return immediately.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            debug!("reactor stop requested");
            self.inner.stop.notify_one();
        }
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

/// The event loop itself. Owns the runtime; dropping it cancels every
/// registration.
pub struct Reactor {
    runtime: Runtime,
    handle: ReactorHandle,
}

impl Reactor {
    /// Builds a reactor backed by a fresh current-thread runtime.
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = ReactorHandle {
            inner: Arc::new(Inner {
                runtime: runtime.handle().clone(),
                stop: Notify::new(),
                stopped: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        };

        Ok(Self { runtime, handle })
    }

    /// Returns a handle for registering callbacks.
    pub fn handle(&self) -> ReactorHandle {
        self.handle.clone()
    }

    /// Drives every registration on the calling thread until
    /// [`ReactorHandle::stop`] is called.
    pub fn run(&self) {
        let inner = Arc::clone(&self.handle.inner);
        self.runtime.block_on(async move {
            if !inner.stopped.load(Ordering::Acquire) {
                inner.stop.notified().await;
            }
        });
        debug!("reactor loop exited");
    }
}
