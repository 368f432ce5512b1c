//! Public scheduler facade.
//!
//! A [`Scheduler`] owns one dispatcher thread plus the shared event store.
//! Callers register work with [`schedule`](Scheduler::schedule) and get back
//! an [`EventId`] usable with [`cancel`](Scheduler::cancel); everything else
//! happens on the dispatcher. The historical "one static scheduler for the
//! whole process" shape survives as [`Scheduler::global`], a thin wrapper
//! around an ordinary instance.

use std::sync::{Arc, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chime_types::{BoxError, DispatchTarget, ErrorHandler, EventId, ForegroundExecutor};

use crate::dispatch::{Shared, dispatcher_loop};
use crate::store::EventRecord;

static GLOBAL: OnceLock<Scheduler> = OnceLock::new();

/// A timed-event scheduler backed by a single background dispatcher thread.
///
/// `schedule` and `cancel` only touch the event store under its mutex and
/// return quickly; they never block on the dispatcher or on any callback.
/// Dropping the scheduler performs the same best-effort stop as
/// [`shutdown`](Scheduler::shutdown): the dispatcher is woken, told to
/// exit, and joined; pending events are discarded without running.
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Start a scheduler with no foreground executor.
    ///
    /// `Foreground` events scheduled on such an instance run on the
    /// dispatcher thread, with a warning logged.
    #[must_use]
    pub fn start() -> Self {
        Self::start_inner(None)
    }

    /// Start a scheduler that hands `Foreground` events to `executor`.
    #[must_use]
    pub fn with_foreground(executor: Arc<dyn ForegroundExecutor>) -> Self {
        Self::start_inner(Some(executor))
    }

    fn start_inner(foreground: Option<Arc<dyn ForegroundExecutor>>) -> Self {
        let shared = Arc::new(Shared::new(foreground));
        let worker = thread::Builder::new()
            .name("chime-dispatcher".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || dispatcher_loop(&shared)
            })
            .expect("failed to spawn chime dispatcher thread");
        tracing::debug!("scheduler started");
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// The lazily-started process-wide instance.
    ///
    /// It has no foreground executor and is never shut down; it lives until
    /// process exit. Code that wants foreground marshalling or an explicit
    /// lifecycle should own its own instance instead.
    pub fn global() -> &'static Scheduler {
        GLOBAL.get_or_init(Scheduler::start)
    }

    /// Register `callback` to run once, `delay` from now, on `target`.
    ///
    /// A zero delay means "as soon as possible". Always succeeds; the
    /// returned id is the cancellation handle.
    pub fn schedule<F>(&self, delay: Duration, target: DispatchTarget, callback: F) -> EventId
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_fallible(delay, target, move || {
            callback();
            Ok(())
        })
    }

    /// Like [`schedule`](Scheduler::schedule), for callbacks that report
    /// failure by returning `Err`. The error reaches the installed
    /// [`ErrorHandler`] exactly like a panic would.
    pub fn schedule_fallible<F>(
        &self,
        delay: Duration,
        target: DispatchTarget,
        callback: F,
    ) -> EventId
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        let due = Instant::now() + delay;
        let mut inner = self.shared.lock_inner();
        let id = EventId::from_raw(inner.next_id);
        inner.next_id += 1;
        inner.store.insert(EventRecord {
            id,
            due,
            target,
            work: Box::new(callback),
        });
        drop(inner);
        // Wake the dispatcher in case this event is now the earliest.
        self.shared.wakeup.notify_one();
        tracing::trace!(%id, ?delay, ?target, "scheduled timed event");
        id
    }

    /// Cancel a pending event.
    ///
    /// Returns `true` if the event was still pending and is now guaranteed
    /// never to run. Returns `false` if it already fired, was already
    /// cancelled, was snapshotted by a concurrent drain, or never existed;
    /// all of those are well-defined no-ops, not errors.
    pub fn cancel(&self, id: EventId) -> bool {
        let mut inner = self.shared.lock_inner();
        let removed = inner.store.remove_by_id(id);
        drop(inner);
        if removed {
            // The earliest due time may have changed; re-evaluate the wait.
            self.shared.wakeup.notify_one();
        }
        tracing::trace!(%id, removed, "cancel timed event");
        removed
    }

    /// Install (or replace) the collaborator that receives callback
    /// failures. Until one is installed, failures go to a `tracing::error!`
    /// sink.
    pub fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        *self
            .shared
            .error_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Stop the dispatcher and wait for it to exit.
    ///
    /// Pending events are discarded without running. A `Background`
    /// callback already executing runs to completion first, since the
    /// dispatcher only checks the flag between iterations.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let mut inner = self.shared.lock_inner();
            inner.shutdown = true;
        }
        self.shared.wakeup.notify_all();
        if worker.join().is_err() {
            // The dispatcher isolates callback panics, so this only fires
            // if the loop itself panicked.
            tracing::error!("dispatcher thread panicked during shutdown");
        }
        tracing::debug!("scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
