//! Timed-event scheduling on a single background dispatcher thread.
//!
//! Callers register a callback to run once after a delay and may cancel it
//! before it fires. One dispatcher thread per [`Scheduler`] waits on a
//! condvar for the next due time, drains everything due under the store's
//! mutex, then executes the batch with the mutex released. Callbacks either
//! run on the dispatcher thread (`Background`) or are handed to an injected
//! foreground executor (`Foreground`), and every execution is wrapped in an
//! isolation boundary so one failing callback never takes down the
//! dispatcher or the events behind it.
//!
//! ```
//! use std::time::Duration;
//!
//! use chime_core::{DispatchTarget, Scheduler};
//!
//! let scheduler = Scheduler::start();
//! let id = scheduler.schedule(Duration::from_millis(10), DispatchTarget::Background, || {
//!     // runs on the dispatcher thread ~10ms from now
//! });
//! scheduler.cancel(id); // best-effort; a no-op if it already fired
//! scheduler.shutdown();
//! ```
//!
//! Known limitation, inherited deliberately: a `Background` callback that
//! never returns stalls all subsequent due-time processing. There is no
//! per-callback timeout.

mod dispatch;
mod scheduler;
mod store;

pub use scheduler::Scheduler;

// Re-export the domain types so most users need only this crate.
pub use chime_types::{
    BoxError, CallbackError, DispatchTarget, ErrorHandler, EventId, ForegroundExecutor,
};
