//! The dispatcher loop and its shared state.
//!
//! One long-lived background thread per scheduler waits for the next due
//! time on a condvar, drains everything due under the store's mutex, then
//! executes the drained batch with the mutex released. Draining a snapshot
//! first means one slow callback can never stall `schedule`/`cancel` calls
//! from other threads.
//!
//! Every callback runs through [`run_isolated`], an explicit isolation
//! boundary that converts panics and returned errors into a
//! [`CallbackError`] for the installed [`ErrorHandler`]. A failing callback
//! never terminates the dispatcher and never prevents subsequent due
//! events from running.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chime_types::{CallbackError, DispatchTarget, ErrorHandler, EventId, ForegroundExecutor};

use crate::store::{EventStore, Work};

/// State shared between the facade and the dispatcher thread.
pub(crate) struct Shared {
    /// The store, the id counter, and the shutdown flag, all under the one
    /// lock. The single discipline around it: no callback executes while
    /// it is held.
    pub(crate) inner: Mutex<Inner>,
    /// Signalled by `schedule`, a successful `cancel`, and `shutdown` so a
    /// newly scheduled earlier event (or a cancellation that changes the
    /// earliest due time) wakes the dispatcher promptly.
    pub(crate) wakeup: Condvar,
    /// Foreground execution context, if one was injected at construction.
    pub(crate) foreground: Option<Arc<dyn ForegroundExecutor>>,
    /// Failure collaborator; `None` means the default `tracing` sink.
    pub(crate) error_handler: Mutex<Option<Arc<dyn ErrorHandler>>>,
}

pub(crate) struct Inner {
    pub(crate) store: EventStore,
    pub(crate) next_id: u64,
    pub(crate) shutdown: bool,
}

impl Shared {
    pub(crate) fn new(foreground: Option<Arc<dyn ForegroundExecutor>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store: EventStore::default(),
                next_id: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            foreground,
            error_handler: Mutex::new(None),
        }
    }

    /// Lock the store state, recovering from poisoning. Callbacks never run
    /// under this lock, so a poisoned guard still protects consistent
    /// state; the panic that poisoned it belonged to some caller thread.
    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_error_handler(&self) -> Option<Arc<dyn ErrorHandler>> {
        self.error_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Body of the dispatcher thread: `Waiting -> Draining -> Waiting` until
/// shutdown is requested.
pub(crate) fn dispatcher_loop(shared: &Shared) {
    loop {
        let batch = {
            let mut inner = shared.lock_inner();
            loop {
                if inner.shutdown {
                    tracing::debug!("dispatcher stopping");
                    return;
                }
                let now = Instant::now();
                match inner.store.peek_earliest_due() {
                    // Nothing pending: sleep until a schedule/cancel/shutdown
                    // signal. Spurious wakeups just re-evaluate.
                    None => {
                        inner = shared
                            .wakeup
                            .wait(inner)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    Some(due) if due <= now => break,
                    Some(due) => {
                        let (guard, _timed_out) = shared
                            .wakeup
                            .wait_timeout(inner, due - now)
                            .unwrap_or_else(PoisonError::into_inner);
                        inner = guard;
                    }
                }
            }
            // One snapshot per iteration: records becoming due while this
            // batch executes wait for the next pass.
            inner.store.pop_all_due_by(Instant::now())
        };

        let handler = shared.current_error_handler();
        for record in batch {
            dispatch_one(shared, record.id, record.target, record.work, &handler);
        }
    }
}

fn dispatch_one(
    shared: &Shared,
    id: EventId,
    target: DispatchTarget,
    work: Work,
    handler: &Option<Arc<dyn ErrorHandler>>,
) {
    match target {
        DispatchTarget::Background => {
            if let Err(error) = run_isolated(id, work) {
                deliver(handler.as_ref(), error);
            }
        }
        DispatchTarget::Foreground => match &shared.foreground {
            Some(executor) => {
                let handler = handler.clone();
                executor.invoke_later(Box::new(move || {
                    if let Err(error) = run_isolated(id, work) {
                        deliver(handler.as_ref(), error);
                    }
                }));
            }
            None => {
                tracing::warn!(
                    %id,
                    "no foreground executor configured; running foreground event on dispatcher thread"
                );
                if let Err(error) = run_isolated(id, work) {
                    deliver(handler.as_ref(), error);
                }
            }
        },
    }
}

/// The isolation boundary: run one callback, converting a panic or a
/// returned error into a [`CallbackError`]. Called with no locks held, on
/// whichever thread executes the callback.
pub(crate) fn run_isolated(id: EventId, work: Work) -> Result<(), CallbackError> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(CallbackError::Failed { id, source }),
        Err(payload) => Err(CallbackError::Panicked {
            id,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn deliver(handler: Option<&Arc<dyn ErrorHandler>>, error: CallbackError) {
    match handler {
        Some(handler) => handler.report_error(error),
        None => tracing::error!(id = %error.id(), %error, "timed event callback failed"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_isolated_passes_through_success() {
        let result = run_isolated(EventId::from_raw(1), Box::new(|| Ok(())));
        assert!(result.is_ok());
    }

    #[test]
    fn run_isolated_converts_panics() {
        let result = run_isolated(EventId::from_raw(2), Box::new(|| panic!("kaboom")));
        match result {
            Err(CallbackError::Panicked { id, message }) => {
                assert_eq!(id, EventId::from_raw(2));
                assert_eq!(message, "kaboom");
            }
            other => panic!("expected Panicked, got {other:?}"),
        }
    }

    #[test]
    fn run_isolated_converts_returned_errors() {
        let result = run_isolated(EventId::from_raw(3), Box::new(|| Err("no luck".into())));
        match result {
            Err(CallbackError::Failed { id, source }) => {
                assert_eq!(id, EventId::from_raw(3));
                assert_eq!(source.to_string(), "no luck");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn panic_message_handles_string_payloads() {
        let from_str: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(from_str.as_ref()), "static");

        let from_string: Box<dyn Any + Send> = Box::new("owned".to_string());
        assert_eq!(panic_message(from_string.as_ref()), "owned");

        let opaque: Box<dyn Any + Send> = Box::new(17_u32);
        assert_eq!(panic_message(opaque.as_ref()), "non-string panic payload");
    }
}
