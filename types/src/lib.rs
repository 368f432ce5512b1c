//! Core domain types for Chime.
//!
//! This crate contains pure domain types with no IO and no threads.
//! Everything here can be used from any layer without pulling in the
//! dispatcher machinery: the event identifier, the dispatch target, the
//! callback failure type, and the two collaborator traits the scheduler
//! consumes (`ErrorHandler`, `ForegroundExecutor`).

use std::error::Error;
use std::fmt;

use thiserror::Error;

/// Boxed error type for caller-supplied failure causes.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

// ============================================================================
// Event Identity
// ============================================================================

/// Identifier for a scheduled timed event.
///
/// Assigned from a monotonically increasing per-scheduler counter at
/// registration time and never reused. An id serves two purposes: it breaks
/// ties between events sharing a due time (first registered fires first),
/// and it is the handle passed to `cancel`. Ids are never revalidated:
/// cancelling an unknown or already-fired id is a no-op, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    /// Wrap a raw counter value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Dispatch Target
// ============================================================================

/// Where a scheduled callback runs once it becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DispatchTarget {
    /// Run synchronously on the scheduler's own dispatcher thread.
    ///
    /// Background callbacks are strictly sequential: two events due at the
    /// same instant never execute concurrently with each other.
    #[default]
    Background,
    /// Hand the callback to the injected [`ForegroundExecutor`] for
    /// asynchronous execution on a designated foreground context (e.g. a
    /// UI event loop). The dispatcher never waits for completion.
    Foreground,
}

// ============================================================================
// Callback Failures
// ============================================================================

/// A failure raised while running a scheduled callback.
///
/// Produced by the scheduler's isolation boundary and delivered to the
/// installed [`ErrorHandler`] on the thread that ran the callback. Callers
/// of `schedule`/`cancel` never observe these directly.
#[derive(Debug, Error)]
pub enum CallbackError {
    /// The callback panicked. The panic payload is rendered as text.
    #[error("timed event {id} panicked: {message}")]
    Panicked {
        /// Id of the failing event.
        id: EventId,
        /// Panic payload, if it was a string; a placeholder otherwise.
        message: String,
    },
    /// A fallible callback returned an error.
    #[error("timed event {id} failed")]
    Failed {
        /// Id of the failing event.
        id: EventId,
        /// The error the callback returned.
        #[source]
        source: BoxError,
    },
}

impl CallbackError {
    /// Id of the event whose callback failed.
    #[must_use]
    pub fn id(&self) -> EventId {
        match self {
            Self::Panicked { id, .. } | Self::Failed { id, .. } => *id,
        }
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Receives callback failures from the scheduler.
///
/// Called on the thread that ran the failing callback: the dispatcher
/// thread for `Background` events, the foreground thread for `Foreground`
/// events. Implementations must not block significantly and must not
/// panic; the handler is the last line of reporting, not a retry point.
pub trait ErrorHandler: Send + Sync {
    /// Called once per failing callback.
    fn report_error(&self, error: CallbackError);
}

/// Marshals work onto a designated foreground execution context.
///
/// The scheduler hands `Foreground` callbacks here and treats submission as
/// fire-and-forget; it never waits for the work to complete, so a slow
/// foreground context cannot stall due-time processing. Modeled as an
/// injected capability so the scheduler has no dependency on any particular
/// UI framework.
pub trait ForegroundExecutor: Send + Sync {
    /// Schedule `work` for later, asynchronous execution on the foreground
    /// context. Ordering beyond submission order is up to the executor.
    fn invoke_later(&self, work: Box<dyn FnOnce() + Send>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_order_by_raw_value() {
        let a = EventId::from_raw(1);
        let b = EventId::from_raw(2);
        assert!(a < b);
        assert_eq!(a, EventId::from_raw(1));
        assert_eq!(b.as_u64(), 2);
    }

    #[test]
    fn event_id_displays_as_plain_number() {
        assert_eq!(EventId::from_raw(42).to_string(), "42");
    }

    #[test]
    fn callback_error_reports_failing_id() {
        let panicked = CallbackError::Panicked {
            id: EventId::from_raw(7),
            message: "boom".to_string(),
        };
        assert_eq!(panicked.id(), EventId::from_raw(7));
        assert_eq!(panicked.to_string(), "timed event 7 panicked: boom");

        let failed = CallbackError::Failed {
            id: EventId::from_raw(9),
            source: "disk on fire".into(),
        };
        assert_eq!(failed.id(), EventId::from_raw(9));
        assert_eq!(failed.to_string(), "timed event 9 failed");
    }
}
