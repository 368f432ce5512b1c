//! Ordered store of pending timed events.
//!
//! A `BTreeMap` keyed by `(due, id)` keeps records sorted by due time, with
//! registration order breaking ties. The store itself is not synchronized;
//! the scheduler wraps it in the single mutex shared with the dispatcher,
//! and no callback ever executes while that mutex is held.

use std::collections::BTreeMap;
use std::mem;
use std::time::Instant;

use chime_types::{BoxError, DispatchTarget, EventId};

/// The shape every callback takes once it reaches the store. Infallible
/// closures are wrapped at the facade so the store holds one callback type.
pub(crate) type Work = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// One pending timed event: due time, identity, dispatch target, and the
/// work to run. Created by `schedule`, removed by `cancel` or a drain,
/// never reinserted.
pub(crate) struct EventRecord {
    pub(crate) id: EventId,
    pub(crate) due: Instant,
    pub(crate) target: DispatchTarget,
    pub(crate) work: Work,
}

/// Pending events ordered by `(due, id)`.
#[derive(Default)]
pub(crate) struct EventStore {
    events: BTreeMap<(Instant, EventId), EventRecord>,
}

impl EventStore {
    /// Add a record, maintaining sort order. Always succeeds; ids are
    /// unique for the process lifetime, so keys never collide.
    pub(crate) fn insert(&mut self, record: EventRecord) {
        self.events.insert((record.due, record.id), record);
    }

    /// Remove the record with this id if present. Idempotent: removing
    /// twice, or an id never inserted, simply returns `false`.
    pub(crate) fn remove_by_id(&mut self, id: EventId) -> bool {
        let key = self
            .events
            .keys()
            .find(|(_, event_id)| *event_id == id)
            .copied();
        match key {
            Some(key) => {
                self.events.remove(&key);
                true
            }
            None => false,
        }
    }

    /// The smallest due time currently present, or `None` if empty.
    pub(crate) fn peek_earliest_due(&self) -> Option<Instant> {
        self.events.keys().next().map(|(due, _)| *due)
    }

    /// Atomically remove and return, in sort order, every record with
    /// `due <= now`.
    pub(crate) fn pop_all_due_by(&mut self, now: Instant) -> Vec<EventRecord> {
        // Ids are assigned from 0, so `u64::MAX` is unreachable and the
        // split point lands after every record with `due == now`.
        let split_at = (now, EventId::from_raw(u64::MAX));
        let still_pending = self.events.split_off(&split_at);
        let due = mem::replace(&mut self.events, still_pending);
        due.into_values().collect()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record(id: u64, due: Instant) -> EventRecord {
        EventRecord {
            id: EventId::from_raw(id),
            due,
            target: DispatchTarget::Background,
            work: Box::new(|| Ok(())),
        }
    }

    #[test]
    fn pop_returns_due_records_in_due_then_id_order() {
        let base = Instant::now();
        let mut store = EventStore::default();
        store.insert(record(3, base + Duration::from_millis(10)));
        store.insert(record(1, base + Duration::from_millis(20)));
        store.insert(record(2, base + Duration::from_millis(10)));

        let due = store.pop_all_due_by(base + Duration::from_millis(20));
        let ids: Vec<u64> = due.iter().map(|r| r.id.as_u64()).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert!(store.is_empty());
    }

    #[test]
    fn pop_boundary_includes_records_due_exactly_now() {
        let base = Instant::now();
        let mut store = EventStore::default();
        store.insert(record(1, base));
        store.insert(record(2, base + Duration::from_millis(1)));

        let due = store.pop_all_due_by(base);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, EventId::from_raw(1));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.peek_earliest_due(),
            Some(base + Duration::from_millis(1))
        );
    }

    #[test]
    fn remove_by_id_is_idempotent() {
        let base = Instant::now();
        let mut store = EventStore::default();
        store.insert(record(5, base));

        assert!(store.remove_by_id(EventId::from_raw(5)));
        assert!(!store.remove_by_id(EventId::from_raw(5)));
        assert!(!store.remove_by_id(EventId::from_raw(9999)));
        assert!(store.is_empty());
    }

    #[test]
    fn peek_earliest_due_does_not_mutate() {
        let base = Instant::now();
        let mut store = EventStore::default();
        assert_eq!(store.peek_earliest_due(), None);

        store.insert(record(1, base + Duration::from_millis(50)));
        store.insert(record(2, base + Duration::from_millis(10)));
        assert_eq!(
            store.peek_earliest_due(),
            Some(base + Duration::from_millis(10))
        );
        assert_eq!(store.len(), 2);
    }
}
