//! Subscriber types for the store protocol.
//!
//! A subscriber is any party observing a value container. Each subscription
//! is a record of three callbacks:
//!
//! - `run`: delivers a new value (scheduled through the action queue),
//! - `invalidate`: the synchronous "a new value is coming" pre-signal,
//! - `revalidate`: the "the value was recomputed but is unchanged" signal.
//!
//! Records are keyed by a [`SubscriberId`] so a subscription can remove
//! exactly its own record, and the container iterates records in insertion
//! order when notifying.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// Each subscription gets a unique ID when created. The ID keys the
/// container's subscriber registry and makes unsubscription exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A value-delivery callback.
pub(crate) type RunCallback<T> = Rc<RefCell<dyn FnMut(&T)>>;

/// An invalidate or revalidate callback.
pub(crate) type SignalCallback = Rc<RefCell<dyn FnMut()>>;

/// One subscription's callback triple.
pub(crate) struct SubscriberRecord<T> {
    pub(crate) run: RunCallback<T>,
    pub(crate) invalidate: SignalCallback,
    pub(crate) revalidate: SignalCallback,
}

impl<T> SubscriberRecord<T> {
    pub(crate) fn new(
        run: impl FnMut(&T) + 'static,
        invalidate: impl FnMut() + 'static,
        revalidate: impl FnMut() + 'static,
    ) -> Self
    where
        T: 'static,
    {
        Self {
            run: Rc::new(RefCell::new(run)),
            invalidate: Rc::new(RefCell::new(invalidate)),
            revalidate: Rc::new(RefCell::new(revalidate)),
        }
    }
}

/// Handle that removes one subscription.
///
/// Calling [`unsubscribe`](Self::unsubscribe) more than once is a no-op.
/// Dropping the handle without calling it leaves the subscription in place;
/// removal is always explicit.
#[must_use = "dropping an Unsubscriber leaves the subscription active"]
pub struct Unsubscriber {
    remove: Option<Box<dyn FnOnce()>>,
}

impl Unsubscriber {
    /// Wrap a removal callback.
    pub(crate) fn new(remove: impl FnOnce() + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    /// A handle that removes nothing, as returned by constant containers.
    pub(crate) fn noop() -> Self {
        Self { remove: None }
    }

    /// Remove the subscription. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Unsubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscriber")
            .field("spent", &self.remove.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn unsubscriber_runs_exactly_once() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let mut handle = Unsubscriber::new(move || {
            calls_clone.set(calls_clone.get() + 1);
        });

        assert_eq!(calls.get(), 0);
        handle.unsubscribe();
        assert_eq!(calls.get(), 1);
        handle.unsubscribe();
        handle.unsubscribe();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn noop_unsubscriber_does_nothing() {
        let mut handle = Unsubscriber::noop();
        handle.unsubscribe();
        handle.unsubscribe();
    }
}
