//! Read-only containers and the `Source` seam.
//!
//! [`Readable`] is the handle the rest of the world consumes: it can be
//! subscribed to but not written. Internally it is either a shared cell
//! (a derivation, a `readable` with a start notifier, or a writable viewed
//! through [`Writable::read_only`]) or an inert constant.
//!
//! [`Source`] is the trait seam the derivation engine subscribes through;
//! it is implemented by both handle types so derivations can be fed
//! writables and readables alike.

use std::fmt::Debug;
use std::rc::Rc;

use super::subscriber::Unsubscriber;
use super::writable::{RawStore, Setter, StopFn, Writable};

/// A read-only value container.
pub struct Readable<T: Clone + 'static> {
    repr: Repr<T>,
}

enum Repr<T: Clone + 'static> {
    Cell(Rc<RawStore<T>>),
    Constant(Rc<T>),
}

impl<T: Clone + 'static> Readable<T> {
    pub(crate) fn from_raw(raw: Rc<RawStore<T>>) -> Self {
        Self {
            repr: Repr::Cell(raw),
        }
    }

    /// Subscribe with a delivery callback only.
    pub fn subscribe(&self, run: impl FnMut(&T) + 'static) -> Unsubscriber {
        self.subscribe_full(run, || {}, || {})
    }

    /// Subscribe with the full delivery / invalidate / revalidate triple.
    ///
    /// For a constant the callback fires once, synchronously, and the
    /// returned handle removes nothing; invalidate and revalidate never
    /// fire.
    pub fn subscribe_full(
        &self,
        mut run: impl FnMut(&T) + 'static,
        invalidate: impl FnMut() + 'static,
        revalidate: impl FnMut() + 'static,
    ) -> Unsubscriber {
        match &self.repr {
            Repr::Cell(raw) => raw.subscribe(run, invalidate, revalidate),
            Repr::Constant(value) => {
                run(value);
                Unsubscriber::noop()
            }
        }
    }

    /// Number of live subscriptions. Constants track none.
    pub fn subscriber_count(&self) -> usize {
        match &self.repr {
            Repr::Cell(raw) => raw.subscriber_count(),
            Repr::Constant(_) => 0,
        }
    }
}

impl<T: Clone + 'static> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self {
            repr: match &self.repr {
                Repr::Cell(raw) => Repr::Cell(Rc::clone(raw)),
                Repr::Constant(value) => Repr::Constant(Rc::clone(value)),
            },
        }
    }
}

impl<T: Clone + Debug + 'static> Debug for Readable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.repr {
            Repr::Cell(raw) => f
                .debug_struct("Readable")
                .field("value", &raw.current())
                .field("subscriber_count", &raw.subscriber_count())
                .finish(),
            Repr::Constant(value) => f.debug_struct("Readable").field("value", value).finish(),
        }
    }
}

/// Anything a derivation can subscribe to.
pub trait Source {
    /// The value type this source produces.
    type Value: Clone + 'static;

    /// Subscribe with the full delivery / invalidate / revalidate triple.
    fn subscribe_full(
        &self,
        run: impl FnMut(&Self::Value) + 'static,
        invalidate: impl FnMut() + 'static,
        revalidate: impl FnMut() + 'static,
    ) -> Unsubscriber;
}

impl<T: Clone + 'static> Source for Readable<T> {
    type Value = T;

    fn subscribe_full(
        &self,
        run: impl FnMut(&T) + 'static,
        invalidate: impl FnMut() + 'static,
        revalidate: impl FnMut() + 'static,
    ) -> Unsubscriber {
        Readable::subscribe_full(self, run, invalidate, revalidate)
    }
}

impl<T: Clone + 'static> Source for Writable<T> {
    type Value = T;

    fn subscribe_full(
        &self,
        run: impl FnMut(&T) + 'static,
        invalidate: impl FnMut() + 'static,
        revalidate: impl FnMut() + 'static,
    ) -> Unsubscriber {
        Writable::subscribe_full(self, run, invalidate, revalidate)
    }
}

/// Create a read-only container driven entirely by its start notifier.
pub fn readable<T: Clone + 'static>(
    trigger: impl Fn(bool, &T, Option<&T>) -> bool + 'static,
    initial: Option<T>,
    start: impl FnMut(Setter<T>) -> Option<StopFn> + 'static,
) -> Readable<T> {
    Readable::from_raw(RawStore::new(trigger, initial, start))
}

/// A container that always holds `value` and never changes.
pub fn constant<T: Clone + 'static>(value: T) -> Readable<T> {
    Readable {
        repr: Repr::Constant(Rc::new(value)),
    }
}

/// Synchronous snapshot read: subscribe, capture the immediate delivery,
/// unsubscribe.
///
/// Returns `None` for a container that does not currently hold a value
/// (a dormant asynchronous derivation, or a `readable` with no initial
/// value whose notifier has not set one yet).
pub fn get<S: Source>(store: &S) -> Option<S::Value> {
    let captured = Rc::new(std::cell::RefCell::new(None));
    let slot = Rc::clone(&captured);
    let mut subscription = store.subscribe_full(
        move |value| *slot.borrow_mut() = Some(value.clone()),
        || {},
        || {},
    );
    subscription.unsubscribe();
    let value = captured.borrow_mut().take();
    value
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
