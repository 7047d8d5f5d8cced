//! Writable value containers.
//!
//! A container holds a current value, a registry of subscribers, and a
//! trigger predicate deciding which writes count as real changes. It is the
//! base cell every other primitive in this crate is built from.
//!
//! # Notification protocol
//!
//! An accepted `set` runs in two phases while the container is active:
//!
//! 1. every subscriber's `invalidate` callback runs synchronously, in
//!    subscription order, the "a new value is coming" pre-signal that lets
//!    a downstream derivation mark its pending state before any value lands;
//! 2. every subscriber's `run` callback, bound to the new value, is
//!    enqueued onto the action queue as one batch.
//!
//! A `set` the trigger rejects mutates nothing and schedules nothing; it
//! delivers the `revalidate` signal instead, telling subscribers the value
//! was reconsidered and is unchanged so they can clear pending state.
//!
//! Every pass runs inside a queue scope, and a write made from one of the
//! pass's own callbacks does not recurse into it: while an invalidate or
//! revalidate loop is mid-flight the store defers the reentrant write's
//! whole pass onto the queue, so it runs breadth-first after the current
//! one. The same holds for a write made during the synchronous initial
//! delivery in `subscribe`.
//!
//! # Lifecycle
//!
//! The container is dormant until its first subscriber arrives, at which
//! point the start notifier runs with a [`Setter`] for driving the value
//! from the outside (timers, upstream subscriptions). The notifier's
//! returned stop callback runs when the last subscriber leaves.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::queue::{Action, ActionQueue};

use super::subscriber::{SubscriberId, SubscriberRecord, Unsubscriber};

/// Cleanup callback returned by a start notifier, invoked when the
/// subscriber count returns to zero.
pub type StopFn = Box<dyn FnOnce()>;

type TriggerFn<T> = Box<dyn Fn(bool, &T, Option<&T>) -> bool>;
type StartFn<T> = Box<dyn FnMut(Setter<T>) -> Option<StopFn>>;

/// The shared inner cell behind [`Writable`] and
/// [`Readable`](super::readable::Readable).
pub(crate) struct RawStore<T> {
    /// Current value. `None` for a container that has never held one.
    value: RefCell<Option<T>>,
    /// True until the first trigger-accepted set.
    initial: Cell<bool>,
    trigger: TriggerFn<T>,
    start: RefCell<StartFn<T>>,
    stop: RefCell<Option<StopFn>>,
    subscribers: RefCell<IndexMap<SubscriberId, Rc<SubscriberRecord<T>>>>,
    /// True between the start notifier returning and the last unsubscribe.
    active: Cell<bool>,
    /// True while this store's invalidate or revalidate callbacks are
    /// mid-flight. A write arriving then defers its pass onto the queue
    /// instead of re-entering the borrowed callback cells. Shared so a
    /// deferred pass can raise it again when it runs.
    notifying: Rc<Cell<bool>>,
    queue: ActionQueue,
}

impl<T: Clone + 'static> RawStore<T> {
    pub(crate) fn new(
        trigger: impl Fn(bool, &T, Option<&T>) -> bool + 'static,
        value: Option<T>,
        start: impl FnMut(Setter<T>) -> Option<StopFn> + 'static,
    ) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(value),
            initial: Cell::new(true),
            trigger: Box::new(trigger),
            start: RefCell::new(Box::new(start)),
            stop: RefCell::new(None),
            subscribers: RefCell::new(IndexMap::new()),
            active: Cell::new(false),
            notifying: Rc::new(Cell::new(false)),
            queue: ActionQueue::shared(),
        })
    }

    /// Register a subscription and synchronously deliver the current value
    /// to it, if one exists.
    pub(crate) fn subscribe(
        self: &Rc<Self>,
        run: impl FnMut(&T) + 'static,
        invalidate: impl FnMut() + 'static,
        revalidate: impl FnMut() + 'static,
    ) -> Unsubscriber {
        let id = SubscriberId::new();
        let record = Rc::new(SubscriberRecord::new(run, invalidate, revalidate));

        let first = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.insert(id, Rc::clone(&record));
            subscribers.len() == 1
        };

        if first {
            // If the start notifier panics we must not leave a phantom
            // record behind; a derivation's notifier also unsubscribes its
            // own upstreams on that path.
            let mut guard = StartGuard {
                store: self,
                id,
                armed: true,
            };
            let stop = (self.start.borrow_mut())(Setter {
                store: Rc::downgrade(self),
            });
            guard.armed = false;
            *self.stop.borrow_mut() = stop;
            self.active.set(true);
        }

        let current = self.value.borrow().clone();
        if let Some(value) = current {
            // The callback may write to this store. Inside a queue scope
            // such a write queues its deliveries, so nothing re-enters the
            // cell borrowed for this initial delivery.
            self.queue.scope(|| (record.run.borrow_mut())(&value));
        }

        let weak = Rc::downgrade(self);
        Unsubscriber::new(move || {
            if let Some(store) = weak.upgrade() {
                store.remove_subscriber(id);
            }
        })
    }

    fn remove_subscriber(&self, id: SubscriberId) {
        let now_empty = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.shift_remove(&id).is_some() && subscribers.is_empty()
        };
        if now_empty {
            self.active.set(false);
            let stop = self.stop.borrow_mut().take();
            if let Some(stop) = stop {
                stop();
            }
        }
    }

    /// Trigger-gated write.
    pub(crate) fn set(&self, new_value: T) {
        let accepted = {
            let value = self.value.borrow();
            (self.trigger)(self.initial.get(), &new_value, value.as_ref())
        };
        if !accepted {
            self.revalidate_subscribers();
            return;
        }

        self.initial.set(false);
        *self.value.borrow_mut() = Some(new_value.clone());

        if !self.active.get() {
            return;
        }

        // Snapshot first: a subscriber removed by one of these callbacks
        // must not join the batch, and already-built deliveries close over
        // the run callback directly.
        let records = self.snapshot();
        if self.notifying.get() {
            // A write from one of this store's own invalidate or
            // revalidate callbacks. Their cells are borrowed right now,
            // so the whole pass joins the queue and runs after the
            // current one.
            let notifying = Rc::clone(&self.notifying);
            let queue = self.queue.clone();
            self.queue.enqueue([Box::new(move || {
                notify_pass(&notifying, &queue, &records, &new_value);
            }) as Action]);
            return;
        }
        self.queue
            .scope(|| notify_pass(&self.notifying, &self.queue, &records, &new_value));
    }

    pub(crate) fn update(&self, f: impl FnOnce(&T) -> T) {
        let current = self.value.borrow().clone();
        if let Some(current) = current {
            self.set(f(&current));
        }
    }

    pub(crate) fn invalidate_subscribers(&self) {
        self.signal_subscribers(SignalKind::Invalidate);
    }

    pub(crate) fn revalidate_subscribers(&self) {
        self.signal_subscribers(SignalKind::Revalidate);
    }

    fn signal_subscribers(&self, kind: SignalKind) {
        if !self.active.get() {
            return;
        }
        let records = self.snapshot();
        if self.notifying.get() {
            let notifying = Rc::clone(&self.notifying);
            self.queue.enqueue([Box::new(move || {
                signal_pass(&notifying, &records, kind);
            }) as Action]);
            return;
        }
        self.queue
            .scope(|| signal_pass(&self.notifying, &records, kind));
    }

    pub(crate) fn current(&self) -> Option<T> {
        self.value.borrow().clone()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    fn snapshot(&self) -> SmallVec<[Rc<SubscriberRecord<T>>; 4]> {
        self.subscribers.borrow().values().cloned().collect()
    }
}

#[derive(Clone, Copy)]
enum SignalKind {
    Invalidate,
    Revalidate,
}

/// The two-phase notification for one accepted write: invalidate every
/// record in order, then enqueue all run deliveries as one batch.
///
/// Always runs with the queue in a scope or mid-drain, so the enqueues it
/// makes append rather than recursing into another pass.
fn notify_pass<T: Clone + 'static>(
    notifying: &Cell<bool>,
    queue: &ActionQueue,
    records: &[Rc<SubscriberRecord<T>>],
    value: &T,
) {
    {
        let _signaling = SignalGuard::raise(notifying);
        for record in records {
            (record.invalidate.borrow_mut())();
        }
    }
    let actions: Vec<Action> = records
        .iter()
        .map(|record| {
            let run = Rc::clone(&record.run);
            let value = value.clone();
            Box::new(move || (run.borrow_mut())(&value)) as Action
        })
        .collect();
    queue.enqueue(actions);
}

fn signal_pass<T>(notifying: &Cell<bool>, records: &[Rc<SubscriberRecord<T>>], kind: SignalKind) {
    let _signaling = SignalGuard::raise(notifying);
    for record in records {
        let callback = match kind {
            SignalKind::Invalidate => &record.invalidate,
            SignalKind::Revalidate => &record.revalidate,
        };
        (callback.borrow_mut())();
    }
}

/// Flags the store as mid-signal while its callback cells are borrowed,
/// releasing on unwind.
struct SignalGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> SignalGuard<'a> {
    fn raise(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl Drop for SignalGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Removes the just-added subscriber record when a start notifier unwinds.
struct StartGuard<'a, T> {
    store: &'a RawStore<T>,
    id: SubscriberId,
    armed: bool,
}

impl<T> Drop for StartGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.store.subscribers.borrow_mut().shift_remove(&self.id);
        }
    }
}

/// Write capability handed to a start notifier.
///
/// Holds a weak reference: a `Setter` retained by a timer or an upstream
/// subscription cannot keep a dropped container alive, and its methods
/// become no-ops once the container is gone.
pub struct Setter<T> {
    store: Weak<RawStore<T>>,
}

impl<T: Clone + 'static> Setter<T> {
    /// Trigger-gated write, identical to [`Writable::set`].
    pub fn set(&self, value: T) {
        if let Some(store) = self.store.upgrade() {
            store.set(value);
        }
    }

    /// `set(f(&current))`; no-op while the container has never held a value.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if let Some(store) = self.store.upgrade() {
            store.update(f);
        }
    }

    /// Signal subscribers that a new value is coming.
    pub fn invalidate(&self) {
        if let Some(store) = self.store.upgrade() {
            store.invalidate_subscribers();
        }
    }

    /// Signal subscribers that the value was reconsidered and is unchanged.
    pub fn revalidate(&self) {
        if let Some(store) = self.store.upgrade() {
            store.revalidate_subscribers();
        }
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<T> Debug for Setter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setter")
            .field("alive", &(self.store.strong_count() > 0))
            .finish()
    }
}

/// A readable and writable value container.
///
/// Handles are cheap to clone and share one cell.
pub struct Writable<T: Clone + 'static> {
    pub(crate) inner: Rc<RawStore<T>>,
}

impl<T: Clone + 'static> Writable<T> {
    /// Subscribe with a delivery callback only.
    ///
    /// The callback receives the current value synchronously before this
    /// method returns, then every accepted change via the action queue.
    pub fn subscribe(&self, run: impl FnMut(&T) + 'static) -> Unsubscriber {
        self.inner.subscribe(run, || {}, || {})
    }

    /// Subscribe with the full delivery / invalidate / revalidate triple.
    pub fn subscribe_full(
        &self,
        run: impl FnMut(&T) + 'static,
        invalidate: impl FnMut() + 'static,
        revalidate: impl FnMut() + 'static,
    ) -> Unsubscriber {
        self.inner.subscribe(run, invalidate, revalidate)
    }

    /// Replace the value if the trigger accepts the change.
    pub fn set(&self, value: T) {
        self.inner.set(value);
    }

    /// Replace the value with `f(&current)`.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.inner.update(f);
    }

    /// A read-only handle sharing this container's cell.
    pub fn read_only(&self) -> super::readable::Readable<T> {
        super::readable::Readable::from_raw(Rc::clone(&self.inner))
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }
}

impl<T: Clone + 'static> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Debug + 'static> Debug for Writable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writable")
            .field("value", &self.inner.current())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Create a writable container with no start notifier.
pub fn writable<T: Clone + 'static>(
    trigger: impl Fn(bool, &T, Option<&T>) -> bool + 'static,
    value: T,
) -> Writable<T> {
    writable_with(trigger, value, |_: Setter<T>| -> Option<StopFn> { None })
}

/// Create a writable container whose start notifier runs on the 0→1
/// subscriber transition and whose returned stop callback runs on 1→0.
pub fn writable_with<T: Clone + 'static>(
    trigger: impl Fn(bool, &T, Option<&T>) -> bool + 'static,
    value: T,
    start: impl FnMut(Setter<T>) -> Option<StopFn> + 'static,
) -> Writable<T> {
    Writable {
        inner: RawStore::new(trigger, Some(value), start),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
