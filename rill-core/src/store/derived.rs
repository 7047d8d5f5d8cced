//! Derivation engine.
//!
//! A derivation is a read-only container whose value is a function of one
//! or more upstream containers. The engine lives in the derived container's
//! start notifier: on activation it subscribes to every upstream, and it
//! tears everything down again when the last subscriber leaves, so a
//! dormant derivation costs nothing and holds no upstream subscriptions.
//!
//! # Diamond suppression
//!
//! When several upstreams change inside one synchronous batch because they
//! share an ancestor, the aggregate function must run once for the batch,
//! not once per upstream. The engine gets this from the two halves of the
//! notification protocol:
//!
//! - upstream `invalidate` signals arrive synchronously before any value
//!   does, so by the time the first new value lands the
//!   [`PendingSet`] already knows how many more are in flight;
//! - a resync is attempted after every upstream event but runs only when
//!   nothing is pending, i.e. exactly once all upstreams have resolved.
//!
//! # Upstream sets
//!
//! The `stores` argument is anything implementing [`Stores`]: a single
//! container (aggregate is the bare value), a tuple of up to six containers
//! with independent value types (aggregate is the value tuple), or a `Vec`
//! of same-typed containers (aggregate is a `Vec` of values).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::ReentryGuard;

use super::pending::PendingSet;
use super::readable::{Readable, Source};
use super::subscriber::Unsubscriber;
use super::writable::{RawStore, Setter, StopFn, Writable};

/// Cleanup returned by an asynchronous derivation pass, run before the next
/// resync and on teardown.
pub type CleanupFn = Box<dyn FnOnce()>;

/// Indexed event callbacks a [`Stores`] implementation wires each upstream
/// subscription to.
pub struct UpstreamObserver {
    /// The upstream at this index delivered a value (already recorded).
    pub on_value: Rc<dyn Fn(usize)>,
    /// The upstream at this index signaled an incoming change.
    pub on_invalidate: Rc<dyn Fn(usize)>,
    /// The upstream at this index recomputed to an unchanged value.
    pub on_revalidate: Rc<dyn Fn(usize)>,
}

/// Live upstream subscriptions plus a typed reader over their latest values.
pub struct Connection<V> {
    /// One removal handle per upstream, in index order.
    pub unsubscribers: Vec<Unsubscriber>,
    /// Aggregates the latest per-upstream values; `None` until every
    /// upstream has delivered at least once.
    pub read: Rc<dyn Fn() -> Option<V>>,
}

/// An ordered set of upstream containers a derivation can connect to.
pub trait Stores {
    /// The aggregate value handed to the derivation function.
    type Values: Clone + 'static;

    /// Number of upstream containers.
    fn count(&self) -> usize;

    /// Subscribe to every upstream, routing events through `observer` with
    /// the upstream's index.
    fn connect(&self, observer: UpstreamObserver) -> Connection<Self::Values>;
}

fn connect_single<S: Source>(store: &S, observer: UpstreamObserver) -> Connection<S::Value> {
    let slot: Rc<RefCell<Option<S::Value>>> = Rc::new(RefCell::new(None));
    let mut unsubscribers = Vec::with_capacity(1);
    {
        let slot = Rc::clone(&slot);
        let on_value = Rc::clone(&observer.on_value);
        let on_invalidate = Rc::clone(&observer.on_invalidate);
        let on_revalidate = Rc::clone(&observer.on_revalidate);
        unsubscribers.push(store.subscribe_full(
            move |value: &S::Value| {
                *slot.borrow_mut() = Some(value.clone());
                on_value(0);
            },
            move || on_invalidate(0),
            move || on_revalidate(0),
        ));
    }
    let read = {
        let slot = Rc::clone(&slot);
        Rc::new(move || slot.borrow().clone()) as Rc<dyn Fn() -> Option<S::Value>>
    };
    Connection {
        unsubscribers,
        read,
    }
}

impl<T: Clone + 'static> Stores for Readable<T> {
    type Values = T;

    fn count(&self) -> usize {
        1
    }

    fn connect(&self, observer: UpstreamObserver) -> Connection<T> {
        connect_single(self, observer)
    }
}

impl<T: Clone + 'static> Stores for Writable<T> {
    type Values = T;

    fn count(&self) -> usize {
        1
    }

    fn connect(&self, observer: UpstreamObserver) -> Connection<T> {
        connect_single(self, observer)
    }
}

impl<S: Source + 'static> Stores for Vec<S> {
    type Values = Vec<S::Value>;

    fn count(&self) -> usize {
        self.len()
    }

    fn connect(&self, observer: UpstreamObserver) -> Connection<Vec<S::Value>> {
        let slots: Rc<RefCell<Vec<Option<S::Value>>>> = Rc::new(RefCell::new(vec![None; self.len()]));
        let mut unsubscribers = Vec::with_capacity(self.len());
        for (index, store) in self.iter().enumerate() {
            let slots = Rc::clone(&slots);
            let on_value = Rc::clone(&observer.on_value);
            let on_invalidate = Rc::clone(&observer.on_invalidate);
            let on_revalidate = Rc::clone(&observer.on_revalidate);
            unsubscribers.push(store.subscribe_full(
                move |value: &S::Value| {
                    slots.borrow_mut()[index] = Some(value.clone());
                    on_value(index);
                },
                move || on_invalidate(index),
                move || on_revalidate(index),
            ));
        }
        let read = {
            let slots = Rc::clone(&slots);
            Rc::new(move || {
                slots
                    .borrow()
                    .iter()
                    .cloned()
                    .collect::<Option<Vec<S::Value>>>()
            }) as Rc<dyn Fn() -> Option<Vec<S::Value>>>
        };
        Connection {
            unsubscribers,
            read,
        }
    }
}

macro_rules! impl_stores_for_tuple {
    ($(($store:ident, $value:ident, $index:tt)),+) => {
        impl<$($value,)+ $($store,)+> Stores for ($($store,)+)
        where
            $($value: Clone + 'static,)+
            $($store: Source<Value = $value> + 'static,)+
        {
            type Values = ($($value,)+);

            fn count(&self) -> usize {
                [$($index,)+].len()
            }

            fn connect(&self, observer: UpstreamObserver) -> Connection<Self::Values> {
                let slots: Rc<RefCell<($(Option<$value>,)+)>> = Rc::new(RefCell::new(Default::default()));
                let mut unsubscribers = Vec::with_capacity(self.count());
                $(
                    {
                        let slots = Rc::clone(&slots);
                        let on_value = Rc::clone(&observer.on_value);
                        let on_invalidate = Rc::clone(&observer.on_invalidate);
                        let on_revalidate = Rc::clone(&observer.on_revalidate);
                        unsubscribers.push(self.$index.subscribe_full(
                            move |value: &$value| {
                                slots.borrow_mut().$index = Some(value.clone());
                                on_value($index);
                            },
                            move || on_invalidate($index),
                            move || on_revalidate($index),
                        ));
                    }
                )+
                let read = {
                    let slots = Rc::clone(&slots);
                    Rc::new(move || -> Option<($($value,)+)> {
                        let slots = slots.borrow();
                        Some(($(slots.$index.clone()?,)+))
                    }) as Rc<dyn Fn() -> Option<($($value,)+)>>
                };
                Connection {
                    unsubscribers,
                    read,
                }
            }
        }
    };
}

impl_stores_for_tuple!((S0, T0, 0), (S1, T1, 1));
impl_stores_for_tuple!((S0, T0, 0), (S1, T1, 1), (S2, T2, 2));
impl_stores_for_tuple!((S0, T0, 0), (S1, T1, 1), (S2, T2, 2), (S3, T3, 3));
impl_stores_for_tuple!((S0, T0, 0), (S1, T1, 1), (S2, T2, 2), (S3, T3, 3), (S4, T4, 4));
impl_stores_for_tuple!(
    (S0, T0, 0),
    (S1, T1, 1),
    (S2, T2, 2),
    (S3, T3, 3),
    (S4, T4, 4),
    (S5, T5, 5)
);

enum DeriveKind<V, U> {
    /// Synchronous form: the return value is the new derived value.
    Auto(Box<dyn FnMut(&V) -> U>),
    /// Asynchronous form: the function drives the [`Setter`] itself and may
    /// return a cleanup to run before the next pass.
    Manual(Box<dyn FnMut(&V, &Setter<U>) -> Option<CleanupFn>>),
}

enum SyncStep<U> {
    Deliver(U),
    Retain(Option<CleanupFn>),
}

/// Derive a read-only container whose value is `f` over the upstream
/// aggregate, recomputed once per upstream batch.
pub fn derive<S, U, F>(
    trigger: impl Fn(bool, &U, Option<&U>) -> bool + 'static,
    stores: S,
    f: F,
) -> Readable<U>
where
    S: Stores + 'static,
    U: Clone + 'static,
    F: FnMut(&S::Values) -> U + 'static,
{
    make_derived(trigger, stores, DeriveKind::Auto(Box::new(f)), None)
}

/// Derive a read-only container whose function drives the value through the
/// supplied [`Setter`], zero or more times per pass, possibly after the
/// pass returns.
///
/// A cleanup returned by one pass runs before the next pass and on
/// teardown. `initial` seeds the value delivered to subscribers before the
/// first `set`.
pub fn derive_with_set<S, U, F>(
    trigger: impl Fn(bool, &U, Option<&U>) -> bool + 'static,
    stores: S,
    f: F,
    initial: Option<U>,
) -> Readable<U>
where
    S: Stores + 'static,
    U: Clone + 'static,
    F: FnMut(&S::Values, &Setter<U>) -> Option<CleanupFn> + 'static,
{
    make_derived(trigger, stores, DeriveKind::Manual(Box::new(f)), initial)
}

fn make_derived<S, U>(
    trigger: impl Fn(bool, &U, Option<&U>) -> bool + 'static,
    stores: S,
    kind: DeriveKind<S::Values, U>,
    initial: Option<U>,
) -> Readable<U>
where
    S: Stores + 'static,
    U: Clone + 'static,
{
    let kind = Rc::new(RefCell::new(kind));

    let start = move |setter: Setter<U>| -> Option<StopFn> {
        // Activation-scoped state; a later reactivation starts fresh.
        let pending = Rc::new(RefCell::new(PendingSet::new(stores.count())));
        let started = Rc::new(Cell::new(false));
        let cleanup: Rc<RefCell<Option<CleanupFn>>> = Rc::new(RefCell::new(None));
        let read_slot: Rc<RefCell<Option<Rc<dyn Fn() -> Option<S::Values>>>>> =
            Rc::new(RefCell::new(None));
        let reentry = Rc::new(ReentryGuard::new("a recomputing derivation"));

        let sync: Rc<dyn Fn()> = {
            let pending = Rc::clone(&pending);
            let cleanup = Rc::clone(&cleanup);
            let read_slot = Rc::clone(&read_slot);
            let kind = Rc::clone(&kind);
            let reentry = Rc::clone(&reentry);
            let setter = setter.clone();
            Rc::new(move || {
                // A derivation function that synchronously writes back into
                // its own upstream would land here again mid-pass; fail fast
                // instead of corrupting the pass state.
                let _pass = match reentry.enter() {
                    Ok(pass) => pass,
                    Err(error) => panic!("{error}"),
                };
                if pending.borrow().pending() {
                    return;
                }
                let read = match read_slot.borrow().clone() {
                    Some(read) => read,
                    None => return,
                };
                let values = match read() {
                    Some(values) => values,
                    None => return,
                };
                if let Some(previous) = cleanup.borrow_mut().take() {
                    previous();
                }
                let step = match &mut *kind.borrow_mut() {
                    DeriveKind::Auto(f) => SyncStep::Deliver(f(&values)),
                    DeriveKind::Manual(f) => SyncStep::Retain(f(&values, &setter)),
                };
                match step {
                    SyncStep::Deliver(value) => setter.set(value),
                    SyncStep::Retain(next_cleanup) => *cleanup.borrow_mut() = next_cleanup,
                }
            })
        };

        let observer = UpstreamObserver {
            on_value: {
                let pending = Rc::clone(&pending);
                let started = Rc::clone(&started);
                let sync = Rc::clone(&sync);
                Rc::new(move |index| {
                    pending.borrow_mut().validate(index);
                    if started.get() {
                        sync();
                    }
                })
            },
            on_invalidate: {
                let pending = Rc::clone(&pending);
                let setter = setter.clone();
                Rc::new(move |index| {
                    pending.borrow_mut().invalidate(index);
                    // Propagate downstream before any upstream resolves.
                    setter.invalidate();
                })
            },
            on_revalidate: {
                let pending = Rc::clone(&pending);
                let started = Rc::clone(&started);
                let sync = Rc::clone(&sync);
                Rc::new(move |index| {
                    pending.borrow_mut().validate(index);
                    if started.get() {
                        sync();
                    }
                })
            },
        };

        let connection = stores.connect(observer);
        let unsubscribers = Rc::new(RefCell::new(connection.unsubscribers));
        *read_slot.borrow_mut() = Some(connection.read);

        // A panic in the first synchronous pass of the derivation function
        // must not leak the upstream subscriptions just made.
        let mut guard = ConnectGuard {
            unsubscribers: Rc::clone(&unsubscribers),
            armed: true,
        };
        started.set(true);
        sync();
        guard.armed = false;

        Some(Box::new(move || {
            for unsubscriber in unsubscribers.borrow_mut().iter_mut() {
                unsubscriber.unsubscribe();
            }
            if let Some(previous) = cleanup.borrow_mut().take() {
                previous();
            }
            started.set(false);
        }) as StopFn)
    };

    Readable::from_raw(RawStore::new(trigger, initial, start))
}

/// Releases upstream subscriptions when the initial pass unwinds.
struct ConnectGuard {
    unsubscribers: Rc<RefCell<Vec<Unsubscriber>>>,
    armed: bool,
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        if self.armed {
            for unsubscriber in self.unsubscribers.borrow_mut().iter_mut() {
                unsubscriber.unsubscribe();
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::readable::get;
    use crate::store::trigger::{trigger_always, trigger_strict_not_equal};
    use crate::store::writable::writable;
    use std::cell::Cell;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn single_store_derivation_tracks_its_upstream() {
        let source = writable(trigger_strict_not_equal, 2);
        let doubled = derive(trigger_strict_not_equal, source.clone(), |x| x * 2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut sub = doubled.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        source.set(5);
        source.set(7);
        assert_eq!(*seen.borrow(), vec![4, 10, 14]);
        sub.unsubscribe();
    }

    #[test]
    fn dormant_derivation_holds_no_upstream_subscription() {
        let source = writable(trigger_strict_not_equal, 1);
        let derived = derive(trigger_strict_not_equal, source.clone(), |x| x + 1);

        assert_eq!(source.subscriber_count(), 0);
        let mut sub = derived.subscribe(|_| {});
        assert_eq!(source.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn tuple_derivation_combines_heterogeneous_upstreams() {
        let count = writable(trigger_strict_not_equal, 2usize);
        let label = writable(trigger_strict_not_equal, "x".to_string());
        let rendered = derive(
            trigger_strict_not_equal,
            (count.clone(), label.clone()),
            |(n, s): &(usize, String)| s.repeat(*n),
        );

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut sub = rendered.subscribe(move |v: &String| seen_clone.borrow_mut().push(v.clone()));

        count.set(3);
        label.set("ab".to_string());
        assert_eq!(
            *seen.borrow(),
            vec!["xx".to_string(), "xxx".to_string(), "ababab".to_string()]
        );
        sub.unsubscribe();
    }

    #[test]
    fn vec_derivation_handles_wide_upstream_sets() {
        // Wide enough to land in the grouped pending tier.
        let sources: Vec<_> = (0..70)
            .map(|i| writable(trigger_strict_not_equal, i as i64))
            .collect();
        let total = derive(trigger_strict_not_equal, sources.clone(), |values: &Vec<i64>| {
            values.iter().sum::<i64>()
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut sub = total.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        let base: i64 = (0..70).sum();
        assert_eq!(*seen.borrow(), vec![base]);

        sources[69].set(1000);
        assert_eq!(*seen.borrow(), vec![base, base - 69 + 1000]);
        sub.unsubscribe();
    }

    #[test]
    fn unchanged_recompute_revalidates_downstream() {
        let source = writable(trigger_always, 2i64);
        let magnitude = derive(trigger_strict_not_equal, source.clone(), |x: &i64| x.abs());
        let downstream_runs = Rc::new(Cell::new(0));
        let downstream_runs_clone = downstream_runs.clone();
        let shifted = derive(trigger_strict_not_equal, magnitude.clone(), move |x: &i64| {
            downstream_runs_clone.set(downstream_runs_clone.get() + 1);
            x + 1
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut sub = shifted.subscribe(move |v| seen_clone.borrow_mut().push(*v));
        assert_eq!(*seen.borrow(), vec![3]);

        // |-2| == |2|: the middle container rejects its own recompute and
        // revalidates, so the downstream pending state clears without a
        // delivery and the chain is not left stuck.
        source.set(-2);
        assert_eq!(*seen.borrow(), vec![3]);

        source.set(5);
        assert_eq!(*seen.borrow(), vec![3, 6]);
        assert!(downstream_runs.get() >= 2);
        sub.unsubscribe();
    }

    #[test]
    fn manual_derivation_cleanup_runs_before_next_pass_and_on_teardown() {
        let source = writable(trigger_strict_not_equal, 1);
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_clone = log.clone();
        let derived = derive_with_set(
            trigger_strict_not_equal,
            source.clone(),
            move |x: &i32, setter: &Setter<i32>| {
                let x = *x;
                let log = log_clone.clone();
                log.borrow_mut().push(format!("pass {x}"));
                setter.set(x * 10);
                Some(Box::new(move || log.borrow_mut().push(format!("cleanup {x}"))) as CleanupFn)
            },
            None,
        );

        let mut sub = derived.subscribe(|_| {});
        source.set(2);
        sub.unsubscribe();

        assert_eq!(
            *log.borrow(),
            vec!["pass 1", "cleanup 1", "pass 2", "cleanup 2"]
        );
    }

    #[test]
    fn manual_derivation_initial_value_delivered_before_first_set() {
        let source = writable(trigger_strict_not_equal, 1);
        let derived = derive_with_set(
            trigger_strict_not_equal,
            source.clone(),
            |_: &i32, _: &Setter<i32>| None,
            Some(0),
        );

        assert_eq!(get(&derived), Some(0));
    }

    #[test]
    fn panicking_initial_pass_releases_upstream_subscriptions() {
        let source = writable(trigger_strict_not_equal, 1);
        let derived = derive(trigger_strict_not_equal, source.clone(), |_: &i32| -> i32 {
            panic!("derivation failure")
        });

        let result = catch_unwind(AssertUnwindSafe(|| derived.subscribe(|_| {})));
        assert!(result.is_err());
        assert_eq!(source.subscriber_count(), 0);
        assert_eq!(derived.subscriber_count(), 0);
    }

    #[test]
    fn writing_back_into_an_upstream_mid_pass_panics() {
        let source = writable(trigger_strict_not_equal, 1);
        let feedback = source.clone();
        let derived = derive_with_set(
            trigger_strict_not_equal,
            source.clone(),
            move |x: &i32, _: &Setter<i32>| {
                feedback.set(x + 1);
                None
            },
            None,
        );

        let result = catch_unwind(AssertUnwindSafe(|| derived.subscribe(|_| {})));
        assert!(result.is_err());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn reactivation_after_full_teardown_starts_fresh() {
        let source = writable(trigger_strict_not_equal, 1);
        let derived = derive(trigger_strict_not_equal, source.clone(), |x| x * 3);

        assert_eq!(get(&derived), Some(3));
        source.set(4);
        // Dormant between activations: the set above was not observed, the
        // next activation recomputes from the current upstream value.
        assert_eq!(get(&derived), Some(12));
        assert_eq!(source.subscriber_count(), 0);
    }
}
