//! Value Containers
//!
//! This module implements the container half of the crate: writable and
//! read-only value cells, the subscription protocol they speak, and the
//! derivation engine that composes them.
//!
//! # Concepts
//!
//! ## Containers
//!
//! A [`Writable`] holds a single value and notifies subscribers when it
//! changes; a [`Readable`] is the read-only face of the same cell, or a
//! derivation, or a constant. A container is dormant while nobody listens:
//! its start notifier runs on the first subscription and the stop callback
//! it returns runs when the last subscription ends.
//!
//! ## The notification protocol
//!
//! Every subscription carries three callbacks. `invalidate` fires
//! synchronously the moment a change is underway, `run` delivers the new
//! value through the shared action queue, and `revalidate` reports that a
//! reconsidered value turned out unchanged. Downstream derivations use the
//! invalidate/revalidate half to know how many upstream changes are still
//! in flight, which is what collapses a diamond-shaped dependency into a
//! single recompute.
//!
//! ## Triggers
//!
//! Whether a written value counts as a change is decided by the
//! container's trigger predicate. [`trigger_strict_not_equal`] is the
//! usual choice; [`trigger_always`] accepts everything and
//! [`trigger_safe_not_equal`] treats NaN as equal to itself.
//!
//! # Implementation Notes
//!
//! Containers are single-threaded by construction (`Rc` plus interior
//! mutability) because the protocol is reentrant: a callback may
//! subscribe, unsubscribe, or write during a notification pass. No borrow
//! is held across a callback invocation; subscriber lists are snapshotted
//! before a pass.

mod derived;
mod pending;
mod readable;
mod subscriber;
mod trigger;
mod writable;

pub use derived::{derive, derive_with_set, CleanupFn, Connection, Stores, UpstreamObserver};
pub use pending::PendingSet;
pub use readable::{constant, get, readable, Readable, Source};
pub use subscriber::{SubscriberId, Unsubscriber};
pub use trigger::{trigger_always, trigger_safe_not_equal, trigger_strict_not_equal};
pub use writable::{writable, writable_with, Setter, StopFn, Writable};
