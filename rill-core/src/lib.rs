//! Rill Core
//!
//! This crate provides a reactive state-container runtime. It implements:
//!
//! - Value containers (writable, read-only, constant) speaking a
//!   subscribe / invalidate / revalidate notification protocol
//! - A derivation engine that recomputes once per upstream batch, even
//!   across diamond-shaped dependency graphs
//! - A run-to-completion action queue with a pluggable error policy
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - `store`: containers, the subscription protocol, derivations
//! - `queue`: the shared action queue and runner policies
//! - `error`: misuse detection for non-reentrant structures
//!
//! # Example
//!
//! ```rust
//! use rill_core::store::{derive, get, trigger_strict_not_equal, writable};
//!
//! let count = writable(trigger_strict_not_equal, 1);
//! let doubled = derive(trigger_strict_not_equal, count.clone(), |n| n * 2);
//!
//! count.set(5);
//! assert_eq!(get(&doubled), Some(10));
//! ```

pub mod error;
pub mod queue;
pub mod store;
