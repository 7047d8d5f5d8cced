//! Deferred scheduling
//!
//! This module implements the scheduling half of the library: the global
//! run-to-completion action queue and the pluggable runner policy it
//! executes actions through.
//!
//! # Why a queue
//!
//! Subscriber deliveries are side-effecting callbacks, and a delivery may
//! itself call `set` on another container. Running deliveries directly
//! would recurse to the depth of the dependency graph and interleave
//! notifications depth-first. Deferring every delivery onto a single FIFO
//! and draining it from the outermost call serializes effectively-nested
//! cascades into one deterministic breadth-first sequence with bounded
//! stack growth.
//!
//! # Division of labor
//!
//! - [`ActionQueue`] owns ordering, run-to-completion, and recovery after
//!   an aborted drain.
//! - The [`ActionRunner`] decides what a failure means: rethrow (default),
//!   swallow, or log and swallow.

mod action;
mod runner;

pub use action::{enqueue, Action, ActionQueue};
pub use runner::{
    action_runner, payload_message, runner_hide_errors, runner_log_errors,
    runner_log_errors_with, runner_throw_errors, set_action_runner, with_action_runner,
    ActionRunner, ActionRunnerGuard,
};
