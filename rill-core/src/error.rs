//! Error Types
//!
//! Failures raised inside subscriber callbacks and queued actions travel as
//! panics and are governed by the installed action runner policy (see the
//! `queue` module). What remains for structured errors is misuse detection:
//! reentering a structure that does not support it, such as a derivation
//! function that writes back into its own upstream while it is recomputing.

use std::cell::Cell;

use thiserror::Error;

/// Reentrant use of a non-reentrant structure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reentrant use of {what}")]
pub struct ReentrancyError {
    what: &'static str,
}

impl ReentrancyError {
    /// The structure that was reentered.
    pub fn what(&self) -> &'static str {
        self.what
    }
}

/// Occupancy flag guarding a non-reentrant structure.
///
/// [`enter`](Self::enter) hands out a scoped pass while the structure is
/// free and fails while a pass is outstanding. The pass releases the guard
/// on drop, including during unwinding.
#[derive(Debug)]
pub struct ReentryGuard {
    what: &'static str,
    entered: Cell<bool>,
}

impl ReentryGuard {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            entered: Cell::new(false),
        }
    }

    pub fn enter(&self) -> Result<ReentryPass<'_>, ReentrancyError> {
        if self.entered.get() {
            return Err(ReentrancyError { what: self.what });
        }
        self.entered.set(true);
        Ok(ReentryPass { guard: self })
    }

    pub fn is_entered(&self) -> bool {
        self.entered.get()
    }
}

/// Scoped pass handed out by [`ReentryGuard::enter`].
#[must_use = "the guard is released when the pass drops"]
#[derive(Debug)]
pub struct ReentryPass<'a> {
    guard: &'a ReentryGuard,
}

impl Drop for ReentryPass<'_> {
    fn drop(&mut self) {
        self.guard.entered.set(false);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
