//! Action Runner
//!
//! The runner is the policy function the action queue invokes to execute
//! each dequeued action. Exactly one runner is installed per thread; it is
//! swappable, and swapping returns the previous runner so callers can
//! restore it (see [`ActionRunnerGuard`]).
//!
//! Three policies are predefined:
//!
//! - [`runner_throw_errors`]: a panicking action unwinds out of the queue to
//!   the caller that triggered the drain. This is the default.
//! - [`runner_hide_errors`]: panics are caught and discarded.
//! - [`runner_log_errors`]: panics are caught, reported through `tracing`,
//!   and discarded. [`runner_log_errors_with`] takes a custom sink instead.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use super::action::Action;

/// The policy function executing one queued action.
pub type ActionRunner = Rc<dyn Fn(Action)>;

thread_local! {
    static RUNNER: RefCell<ActionRunner> = RefCell::new(runner_throw_errors());
}

/// Throw-through policy: run the action and let any panic propagate.
pub fn runner_throw_errors() -> ActionRunner {
    Rc::new(|action: Action| action())
}

/// Swallow policy: run the action and discard any panic.
pub fn runner_hide_errors() -> ActionRunner {
    Rc::new(|action: Action| {
        let _ = catch_unwind(AssertUnwindSafe(action));
    })
}

/// Log-and-swallow policy reporting through `tracing`.
pub fn runner_log_errors() -> ActionRunner {
    runner_log_errors_with(|payload| {
        tracing::error!(panic = payload_message(payload.as_ref()), "queued action panicked");
    })
}

/// Log-and-swallow policy with a caller-supplied sink for the panic payload.
pub fn runner_log_errors_with(logger: impl Fn(Box<dyn Any + Send>) + 'static) -> ActionRunner {
    Rc::new(move |action: Action| {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(action)) {
            logger(payload);
        }
    })
}

/// Best-effort human-readable form of a panic payload.
pub fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Install a new runner for this thread, returning the previous one.
pub fn set_action_runner(runner: ActionRunner) -> ActionRunner {
    RUNNER.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), runner))
}

/// The currently installed runner for this thread.
pub fn action_runner() -> ActionRunner {
    RUNNER.with(|slot| slot.borrow().clone())
}

/// Guard that restores the previously installed runner when dropped.
///
/// This is the save-then-restore discipline the swappable runner expects of
/// its callers, expressed as RAII so restoration survives early returns and
/// unwinding.
pub struct ActionRunnerGuard {
    previous: Option<ActionRunner>,
}

impl ActionRunnerGuard {
    /// Install `runner` until the guard is dropped.
    pub fn install(runner: ActionRunner) -> Self {
        Self {
            previous: Some(set_action_runner(runner)),
        }
    }
}

impl Drop for ActionRunnerGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let _ = set_action_runner(previous);
        }
    }
}

/// Run `f` with `runner` installed, restoring the previous runner afterward.
pub fn with_action_runner<R>(runner: ActionRunner, f: impl FnOnce() -> R) -> R {
    let _guard = ActionRunnerGuard::install(runner);
    f()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn hide_errors_discards_panics() {
        let runner = runner_hide_errors();
        runner(Box::new(|| panic!("boom")));
    }

    #[test]
    fn log_errors_with_passes_payload_to_sink() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();

        let runner = runner_log_errors_with(move |payload| {
            seen_clone
                .borrow_mut()
                .push(payload_message(payload.as_ref()).to_string());
        });

        runner(Box::new(|| panic!("first")));
        runner(Box::new(|| {}));
        runner(Box::new(|| panic!("{}", String::from("second"))));

        assert_eq!(*seen.borrow(), vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn set_runner_returns_previous() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();

        let custom: ActionRunner = Rc::new(move |action: Action| {
            ran_clone.set(true);
            action();
        });

        let previous = set_action_runner(custom);
        action_runner()(Box::new(|| {}));
        assert!(ran.get());

        let _ = set_action_runner(previous);
    }

    #[test]
    fn guard_restores_previous_runner() {
        let inner_runs = Rc::new(Cell::new(0));
        let inner_runs_clone = inner_runs.clone();

        let counting: ActionRunner = Rc::new(move |action: Action| {
            inner_runs_clone.set(inner_runs_clone.get() + 1);
            action();
        });

        {
            let _guard = ActionRunnerGuard::install(counting);
            action_runner()(Box::new(|| {}));
            assert_eq!(inner_runs.get(), 1);
        }

        // Back to the default throw-through runner.
        action_runner()(Box::new(|| {}));
        assert_eq!(inner_runs.get(), 1);
    }

    #[test]
    fn with_action_runner_scopes_install() {
        let result = with_action_runner(runner_hide_errors(), || {
            action_runner()(Box::new(|| panic!("swallowed")));
            7
        });
        assert_eq!(result, 7);
    }
}
