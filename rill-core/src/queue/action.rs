//! Action Queue
//!
//! A run-to-completion FIFO of deferred subscriber deliveries. Enqueueing
//! into an idle queue drains it synchronously, including anything appended
//! by the actions themselves; enqueueing while a drain is already running
//! higher on the call stack only appends. This is what flattens recursive
//! update cascades into one breadth-first sequence: a `set` performed from
//! inside a delivery does not recurse, its deliveries simply join the tail
//! of the queue.
//!
//! # Panic handling
//!
//! Each action executes through the thread's installed
//! [`ActionRunner`](super::runner::ActionRunner). If a panic escapes the
//! runner (the default throw-through policy), the drain stops: the
//! already-executed prefix and the panicking action are gone, the rest of
//! the queue is preserved, and the panic unwinds to whichever external call
//! started the drain. Any later [`enqueue`](ActionQueue::enqueue), even
//! with an empty batch, resumes the preserved suffix.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::runner::action_runner;

/// One deferred zero-argument callback, typically a subscriber delivery
/// bound to a value.
pub type Action = Box<dyn FnOnce()>;

struct QueueState {
    actions: VecDeque<Action>,
    /// A drain loop is executing somewhere on this call stack.
    draining: bool,
    /// The previous drain was cut short by a panic.
    aborted: bool,
}

/// A FIFO of deferred actions with run-to-completion drain semantics.
///
/// Handles are cheap to clone and share one underlying queue. Value
/// containers capture [`ActionQueue::shared`], the per-thread instance, at
/// construction; independent instances can be built for embedding scenarios
/// that want their own scheduling context.
#[derive(Clone)]
pub struct ActionQueue {
    state: Rc<RefCell<QueueState>>,
}

thread_local! {
    static SHARED: ActionQueue = ActionQueue::new();
}

impl ActionQueue {
    /// Create an empty, independent queue.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(QueueState {
                actions: VecDeque::new(),
                draining: false,
                aborted: false,
            })),
        }
    }

    /// The shared queue for the current thread.
    pub fn shared() -> Self {
        SHARED.with(|queue| queue.clone())
    }

    /// Number of actions currently waiting.
    pub fn len(&self) -> usize {
        self.state.borrow().actions.len()
    }

    /// True if no actions are waiting.
    pub fn is_empty(&self) -> bool {
        self.state.borrow().actions.is_empty()
    }

    /// Append `actions` and drain if this call is the outermost one.
    ///
    /// A drain starts when no drain is already running and either the queue
    /// was empty before appending or a previous drain aborted. Otherwise the
    /// batch just joins the tail and the call returns immediately.
    pub fn enqueue(&self, actions: impl IntoIterator<Item = Action>) {
        let actions: Vec<Action> = actions.into_iter().collect();
        let should_drain = {
            let mut state = self.state.borrow_mut();
            let was_idle = state.actions.is_empty();
            state.actions.extend(actions);
            !state.draining && (was_idle || state.aborted)
        };
        if should_drain {
            self.scope(|| {});
        }
    }

    /// Run `f` as if it were executing inside a drain.
    ///
    /// Enqueues made while `f` runs append instead of starting a nested
    /// drain, and when this call is the outermost scope everything
    /// accumulated runs before it returns. Value containers wrap their
    /// synchronous notification passes in a scope so a callback that writes
    /// during the pass has its deliveries queued breadth-first rather than
    /// delivered by recursing into the pass.
    ///
    /// Each queued action is popped before it runs, so a panicking action
    /// is already off the queue when the guard records the abort.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let outermost = {
            let mut state = self.state.borrow_mut();
            if state.draining {
                false
            } else {
                state.aborted = false;
                state.draining = true;
                true
            }
        };
        if !outermost {
            return f();
        }
        let mut guard = DrainGuard {
            state: &self.state,
            completed: false,
        };
        let result = f();
        loop {
            let action = self.state.borrow_mut().actions.pop_front();
            let Some(action) = action else { break };
            action_runner()(action);
        }
        guard.completed = true;
        result
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ActionQueue")
            .field("len", &state.actions.len())
            .field("draining", &state.draining)
            .field("aborted", &state.aborted)
            .finish()
    }
}

/// Clears `draining` on exit and records the abort when the drain loop is
/// left by unwinding instead of completion.
struct DrainGuard<'a> {
    state: &'a Rc<RefCell<QueueState>>,
    completed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.draining = false;
        if !self.completed {
            state.aborted = true;
            tracing::debug!(remaining = state.actions.len(), "action queue drain aborted");
        }
    }
}

/// Enqueue onto the current thread's shared queue.
pub fn enqueue(actions: impl IntoIterator<Item = Action>) {
    ActionQueue::shared().enqueue(actions);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
