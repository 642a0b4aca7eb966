//! Transition machines.
//!
//! A [`Machine`] holds a set of pending [`Transition`]s. On every event each
//! pending transition is evaluated once and replaced by the successors its
//! [`Step`] names, so temporal properties ("after `open`, `close` must
//! eventually follow", "`x` always holds") can be written as small state
//! machines instead of hand-written continuation chains.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::error::{AssertionFailure, RvResult, SpecResult};
use crate::monitor::{Event, SpecBuilder, SpecHandle};

/// A transition evaluated against one event.
pub type Transition = Arc<dyn Fn(&Event<'_>) -> Step + Send + Sync>;

/// Outcome of evaluating one transition.
#[derive(Clone, Default)]
#[must_use]
pub struct Step {
    violation: Option<String>,
    next: Vec<Transition>,
}

impl Step {
    /// The property held; no successors.
    pub fn holds() -> Self {
        Self::default()
    }

    /// The property was violated.
    pub fn violated(message: impl Into<String>) -> Self {
        Self {
            violation: Some(message.into()),
            next: Vec::new(),
        }
    }

    /// Holds when `ok`, violated with `message` otherwise.
    pub fn check(ok: bool, message: impl Into<String>) -> Self {
        if ok {
            Self::holds()
        } else {
            Self::violated(message)
        }
    }

    /// Adds successors evaluated from the next event on.
    pub fn then(mut self, next: impl IntoIterator<Item = Transition>) -> Self {
        self.next.extend(next);
        self
    }

    #[must_use]
    pub const fn is_violation(&self) -> bool {
        self.violation.is_some()
    }

    #[must_use]
    pub fn successors(&self) -> usize {
        self.next.len()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("violation", &self.violation)
            .field("next", &self.next.len())
            .finish()
    }
}

/// Wraps a closure as a [`Transition`].
pub fn transition<F>(f: F) -> Transition
where
    F: Fn(&Event<'_>) -> Step + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Checks `predicate` on the next event only.
pub fn check<P>(predicate: P, message: impl Into<String>) -> Transition
where
    P: Fn(&Event<'_>) -> bool + Send + Sync + 'static,
{
    let message = message.into();
    transition(move |event| Step::check(predicate(event), message.clone()))
}

/// Checks `predicate` on every event from now on.
pub fn always<P>(predicate: P, message: impl Into<String>) -> Transition
where
    P: Fn(&Event<'_>) -> bool + Send + Sync + 'static,
{
    let message: String = message.into();
    always_shared(Arc::new(predicate), Arc::from(message))
}

fn always_shared<P>(predicate: Arc<P>, message: Arc<str>) -> Transition
where
    P: Fn(&Event<'_>) -> bool + Send + Sync + 'static,
{
    transition(move |event| {
        Step::check(predicate(event), &*message)
            .then([always_shared(Arc::clone(&predicate), Arc::clone(&message))])
    })
}

/// Evaluates `then` when `condition` holds for the event, `otherwise` if given.
pub fn when<C>(condition: C, then: Transition, otherwise: Option<Transition>) -> Transition
where
    C: Fn(&Event<'_>) -> bool + Send + Sync + 'static,
{
    transition(move |event| {
        if condition(event) {
            then(event)
        } else {
            otherwise.as_ref().map_or_else(Step::holds, |t| t(event))
        }
    })
}

/// Skips one event, then evaluates `transitions` from the event after it.
pub fn next(transitions: Vec<Transition>) -> Transition {
    transition(move |_| Step::holds().then(transitions.iter().cloned()))
}

/// Pending transitions of one spec.
pub struct Machine {
    pending: Mutex<Vec<Transition>>,
}

impl Machine {
    #[must_use]
    pub fn new(initial: impl IntoIterator<Item = Transition>) -> Self {
        Self {
            pending: Mutex::new(initial.into_iter().collect()),
        }
    }

    /// Number of transitions waiting for the next event.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Evaluates every pending transition against `event`.
    ///
    /// Every violation is reported on the event; successors of all
    /// transitions, violated or not, become the new pending set.
    pub fn evaluate(&self, event: &Event<'_>) -> SpecResult {
        let current = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let evaluated = current.len();

        let mut successors = Vec::new();
        for t in &current {
            let step = t(event);
            if let Some(message) = step.violation {
                event.report(AssertionFailure::new(message));
            }
            successors.extend(step.next);
        }

        trace!(
            spec = event.spec_name(),
            evaluated,
            pending = successors.len(),
            "machine step"
        );
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(successors);
        Ok(())
    }

    /// Turns the machine into a spec callback.
    pub fn into_spec(self) -> impl Fn(&Event<'_>) -> SpecResult + Send + Sync + 'static {
        move |event| self.evaluate(event)
    }

    /// Registers the machine as the spec of `builder`.
    ///
    /// Machines carry their own state, so histories default to the current
    /// call only unless the builder set a size.
    ///
    /// # Errors
    /// See [`SpecBuilder::register`].
    pub fn register(self, builder: SpecBuilder) -> RvResult<SpecHandle> {
        builder
            .default_history_size(0)
            .register(self.into_spec())
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine").field("pending", &self.pending()).finish()
    }
}
