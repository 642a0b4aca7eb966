//! Records stored in call histories.
//!
//! A [`CallRecord`] captures one completed call of one binding; an
//! [`EventRecord`] captures one dispatch across every binding of a spec group.
//! Both are immutable apart from their `previous` back-link, which history
//! truncation clears.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::error::{AssertionFailure, InvariantError};
use crate::value::{CallArgs, Value};

use super::history::Linked;

/// One completed call to a bound target.
#[derive(Debug)]
pub struct CallRecord {
    sequence: u64,
    binding: String,
    inputs: CallArgs,
    outputs: CallArgs,
    result: Value,
    recorded_at: DateTime<Utc>,
    previous: RwLock<Option<Arc<CallRecord>>>,
}

impl CallRecord {
    pub(crate) fn new(
        sequence: u64,
        binding: impl Into<String>,
        inputs: CallArgs,
        outputs: CallArgs,
        result: Value,
        previous: Option<Arc<CallRecord>>,
    ) -> Self {
        Self {
            sequence,
            binding: binding.into(),
            inputs,
            outputs,
            result,
            recorded_at: Utc::now(),
            previous: RwLock::new(previous),
        }
    }

    /// Position of this call within its spec group (1-based, shared with the event).
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Name of the binding that was called.
    #[must_use]
    pub fn binding(&self) -> &str {
        &self.binding
    }

    /// Positional arguments at call start.
    #[must_use]
    pub fn inputs(&self) -> &[Value] {
        self.inputs.positional()
    }

    /// Keyword arguments at call start.
    #[must_use]
    pub const fn input_kwargs(&self) -> &BTreeMap<String, Value> {
        self.inputs.keywords()
    }

    /// Positional arguments at call end.
    #[must_use]
    pub fn outputs(&self) -> &[Value] {
        self.outputs.positional()
    }

    /// Keyword arguments at call end.
    #[must_use]
    pub const fn output_kwargs(&self) -> &BTreeMap<String, Value> {
        self.outputs.keywords()
    }

    /// Full argument snapshot at call start.
    #[must_use]
    pub const fn input_args(&self) -> &CallArgs {
        &self.inputs
    }

    /// Full argument snapshot at call end.
    #[must_use]
    pub const fn output_args(&self) -> &CallArgs {
        &self.outputs
    }

    #[must_use]
    pub const fn result(&self) -> &Value {
        &self.result
    }

    #[must_use]
    pub const fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// The prior call of the same binding, if still retained.
    #[must_use]
    pub fn previous(&self) -> Option<Arc<CallRecord>> {
        self.previous.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Positional input `index`, as an assertion-friendly result.
    pub fn input(&self, index: usize) -> Result<&Value, AssertionFailure> {
        self.inputs().get(index).ok_or_else(|| {
            AssertionFailure::new(format!("call of '{}' has no input #{index}", self.binding))
        })
    }

    /// Positional output `index`, as an assertion-friendly result.
    pub fn output(&self, index: usize) -> Result<&Value, AssertionFailure> {
        self.outputs().get(index).ok_or_else(|| {
            AssertionFailure::new(format!("call of '{}' has no output #{index}", self.binding))
        })
    }
}

impl Linked for CallRecord {
    fn unlink(&self) {
        *self.previous.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// One dispatch of a spec group: which binding was called, with its call record.
#[derive(Debug)]
pub struct EventRecord {
    sequence: u64,
    active: Arc<CallRecord>,
    calls: BTreeMap<String, Option<Arc<CallRecord>>>,
    recorded_at: DateTime<Utc>,
    previous: RwLock<Option<Arc<EventRecord>>>,
}

impl EventRecord {
    /// Builds the record; exactly one binding must carry a call.
    pub(crate) fn new(
        sequence: u64,
        calls: BTreeMap<String, Option<Arc<CallRecord>>>,
        previous: Option<Arc<EventRecord>>,
    ) -> Result<Self, InvariantError> {
        let mut called = calls.values().flatten();
        let (Some(active), None) = (called.next(), called.next()) else {
            return Err(InvariantError::CalledBindingCount {
                called: calls.values().flatten().count(),
            });
        };
        let active = Arc::clone(active);

        Ok(Self {
            sequence,
            active,
            calls,
            recorded_at: Utc::now(),
            previous: RwLock::new(previous),
        })
    }

    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Name of the binding that was called.
    #[must_use]
    pub fn active_name(&self) -> &str {
        self.active.binding()
    }

    /// The call record of the active binding.
    #[must_use]
    pub const fn active_call(&self) -> &Arc<CallRecord> {
        &self.active
    }

    /// Whether `binding` was the one called for this event.
    #[must_use]
    pub fn called(&self, binding: &str) -> bool {
        self.active.binding() == binding
    }

    /// Call record of `binding` for this event, if it was the one called.
    #[must_use]
    pub fn call(&self, binding: &str) -> Option<&Arc<CallRecord>> {
        self.calls.get(binding).and_then(Option::as_ref)
    }

    /// Whether the group has a binding named `binding`.
    #[must_use]
    pub fn has_binding(&self, binding: &str) -> bool {
        self.calls.contains_key(binding)
    }

    /// All binding names of the group, sorted.
    pub fn binding_names(&self) -> impl Iterator<Item = &str> {
        self.calls.keys().map(String::as_str)
    }

    #[must_use]
    pub const fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// The prior event of the group, if still retained.
    #[must_use]
    pub fn previous(&self) -> Option<Arc<EventRecord>> {
        self.previous.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Linked for EventRecord {
    fn unlink(&self) {
        *self.previous.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
