//! The view of one dispatch handed to specs and continuations.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{AssertionFailure, SpecResult};
use crate::value::{CallArgs, Value};

use super::group::SpecGroup;
use super::record::{CallRecord, EventRecord};

/// Mutable per-dispatch state shared by every callback of one dispatch.
#[derive(Debug)]
pub(crate) struct DispatchContext {
    failures: RefCell<Vec<AssertionFailure>>,
    call_spec: Cell<bool>,
}

impl DispatchContext {
    pub(crate) fn new(call_spec: bool) -> Self {
        Self {
            failures: RefCell::new(Vec::new()),
            call_spec: Cell::new(call_spec),
        }
    }

    pub(crate) fn push(&self, failure: AssertionFailure) {
        self.failures.borrow_mut().push(failure);
    }

    pub(crate) fn should_call_spec(&self) -> bool {
        self.call_spec.get()
    }

    pub(crate) fn into_failures(self) -> Vec<AssertionFailure> {
        self.failures.into_inner()
    }
}

/// One dispatch of a spec group, as seen by the spec and its continuations.
///
/// The histories exposed here are snapshots taken when the event was built;
/// records appended by nested calls are not visible.
pub struct Event<'d> {
    group: &'d SpecGroup,
    ctx: &'d DispatchContext,
    record: Arc<EventRecord>,
    history: Vec<Arc<EventRecord>>,
    binding_histories: BTreeMap<String, Vec<Arc<CallRecord>>>,
}

impl<'d> Event<'d> {
    pub(crate) fn new(
        group: &'d SpecGroup,
        ctx: &'d DispatchContext,
        record: Arc<EventRecord>,
        history: Vec<Arc<EventRecord>>,
        binding_histories: BTreeMap<String, Vec<Arc<CallRecord>>>,
    ) -> Self {
        Self {
            group,
            ctx,
            record,
            history,
            binding_histories,
        }
    }

    /// Name of the spec this event belongs to.
    #[must_use]
    pub fn spec_name(&self) -> &str {
        self.group.name()
    }

    /// The record of this event (also the last entry of [`Event::history`]).
    #[must_use]
    pub const fn record(&self) -> &Arc<EventRecord> {
        &self.record
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.record.sequence()
    }

    /// Retained events of the group, oldest first, ending with this one.
    #[must_use]
    pub fn history(&self) -> &[Arc<EventRecord>] {
        &self.history
    }

    /// The prior event of the group, if still retained.
    #[must_use]
    pub fn previous(&self) -> Option<Arc<EventRecord>> {
        self.record.previous()
    }

    /// Whether `binding` is the one whose call produced this event.
    #[must_use]
    pub fn called(&self, binding: &str) -> bool {
        self.record.called(binding)
    }

    /// View of the binding named `binding`.
    ///
    /// # Errors
    /// An [`AssertionFailure`] naming the binding when the spec has no such binding,
    /// so specs can simply use `?`.
    pub fn binding(&self, binding: &str) -> Result<BindingView<'_>, AssertionFailure> {
        self.binding_histories
            .get_key_value(binding)
            .map(|(name, history)| self.view(name, history))
            .ok_or_else(|| {
                AssertionFailure::new(format!(
                    "spec '{}' has no binding named '{binding}'",
                    self.group.name()
                ))
            })
    }

    /// View of the binding that was called.
    #[must_use]
    pub fn active(&self) -> BindingView<'_> {
        let name = self.record.active_name();
        let history = self.binding_histories.get(name).map_or(&[][..], Vec::as_slice);
        self.view(name, history)
    }

    /// Name of the function that was called.
    #[must_use]
    pub fn called_function(&self) -> &str {
        self.record.active_name()
    }

    /// Views of every binding, sorted by name.
    pub fn bindings(&self) -> impl Iterator<Item = BindingView<'_>> {
        self.binding_histories
            .iter()
            .map(|(name, history)| self.view(name, history))
    }

    fn view<'v>(&'v self, name: &'v str, history: &'v [Arc<CallRecord>]) -> BindingView<'v> {
        BindingView {
            name,
            call: self.record.call(name),
            history,
            group: self.group,
        }
    }

    /// Queues `f` to run once, on the next event of this spec whatever binding is called.
    pub fn next<F>(&self, f: F)
    where
        F: FnOnce(&Event<'_>) -> SpecResult + Send + 'static,
    {
        self.group.enqueue(Box::new(f));
    }

    /// Asserts that the next event of this spec is a call of `binding`.
    ///
    /// The default message is `"Next function called should have been <name>"`.
    pub fn next_should_be(&self, binding: &BindingView<'_>, message: Option<&str>) {
        let expected = binding.name().to_string();
        let message = message.map_or_else(
            || format!("Next function called should have been {expected}"),
            str::to_string,
        );
        self.next(move |event| {
            if event.called(&expected) {
                Ok(())
            } else {
                Err(AssertionFailure::new(message))
            }
        });
    }

    /// Finishes the spec successfully.
    pub fn success(&self) {
        self.finish(true, None);
    }

    /// Finishes the spec with a failure carrying `message`.
    pub fn failure(&self, message: impl Into<String>) {
        self.finish(false, Some(message.into()));
    }

    /// Finishes the spec.
    ///
    /// The spec callback is skipped for the rest of this event and never runs
    /// again; queued continuations still run, after which the spec detaches.
    pub fn finish(&self, success: bool, message: Option<String>) {
        self.group.finish();
        self.ctx.call_spec.set(false);
        if !success {
            self.ctx.push(AssertionFailure::new(
                message.unwrap_or_else(|| format!("spec '{}' failed", self.group.name())),
            ));
        }
    }

    /// Records a failure without returning from the callback.
    pub fn report(&self, failure: impl Into<AssertionFailure>) {
        self.ctx.push(failure.into());
    }

    /// False once the spec has finished.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.group.is_active()
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("spec", &self.group.name())
            .field("sequence", &self.record.sequence())
            .field("called", &self.record.active_name())
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

/// One binding of the spec within an [`Event`].
#[derive(Clone, Copy)]
pub struct BindingView<'v> {
    name: &'v str,
    call: Option<&'v Arc<CallRecord>>,
    history: &'v [Arc<CallRecord>],
    group: &'v SpecGroup,
}

impl<'v> BindingView<'v> {
    #[must_use]
    pub const fn name(&self) -> &'v str {
        self.name
    }

    /// Whether this binding produced the current event.
    #[must_use]
    pub const fn called(&self) -> bool {
        self.call.is_some()
    }

    /// The current call, if this binding was the one called.
    #[must_use]
    pub const fn call(&self) -> Option<&'v Arc<CallRecord>> {
        self.call
    }

    /// The current call, or a failure saying this binding was not called.
    pub fn require_call(&self) -> Result<&'v Arc<CallRecord>, AssertionFailure> {
        self.call.ok_or_else(|| {
            AssertionFailure::new(format!("'{}' was not called in this event", self.name))
        })
    }

    /// Positional inputs of the current call.
    pub fn inputs(&self) -> Result<&'v [Value], AssertionFailure> {
        self.require_call().map(|call| call.inputs())
    }

    /// Positional outputs of the current call.
    pub fn outputs(&self) -> Result<&'v [Value], AssertionFailure> {
        self.require_call().map(|call| call.outputs())
    }

    /// Return value of the current call.
    pub fn result(&self) -> Result<&'v Value, AssertionFailure> {
        self.require_call().map(|call| call.result())
    }

    /// Retained calls of this binding, oldest first.
    #[must_use]
    pub const fn history(&self) -> &'v [Arc<CallRecord>] {
        self.history
    }

    /// Most recent retained call of this binding, including the current one.
    #[must_use]
    pub fn last_call(&self) -> Option<&'v Arc<CallRecord>> {
        self.history.last()
    }

    /// The retained call before the current one.
    #[must_use]
    pub fn previous(&self) -> Option<Arc<CallRecord>> {
        match self.call {
            Some(call) => call.previous(),
            None => self.history.last().cloned(),
        }
    }

    /// Queues `f` to run once, on the next call of this binding.
    pub fn next<F>(&self, f: F)
    where
        F: FnOnce(&Event<'_>) -> SpecResult + Send + 'static,
    {
        self.group.enqueue_for(self.name, Box::new(f));
    }

    /// Like [`BindingView::next`], handing `extra` to `f` alongside the event.
    pub fn next_with<F>(&self, f: F, extra: CallArgs)
    where
        F: FnOnce(&Event<'_>, &CallArgs) -> SpecResult + Send + 'static,
    {
        self.next(move |event| f(event, &extra));
    }
}

impl fmt::Debug for BindingView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingView")
            .field("name", &self.name)
            .field("called", &self.called())
            .field("history_len", &self.history.len())
            .finish()
    }
}
