//! Spec groups: one registered spec with its bindings and histories.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ConfigurationError, RvResult, SpecResult};
use crate::handler::{ErrorHandler, Severity};
use crate::instrument::{CallState, Target, TargetId};
use crate::value::CallArgs;

use super::dispatcher::RvHook;
use super::event::Event;
use super::history::{History, HistoryCapacity, DEFAULT_HISTORY_SIZE};
use super::record::{CallRecord, EventRecord};

/// A spec callback.
pub type SpecFn = dyn Fn(&Event<'_>) -> SpecResult + Send + Sync;

/// A one-shot continuation queued with [`Event::next`] or
/// [`BindingView::next`](super::event::BindingView::next).
pub(crate) type OneShot = Box<dyn FnOnce(&Event<'_>) -> SpecResult + Send>;

/// Unique identity of a registered spec.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecId(Uuid);

impl SpecId {
    /// Create a new random spec id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SpecId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How call arguments are captured into a [`CallRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyPolicy {
    /// Inputs are a deep copy taken before the call, outputs a deep copy taken after.
    #[default]
    Deep,
    /// Inputs and outputs both alias the live post-call arguments.
    Identity,
}

impl CopyPolicy {
    #[must_use]
    pub const fn from_copy_arguments(copy: bool) -> Self {
        if copy {
            Self::Deep
        } else {
            Self::Identity
        }
    }

    /// Captures `(inputs, outputs)` for one call.
    ///
    /// Returns `Ok(None)` for [`CopyPolicy::Deep`] when the call carries no
    /// pre-call snapshot, which happens only for groups registered while the
    /// call was already running.
    pub(crate) fn snapshot(self, state: &CallState<'_>) -> RvResult<Option<(CallArgs, CallArgs)>> {
        match self {
            Self::Deep => {
                let Some(inputs) = state.inputs() else {
                    return Ok(None);
                };
                Ok(Some((inputs.deep_copy()?, state.outputs().deep_copy()?)))
            }
            Self::Identity => Ok(Some((state.outputs().clone(), state.outputs().clone()))),
        }
    }
}

/// Per-spec registration options.
///
/// Options are plain data and can be loaded from JSON; the error handler
/// override can only be set in code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecOptions {
    /// Severity passed to the error handler with this spec's failures.
    pub severity: Severity,
    /// Records kept per history; `-1` keeps everything.
    pub history_size: i64,
    /// Overrides the global argument copying flag when set.
    pub copy_arguments: Option<bool>,
    /// Overrides the global error handler when set.
    #[serde(skip)]
    pub error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl Default for SpecOptions {
    fn default() -> Self {
        Self {
            severity: Severity::default(),
            history_size: DEFAULT_HISTORY_SIZE,
            copy_arguments: None,
            error_handler: None,
        }
    }
}

impl SpecOptions {
    /// Validated history capacity.
    pub fn history_capacity(&self) -> Result<HistoryCapacity, ConfigurationError> {
        HistoryCapacity::try_from(self.history_size)
    }
}

/// A bound target, held by identity only. The target owns the hook that owns
/// this group, so a strong handle here would keep the target alive forever.
pub(crate) struct Binding {
    pub(crate) target: TargetId,
    pub(crate) hook: Weak<RvHook>,
    pub(crate) history: History<CallRecord>,
    pub(crate) one_shots: Vec<OneShot>,
}

pub(crate) struct GroupState {
    pub(crate) bindings: BTreeMap<String, Binding>,
    pub(crate) history: History<EventRecord>,
    pub(crate) one_shots: Vec<OneShot>,
    pub(crate) active: bool,
    pub(crate) detached: bool,
    pub(crate) sequence: u64,
}

impl GroupState {
    fn pending_one_shots(&self) -> usize {
        self.one_shots.len() + self.bindings.values().map(|b| b.one_shots.len()).sum::<usize>()
    }

    pub(crate) fn binding_for(&self, target: TargetId) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, binding)| binding.target == target)
            .map(|(name, _)| name.as_str())
    }

    fn hooks(&self) -> Vec<Weak<RvHook>> {
        self.bindings.values().map(|b| Weak::clone(&b.hook)).collect()
    }
}

/// One registered spec: its callback, bindings, histories and lifecycle.
pub struct SpecGroup {
    id: SpecId,
    name: String,
    spec: Box<SpecFn>,
    severity: Severity,
    capacity: HistoryCapacity,
    copy_policy: CopyPolicy,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    state: Mutex<GroupState>,
}

impl SpecGroup {
    pub(crate) fn new(
        name: String,
        spec: Box<SpecFn>,
        options: &SpecOptions,
        capacity: HistoryCapacity,
        copy_policy: CopyPolicy,
        targets: Vec<(String, Target)>,
    ) -> Self {
        let bindings = targets
            .into_iter()
            .map(|(binding, target)| {
                (
                    binding,
                    Binding {
                        target: target.id(),
                        hook: Arc::downgrade(target.rv_hook()),
                        history: History::new(capacity),
                        one_shots: Vec::new(),
                    },
                )
            })
            .collect();

        Self {
            id: SpecId::new(),
            name,
            spec,
            severity: options.severity,
            capacity,
            copy_policy,
            error_handler: options.error_handler.clone(),
            state: Mutex::new(GroupState {
                bindings,
                history: History::new(capacity),
                one_shots: Vec::new(),
                active: true,
                detached: false,
                sequence: 0,
            }),
        }
    }

    #[must_use]
    pub const fn id(&self) -> SpecId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    #[must_use]
    pub const fn capacity(&self) -> HistoryCapacity {
        self.capacity
    }

    #[must_use]
    pub const fn copy_policy(&self) -> CopyPolicy {
        self.copy_policy
    }

    /// The per-spec handler override, if any.
    #[must_use]
    pub fn error_handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        self.error_handler.as_ref()
    }

    /// Binding names, sorted.
    #[must_use]
    pub fn binding_names(&self) -> Vec<String> {
        self.lock().bindings.keys().cloned().collect()
    }

    /// False once the spec has finished.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// False once the spec has been removed from its targets.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.lock().detached
    }

    /// Continuations still queued for future events.
    #[must_use]
    pub fn pending_one_shots(&self) -> usize {
        self.lock().pending_one_shots()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn invoke(&self, event: &Event<'_>) -> SpecResult {
        (self.spec)(event)
    }

    pub(crate) fn enqueue(&self, one_shot: OneShot) {
        self.lock().one_shots.push(one_shot);
    }

    pub(crate) fn enqueue_for(&self, binding: &str, one_shot: OneShot) {
        let mut state = self.lock();
        match state.bindings.get_mut(binding) {
            Some(b) => b.one_shots.push(one_shot),
            None => warn!(spec = %self.name, binding, "one-shot dropped for unknown binding"),
        }
    }

    /// Marks the spec as finished. Queued continuations still run.
    pub(crate) fn finish(&self) {
        self.lock().active = false;
    }

    /// Detaches a finished spec once no continuation is pending.
    ///
    /// Returns true if this call detached the group.
    pub(crate) fn settle(&self) -> bool {
        let hooks = {
            let mut state = self.lock();
            if state.active || state.detached || state.pending_one_shots() > 0 {
                return false;
            }
            state.detached = true;
            state.hooks()
        };
        self.remove_from(&hooks);
        debug!(spec = %self.name, spec_id = %self.id, "spec finished and detached");
        true
    }

    /// Finishes and detaches immediately, dropping pending continuations.
    ///
    /// Returns the number of dropped continuations.
    pub(crate) fn detach(&self) -> usize {
        let (hooks, dropped) = {
            let mut state = self.lock();
            state.active = false;
            if state.detached {
                return 0;
            }
            state.detached = true;
            let mut dropped = state.one_shots.drain(..).count();
            for binding in state.bindings.values_mut() {
                dropped += binding.one_shots.drain(..).count();
            }
            (state.hooks(), dropped)
        };
        self.remove_from(&hooks);
        if dropped > 0 {
            warn!(spec = %self.name, spec_id = %self.id, dropped, "spec detached with pending one-shots");
        } else {
            debug!(spec = %self.name, spec_id = %self.id, "spec detached");
        }
        dropped
    }

    /// Removes this group from every hook still alive. Hooks of dropped
    /// targets are already gone along with their group lists.
    fn remove_from(&self, hooks: &[Weak<RvHook>]) {
        for hook in hooks.iter().filter_map(Weak::upgrade) {
            hook.remove(self.id);
        }
    }
}

impl fmt::Debug for SpecGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecGroup")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("capacity", &self.capacity)
            .field("copy_policy", &self.copy_policy)
            .finish_non_exhaustive()
    }
}
