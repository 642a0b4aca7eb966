//! Monitor dispatcher.
//!
//! [`RvHook`] is the single hook the engine attaches to a monitored target. After
//! every call it dispatches to each spec group bound to the target, in
//! registration order. A dispatch records the call, runs queued continuations
//! (group-level first, then binding-level), runs the spec unless it finished,
//! and hands the collected failures to exactly one error handler.
//!
//! No group lock is held while user callbacks run, so specs may call monitored
//! targets (including their own) and queue continuations freely.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::config;
use crate::error::{InvariantError, RvError, RvResult};
use crate::handler::ErrorHandler;
use crate::instrument::{CallHook, CallState};

use super::event::{DispatchContext, Event};
use super::group::{CopyPolicy, OneShot, SpecGroup, SpecId};
use super::record::{CallRecord, EventRecord};

/// Post-call hook shared by all spec groups of one target.
#[derive(Debug, Default)]
pub struct RvHook {
    groups: Mutex<Vec<Arc<SpecGroup>>>,
}

impl RvHook {
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<SpecGroup>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, group: Arc<SpecGroup>) {
        self.lock().push(group);
    }

    /// Removes the group with `id`. Returns false if it was not attached.
    pub(crate) fn remove(&self, id: SpecId) -> bool {
        let mut groups = self.lock();
        let before = groups.len();
        groups.retain(|g| g.id() != id);
        groups.len() != before
    }

    /// Attached groups, in registration order.
    #[must_use]
    pub fn groups(&self) -> Vec<Arc<SpecGroup>> {
        self.lock().clone()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.lock().len()
    }
}

impl CallHook for RvHook {
    fn after(&self, state: &CallState<'_>) -> RvResult<()> {
        let groups = self.groups();
        if groups.is_empty() {
            return Ok(());
        }

        let configuration = config::configuration();
        let errors: Vec<RvError> = groups
            .iter()
            .filter_map(|group| {
                let handler = group
                    .error_handler()
                    .unwrap_or(&configuration.error_handler);
                dispatch(group, state, &**handler).err()
            })
            .collect();
        RvError::from_batch(errors)
    }

    fn wants_input_snapshot(&self) -> bool {
        self.lock()
            .iter()
            .any(|group| group.copy_policy() == CopyPolicy::Deep)
    }
}

struct Prepared {
    record: Arc<EventRecord>,
    history: Vec<Arc<EventRecord>>,
    binding_histories: BTreeMap<String, Vec<Arc<CallRecord>>>,
    one_shots: Vec<OneShot>,
    call_spec: bool,
}

/// Runs one dispatch of `group` for the call described by `state`.
pub(crate) fn dispatch(
    group: &SpecGroup,
    state: &CallState<'_>,
    handler: &dyn ErrorHandler,
) -> RvResult<()> {
    let Some(prepared) = prepare(group, state)? else {
        return Ok(());
    };
    let Prepared {
        record,
        history,
        binding_histories,
        one_shots,
        call_spec,
    } = prepared;

    trace!(
        spec = group.name(),
        sequence = record.sequence(),
        called = record.active_name(),
        one_shots = one_shots.len(),
        call_spec,
        "dispatching event"
    );

    let ctx = DispatchContext::new(call_spec);
    {
        let event = Event::new(group, &ctx, record, history, binding_histories);
        for one_shot in one_shots {
            if let Err(failure) = one_shot(&event) {
                ctx.push(failure);
            }
        }
        if ctx.should_call_spec() {
            if let Err(failure) = group.invoke(&event) {
                ctx.push(failure);
            }
        }
    }
    let failures = ctx.into_failures();

    group.settle();

    if !failures.is_empty() {
        trace!(spec = group.name(), failures = failures.len(), severity = %group.severity(), "spec reported failures");
    }
    handler.handle(group.severity(), &failures)
}

/// Appends the call to the histories and takes the queued continuations.
///
/// Returns `None` when the group must not see this call: it was detached after
/// the hook list was read, or it copies arguments and was registered while the
/// call was already running.
fn prepare(group: &SpecGroup, state: &CallState<'_>) -> RvResult<Option<Prepared>> {
    let mut guard = group.lock();
    let st = &mut *guard;
    if st.detached {
        return Ok(None);
    }

    let target = state.target().id();
    let active = st
        .binding_for(target)
        .map(str::to_string)
        .ok_or_else(|| InvariantError::NoActiveBinding {
            spec: group.name().to_string(),
            target,
        })?;

    let Some((inputs, outputs)) = group.copy_policy().snapshot(state)? else {
        trace!(spec = group.name(), "no pre-call snapshot; group registered mid-call");
        return Ok(None);
    };

    st.sequence += 1;
    let sequence = st.sequence;

    let (call, binding_one_shots) = {
        let binding = st
            .bindings
            .get_mut(&active)
            .ok_or_else(|| InvariantError::NoActiveBinding {
                spec: group.name().to_string(),
                target,
            })?;
        let call = Arc::new(CallRecord::new(
            sequence,
            active.clone(),
            inputs,
            outputs,
            state.result().clone(),
            binding.history.last().cloned(),
        ));
        binding.history.push(Arc::clone(&call));
        (call, std::mem::take(&mut binding.one_shots))
    };

    let calls = st
        .bindings
        .keys()
        .map(|name| (name.clone(), (*name == active).then(|| Arc::clone(&call))))
        .collect();
    let record = Arc::new(EventRecord::new(sequence, calls, st.history.last().cloned())?);
    st.history.push(Arc::clone(&record));

    let mut one_shots = std::mem::take(&mut st.one_shots);
    one_shots.extend(binding_one_shots);

    Ok(Some(Prepared {
        record,
        history: st.history.snapshot(),
        binding_histories: st
            .bindings
            .iter()
            .map(|(name, binding)| (name.clone(), binding.history.snapshot()))
            .collect(),
        one_shots,
        call_spec: st.active,
    }))
}
