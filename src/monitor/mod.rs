//! Monitor subsystem: spec registration, call histories and dispatch.
//!
//! A spec is registered over one or more [`Target`](crate::Target)s through a
//! [`SpecBuilder`]. Each call of a bound target produces one [`Event`] per spec,
//! carrying bounded histories of past calls. Specs report violations by
//! returning an [`AssertionFailure`](crate::AssertionFailure) and can queue
//! one-shot continuations for the next event.

/// Post-call hook and dispatch.
pub mod dispatcher;
/// Event and binding views handed to specs.
pub mod event;
/// Spec groups, ids and options.
pub mod group;
/// Bounded histories.
pub mod history;
/// Call and event records.
pub mod record;
/// Registration builder and handles.
pub mod registry;

pub use dispatcher::RvHook;
pub use event::{BindingView, Event};
pub use group::{CopyPolicy, SpecFn, SpecGroup, SpecId, SpecOptions};
pub use history::{HistoryCapacity, DEFAULT_HISTORY_SIZE, UNBOUNDED_HISTORY};
pub use record::{CallRecord, EventRecord};
pub use registry::{register_spec, SpecBuilder, SpecHandle};
