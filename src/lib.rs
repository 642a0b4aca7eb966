//! # KyroRV - Runtime Verification for Rust
//!
//! KyroRV checks user-written specifications against live calls. Callables are
//! wrapped as [`Target`]s; specs are registered over one or more targets and
//! run after every call with the call's arguments, result and a bounded
//! history of earlier calls.
//!
//! ## Core Concepts
//!
//! - **Target**: A callable wrapped for interception
//! - **Spec**: A callback registered over named bindings, run after each bound call
//! - **Event**: One call as seen by a spec, with per-binding and per-spec histories
//! - **One-shot**: A continuation queued by a spec for the next event only
//! - **Error handler**: The policy deciding what happens to a spec's failures
//!
//! ## Usage
//!
//! ```rust
//! use kyrorv::{rv_ensure, CallArgs, SpecBuilder, Target, Value};
//!
//! let open = Target::function("open", |_| Value::Null);
//! let close = Target::function("close", |_| Value::Null);
//!
//! // `close` must never be called twice in a row.
//! SpecBuilder::new("balanced")
//!     .bind("open", &open)
//!     .bind("close", &close)
//!     .register(|event| {
//!         let close = event.binding("close")?;
//!         if close.called() {
//!             let prev = event.previous();
//!             rv_ensure!(
//!                 prev.map_or(false, |p| p.called("open")),
//!                 "close without open"
//!             );
//!         }
//!         Ok(())
//!     })?;
//!
//! open.call(CallArgs::new())?;
//! close.call(CallArgs::new())?;
//! assert!(close.call(CallArgs::new()).is_err());
//! # Ok::<(), kyrorv::RvError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handler;
pub mod instrument;
pub mod machine;
pub mod monitor;
pub mod value;

// Re-export primary types at crate root for convenience
pub use config::{configuration, configure, Configuration};
pub use error::{
    AssertionFailure, ConfigurationError, InvariantError, RvError, RvResult, SpecResult,
    StreamError,
};
pub use handler::{
    failure_channel, ChannelErrorHandler, ErrorHandler, FailureReport, FailureStream,
    LoggingErrorHandler, RaiseErrorHandler, Severity,
};
pub use instrument::{CallHook, CallState, Target, TargetId, TargetKind};
pub use machine::{Machine, Step, Transition};
pub use monitor::{
    register_spec, BindingView, CallRecord, CopyPolicy, Event, EventRecord, HistoryCapacity,
    SpecBuilder, SpecHandle, SpecId, SpecOptions, UNBOUNDED_HISTORY,
};
pub use value::{CallArgs, Opaque, Shared, Value};
