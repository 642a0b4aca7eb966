//! Call interception boundary.
//!
//! A [`Target`] is an explicitly registered callable: callers invoke it through
//! [`Target::call`] and every attached [`CallHook`] observes the call before and
//! after the underlying function runs. The RV engine installs exactly one hook
//! per target (see [`Target::is_monitored`]) no matter how many specs bind it.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RvError, RvResult};
use crate::monitor::dispatcher::RvHook;
use crate::value::{CallArgs, Value};

/// Unique identity of a monitored target.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(Uuid);

impl TargetId {
    /// Create a new random target id.
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

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a target receives its implicit first argument, resolved once at construction.
#[derive(Debug, Clone)]
pub enum TargetKind {
    /// A plain function. No implicit argument.
    FreeFunction,
    /// A method bound to one receiver; the receiver is prepended to every call.
    InstanceMethod {
        /// The bound receiver (usually a [`Value::Object`]).
        receiver: Value,
    },
    /// A method bound to a class; the class name is prepended to every call.
    ClassMethod {
        /// Owning class name.
        class: String,
    },
    /// A function namespaced in a class. No implicit argument.
    StaticMethod {
        /// Owning class name.
        class: String,
    },
}

impl TargetKind {
    fn implicit_argument(&self) -> Option<Value> {
        match self {
            Self::FreeFunction | Self::StaticMethod { .. } => None,
            Self::InstanceMethod { receiver } => Some(receiver.clone()),
            Self::ClassMethod { class } => Some(Value::String(class.clone())),
        }
    }
}

/// Everything a post-call hook may observe.
#[derive(Debug)]
pub struct CallState<'a> {
    target: &'a Target,
    inputs: Option<&'a CallArgs>,
    outputs: &'a CallArgs,
    result: &'a Value,
}

impl<'a> CallState<'a> {
    /// The target that was called.
    #[must_use]
    pub const fn target(&self) -> &'a Target {
        self.target
    }

    /// Deep copy of the arguments taken before the call, when any hook asked for one.
    #[must_use]
    pub const fn inputs(&self) -> Option<&'a CallArgs> {
        self.inputs
    }

    /// The live arguments after the call.
    #[must_use]
    pub const fn outputs(&self) -> &'a CallArgs {
        self.outputs
    }

    /// The value the target returned.
    #[must_use]
    pub const fn result(&self) -> &'a Value {
        self.result
    }
}

/// Observer attached to a [`Target`].
pub trait CallHook: Send + Sync {
    /// Runs before the target. An error aborts the call before the target runs.
    fn before(&self, target: &Target, args: &CallArgs) -> RvResult<()> {
        let _ = (target, args);
        Ok(())
    }

    /// Runs after the target returned.
    fn after(&self, state: &CallState<'_>) -> RvResult<()>;

    /// Whether this hook needs [`CallState::inputs`].
    fn wants_input_snapshot(&self) -> bool {
        false
    }
}

type TargetFn = dyn Fn(&mut CallArgs) -> Value + Send + Sync;

struct TargetInner {
    id: TargetId,
    name: String,
    kind: TargetKind,
    func: Box<TargetFn>,
    hooks: RwLock<Vec<Arc<dyn CallHook>>>,
    rv: OnceCell<Arc<RvHook>>,
}

/// A callable wrapped for interception. Cloning shares the same wrapper.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

impl Target {
    /// Wraps `func` as a target of the given kind.
    pub fn new<F>(name: impl Into<String>, kind: TargetKind, func: F) -> Self
    where
        F: Fn(&mut CallArgs) -> Value + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(TargetInner {
                id: TargetId::new(),
                name: name.into(),
                kind,
                func: Box::new(func),
                hooks: RwLock::new(Vec::new()),
                rv: OnceCell::new(),
            }),
        }
    }

    /// Wraps a free function.
    pub fn function<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut CallArgs) -> Value + Send + Sync + 'static,
    {
        Self::new(name, TargetKind::FreeFunction, func)
    }

    /// Wraps a method bound to `receiver`.
    pub fn method<F>(name: impl Into<String>, receiver: impl Into<Value>, func: F) -> Self
    where
        F: Fn(&mut CallArgs) -> Value + Send + Sync + 'static,
    {
        Self::new(
            name,
            TargetKind::InstanceMethod {
                receiver: receiver.into(),
            },
            func,
        )
    }

    #[must_use]
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn kind(&self) -> &TargetKind {
        &self.inner.kind
    }

    /// Identity comparison: true if both handles wrap the same callable.
    #[must_use]
    pub fn same(&self, other: &Target) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attaches a hook. Hooks run in attachment order.
    pub fn attach(&self, hook: Arc<dyn CallHook>) {
        self.inner
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Removes a previously attached hook. Returns false if it was not attached.
    pub fn detach(&self, hook: &Arc<dyn CallHook>) -> bool {
        let mut hooks = self.inner.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let before = hooks.len();
        hooks.retain(|h| !same_hook(h, hook));
        hooks.len() != before
    }

    /// Number of attached hooks.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true once any spec has been registered on this target.
    #[must_use]
    pub fn is_monitored(&self) -> bool {
        self.inner.rv.get().is_some()
    }

    /// The RV hook of this target, installing it on first use.
    pub(crate) fn rv_hook(&self) -> &Arc<RvHook> {
        self.inner.rv.get_or_init(|| {
            let hook = Arc::new(RvHook::default());
            self.attach(Arc::clone(&hook) as Arc<dyn CallHook>);
            hook
        })
    }

    pub(crate) fn installed_rv_hook(&self) -> Option<&Arc<RvHook>> {
        self.inner.rv.get()
    }

    /// Calls the target with all hooks.
    ///
    /// The implicit argument of [`TargetKind`] is prepended to `args`. Errors
    /// returned by several hooks are all reported (see [`RvError::from_batch`]).
    ///
    /// # Errors
    /// - Any error from a `before` hook (the target is not run).
    /// - [`ConfigurationError::NotCopyable`](crate::ConfigurationError::NotCopyable)
    ///   when an input snapshot was requested but cannot be taken.
    /// - Errors returned by `after` hooks, e.g. assertion failures raised by the
    ///   configured error handler.
    pub fn call(&self, args: CallArgs) -> RvResult<Value> {
        let mut args = args;
        if let Some(implicit) = self.inner.kind.implicit_argument() {
            args.prepend(implicit);
        }

        let hooks: Vec<Arc<dyn CallHook>> = self
            .inner
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for hook in &hooks {
            hook.before(self, &args)?;
        }

        let inputs = if hooks.iter().any(|h| h.wants_input_snapshot()) {
            Some(args.deep_copy()?)
        } else {
            None
        };

        let result = (self.inner.func)(&mut args);

        let state = CallState {
            target: self,
            inputs: inputs.as_ref(),
            outputs: &args,
            result: &result,
        };
        let errors: Vec<RvError> = hooks.iter().filter_map(|h| h.after(&state).err()).collect();
        RvError::from_batch(errors)?;

        Ok(result)
    }
}

fn same_hook(a: &Arc<dyn CallHook>, b: &Arc<dyn CallHook>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}
