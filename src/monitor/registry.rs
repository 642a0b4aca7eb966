//! Spec registration.

use std::sync::Arc;

use tracing::debug;

use crate::config;
use crate::error::{ConfigurationError, RvResult, SpecResult};
use crate::handler::{ErrorHandler, Severity};
use crate::instrument::Target;

use super::event::Event;
use super::group::{CopyPolicy, SpecGroup, SpecId, SpecOptions};
use super::history::{HistoryCapacity, DEFAULT_HISTORY_SIZE};

/// Builds and registers a spec over one or more targets.
///
/// ```
/// use kyrorv::{CallArgs, SpecBuilder, Target, Value, rv_ensure};
///
/// let sqrt = Target::function("sqrt", |args| {
///     Value::Float(args.get(0).and_then(Value::as_float).unwrap_or(0.0).sqrt())
/// });
///
/// SpecBuilder::new("non_negative_input")
///     .bind("sqrt", &sqrt)
///     .register(|event| {
///         let x = event.binding("sqrt")?.inputs()?[0].as_float().unwrap_or(0.0);
///         rv_ensure!(x >= 0.0, "sqrt called with {}", x);
///         Ok(())
///     })
///     .unwrap();
///
/// assert!(sqrt.call(CallArgs::new().arg(4.0)).is_ok());
/// assert!(sqrt.call(CallArgs::new().arg(-1.0)).is_err());
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct SpecBuilder {
    name: String,
    bindings: Vec<(String, Target)>,
    options: SpecOptions,
    history_size_set: bool,
}

impl SpecBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: Vec::new(),
            options: SpecOptions::default(),
            history_size_set: false,
        }
    }

    /// Binds `target` under `name`. Each target may be bound once per spec.
    pub fn bind(mut self, name: impl Into<String>, target: &Target) -> Self {
        self.bindings.push((name.into(), target.clone()));
        self
    }

    /// Replaces all options.
    ///
    /// A history size equal to the default counts as unset, so callers such as
    /// [`Machine::register`](crate::Machine::register) can still apply their own.
    pub fn options(mut self, options: SpecOptions) -> Self {
        self.history_size_set = options.history_size != DEFAULT_HISTORY_SIZE;
        self.options = options;
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.options.severity = severity;
        self
    }

    /// Records kept per history; `-1` keeps everything.
    pub fn history_size(mut self, size: i64) -> Self {
        self.options.history_size = size;
        self.history_size_set = true;
        self
    }

    pub fn copy_arguments(mut self, copy: bool) -> Self {
        self.options.copy_arguments = Some(copy);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.options.error_handler = Some(handler);
        self
    }

    pub(crate) fn default_history_size(mut self, size: i64) -> Self {
        if !self.history_size_set {
            self.options.history_size = size;
        }
        self
    }

    /// Validates the bindings and attaches `spec` to every bound target.
    ///
    /// # Errors
    /// [`ConfigurationError`] for an invalid history size, no bindings, an empty
    /// or duplicate binding name, or a target bound twice. Nothing is attached
    /// when registration fails.
    pub fn register<F>(self, spec: F) -> RvResult<SpecHandle>
    where
        F: Fn(&Event<'_>) -> SpecResult + Send + Sync + 'static,
    {
        let capacity = self.options.history_capacity()?;
        validate_bindings(&self.name, &self.bindings)?;

        let copy_policy = CopyPolicy::from_copy_arguments(
            self.options
                .copy_arguments
                .unwrap_or_else(|| config::configuration().copy_arguments),
        );
        let targets: Vec<Target> = self.bindings.iter().map(|(_, t)| t.clone()).collect();
        let binding_count = self.bindings.len();

        let group = Arc::new(SpecGroup::new(
            self.name,
            Box::new(spec),
            &self.options,
            capacity,
            copy_policy,
            self.bindings,
        ));
        for target in &targets {
            target.rv_hook().add(Arc::clone(&group));
        }

        debug!(
            spec = group.name(),
            spec_id = %group.id(),
            bindings = binding_count,
            ?capacity,
            ?copy_policy,
            severity = %group.severity(),
            "spec registered"
        );
        Ok(SpecHandle { group })
    }
}

fn validate_bindings(spec: &str, bindings: &[(String, Target)]) -> Result<(), ConfigurationError> {
    if bindings.is_empty() {
        return Err(ConfigurationError::NoBindings {
            spec: spec.to_string(),
        });
    }
    for (i, (name, target)) in bindings.iter().enumerate() {
        if name.trim().is_empty() {
            return Err(ConfigurationError::EmptyBindingName {
                spec: spec.to_string(),
            });
        }
        for (earlier, earlier_target) in &bindings[..i] {
            if earlier == name {
                return Err(ConfigurationError::DuplicateBinding {
                    spec: spec.to_string(),
                    name: name.clone(),
                });
            }
            if earlier_target.same(target) {
                return Err(ConfigurationError::DuplicateTarget {
                    spec: spec.to_string(),
                    target: target.name().to_string(),
                    first: earlier.clone(),
                    second: name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Registers `spec` over `bindings` with `options`.
///
/// # Errors
/// See [`SpecBuilder::register`].
pub fn register_spec<'a, I, F>(
    name: impl Into<String>,
    bindings: I,
    options: SpecOptions,
    spec: F,
) -> RvResult<SpecHandle>
where
    I: IntoIterator<Item = (&'a str, &'a Target)>,
    F: Fn(&Event<'_>) -> SpecResult + Send + Sync + 'static,
{
    bindings
        .into_iter()
        .fold(SpecBuilder::new(name).options(options), |builder, (binding, target)| {
            builder.bind(binding, target)
        })
        .register(spec)
}

/// Handle to a registered spec.
#[derive(Debug, Clone)]
pub struct SpecHandle {
    group: Arc<SpecGroup>,
}

impl SpecHandle {
    #[must_use]
    pub fn id(&self) -> SpecId {
        self.group.id()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.group.name()
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        self.group.severity()
    }

    #[must_use]
    pub fn history_capacity(&self) -> HistoryCapacity {
        self.group.capacity()
    }

    #[must_use]
    pub fn copy_policy(&self) -> CopyPolicy {
        self.group.copy_policy()
    }

    /// Binding names, sorted.
    #[must_use]
    pub fn binding_names(&self) -> Vec<String> {
        self.group.binding_names()
    }

    /// False once the spec has finished.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.group.is_active()
    }

    /// False once the spec has been removed from its targets.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.group.is_attached()
    }

    #[must_use]
    pub fn pending_one_shots(&self) -> usize {
        self.group.pending_one_shots()
    }

    /// Finishes the spec from outside a callback.
    ///
    /// The spec detaches right away when no continuation is queued, otherwise
    /// after the last one has run. Returns true if it detached now.
    pub fn finish(&self) -> bool {
        self.group.finish();
        self.group.settle()
    }

    /// Removes the spec from all targets now, dropping queued continuations.
    ///
    /// Returns the number of dropped continuations.
    pub fn detach(&self) -> usize {
        self.group.detach()
    }
}
