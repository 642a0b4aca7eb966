//! Values that flow through monitored calls.
//!
//! Arguments, receivers and results of monitored targets are represented as
//! [`Value`]s. Plain variants behave like values; [`Value::Object`] wraps a
//! [`Shared`] cell that can be aliased and mutated in place by a target, which
//! is what makes the difference between deep-copied and aliased snapshots
//! observable.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ConfigurationError;

/// A value passed to or returned from a monitored target.
///
/// # Examples
///
/// ```
/// use kyrorv::Value;
///
/// let int_val = Value::from(3);
/// let str_val = Value::from("hello");
///
/// assert_eq!(int_val.as_int(), Some(3));
/// assert_eq!(str_val.as_str(), Some("hello"));
/// assert!(Value::Null.is_null());
/// ```
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A mutable host object with identity.
    Object(Shared),
    /// A host value without structural copy support.
    Opaque(Opaque),
}

impl Value {
    /// Wraps `value` in a fresh [`Shared`] object cell.
    #[must_use]
    pub fn object(value: impl Into<Value>) -> Self {
        Self::Object(Shared::new(value.into()))
    }

    /// Builds a map value from key/value pairs.
    #[must_use]
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_object(&self) -> Option<&Shared> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Self::Opaque(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up `key` in a map, or in the map held by an object.
    ///
    /// Returns a clone because object contents live behind a lock.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<Value> {
        match self {
            Self::Map(m) => m.get(key).cloned(),
            Self::Object(shared) => shared.read(|inner| inner.field(key)),
            _ => None,
        }
    }

    /// Returns true if both values are the same object (identity, not equality).
    #[must_use]
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => a.same(b),
            (Self::Opaque(a), Self::Opaque(b)) => a.same(b),
            _ => false,
        }
    }

    /// Structural copy: every [`Shared`] cell reachable from this value is
    /// copied into a fresh cell. Aliasing between cells (including cycles) is
    /// preserved within one copy.
    ///
    /// # Errors
    /// [`ConfigurationError::NotCopyable`] when an [`Opaque`] value is reachable.
    pub fn deep_copy(&self) -> Result<Value, ConfigurationError> {
        self.deep_copy_with(&mut CopyMemo::default())
    }

    fn deep_copy_with(&self, memo: &mut CopyMemo) -> Result<Value, ConfigurationError> {
        Ok(match self {
            Self::Null => Self::Null,
            Self::Bool(v) => Self::Bool(*v),
            Self::Int(v) => Self::Int(*v),
            Self::Float(v) => Self::Float(*v),
            Self::String(v) => Self::String(v.clone()),
            Self::List(items) => Self::List(
                items
                    .iter()
                    .map(|v| v.deep_copy_with(memo))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.deep_copy_with(memo)?)))
                    .collect::<Result<_, ConfigurationError>>()?,
            ),
            Self::Object(shared) => Self::Object(shared.deep_copy_with(memo)?),
            Self::Opaque(opaque) => {
                return Err(ConfigurationError::NotCopyable {
                    type_name: opaque.type_name(),
                })
            }
        })
    }

    /// Converts into JSON. Objects are inlined; opaque values become their type name.
    ///
    /// An object reached again while it is being converted becomes `"<cycle>"`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_with(&mut HashSet::new())
    }

    fn to_json_with(&self, visiting: &mut HashSet<usize>) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(v) => serde_json::Value::Bool(*v),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(v) => serde_json::Value::String(v.clone()),
            Self::List(items) => serde_json::Value::Array(
                items.iter().map(|v| v.to_json_with(visiting)).collect(),
            ),
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_with(visiting)))
                    .collect(),
            ),
            Self::Object(shared) => {
                let addr = shared.addr();
                if !visiting.insert(addr) {
                    return serde_json::Value::String("<cycle>".to_string());
                }
                let json = shared.get().to_json_with(visiting);
                visiting.remove(&addr);
                json
            }
            Self::Opaque(opaque) => serde_json::Value::String(format!("<{}>", opaque.type_name())),
        }
    }

    /// Converts from JSON. JSON objects become [`Value::Map`].
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(v) => Self::Bool(*v),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(entries) => Self::Map(
                entries.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            ),
        }
    }
}

impl Value {
    /// Structural equality. A pair of objects already under comparison is
    /// assumed equal, so cyclic structures compare in finite time.
    fn eq_with(&self, other: &Value, comparing: &mut HashSet<(usize, usize)>) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_with(y, comparing))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.eq_with(vb, comparing))
            }
            (Self::Object(a), Self::Object(b)) => {
                if a.same(b) || !comparing.insert((a.addr(), b.addr())) {
                    return true;
                }
                a.get().eq_with(&b.get(), comparing)
            }
            (Self::Opaque(a), Self::Opaque(b)) => a.same(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_with(other, &mut HashSet::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

impl From<Shared> for Value {
    fn from(v: Shared) -> Self {
        Self::Object(v)
    }
}

impl From<Opaque> for Value {
    fn from(v: Opaque) -> Self {
        Self::Opaque(v)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Null
    }
}

#[derive(Default)]
struct CopyMemo {
    copies: HashMap<usize, Shared>,
}

/// A mutable, aliasable object cell.
///
/// Cloning a `Shared` clones the handle, not the contents: both handles observe
/// the same mutations.
#[derive(Clone, Default)]
pub struct Shared(Arc<RwLock<Value>>);

impl Shared {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// A shallow clone of the current contents.
    #[must_use]
    pub fn get(&self) -> Value {
        self.read(Value::clone)
    }

    /// Replaces the contents.
    pub fn set(&self, value: impl Into<Value>) {
        self.write(|inner| *inner = value.into());
    }

    pub fn read<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Reads `key` from the map held by this object.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<Value> {
        self.read(|inner| inner.field(key))
    }

    /// Sets `key` in the map held by this object, turning non-map contents into a map.
    pub fn set_field(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        self.write(move |inner| {
            if let Value::Map(entries) = inner {
                entries.insert(key, value);
            } else {
                *inner = Value::Map(BTreeMap::from([(key, value)]));
            }
        });
    }

    /// Identity comparison.
    #[must_use]
    pub fn same(&self, other: &Shared) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    fn deep_copy_with(&self, memo: &mut CopyMemo) -> Result<Shared, ConfigurationError> {
        if let Some(copy) = memo.copies.get(&self.addr()) {
            return Ok(copy.clone());
        }
        let copy = Shared::new(Value::Null);
        memo.copies.insert(self.addr(), copy.clone());
        let contents = self.get();
        let copied = contents.deep_copy_with(memo)?;
        copy.set(copied);
        Ok(copy)
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Cyclic objects would recurse forever through the contents.
        write!(f, "Shared({:#x})", self.addr())
    }
}

/// A host value that is carried through snapshots by reference only.
#[derive(Clone)]
pub struct Opaque {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Arc::new(value),
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    #[must_use]
    pub fn same(&self, other: &Opaque) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque<{}>", self.type_name)
    }
}

/// Positional and keyword arguments of one call.
///
/// For methods, the receiver (or class name) is the first positional argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument (builder style).
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Adds a keyword argument (builder style).
    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    #[must_use]
    pub const fn keywords(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    #[must_use]
    pub fn get_kwarg(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    pub fn positional_mut(&mut self) -> &mut Vec<Value> {
        &mut self.positional
    }

    pub fn keywords_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.keyword
    }

    pub(crate) fn prepend(&mut self, value: Value) {
        self.positional.insert(0, value);
    }

    /// Deep copy of every argument, sharing one alias memo across all of them.
    ///
    /// # Errors
    /// [`ConfigurationError::NotCopyable`] when an opaque value is reachable.
    pub fn deep_copy(&self) -> Result<CallArgs, ConfigurationError> {
        let mut memo = CopyMemo::default();
        let positional = self
            .positional
            .iter()
            .map(|v| v.deep_copy_with(&mut memo))
            .collect::<Result<_, _>>()?;
        let keyword = self
            .keyword
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.deep_copy_with(&mut memo)?)))
            .collect::<Result<_, ConfigurationError>>()?;
        Ok(Self { positional, keyword })
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<Value>, BTreeMap<String, Value>) {
        (self.positional, self.keyword)
    }
}

impl From<Vec<Value>> for CallArgs {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: BTreeMap::new(),
        }
    }
}
