//! Dynamic values stored in record slots.
//!
//! [`Value`] is a closed set of primitive and container variants plus
//! [`Value::Object`], the only *structured* variant. Objects are shared,
//! identity-bearing nested records ([`ObjectRef`]); everything else is
//! plain data that is copied and merged by value.

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use crate::id::ObjectId;
use crate::record::Record;

/// The kind (variant tag) of a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// [`Value::Null`].
    Null,
    /// [`Value::Bool`].
    Bool,
    /// [`Value::Int`].
    Int,
    /// [`Value::Float`].
    Float,
    /// [`Value::Text`].
    Text,
    /// [`Value::List`].
    List,
    /// [`Value::Map`].
    Map,
    /// [`Value::Set`].
    Set,
    /// [`Value::Object`].
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::List => "list",
            Self::Map => "map",
            Self::Set => "set",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// A value held in a record slot.
///
/// Equality on `Object` is identity (same allocation). Use
/// [`deep_eq`](crate::snapshot::deep_eq) for structural comparison.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Insertion-ordered string-keyed mapping.
    Map(IndexMap<String, Value>),
    /// Insertion-ordered set of strings.
    Set(IndexSet<String>),
    /// Shared nested record.
    Object(ObjectRef),
}

impl Value {
    /// The variant tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Text(_) => ValueKind::Text,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
            Self::Set(_) => ValueKind::Set,
            Self::Object(_) => ValueKind::Object,
        }
    }

    /// Whether deep merges recurse into this value instead of replacing it.
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The number as `f64`, if this is a `Float` or an `Int`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// The text, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The object reference, if this is an `Object`.
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }
}

// ── ObjectRef ────────────────────────────────────────────────────

/// A shared, lockable nested record with pointer identity.
///
/// Cloning an `ObjectRef` clones the reference, not the record. Locks are
/// held only for the duration of a [`read`](Self::read) or
/// [`write`](Self::write) closure; callers must not call back into the
/// same object from inside one.
#[derive(Clone)]
pub struct ObjectRef(Arc<Mutex<Record>>);

// Compile-time assertion: ObjectRef must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ObjectRef>();
};

impl ObjectRef {
    /// Wrap a record in a new shared object.
    pub fn new(record: Record) -> Self {
        Self(Arc::new(Mutex::new(record)))
    }

    /// Pointer identity of this object.
    pub fn id(&self) -> ObjectId {
        ObjectId(Arc::as_ptr(&self.0) as usize)
    }

    /// Whether both references point to the same object.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Run `f` with shared access to the record.
    pub fn read<R>(&self, f: impl FnOnce(&Record) -> R) -> R {
        f(&self.0.lock())
    }

    /// Run `f` with exclusive access to the record.
    pub fn write<R>(&self, f: impl FnOnce(&mut Record) -> R) -> R {
        f(&mut self.0.lock())
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    // Never prints contents: object graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", self.id())
    }
}

// ── Conversions into Value ───────────────────────────────────────

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

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

impl From<IndexSet<String>> for Value {
    fn from(v: IndexSet<String>) -> Self {
        Self::Set(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Self::Object(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Object(ObjectRef::new(v))
    }
}

// ── Conversions out of Value ─────────────────────────────────────

/// Typed extraction from a [`Value`].
pub trait FromValue: Sized {
    /// Rust type name used in conversion errors.
    const TYPE_NAME: &'static str;

    /// Convert, returning `None` if the variant does not fit.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    const TYPE_NAME: &'static str = "Value";
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    const TYPE_NAME: &'static str = "bool";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i64 {
    const TYPE_NAME: &'static str = "i64";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_int()
    }
}

impl FromValue for i32 {
    const TYPE_NAME: &'static str = "i32";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_int().and_then(|i| i32::try_from(i).ok())
    }
}

impl FromValue for u64 {
    const TYPE_NAME: &'static str = "u64";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_int().and_then(|i| u64::try_from(i).ok())
    }
}

impl FromValue for usize {
    const TYPE_NAME: &'static str = "usize";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_int().and_then(|i| usize::try_from(i).ok())
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "f64";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_float()
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "String";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_text().map(str::to_string)
    }
}

impl FromValue for ObjectRef {
    const TYPE_NAME: &'static str = "ObjectRef";
    fn from_value(value: &Value) -> Option<Self> {
        value.as_object().cloned()
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    const TYPE_NAME: &'static str = "Vec";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}
