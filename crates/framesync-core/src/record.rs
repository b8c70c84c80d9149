//! The shared state container: an ordered record of named slots.
//!
//! A [`Record`] is the field-tagged replacement for a dynamic attribute
//! dictionary. Each slot holds a [`Value`] and, optionally, a declared
//! [`ValueKind`]. Declared slots reject values of another kind through
//! [`Record::set`] and through merges; undeclared slots accept anything.
//!
//! The record itself does no locking. The render thread owns the live
//! record; other threads work on private deep copies and send changes
//! back through the mailbox.

use indexmap::IndexMap;

use crate::error::RecordError;
use crate::value::{FromValue, Value, ValueKind};

/// Slot names starting with this prefix are private.
///
/// Private slots hold control state. They are copied into snapshots but
/// never diffed and never merged.
pub const PRIVATE_PREFIX: &str = "_";

/// Whether `name` denotes a private slot.
pub fn is_private(name: &str) -> bool {
    name.starts_with(PRIVATE_PREFIX)
}

/// One named slot of a [`Record`].
#[derive(Clone, Debug, PartialEq)]
pub struct Slot {
    value: Value,
    kind: Option<ValueKind>,
}

impl Slot {
    /// The stored value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The declared kind, or `None` for a dynamic slot.
    pub fn declared_kind(&self) -> Option<ValueKind> {
        self.kind
    }

    pub(crate) fn into_parts(self) -> (Value, Option<ValueKind>) {
        (self.value, self.kind)
    }
}

/// Ordered collection of named slots.
///
/// `Clone` is shallow with respect to objects: nested [`ObjectRef`]s are
/// shared between the clones. Use [`deep_copy`](crate::snapshot::deep_copy)
/// for an isolated copy.
///
/// [`ObjectRef`]: crate::ObjectRef
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    slots: IndexMap<String, Slot>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder form of [`declare`](Self::declare).
    pub fn declared(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.declare(name, value);
        self
    }

    /// Insert a dynamic slot, replacing any existing slot wholesale
    /// (including its declaration). Returns the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.slots
            .insert(
                name.into(),
                Slot {
                    value: value.into(),
                    kind: None,
                },
            )
            .map(|s| s.value)
    }

    /// Declare a typed slot whose kind is fixed to that of `initial`.
    /// Returns the previous value, if any.
    pub fn declare(&mut self, name: impl Into<String>, initial: impl Into<Value>) -> Option<Value> {
        let value = initial.into();
        let kind = Some(value.kind());
        self.slots
            .insert(name.into(), Slot { value, kind })
            .map(|s| s.value)
    }

    /// Assign a value, honouring the slot's declared kind.
    ///
    /// Creates a dynamic slot if `name` is absent. Returns the previous value.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, RecordError> {
        let name = name.into();
        let value = value.into();
        match self.slots.get_mut(&name) {
            Some(slot) => {
                check_kind(&name, slot.kind, &value)?;
                Ok(Some(std::mem::replace(&mut slot.value, value)))
            }
            None => {
                self.slots.insert(name, Slot { value, kind: None });
                Ok(None)
            }
        }
    }

    /// Mutate a value in place. The declared kind is re-checked afterwards;
    /// on mismatch the previous value is restored and an error returned.
    pub fn update<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Result<R, RecordError> {
        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| RecordError::MissingField {
                name: name.to_string(),
            })?;
        let Some(expected) = slot.kind else {
            return Ok(f(&mut slot.value));
        };
        let saved = slot.value.clone();
        let out = f(&mut slot.value);
        let found = slot.value.kind();
        if found != expected {
            slot.value = saved;
            return Err(RecordError::KindMismatch {
                name: name.to_string(),
                expected,
                found,
            });
        }
        Ok(out)
    }

    /// Value of a slot.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.slots.get(name).map(|s| &s.value)
    }

    /// Typed value of a slot.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, RecordError> {
        let value = self.get(name).ok_or_else(|| RecordError::MissingField {
            name: name.to_string(),
        })?;
        T::from_value(value).ok_or_else(|| RecordError::Conversion {
            name: name.to_string(),
            found: value.kind(),
            wanted: T::TYPE_NAME,
        })
    }

    /// The full slot, including its declaration.
    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    /// Declared kind of a slot (`None` if absent or dynamic).
    pub fn declared_kind(&self, name: &str) -> Option<ValueKind> {
        self.slots.get(name).and_then(|s| s.kind)
    }

    /// Remove a slot, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.slots.shift_remove(name).map(|s| s.value)
    }

    /// Whether a slot with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Number of slots, private ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the record has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// All slots in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots.iter().map(|(k, s)| (k.as_str(), &s.value))
    }

    /// Non-private slots in insertion order.
    pub fn public_fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields().filter(|(k, _)| !is_private(k))
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (&str, &Slot)> {
        self.slots.iter().map(|(k, s)| (k.as_str(), s))
    }

    /// Write `value` into `name` without a kind check. An existing slot
    /// keeps its declaration; a new slot takes `kind_if_new`.
    pub(crate) fn put(&mut self, name: &str, value: Value, kind_if_new: Option<ValueKind>) {
        match self.slots.get_mut(name) {
            Some(slot) => slot.value = value,
            None => {
                self.slots.insert(
                    name.to_string(),
                    Slot {
                        value,
                        kind: kind_if_new,
                    },
                );
            }
        }
    }

    pub(crate) fn put_slot(&mut self, name: &str, slot: Slot) {
        self.slots.insert(name.to_string(), slot);
    }

    pub(crate) fn make_slot(value: Value, kind: Option<ValueKind>) -> Slot {
        Slot { value, kind }
    }
}

fn check_kind(name: &str, declared: Option<ValueKind>, value: &Value) -> Result<(), RecordError> {
    match declared {
        Some(expected) if expected != value.kind() => Err(RecordError::KindMismatch {
            name: name.to_string(),
            expected,
            found: value.kind(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_prefix() {
        assert!(is_private("_sync_queue"));
        assert!(!is_private("statusline"));
    }

    #[test]
    fn set_respects_declared_kind() {
        let mut r = Record::new().declared("value", 0);
        assert_eq!(r.set("value", 3).unwrap(), Some(Value::Int(0)));
        let err = r.set("value", "three").unwrap_err();
        assert!(matches!(
            err,
            RecordError::KindMismatch {
                expected: ValueKind::Int,
                found: ValueKind::Text,
                ..
            }
        ));
        assert_eq!(r.get_as::<i64>("value").unwrap(), 3);
    }

    #[test]
    fn set_creates_dynamic_slot() {
        let mut r = Record::new();
        assert_eq!(r.set("data", vec![1, 2]).unwrap(), None);
        assert_eq!(r.declared_kind("data"), None);
        r.set("data", "replaced").unwrap();
        assert_eq!(r.get_as::<String>("data").unwrap(), "replaced");
    }

    #[test]
    fn insert_drops_declaration() {
        let mut r = Record::new().declared("x", 1);
        r.insert("x", "now text");
        assert_eq!(r.declared_kind("x"), None);
    }

    #[test]
    fn update_restores_on_kind_change() {
        let mut r = Record::new().declared("n", 1);
        r.update("n", |v| *v = Value::Int(2)).unwrap();
        assert_eq!(r.get("n"), Some(&Value::Int(2)));

        let err = r.update("n", |v| *v = Value::Text("bad".into()));
        assert!(err.is_err());
        assert_eq!(r.get("n"), Some(&Value::Int(2)));
    }

    #[test]
    fn update_missing_field() {
        let mut r = Record::new();
        assert!(matches!(
            r.update("nope", |_| ()),
            Err(RecordError::MissingField { .. })
        ));
    }

    #[test]
    fn get_as_conversion_error() {
        let r = Record::new().with("s", "text");
        match r.get_as::<i64>("s") {
            Err(RecordError::Conversion { found, wanted, .. }) => {
                assert_eq!(found, ValueKind::Text);
                assert_eq!(wanted, "i64");
            }
            other => panic!("expected Conversion, got {other:?}"),
        }
    }

    #[test]
    fn public_fields_skip_private() {
        let r = Record::new()
            .with("_queue", 1)
            .with("a", 2)
            .with("b", 3);
        let names: Vec<&str> = r.public_fields().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn remove_preserves_order() {
        let mut r = Record::new().with("a", 1).with("b", 2).with("c", 3);
        r.remove("b");
        let names: Vec<&str> = r.fields().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
