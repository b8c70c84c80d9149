//! Change sets: what a snapshot sends back to the live record.
//!
//! [`changes`] compares a working snapshot against the base it was taken
//! from and keeps only the public slots that differ. Every value in the
//! result is a detached deep copy, so references the caller still holds
//! into its snapshot can never reach the live record after a merge.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::merge::MergeMode;
use crate::record::{is_private, Record, Slot};
use crate::snapshot::{copy_value, deep_eq, CopyMemo, VisitedPairs};
use crate::value::{ObjectRef, Value};

/// One changed slot.
#[derive(Clone, Debug)]
pub enum Change {
    /// Install this slot as a whole.
    Replace(Slot),
    /// An object edited in place (deep mode only).
    ///
    /// `nested` holds the field-level changes. `whole` is the complete
    /// edited object, installed instead when the live slot no longer
    /// holds an object to recurse into.
    Patch {
        /// Changes inside the object.
        nested: ChangeSet,
        /// The full edited object.
        whole: Slot,
    },
}

impl Change {
    /// The slot installed when this change is applied wholesale.
    pub fn slot(&self) -> &Slot {
        match self {
            Self::Replace(slot) | Self::Patch { whole: slot, .. } => slot,
        }
    }

    /// Shorthand for `self.slot().value()`.
    pub fn value(&self) -> &Value {
        self.slot().value()
    }

    /// The nested change set of a [`Change::Patch`].
    pub fn nested(&self) -> Option<&ChangeSet> {
        match self {
            Self::Replace(_) => None,
            Self::Patch { nested, .. } => Some(nested),
        }
    }
}

/// Ordered set of slot changes, keyed by slot name.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    entries: IndexMap<String, Change>,
}

impl ChangeSet {
    /// An empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every slot of `record` as a [`Change::Replace`], private ones
    /// included (merges skip them).
    ///
    /// Values are cloned at reference level: objects stay shared with
    /// `record`.
    pub fn from_record(record: &Record) -> Self {
        let entries = record
            .slots()
            .map(|(name, slot)| (name.to_string(), Change::Replace(slot.clone())))
            .collect();
        Self { entries }
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The change for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Change> {
        self.entries.get(name)
    }

    /// Whether `name` changed.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Changed slot names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Change)> {
        self.entries.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub(crate) fn insert(&mut self, name: &str, change: Change) {
        self.entries.insert(name.to_string(), change);
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Change)> {
        self.entries.into_iter().collect()
    }
}

impl From<Record> for ChangeSet {
    fn from(record: Record) -> Self {
        Self::from_record(&record)
    }
}

/// Extract the public slots of `working` that differ from `base`.
///
/// The result is what a transaction merges back: slots the caller never
/// touched are absent, so they cannot overwrite concurrent updates.
///
/// - `Shallow`: a changed slot is a [`Change::Replace`] of its working
///   value.
/// - `Deep`: where base and working both hold objects, a changed object is
///   a [`Change::Patch`] (omitted if nothing inside changed).
///
/// Slots removed from `working` are not represented. Values are deep
/// copies; aliasing among them is preserved.
pub fn changes(base: &Record, working: &Record, mode: MergeMode) -> ChangeSet {
    let mut differ = Differ {
        mode,
        visited: HashSet::new(),
        memo: HashMap::new(),
    };
    differ.records(base, working)
}

struct Differ {
    mode: MergeMode,
    visited: VisitedPairs,
    memo: CopyMemo,
}

impl Differ {
    fn records(&mut self, base: &Record, working: &Record) -> ChangeSet {
        let mut out = ChangeSet::new();
        for (name, slot) in working.slots() {
            if is_private(name) {
                continue;
            }
            let Some(before) = base.get(name) else {
                out.insert(name, Change::Replace(self.detach(slot)));
                continue;
            };
            if self.mode.is_deep() {
                if let (Value::Object(b), Value::Object(w)) = (before, slot.value()) {
                    if let Some(nested) = self.objects(b, w) {
                        let whole = self.detach(slot);
                        out.insert(name, Change::Patch { nested, whole });
                    }
                    continue;
                }
            }
            if !deep_eq(before, slot.value()) {
                out.insert(name, Change::Replace(self.detach(slot)));
            }
        }
        out
    }

    fn objects(&mut self, base: &ObjectRef, working: &ObjectRef) -> Option<ChangeSet> {
        if base.ptr_eq(working) || !self.visited.insert((base.id(), working.id())) {
            return None;
        }
        let b = base.read(Record::clone);
        let w = working.read(Record::clone);
        let nested = self.records(&b, &w);
        (!nested.is_empty()).then_some(nested)
    }

    fn detach(&mut self, slot: &Slot) -> Slot {
        Record::make_slot(copy_value(slot.value(), &mut self.memo), slot.declared_kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::deep_copy;

    fn nested() -> Record {
        let b = Record::new().with("c", 1);
        let a = Record::new().with("b", b);
        Record::new().with("a", a).with("n", 0)
    }

    fn object_at(record: &Record, path: &[&str]) -> ObjectRef {
        let mut obj = record.get_as::<ObjectRef>(path[0]).unwrap();
        for seg in &path[1..] {
            obj = obj.read(|r| r.get_as::<ObjectRef>(seg)).unwrap();
        }
        obj
    }

    #[test]
    fn shallow_changes_carry_full_values() {
        let base = nested();
        let working = deep_copy(&base);
        object_at(&working, &["a", "b"]).write(|r| r.insert("c", 2));

        let delta = changes(&base, &working, MergeMode::Shallow);
        assert_eq!(delta.len(), 1);
        let a = delta.get("a").unwrap();
        assert!(a.nested().is_none());
        assert!(crate::snapshot::deep_eq(a.value(), working.get("a").unwrap()));
    }

    #[test]
    fn changes_are_detached_from_working() {
        let base = nested();
        let working = deep_copy(&base);
        object_at(&working, &["a", "b"]).write(|r| r.insert("c", 2));

        for mode in [MergeMode::Shallow, MergeMode::Deep] {
            let delta = changes(&base, &working, mode);
            let a = delta.get("a").unwrap().value().as_object().unwrap().clone();
            assert!(!a.ptr_eq(&working.get_as::<ObjectRef>("a").unwrap()));

            // Later edits to the working copy do not leak into the delta.
            object_at(&working, &["a", "b"]).write(|r| r.insert("late", 1));
            let b = a.read(|r| r.get_as::<ObjectRef>("b")).unwrap();
            assert!(!b.read(|r| r.contains("late")));
            object_at(&working, &["a", "b"]).write(|r| r.remove("late"));
        }
    }

    #[test]
    fn deep_changes_are_minimal() {
        let base = nested().with("other", ObjectRef::new(Record::new().with("k", 1)));
        let working = deep_copy(&base);
        object_at(&working, &["a", "b"]).write(|r| {
            r.insert("d", 3);
        });

        let delta = changes(&base, &working, MergeMode::Deep);
        assert_eq!(delta.names().collect::<Vec<_>>(), vec!["a"]);
        let a = delta.get("a").unwrap().nested().unwrap();
        let b = a.get("b").unwrap().nested().unwrap();
        assert_eq!(b.names().collect::<Vec<_>>(), vec!["d"]);
        assert!(matches!(b.get("d"), Some(Change::Replace(_))));
    }

    #[test]
    fn deep_patch_keeps_whole_object() {
        let base = Record::new().with("a", Record::new().with("x", 1).with("y", 2));
        let working = deep_copy(&base);
        object_at(&working, &["a"]).write(|r| r.insert("x", 10));

        let delta = changes(&base, &working, MergeMode::Deep);
        let Some(Change::Patch { nested, whole }) = delta.get("a") else {
            panic!("expected a patch, got {:?}", delta.get("a"));
        };
        assert_eq!(nested.names().collect::<Vec<_>>(), vec!["x"]);
        let whole = whole.value().as_object().unwrap();
        assert_eq!(whole.read(|r| r.get_as::<i64>("x")).unwrap(), 10);
        assert_eq!(whole.read(|r| r.get_as::<i64>("y")).unwrap(), 2);
    }

    #[test]
    fn changes_skip_private_and_unchanged() {
        let base = Record::new().with("_queue", 1).with("a", 1).with("b", 2);
        let mut working = deep_copy(&base);
        working.insert("_queue", 2);
        working.insert("b", 3);
        working.insert("fresh", true);

        let delta = changes(&base, &working, MergeMode::Shallow);
        assert_eq!(delta.names().collect::<Vec<_>>(), vec!["b", "fresh"]);
    }

    #[test]
    fn untouched_nan_is_not_a_change() {
        let base = Record::new()
            .with("x", f64::NAN)
            .with("y", 1)
            .with("obj", Record::new().with("z", f64::NAN))
            .with("list", vec![Value::Float(f64::NAN)]);
        let working = deep_copy(&base);

        for mode in [MergeMode::Shallow, MergeMode::Deep] {
            assert!(changes(&base, &working, mode).is_empty());
        }
    }

    #[test]
    fn deep_changes_terminate_on_cycles() {
        let node = ObjectRef::new(Record::new().with("v", 0));
        node.write(|r| r.insert("me", node.clone()));
        let base = Record::new().with("node", node);
        let working = deep_copy(&base);
        working
            .get_as::<ObjectRef>("node")
            .unwrap()
            .write(|r| r.insert("v", 1));

        let delta = changes(&base, &working, MergeMode::Deep);
        let n = delta.get("node").unwrap().nested().unwrap();
        assert_eq!(n.names().collect::<Vec<_>>(), vec!["v"]);
        assert_eq!(n.get("v").unwrap().value(), &Value::Int(1));
    }

    #[test]
    fn from_record_keeps_every_slot() {
        let record = Record::new().with("_p", 1).declared("n", 2);
        let set = ChangeSet::from(record);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["_p", "n"]);
        assert_eq!(
            set.get("n").unwrap().slot().declared_kind(),
            Some(crate::ValueKind::Int)
        );
    }
}
