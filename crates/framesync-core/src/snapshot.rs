//! Snapshot operations: isolated deep copies and structural comparison.
//!
//! Both walk object graphs that may contain shared or cyclic
//! references. They never hold an object lock while recursing: each
//! object's slots are cloned out (a cheap, reference-level clone) and the
//! lock is released before descending.

use std::collections::{HashMap, HashSet};

use crate::id::ObjectId;
use crate::record::{Record, Slot};
use crate::value::{ObjectRef, Value};

pub(crate) type VisitedPairs = HashSet<(ObjectId, ObjectId)>;
pub(crate) type CopyMemo = HashMap<ObjectId, ObjectRef>;

/// Take an isolated deep copy of a record.
///
/// Every nested object is re-allocated. Aliasing and cycles in the source
/// graph are reproduced in the copy: two slots referring to the same object
/// refer to the same *copied* object afterwards. Private slots are copied
/// too; declarations are preserved.
pub fn deep_copy(record: &Record) -> Record {
    let mut memo = HashMap::new();
    copy_slots(record.slots(), &mut memo)
}

fn copy_slots<'a>(
    slots: impl Iterator<Item = (&'a str, &'a Slot)>,
    memo: &mut CopyMemo,
) -> Record {
    let mut out = Record::new();
    for (name, slot) in slots {
        let value = copy_value(slot.value(), memo);
        out.put_slot(name, Record::make_slot(value, slot.declared_kind()));
    }
    out
}

/// Deep-copy one value, sharing `memo` with earlier copies so aliasing
/// across calls is preserved.
pub(crate) fn copy_value(value: &Value, memo: &mut CopyMemo) -> Value {
    match value {
        Value::List(items) => Value::List(items.iter().map(|v| copy_value(v, memo)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), copy_value(v, memo)))
                .collect(),
        ),
        Value::Object(obj) => Value::Object(copy_object(obj, memo)),
        other => other.clone(),
    }
}

fn copy_object(obj: &ObjectRef, memo: &mut CopyMemo) -> ObjectRef {
    if let Some(copy) = memo.get(&obj.id()) {
        return copy.clone();
    }
    // Register before descending so back-references resolve to the copy.
    let copy = ObjectRef::new(Record::new());
    memo.insert(obj.id(), copy.clone());

    let inner = obj.read(Record::clone);
    let copied = copy_slots(inner.slots(), memo);
    copy.write(|r| *r = copied);
    copy
}

/// Structural equality of two values.
///
/// Objects are compared field by field; a pair of objects already under
/// comparison is assumed equal, which makes the walk terminate on cycles.
/// Floats compare by total order, so a `NaN` equals an identical `NaN`.
/// Declarations are ignored.
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    eq_value(a, b, &mut HashSet::new())
}

/// Structural equality of two records (see [`deep_eq`]).
pub fn deep_eq_records(a: &Record, b: &Record) -> bool {
    eq_records(a, b, &mut HashSet::new())
}

pub(crate) fn eq_value(a: &Value, b: &Value, visited: &mut VisitedPairs) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y).is_eq(),
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| eq_value(p, q, visited))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| eq_value(v, w, visited)))
        }
        (Value::Object(x), Value::Object(y)) => {
            if x.ptr_eq(y) || !visited.insert((x.id(), y.id())) {
                return true;
            }
            let xr = x.read(Record::clone);
            let yr = y.read(Record::clone);
            eq_records(&xr, &yr, visited)
        }
        _ => a == b,
    }
}

fn eq_records(a: &Record, b: &Record, visited: &mut VisitedPairs) -> bool {
    a.len() == b.len()
        && a
            .fields()
            .all(|(k, v)| b.get(k).is_some_and(|w| eq_value(v, w, visited)))
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn deep_copy_is_isolated() {
        let original = nested();
        let copy = deep_copy(&original);
        assert!(deep_eq_records(&original, &copy));

        let b = object_at(&copy, &["a", "b"]);
        b.write(|r| r.insert("c", 99));

        let orig_b = object_at(&original, &["a", "b"]);
        assert_eq!(orig_b.read(|r| r.get_as::<i64>("c")).unwrap(), 1);
        assert!(!orig_b.ptr_eq(&b));
    }

    #[test]
    fn deep_copy_preserves_aliasing() {
        let shared = ObjectRef::new(Record::new().with("v", 1));
        let original = Record::new()
            .with("left", shared.clone())
            .with("right", shared);
        let copy = deep_copy(&original);
        let l = copy.get_as::<ObjectRef>("left").unwrap();
        let r = copy.get_as::<ObjectRef>("right").unwrap();
        assert!(l.ptr_eq(&r));
        assert!(!l.ptr_eq(&original.get_as::<ObjectRef>("left").unwrap()));
    }

    #[test]
    fn deep_copy_handles_cycles() {
        let node = ObjectRef::new(Record::new().with("name", "loop"));
        node.write(|r| r.insert("next", node.clone()));
        let original = Record::new().with("head", node.clone());

        let copy = deep_copy(&original);
        let head = copy.get_as::<ObjectRef>("head").unwrap();
        let next = head.read(|r| r.get_as::<ObjectRef>("next")).unwrap();
        assert!(head.ptr_eq(&next));
        assert!(!head.ptr_eq(&node));
        assert!(deep_eq_records(&original, &copy));
    }

    #[test]
    fn deep_copy_keeps_private_and_declarations() {
        let original = Record::new().with("_internal", 1).declared("x", 2);
        let copy = deep_copy(&original);
        assert_eq!(copy.get("_internal"), Some(&Value::Int(1)));
        assert_eq!(copy.declared_kind("x"), Some(crate::ValueKind::Int));
    }

    #[test]
    fn deep_eq_detects_nested_difference() {
        let a = nested();
        let b = deep_copy(&a);
        object_at(&b, &["a", "b"]).write(|r| r.insert("c", 2));
        assert!(!deep_eq_records(&a, &b));
    }

    #[test]
    fn deep_eq_treats_identical_nan_as_equal() {
        let a = Record::new()
            .with("x", f64::NAN)
            .with("list", vec![Value::Float(f64::NAN)])
            .with("obj", Record::new().with("y", f64::NAN));
        let b = deep_copy(&a);
        assert!(deep_eq_records(&a, &b));
        assert!(!deep_eq(&Value::Float(f64::NAN), &Value::Float(1.0)));
        // Total order keeps the sign of zero apart.
        assert!(!deep_eq(&Value::Float(0.0), &Value::Float(-0.0)));
    }
}
