//! Merge engine: copy a snapshot's slots back onto a live record.
//!
//! Both modes skip private slots and add slots that exist only in the
//! source. They differ in how an existing object slot is treated:
//!
//! - [`MergeMode::Shallow`] overwrites it with the source value (the
//!   target then shares the source's object).
//! - [`MergeMode::Deep`] recurses into it field by field, keeping the
//!   target's object identity. Each (target, source) object pair is
//!   visited at most once per call, so cyclic graphs terminate.
//!
//! Merges run in two phases. Planning walks the source, checks declared
//! kinds and records every write; only a fully valid plan is applied.
//!
//! [`merge`] takes a whole record as its source. [`apply_changes`] takes
//! the [`ChangeSet`] a transaction produces.

use std::collections::HashSet;
use std::fmt;

use crate::changeset::{Change, ChangeSet};
use crate::error::{FieldPath, MergeError};
use crate::id::ObjectId;
use crate::record::{is_private, Record, Slot};
use crate::value::{ObjectRef, Value, ValueKind};

/// How a snapshot is merged into the live record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MergeMode {
    /// Overwrite top-level slots.
    #[default]
    Shallow,
    /// Recurse into nested objects present on both sides.
    Deep,
}

impl MergeMode {
    /// `Deep` if `deep` is true, otherwise `Shallow`.
    pub fn from_deep(deep: bool) -> Self {
        if deep {
            Self::Deep
        } else {
            Self::Shallow
        }
    }

    /// Whether this is [`MergeMode::Deep`].
    pub fn is_deep(self) -> bool {
        self == Self::Deep
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shallow => f.write_str("shallow"),
            Self::Deep => f.write_str("deep"),
        }
    }
}

/// What a merge did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Slots written (overwritten or created).
    pub written: usize,
    /// Of `written`, slots that did not exist on the target.
    pub created: usize,
    /// Object pairs descended into (deep mode only).
    pub recursed: usize,
    /// Private slots ignored.
    pub skipped_private: usize,
    /// Object pairs not revisited because they were already merged.
    pub skipped_cycles: usize,
}

/// Merge `source` into `target` using `mode`.
///
/// Every slot of `source` counts as changed. Objects in `source` are not
/// copied: after a shallow merge the target shares them.
pub fn merge(target: &mut Record, source: &Record, mode: MergeMode) -> Result<MergeStats, MergeError> {
    apply_changes(target, &ChangeSet::from_record(source), mode)
}

/// Overwrite every public top-level slot of `target` with `source`'s.
pub fn shallow_merge(target: &mut Record, source: &Record) -> Result<MergeStats, MergeError> {
    merge(target, source, MergeMode::Shallow)
}

/// Recursively merge `source` into `target`, preserving the identity of
/// objects that exist on both sides.
pub fn deep_merge(target: &mut Record, source: &Record) -> Result<MergeStats, MergeError> {
    merge(target, source, MergeMode::Deep)
}

/// Apply a change set to `target`.
///
/// In shallow mode every change installs its whole slot. In deep mode a
/// [`Change::Patch`] recurses into the live object when there is one and
/// installs the whole edited object when the live slot is missing or no
/// longer an object.
pub fn apply_changes(
    target: &mut Record,
    changes: &ChangeSet,
    mode: MergeMode,
) -> Result<MergeStats, MergeError> {
    match mode {
        MergeMode::Shallow => apply_shallow(target, changes),
        MergeMode::Deep => {
            let mut planner = Planner::default();
            let entries = changes.clone().into_entries();
            planner.plan(target, &Location::Root, entries, &FieldPath::root())?;
            Ok(planner.apply(target))
        }
    }
}

fn apply_shallow(target: &mut Record, changes: &ChangeSet) -> Result<MergeStats, MergeError> {
    let mut stats = MergeStats::default();
    let mut writes: Vec<(&str, &Slot)> = Vec::new();

    for (name, change) in changes.iter() {
        if is_private(name) {
            stats.skipped_private += 1;
            continue;
        }
        let slot = change.slot();
        match target.slot(name) {
            Some(existing) => check(existing.declared_kind(), slot.value(), || {
                FieldPath::field(name)
            })?,
            None => stats.created += 1,
        }
        writes.push((name, slot));
    }

    stats.written = writes.len();
    for (name, slot) in writes {
        target.put(name, slot.value().clone(), slot.declared_kind());
    }
    Ok(stats)
}

fn check(
    declared: Option<ValueKind>,
    value: &Value,
    path: impl FnOnce() -> FieldPath,
) -> Result<(), MergeError> {
    match declared {
        Some(expected) if expected != value.kind() => Err(MergeError::KindMismatch {
            path: path(),
            expected,
            found: value.kind(),
        }),
        _ => Ok(()),
    }
}

// ── Deep merge planning ──────────────────────────────────────────

/// Where a planned write lands.
#[derive(Clone)]
enum Location {
    Root,
    Object(ObjectRef),
}

struct PlannedWrite {
    at: Location,
    name: String,
    value: Value,
    kind_if_new: Option<ValueKind>,
}

/// What the planner needs to know about an existing target slot.
struct LiveSlot {
    object: Option<ObjectRef>,
    declared: Option<ValueKind>,
}

impl LiveSlot {
    fn of(slot: &Slot) -> Self {
        Self {
            object: slot.value().as_object().cloned(),
            declared: slot.declared_kind(),
        }
    }
}

#[derive(Default)]
struct Planner {
    writes: Vec<PlannedWrite>,
    visited: HashSet<(ObjectId, ObjectId)>,
    stats: MergeStats,
}

impl Planner {
    fn plan(
        &mut self,
        root: &Record,
        at: &Location,
        source: Vec<(String, Change)>,
        path: &FieldPath,
    ) -> Result<(), MergeError> {
        for (name, change) in source {
            if is_private(&name) {
                self.stats.skipped_private += 1;
                continue;
            }
            let here = path.child(&name);
            let live_slot = match at {
                Location::Root => root.slot(&name).map(LiveSlot::of),
                Location::Object(obj) => obj.read(|r| r.slot(&name).map(LiveSlot::of)),
            };
            let live = live_slot.as_ref().and_then(|p| p.object.clone());

            let slot = match (change, live) {
                (Change::Patch { nested, .. }, Some(live)) => {
                    self.stats.recursed += 1;
                    self.plan(root, &Location::Object(live), nested.into_entries(), &here)?;
                    continue;
                }
                (Change::Patch { whole, .. }, None) => whole,
                (Change::Replace(slot), Some(live)) => {
                    let Some(src) = slot.value().as_object().cloned() else {
                        self.write(at, name, slot, live_slot.as_ref(), here)?;
                        continue;
                    };
                    if live.ptr_eq(&src) {
                        continue;
                    }
                    if !self.visited.insert((live.id(), src.id())) {
                        self.stats.skipped_cycles += 1;
                        continue;
                    }
                    self.stats.recursed += 1;
                    let nested = src.read(|r| ChangeSet::from_record(r).into_entries());
                    self.plan(root, &Location::Object(live), nested, &here)?;
                    continue;
                }
                (Change::Replace(slot), None) => slot,
            };

            self.write(at, name, slot, live_slot.as_ref(), here)?;
        }
        Ok(())
    }

    /// Plan a wholesale write, checking the live slot's declaration.
    fn write(
        &mut self,
        at: &Location,
        name: String,
        slot: Slot,
        existing: Option<&LiveSlot>,
        path: FieldPath,
    ) -> Result<(), MergeError> {
        let (value, kind) = slot.into_parts();
        match existing {
            Some(live_slot) => check(live_slot.declared, &value, || path)?,
            None => self.stats.created += 1,
        }
        self.writes.push(PlannedWrite {
            at: at.clone(),
            name,
            value,
            kind_if_new: kind,
        });
        Ok(())
    }

    fn apply(self, root: &mut Record) -> MergeStats {
        let mut stats = self.stats;
        stats.written = self.writes.len();
        for w in self.writes {
            match w.at {
                Location::Root => root.put(&w.name, w.value, w.kind_if_new),
                Location::Object(obj) => obj.write(|r| r.put(&w.name, w.value, w.kind_if_new)),
            }
        }
        stats
    }
}
