//! Error types for state records and the merge engine.

use std::fmt;

use smallvec::SmallVec;

use crate::value::ValueKind;

/// Dotted path to a slot, possibly nested inside objects (`a.b.c`).
///
/// Most paths are shallow, so the segments live inline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(SmallVec<[String; 4]>);

impl FieldPath {
    /// The empty (root) path.
    pub fn root() -> Self {
        Self::default()
    }

    /// A path with a single segment.
    pub fn field(name: impl Into<String>) -> Self {
        let mut segments = SmallVec::new();
        segments.push(name.into());
        Self(segments)
    }

    /// Extend this path by one segment, returning the child path.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// Path segments from outermost to innermost.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

/// Errors from direct [`Record`](crate::Record) access.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// No slot with this name exists.
    #[error("no field named '{name}'")]
    MissingField {
        /// The requested name.
        name: String,
    },
    /// The value's kind does not match the slot's declared kind.
    #[error("field '{name}' is declared {expected}, got {found}")]
    KindMismatch {
        /// Slot name.
        name: String,
        /// Declared kind.
        expected: ValueKind,
        /// Kind of the offending value.
        found: ValueKind,
    },
    /// The slot exists but its value cannot be converted to the requested type.
    #[error("field '{name}' holds {found}, which does not convert to {wanted}")]
    Conversion {
        /// Slot name.
        name: String,
        /// Kind actually stored.
        found: ValueKind,
        /// Rust type that was requested.
        wanted: &'static str,
    },
}

/// Errors from merging a snapshot into a target record.
///
/// Merges are validated before any write happens, so a merge that
/// returns an error has left the target untouched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// A source value would overwrite a declared slot with a different kind.
    #[error("cannot merge {found} into '{path}' (declared {expected})")]
    KindMismatch {
        /// Location of the offending slot.
        path: FieldPath,
        /// Kind declared on the target slot.
        expected: ValueKind,
        /// Kind of the source value.
        found: ValueKind,
    },
}

impl MergeError {
    /// Path of the slot that caused the failure.
    pub fn path(&self) -> &FieldPath {
        match self {
            Self::KindMismatch { path, .. } => path,
        }
    }
}
