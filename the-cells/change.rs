//! Pointer-level change records.
//!
//! Every record carries the data needed to build its own inverse, so a batch
//! can be undone without consulting the tracker:
//!
//! - `Inserted` and `Removed` invert into each other;
//! - `Edited(p, before, after)` inverts into `Edited(p, after, before)`;
//! - `Swapped` is its own inverse.

use crate::{
  pointer::SegmentPointer,
  segment::Segment,
};

/// A pointer together with the segment it is (or was) bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundSegment {
  pub pointer: SegmentPointer,
  pub segment: Segment,
}

impl BoundSegment {
  pub fn new(pointer: SegmentPointer, segment: Segment) -> Self {
    Self { pointer, segment }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecord {
  /// `entries` were inserted at `ordinal..ordinal + entries.len()`.
  Inserted {
    ordinal: usize,
    entries: Vec<BoundSegment>,
  },
  /// `entries` were removed from `ordinal..ordinal + entries.len()`; their
  /// pointers are retired.
  Removed {
    ordinal: usize,
    entries: Vec<BoundSegment>,
  },
  /// `pointer` was rebound from `before` to `after`.
  Edited {
    pointer: SegmentPointer,
    before:  Segment,
    after:   Segment,
  },
  /// The pointers at `first` and `second` exchanged positions.
  Swapped { first: usize, second: usize },
}

impl ChangeRecord {
  #[must_use]
  pub fn invert(&self) -> Self {
    match self {
      Self::Inserted { ordinal, entries } => {
        Self::Removed {
          ordinal: *ordinal,
          entries: entries.clone(),
        }
      },
      Self::Removed { ordinal, entries } => {
        Self::Inserted {
          ordinal: *ordinal,
          entries: entries.clone(),
        }
      },
      Self::Edited {
        pointer,
        before,
        after,
      } => {
        Self::Edited {
          pointer: pointer.clone(),
          before:  after.clone(),
          after:   before.clone(),
        }
      },
      Self::Swapped { first, second } => {
        Self::Swapped {
          first:  *first,
          second: *second,
        }
      },
    }
  }

  /// Pointers this record mentions.
  pub fn pointers(&self) -> impl Iterator<Item = &SegmentPointer> {
    let (entries, single): (&[BoundSegment], _) = match self {
      Self::Inserted { entries, .. } | Self::Removed { entries, .. } => (entries, None),
      Self::Edited { pointer, .. } => (&[], Some(pointer)),
      Self::Swapped { .. } => (&[], None),
    };
    entries.iter().map(|entry| &entry.pointer).chain(single)
  }
}

/// Inverse of a batch: the inverted records in reverse order.
pub fn invert_all(records: &[ChangeRecord]) -> Vec<ChangeRecord> {
  records.iter().rev().map(ChangeRecord::invert).collect()
}

/// What produced a batch of pointer changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeSource {
  /// A text edit made outside undo/redo.
  Edit,
  /// A direct `invalidate`/`swap`/`modify` call.
  Direct,
  Undo,
  Redo,
}
