//! One stable pointer per segment.
//!
//! The registry keeps a list of [`SegmentPointer`]s parallel to the tracker's
//! segment list. Tracker diffs are translated into [`ChangeRecord`]s, and
//! every record (derived, direct or replayed by undo) goes through
//! [`PointerRegistry::apply_records`], so forward and inverse application
//! share a single code path.

use std::fmt;

use foldhash::fast::RandomState;
use hashbrown::HashSet;
use smallvec::SmallVec;
use the_cells_event::Listeners;
use thiserror::Error;

use crate::{
  change::{
    BoundSegment,
    ChangeRecord,
    ChangeSource,
  },
  pointer::{
    PointerId,
    SegmentPointer,
  },
  segment::Segment,
  tracker::SegmentsChanged,
};

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Ordinals already given an `Edited` record in the current batch.
type Reported = SmallVec<[usize; 8]>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
  #[error("ordinal {ordinal} is out of range for {len} pointers")]
  OrdinalOutOfRange { ordinal: usize, len: usize },
  #[error("pointer at ordinal {ordinal} does not match the change record")]
  PointerMismatch { ordinal: usize },
  #[error("{pointers} pointers for {segments} segments")]
  LengthMismatch { pointers: usize, segments: usize },
  #[error("pointer at ordinal {ordinal} is not bound to the current segment")]
  Diverged { ordinal: usize },
}

/// Fired after every applied batch of pointer changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointersChanged {
  pub changes: Vec<ChangeRecord>,
  pub source:  ChangeSource,
}

/// A direct pointer operation, for batching through
/// [`PointerRegistry::modify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerEdit {
  Invalidate(Segment),
  Swap(usize, usize),
}

pub struct PointerRegistry {
  pointers:  Vec<SegmentPointer>,
  /// Ids of `pointers`, for membership checks while applying records.
  members:   HashSet<PointerId, RandomState>,
  listeners: Listeners<PointersChanged>,
}

impl fmt::Debug for PointerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PointerRegistry")
      .field("pointers", &self.pointers)
      .finish_non_exhaustive()
  }
}

impl PointerRegistry {
  pub fn new(segments: &[Segment]) -> Self {
    let pointers: Vec<_> = segments
      .iter()
      .map(|segment| SegmentPointer::new(segment.clone()))
      .collect();
    let mut members = HashSet::with_capacity_and_hasher(pointers.len(), RandomState::default());
    members.extend(pointers.iter().map(SegmentPointer::id));
    Self {
      pointers,
      members,
      listeners: Listeners::new("pointers-changed"),
    }
  }

  pub fn pointers(&self) -> &[SegmentPointer] {
    &self.pointers
  }

  pub fn len(&self) -> usize {
    self.pointers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pointers.is_empty()
  }

  pub fn pointer_for_ordinal(&self, ordinal: usize) -> Option<SegmentPointer> {
    self.pointers.get(ordinal).cloned()
  }

  /// The pointer currently standing for `segment`'s ordinal.
  pub fn create_pointer(&self, segment: &Segment) -> Option<SegmentPointer> {
    self.pointer_for_ordinal(segment.ordinal)
  }

  pub fn listeners(&self) -> &Listeners<PointersChanged> {
    &self.listeners
  }

  /// Notifies pointer listeners. Empty batches are not published.
  pub fn publish(&self, changes: &[ChangeRecord], source: ChangeSource) {
    if changes.is_empty() {
      return;
    }
    self.listeners.dispatch(&PointersChanged {
      changes: changes.to_vec(),
      source,
    });
  }

  /// Checks that every pointer is bound to the segment at its ordinal.
  pub fn check_consistency(&self, segments: &[Segment]) -> Result<()> {
    if self.pointers.len() != segments.len() {
      return Err(RegistryError::LengthMismatch {
        pointers: self.pointers.len(),
        segments: segments.len(),
      });
    }
    match self
      .pointers
      .iter()
      .zip(segments)
      .position(|(pointer, segment)| !pointer.is_bound_to(segment))
    {
      Some(ordinal) => Err(RegistryError::Diverged { ordinal }),
      None => Ok(()),
    }
  }

  /// Translates a tracker event into pointer changes and applies them.
  ///
  /// `segments` is the full segment list right after the event.
  pub fn segments_changed(
    &mut self,
    event: &SegmentsChanged,
    segments: &[Segment],
  ) -> Result<Vec<ChangeRecord>> {
    let mut records = Vec::new();
    let mut reported = Reported::new();

    if !event.is_structural() {
      for segment in event.old_affected.iter().chain(&event.new_affected) {
        self.edit_ordinal(segment.ordinal, segments, &mut reported, &mut records)?;
      }
    } else if event.is_single_resize() {
      for segment in &event.new_affected {
        self.edit_ordinal(segment.ordinal, segments, &mut reported, &mut records)?;
      }
      let resized = event.new_segments[0].ordinal;
      self.edit_ordinal(resized, segments, &mut reported, &mut records)?;
    } else {
      let ordinal = event
        .old_segments
        .first()
        .or(event.new_segments.first())
        .map_or(0, |segment| segment.ordinal);

      let removed = ChangeRecord::Removed {
        ordinal,
        entries: event
          .old_segments
          .iter()
          .enumerate()
          .map(|(offset, segment)| {
            self
              .pointers
              .get(ordinal + offset)
              .map(|pointer| BoundSegment::new(pointer.clone(), segment.clone()))
              .ok_or(RegistryError::OrdinalOutOfRange {
                ordinal: ordinal + offset,
                len:     self.pointers.len(),
              })
          })
          .collect::<Result<_>>()?,
      };
      self.apply_record(&removed)?;
      records.push(removed);

      let inserted = ChangeRecord::Inserted {
        ordinal,
        entries: event
          .new_segments
          .iter()
          .map(|segment| BoundSegment::new(SegmentPointer::new(segment.clone()), segment.clone()))
          .collect(),
      };
      self.apply_record(&inserted)?;
      records.push(inserted);

      reported.extend(ordinal..ordinal + event.new_segments.len());
      for segment in &event.new_affected {
        self.edit_ordinal(segment.ordinal, segments, &mut reported, &mut records)?;
      }
    }

    if self.pointers.len() != segments.len() {
      return Err(RegistryError::LengthMismatch {
        pointers: self.pointers.len(),
        segments: segments.len(),
      });
    }
    for (ordinal, segment) in segments.iter().enumerate() {
      if !self.pointers[ordinal].is_bound_to(segment) {
        self.edit_ordinal(ordinal, segments, &mut reported, &mut records)?;
      }
    }

    tracing::trace!(
      records = records.len(),
      pointers = self.pointers.len(),
      "pointers updated from segment change"
    );
    Ok(records)
  }

  /// Emits and applies `Edited` for the pointer at `ordinal` unless it was
  /// already reported in this batch.
  fn edit_ordinal(
    &mut self,
    ordinal: usize,
    segments: &[Segment],
    reported: &mut Reported,
    records: &mut Vec<ChangeRecord>,
  ) -> Result<()> {
    if reported.contains(&ordinal) {
      return Ok(());
    }
    let len = self.pointers.len();
    let (Some(pointer), Some(after)) = (self.pointers.get(ordinal), segments.get(ordinal)) else {
      return Err(RegistryError::OrdinalOutOfRange { ordinal, len });
    };
    let Some(before) = pointer.get() else {
      return Err(RegistryError::PointerMismatch { ordinal });
    };
    let record = ChangeRecord::Edited {
      pointer: pointer.clone(),
      before,
      after: after.clone(),
    };
    self.apply_record(&record)?;
    records.push(record);
    reported.push(ordinal);
    Ok(())
  }

  /// Retires the pointer bound to `segment` and puts a fresh one bound to the
  /// same segment in its place.
  pub fn invalidate(&mut self, segment: &Segment) -> Vec<ChangeRecord> {
    let ordinal = segment.ordinal;
    let Some(pointer) = self
      .pointers
      .get(ordinal)
      .filter(|pointer| pointer.is_bound_to(segment))
      .cloned()
    else {
      tracing::error!(ordinal, "cannot invalidate a segment no pointer is bound to");
      return Vec::new();
    };

    let records = vec![
      ChangeRecord::Removed {
        ordinal,
        entries: vec![BoundSegment::new(pointer, segment.clone())],
      },
      ChangeRecord::Inserted {
        ordinal,
        entries: vec![BoundSegment::new(
          SegmentPointer::new(segment.clone()),
          segment.clone(),
        )],
      },
    ];
    self.apply_direct(records)
  }

  /// Exchanges the positions of the pointers at `first` and `second`; each
  /// position keeps its segment.
  pub fn swap(&mut self, first: usize, second: usize) -> Vec<ChangeRecord> {
    if first == second {
      return Vec::new();
    }
    let len = self.pointers.len();
    if first >= len || second >= len {
      tracing::error!(first, second, len, "pointer swap out of range");
      return Vec::new();
    }
    self.apply_direct(vec![ChangeRecord::Swapped { first, second }])
  }

  /// Applies several direct operations as one batch.
  pub fn modify(&mut self, edits: &[PointerEdit]) -> Vec<ChangeRecord> {
    edits
      .iter()
      .flat_map(|edit| {
        match edit {
          PointerEdit::Invalidate(segment) => self.invalidate(segment),
          PointerEdit::Swap(first, second) => self.swap(*first, *second),
        }
      })
      .collect()
  }

  fn apply_direct(&mut self, records: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    match self.apply_records(&records) {
      Ok(()) => records,
      Err(err) => {
        tracing::error!(%err, "failed to apply direct pointer change");
        Vec::new()
      },
    }
  }

  /// Applies `records` in order.
  pub fn apply_records(&mut self, records: &[ChangeRecord]) -> Result<()> {
    records.iter().try_for_each(|record| self.apply_record(record))
  }

  fn apply_record(&mut self, record: &ChangeRecord) -> Result<()> {
    let len = self.pointers.len();
    match record {
      ChangeRecord::Inserted { ordinal, entries } => {
        if *ordinal > len {
          return Err(RegistryError::OrdinalOutOfRange {
            ordinal: *ordinal,
            len,
          });
        }
        for entry in entries {
          entry.pointer.bind(Some(entry.segment.clone()));
          self.members.insert(entry.pointer.id());
        }
        self.pointers.splice(
          *ordinal..*ordinal,
          entries.iter().map(|entry| entry.pointer.clone()),
        );
      },
      ChangeRecord::Removed { ordinal, entries } => {
        let end = ordinal + entries.len();
        if end > len {
          return Err(RegistryError::OrdinalOutOfRange { ordinal: end, len });
        }
        if let Some(offset) = entries
          .iter()
          .zip(&self.pointers[*ordinal..end])
          .position(|(entry, pointer)| entry.pointer != *pointer)
        {
          return Err(RegistryError::PointerMismatch {
            ordinal: ordinal + offset,
          });
        }
        for pointer in self.pointers.drain(*ordinal..end) {
          self.members.remove(&pointer.id());
          pointer.bind(None);
        }
      },
      ChangeRecord::Edited {
        pointer,
        before,
        after,
      } => {
        if !self.members.contains(&pointer.id()) {
          return Err(RegistryError::PointerMismatch {
            ordinal: before.ordinal,
          });
        }
        pointer.bind(Some(after.clone()));
      },
      ChangeRecord::Swapped { first, second } => {
        let out_of_range = (*first).max(*second);
        if out_of_range >= len {
          return Err(RegistryError::OrdinalOutOfRange {
            ordinal: out_of_range,
            len,
          });
        }
        let first_segment = self.pointers[*first].get();
        let second_segment = self.pointers[*second].get();
        self.pointers.swap(*first, *second);
        self.pointers[*first].bind(first_segment);
        self.pointers[*second].bind(second_segment);
      },
    }
    Ok(())
  }
}
