//! Partition tracking for one buffer.
//!
//! The tracker owns the current segment list. Around every text mutation the
//! host calls [`PartitionTracker::before_change`] with the range about to be
//! replaced and [`PartitionTracker::after_change`] with the range that was
//! inserted. The tracker regenerates the whole list, diffs it against the
//! previous one and reports only the region that actually changed.

use std::{
  fmt,
  ops::Range,
  sync::Arc,
};

use ropey::Rope;
use the_cells_event::Listeners;

use crate::{
  generator::SegmentGenerator,
  resolver::affected_segments,
  segment::{
    Segment,
    validate_partition,
  },
  text::{
    self,
    TextEdit,
  },
};

/// Fired before a mutation is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeforeSegmentsChange {
  pub old_affected:       Vec<Segment>,
  pub modification_stamp: u64,
}

/// Fired after every mutation.
///
/// `old_segments`/`new_segments` are the trimmed, genuinely changed regions
/// of the previous and new lists. Both are empty when the list did not change
/// structurally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentsChanged {
  pub old_segments:       Vec<Segment>,
  pub new_segments:       Vec<Segment>,
  pub old_affected:       Vec<Segment>,
  pub new_affected:       Vec<Segment>,
  pub modification_stamp: u64,
}

impl SegmentsChanged {
  /// Whether segments were added, removed or reshaped.
  pub fn is_structural(&self) -> bool {
    !self.old_segments.is_empty() || !self.new_segments.is_empty()
  }

  /// A single segment changed size without splitting or merging.
  pub fn is_single_resize(&self) -> bool {
    match (self.old_segments.as_slice(), self.new_segments.as_slice()) {
      ([old], [new]) => old.kind == new.kind && old.language == new.language,
      _ => false,
    }
  }
}

/// State captured by [`PartitionTracker::before_change`] and handed back to
/// [`PartitionTracker::after_change`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct PendingChange {
  old_affected: Vec<Segment>,
}

pub struct PartitionTracker {
  generator:          Arc<dyn SegmentGenerator>,
  segments:           Vec<Segment>,
  modification_stamp: u64,
  before_listeners:   Listeners<BeforeSegmentsChange>,
  changed_listeners:  Listeners<SegmentsChanged>,
}

impl fmt::Debug for PartitionTracker {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PartitionTracker")
      .field("segments", &self.segments.len())
      .field("modification_stamp", &self.modification_stamp)
      .finish_non_exhaustive()
  }
}

impl PartitionTracker {
  pub fn new(generator: Arc<dyn SegmentGenerator>, text: &Rope) -> Self {
    let segments = generator.generate(text, None);
    debug_assert_eq!(validate_partition(&segments, text::line_count(text)), Ok(()));
    Self {
      generator,
      segments,
      modification_stamp: 0,
      before_listeners: Listeners::new("segments-before-change"),
      changed_listeners: Listeners::new("segments-changed"),
    }
  }

  pub fn segments(&self) -> &[Segment] {
    &self.segments
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  pub fn modification_stamp(&self) -> u64 {
    self.modification_stamp
  }

  pub fn before_listeners(&self) -> &Listeners<BeforeSegmentsChange> {
    &self.before_listeners
  }

  pub fn changed_listeners(&self) -> &Listeners<SegmentsChanged> {
    &self.changed_listeners
  }

  /// Cursor at the first segment whose last line is at or after `line`.
  pub fn segments_from(&self, line: usize) -> SegmentCursor<'_> {
    SegmentCursor::new(&self.segments, line)
  }

  pub fn segment_at(&self, line: usize) -> Option<&Segment> {
    self
      .segments_from(line)
      .next()
      .filter(|segment| segment.contains_line(line))
  }

  /// Records the segments touched by `range` of the not yet modified text and
  /// notifies before-change listeners.
  pub fn before_change(&self, text: &Rope, range: Range<usize>) -> PendingChange {
    let old_affected = affected_segments(&self.segments, text, range).to_vec();
    self.before_listeners.dispatch(&BeforeSegmentsChange {
      old_affected:       old_affected.clone(),
      modification_stamp: self.modification_stamp,
    });
    PendingChange { old_affected }
  }

  /// Regenerates the partition of the modified text, replaces the current
  /// list and notifies changed listeners. `range` is the inserted range in
  /// the new text.
  pub fn after_change(
    &mut self,
    text: &Rope,
    pending: PendingChange,
    range: Range<usize>,
    hint: Option<&TextEdit>,
  ) -> SegmentsChanged {
    let new_segments = self.generator.generate(text, hint);
    debug_assert_eq!(
      validate_partition(&new_segments, text::line_count(text)),
      Ok(())
    );
    let new_affected = affected_segments(&new_segments, text, range).to_vec();
    let old_affected = pending.old_affected;

    let (old_range, new_range) =
      changed_ranges(&self.segments, &new_segments, &old_affected, &new_affected);

    if self.segments != new_segments {
      self.modification_stamp += 1;
    }

    let event = SegmentsChanged {
      old_segments: self.segments[old_range].to_vec(),
      new_segments: new_segments[new_range].to_vec(),
      old_affected,
      new_affected,
      modification_stamp: self.modification_stamp,
    };
    tracing::trace!(
      removed = event.old_segments.len(),
      inserted = event.new_segments.len(),
      stamp = event.modification_stamp,
      "segments recomputed"
    );

    self.segments = new_segments;
    self.changed_listeners.dispatch(&event);
    event
  }

  /// Applies `edit` to `text` between the before/after notifications.
  pub fn apply_edit(&mut self, text: &mut Rope, edit: &TextEdit) -> text::Result<SegmentsChanged> {
    edit.validate(text)?;
    let pending = self.before_change(text, edit.old_range());
    edit.apply(text)?;
    Ok(self.after_change(text, pending, edit.new_range(), Some(edit)))
  }
}

/// Ranges of `old` and `new` that differ, after trimming the common prefix
/// (full equality) and the common suffix (same shape). Affected segments are
/// never trimmed away.
fn changed_ranges(
  old: &[Segment],
  new: &[Segment],
  old_affected: &[Segment],
  new_affected: &[Segment],
) -> (Range<usize>, Range<usize>) {
  if old == new {
    return (0..0, 0..0);
  }
  if let ([a], [b]) = (old, new) {
    if a.kind == b.kind && a.language == b.language {
      return (0..1, 0..1);
    }
  }

  let prefix = old
    .iter()
    .zip(new)
    .take_while(|(a, b)| {
      a == b && Some(*a) != old_affected.first() && Some(*b) != new_affected.first()
    })
    .count();

  let limit = old.len().min(new.len()) - prefix;
  let suffix = old
    .iter()
    .rev()
    .zip(new.iter().rev())
    .take(limit)
    .take_while(|(a, b)| {
      a.same_shape(b) && Some(*a) != old_affected.last() && Some(*b) != new_affected.last()
    })
    .count();

  (prefix..old.len() - suffix, prefix..new.len() - suffix)
}

/// Restartable forward cursor over a segment list.
#[derive(Debug, Clone)]
pub struct SegmentCursor<'a> {
  segments: &'a [Segment],
  start:    usize,
  position: usize,
}

impl<'a> SegmentCursor<'a> {
  fn new(segments: &'a [Segment], line: usize) -> Self {
    let start = segments.partition_point(|s| s.lines.last < line);
    Self {
      segments,
      start,
      position: start,
    }
  }

  /// Rewinds to the segment the cursor was created at.
  pub fn restart(&mut self) {
    self.position = self.start;
  }

  pub fn peek(&self) -> Option<&'a Segment> {
    self.segments.get(self.position)
  }

  pub fn is_at_end(&self) -> bool {
    self.position >= self.segments.len()
  }
}

impl<'a> Iterator for SegmentCursor<'a> {
  type Item = &'a Segment;

  fn next(&mut self) -> Option<Self::Item> {
    let segment = self.segments.get(self.position)?;
    self.position += 1;
    Some(segment)
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.segments.len().saturating_sub(self.position);
    (remaining, Some(remaining))
  }
}

impl ExactSizeIterator for SegmentCursor<'_> {}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{
      AtomicUsize,
      Ordering,
    },
  };

  use parking_lot::Mutex;

  use super::*;
  use crate::generator::PercentGenerator;

  fn tracker(text: &Rope) -> PartitionTracker {
    PartitionTracker::new(Arc::new(PercentGenerator::default()), text)
  }

  fn lines(segments: &[Segment]) -> Vec<(usize, usize)> {
    segments
      .iter()
      .map(|s| (s.lines.first, s.lines.last))
      .collect()
  }

  fn edit(
    tracker: &mut PartitionTracker,
    text: &mut Rope,
    range: Range<usize>,
    with: &str,
  ) -> SegmentsChanged {
    let edit = TextEdit::replace(text, range, with).unwrap();
    tracker.apply_edit(text, &edit).unwrap()
  }

  /// Three cells over twenty lines: [0, 3], [4, 11], [12, 19].
  fn twenty_lines() -> Rope {
    let mut text = String::new();
    for line in 0..20 {
      match line {
        4 | 12 => text.push_str("# %%\n"),
        _ => text.push_str(&format!("line{line:02}\n")),
      }
    }
    text.pop();
    Rope::from(text)
  }

  #[test]
  fn interior_edit_is_not_structural() {
    let mut text = twenty_lines();
    let mut tracker = tracker(&text);
    assert_eq!(lines(tracker.segments()), vec![(0, 3), (4, 11), (12, 19)]);

    // replace "5" in "line05"
    let offset = text.line_to_byte(5) + 5;
    let event = edit(&mut tracker, &mut text, offset..offset + 1, "x");

    assert!(!event.is_structural());
    assert_eq!(lines(&event.old_affected), vec![(4, 11)]);
    assert_eq!(event.old_affected, event.new_affected);
    assert_eq!(event.modification_stamp, 0);
    assert_eq!(tracker.modification_stamp(), 0);
  }

  #[test]
  fn growing_a_cell_reports_single_resize() {
    let mut text = twenty_lines();
    let mut tracker = tracker(&text);

    let offset = text.line_to_byte(6) + 2;
    let event = edit(&mut tracker, &mut text, offset..offset, "\nmore\n");

    assert!(event.is_single_resize());
    assert_eq!(lines(&event.old_segments), vec![(4, 11)]);
    assert_eq!(lines(&event.new_segments), vec![(4, 13)]);
    assert_eq!(event.modification_stamp, 1);
    assert_eq!(lines(tracker.segments()), vec![(0, 3), (4, 13), (14, 21)]);
  }

  #[test]
  fn splitting_a_cell_trims_common_prefix_and_suffix() {
    let mut text = twenty_lines();
    let mut tracker = tracker(&text);

    // turn "line08" into a marker
    let start = text.line_to_byte(8);
    let event = edit(&mut tracker, &mut text, start..start + 6, "# %%");

    assert_eq!(lines(&event.old_segments), vec![(4, 11)]);
    assert_eq!(lines(&event.new_segments), vec![(4, 7), (8, 11)]);
    assert_eq!(event.new_segments[0].ordinal, 1);
    assert_eq!(lines(tracker.segments()), vec![
      (0, 3),
      (4, 7),
      (8, 11),
      (12, 19)
    ]);
  }

  #[test]
  fn deleting_a_cell_reports_only_that_cell() {
    let mut text = twenty_lines();
    let mut tracker = tracker(&text);

    let start = text.line_to_byte(4);
    let end = text.line_to_byte(12);
    let event = edit(&mut tracker, &mut text, start..end, "");

    assert_eq!(lines(&event.old_segments), vec![(4, 11)]);
    assert!(event.new_segments.is_empty());
    assert!(event.new_affected.is_empty());
    assert_eq!(lines(tracker.segments()), vec![(0, 3), (4, 11)]);
  }

  #[test]
  fn before_listener_sees_old_affected() {
    let mut text = twenty_lines();
    let mut tracker = tracker(&text);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    tracker.before_listeners().subscribe(move |event: &BeforeSegmentsChange| {
      sink.lock().extend(event.old_affected.iter().map(|s| s.ordinal));
      Ok(())
    });

    let offset = text.line_to_byte(14) + 1;
    edit(&mut tracker, &mut text, offset..offset + 1, "z");
    assert_eq!(*seen.lock(), vec![2]);
  }

  #[test]
  fn faulty_listener_does_not_block_the_edit() {
    let mut text = twenty_lines();
    let mut tracker = tracker(&text);
    let calls = Arc::new(AtomicUsize::new(0));

    tracker
      .changed_listeners()
      .subscribe(|_: &SegmentsChanged| panic!("bad listener"));
    let counter = calls.clone();
    tracker.changed_listeners().subscribe(move |_: &SegmentsChanged| {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(())
    });

    let start = text.line_to_byte(2);
    edit(&mut tracker, &mut text, start..start, "# %%\n");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.len(), 4);
  }

  #[test]
  fn invalid_edit_leaves_tracker_untouched() {
    let mut text = Rope::from("abc");
    let mut tracker = tracker(&text);
    let stale = TextEdit {
      offset:   1,
      removed:  "zz".into(),
      inserted: "y".into(),
    };
    assert!(tracker.apply_edit(&mut text, &stale).is_err());
    assert_eq!(text, "abc");
    assert_eq!(tracker.modification_stamp(), 0);
  }

  #[test]
  fn cursor_queries() {
    let text = twenty_lines();
    let tracker = tracker(&text);

    let mut cursor = tracker.segments_from(5);
    assert_eq!(cursor.len(), 2);
    assert_eq!(cursor.next().map(|s| s.ordinal), Some(1));
    assert_eq!(cursor.next().map(|s| s.ordinal), Some(2));
    assert!(cursor.is_at_end());
    cursor.restart();
    assert_eq!(cursor.peek().map(|s| s.ordinal), Some(1));

    assert!(tracker.segments_from(40).next().is_none());
    assert_eq!(tracker.segment_at(12).map(|s| s.ordinal), Some(2));
    assert_eq!(tracker.segment_at(0).map(|s| s.ordinal), Some(0));
    assert!(tracker.segment_at(20).is_none());
  }

  #[test]
  fn recomputation_is_deterministic() {
    let text = twenty_lines();
    assert_eq!(tracker(&text).segments(), tracker(&text).segments());
  }
}
