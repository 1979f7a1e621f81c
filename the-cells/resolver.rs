//! Maps an edited byte range to the segments it touches.
//!
//! Edit ranges produced by carets and selections often land exactly on line
//! boundaries, so the naive "lines containing start and end" lookup is
//! adjusted:
//!
//! 1. a range starting exactly at the beginning of a line does not count that
//!    line as its first affected line, unless the range covers text on that
//!    line (a caret, or a range whose first byte is a line break, leaves the
//!    line itself untouched);
//! 2. a range ending exactly at the beginning of a line does not count that
//!    line as its last affected line, unless the range ends at the end of the
//!    buffer (an empty trailing segment must still be reported).
//!
//! The adjusted range can be empty, in which case nothing is affected.

use std::ops::Range;

use ropey::Rope;

use crate::{
  segment::{
    LineRange,
    Segment,
  },
  text,
};

/// Lines affected by `range`, after the boundary adjustments.
pub fn affected_lines(text: &Rope, range: Range<usize>) -> Option<LineRange> {
  let len = text.len_bytes();
  let start = range.start.min(len);
  let end = range.end.clamp(start, len);

  let mut first = text::line_of(text, start);
  if text::line_start(text, first) == start && !covers_line_text(text, start, end) {
    first += 1;
  }

  let mut last = text::line_of(text, end);
  if text::line_start(text, last) == end && end != len {
    last = last.checked_sub(1)?;
  }

  (first <= last).then_some(LineRange::new(first, last))
}

/// Whether `start..end` includes text of the line beginning at `start`.
fn covers_line_text(text: &Rope, start: usize, end: usize) -> bool {
  start < end && !matches!(text.byte(start), b'\n' | b'\r')
}

/// Contiguous run of `segments` intersecting the lines affected by `range`.
pub fn affected_segments<'a>(
  segments: &'a [Segment],
  text: &Rope,
  range: Range<usize>,
) -> &'a [Segment] {
  let Some(lines) = affected_lines(text, range) else {
    return &[];
  };
  let start = segments.partition_point(|s| s.lines.last < lines.first);
  let end = segments.partition_point(|s| s.lines.first <= lines.last);
  &segments[start..end.max(start)]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::segment::SegmentKind;

  fn segments(bounds: &[(usize, usize)]) -> Vec<Segment> {
    bounds
      .iter()
      .enumerate()
      .map(|(ordinal, &lines)| Segment::new(ordinal, SegmentKind::Code, lines, "python"))
      .collect()
  }

  fn ordinals(found: &[Segment]) -> Vec<usize> {
    found.iter().map(|s| s.ordinal).collect()
  }

  // lines: 0 "aa", 1 "bb", 2 "cc", 3 "dd", 4 ""
  const TEXT: &str = "aa\nbb\ncc\ndd\n";

  #[test]
  fn interior_edit_hits_one_segment() {
    let text = Rope::from(TEXT);
    let cells = segments(&[(0, 1), (2, 3), (4, 4)]);
    // "c|c" on line 2
    assert_eq!(ordinals(affected_segments(&cells, &text, 7..8)), vec![1]);
    assert_eq!(ordinals(affected_segments(&cells, &text, 7..7)), vec![1]);
  }

  #[test]
  fn caret_at_line_beginning_touches_nothing() {
    let text = Rope::from(TEXT);
    assert_eq!(affected_lines(&text, 6..6), None);
    assert_eq!(affected_lines(&text, 0..0), None);
  }

  #[test]
  fn range_from_line_beginning_keeps_that_line() {
    let text = Rope::from(TEXT);
    let cells = segments(&[(0, 1), (2, 3), (4, 4)]);
    // first character of line 2
    assert_eq!(affected_lines(&text, 6..7), Some(LineRange::new(2, 2)));
    assert_eq!(ordinals(affected_segments(&cells, &text, 6..7)), vec![1]);
    // [start of line 2, middle of line 3)
    assert_eq!(affected_lines(&text, 6..10), Some(LineRange::new(2, 3)));
  }

  #[test]
  fn range_starting_on_a_line_break_skips_that_line() {
    // lines: 0 "aa", 1 "", 2 "bb"
    let text = Rope::from("aa\n\nbb");
    // the line break of the empty line 1 plus "b"
    assert_eq!(affected_lines(&text, 3..5), Some(LineRange::new(2, 2)));
    assert_eq!(affected_lines(&text, 3..4), None);
  }

  #[test]
  fn end_at_line_beginning_stops_one_line_early() {
    let text = Rope::from(TEXT);
    let cells = segments(&[(0, 1), (2, 3), (4, 4)]);
    // deleting "b\ncc\n" ends at the start of line 3
    assert_eq!(affected_lines(&text, 4..9), Some(LineRange::new(1, 2)));
    assert_eq!(ordinals(affected_segments(&cells, &text, 4..9)), vec![0, 1]);
  }

  #[test]
  fn end_of_buffer_keeps_trailing_line() {
    let text = Rope::from(TEXT);
    let cells = segments(&[(0, 1), (2, 3), (4, 4)]);
    // "d\n" up to the very end, which is the start of the empty last line
    assert_eq!(affected_lines(&text, 10..12), Some(LineRange::new(3, 4)));
    assert_eq!(ordinals(affected_segments(&cells, &text, 10..12)), vec![1, 2]);
  }

  #[test]
  fn empty_buffer_insertion_point() {
    let text = Rope::new();
    assert_eq!(affected_lines(&text, 0..0), None);
  }

  #[test]
  fn out_of_range_offsets_are_clamped() {
    let text = Rope::from("ab");
    assert_eq!(affected_lines(&text, 1..50), Some(LineRange::new(0, 0)));
  }
}
