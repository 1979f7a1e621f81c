//! Segment (cell) model and the partition invariant.

use std::{
  collections::BTreeMap,
  fmt,
};

use thiserror::Error;

use crate::Tendril;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
  Code,
  Markdown,
  Raw,
}

/// Which ends of a segment are occupied by boundary marker lines.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Markers {
  pub top:    bool,
  pub bottom: bool,
}

impl Markers {
  pub const NONE: Self = Self {
    top:    false,
    bottom: false,
  };
  pub const TOP: Self = Self {
    top:    true,
    bottom: false,
  };
}

/// Opaque key-value data a generator attaches to a segment.
pub type Extra = BTreeMap<Tendril, Tendril>;

/// Inclusive line range `[first, last]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineRange {
  pub first: usize,
  pub last:  usize,
}

impl LineRange {
  pub const fn new(first: usize, last: usize) -> Self {
    Self { first, last }
  }

  pub const fn len(&self) -> usize {
    self.last + 1 - self.first
  }

  pub const fn contains(&self, line: usize) -> bool {
    self.first <= line && line <= self.last
  }

  pub const fn intersects(&self, other: &LineRange) -> bool {
    self.first <= other.last && other.first <= self.last
  }
}

impl fmt::Debug for LineRange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}..={}]", self.first, self.last)
  }
}

impl From<(usize, usize)> for LineRange {
  fn from((first, last): (usize, usize)) -> Self {
    Self::new(first, last)
  }
}

/// One cell of the partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
  pub ordinal:  usize,
  pub kind:     SegmentKind,
  pub lines:    LineRange,
  pub markers:  Markers,
  pub extra:    Extra,
  pub language: Tendril,
}

impl Segment {
  pub fn new(
    ordinal: usize,
    kind: SegmentKind,
    lines: impl Into<LineRange>,
    language: impl Into<Tendril>,
  ) -> Self {
    Self {
      ordinal,
      kind,
      lines: lines.into(),
      markers: Markers::NONE,
      extra: Extra::new(),
      language: language.into(),
    }
  }

  #[must_use]
  pub fn with_markers(mut self, markers: Markers) -> Self {
    self.markers = markers;
    self
  }

  #[must_use]
  pub fn with_extra(mut self, key: impl Into<Tendril>, value: impl Into<Tendril>) -> Self {
    self.extra.insert(key.into(), value.into());
    self
  }

  pub fn line_count(&self) -> usize {
    self.lines.len()
  }

  pub fn contains_line(&self, line: usize) -> bool {
    self.lines.contains(line)
  }

  /// Lines between the marker lines, or `None` when the segment consists of
  /// markers only.
  pub fn content_lines(&self) -> Option<LineRange> {
    let first = self.lines.first + usize::from(self.markers.top);
    let last = self
      .lines
      .last
      .checked_sub(usize::from(self.markers.bottom))?;
    (first <= last).then_some(LineRange::new(first, last))
  }

  /// Same kind, language and line count. Used to recognise segments that
  /// only moved.
  pub fn same_shape(&self, other: &Segment) -> bool {
    self.kind == other.kind
      && self.language == other.language
      && self.line_count() == other.line_count()
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionViolation {
  #[error("partition is empty")]
  Empty,
  #[error("segment at index {index} has ordinal {ordinal}")]
  Ordinal { index: usize, ordinal: usize },
  #[error("segment {ordinal} has inverted line range {lines:?}")]
  Inverted { ordinal: usize, lines: LineRange },
  #[error("segment {ordinal} starts at line {actual}, expected {expected}")]
  Gap {
    ordinal:  usize,
    expected: usize,
    actual:   usize,
  },
  #[error("partition ends at line {actual}, expected {expected}")]
  Coverage { expected: usize, actual: usize },
}

/// Checks that `segments` partition the lines of a buffer with `line_count`
/// lines: sorted, gap-free, non-overlapping, ordinals `0..n`.
pub fn validate_partition(
  segments: &[Segment],
  line_count: usize,
) -> Result<(), PartitionViolation> {
  let Some(last) = segments.last() else {
    return Err(PartitionViolation::Empty);
  };

  let mut next_line = 0;
  for (index, segment) in segments.iter().enumerate() {
    if segment.ordinal != index {
      return Err(PartitionViolation::Ordinal {
        index,
        ordinal: segment.ordinal,
      });
    }
    if segment.lines.first > segment.lines.last {
      return Err(PartitionViolation::Inverted {
        ordinal: segment.ordinal,
        lines:   segment.lines,
      });
    }
    if segment.lines.first != next_line {
      return Err(PartitionViolation::Gap {
        ordinal:  segment.ordinal,
        expected: next_line,
        actual:   segment.lines.first,
      });
    }
    next_line = segment.lines.last + 1;
  }

  let expected = line_count.max(1) - 1;
  if last.lines.last != expected {
    return Err(PartitionViolation::Coverage {
      expected,
      actual: last.lines.last,
    });
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn code(ordinal: usize, first: usize, last: usize) -> Segment {
    Segment::new(ordinal, SegmentKind::Code, (first, last), "python")
  }

  #[test]
  fn content_lines_skip_markers() {
    let cell = code(0, 3, 6).with_markers(Markers {
      top:    true,
      bottom: true,
    });
    assert_eq!(cell.content_lines(), Some(LineRange::new(4, 5)));

    let marker_only = code(0, 3, 3).with_markers(Markers::TOP);
    assert_eq!(marker_only.content_lines(), None);

    assert_eq!(code(0, 0, 0).content_lines(), Some(LineRange::new(0, 0)));
  }

  #[test]
  fn same_shape_ignores_position_and_markers() {
    let a = code(1, 2, 4);
    let b = code(3, 10, 12).with_markers(Markers::TOP);
    assert!(a.same_shape(&b));
    assert!(!a.same_shape(&code(1, 2, 5)));

    let mut markdown = code(1, 2, 4);
    markdown.kind = SegmentKind::Markdown;
    assert!(!a.same_shape(&markdown));
  }

  #[test]
  fn partition_validation() {
    let segments = vec![code(0, 0, 2), code(1, 3, 3), code(2, 4, 9)];
    assert_eq!(validate_partition(&segments, 10), Ok(()));
    assert_eq!(
      validate_partition(&segments, 11),
      Err(PartitionViolation::Coverage {
        expected: 10,
        actual:   9,
      })
    );

    let gap = vec![code(0, 0, 2), code(1, 4, 9)];
    assert!(matches!(
      validate_partition(&gap, 10),
      Err(PartitionViolation::Gap { .. })
    ));

    let misnumbered = vec![code(0, 0, 2), code(2, 3, 9)];
    assert!(matches!(
      validate_partition(&misnumbered, 10),
      Err(PartitionViolation::Ordinal { .. })
    ));

    assert_eq!(validate_partition(&[], 0), Err(PartitionViolation::Empty));
    assert_eq!(validate_partition(&[code(0, 0, 0)], 0), Ok(()));
  }
}
