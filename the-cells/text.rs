//! Byte-range text edits over a [`Rope`] and the line/offset helpers the
//! tracker needs.
//!
//! All offsets are byte offsets. Line numbers follow ropey's line model, so a
//! trailing line break opens one more (empty) line.

use std::ops::Range;

use ropey::Rope;
use thiserror::Error;

use crate::Tendril;

pub type Result<T> = std::result::Result<T, TextError>;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TextError {
  #[error("invalid edit range: start {start} is after end {end}")]
  InvalidRange { start: usize, end: usize },
  #[error("edit range {start}..{end} is out of bounds for text length {len}")]
  OutOfBounds {
    start: usize,
    end:   usize,
    len:   usize,
  },
  #[error("byte offset {0} is not on a char boundary")]
  NotCharBoundary(usize),
  #[error("text at {offset} does not match the edit's removed text")]
  Mismatch { offset: usize },
}

/// A single replacement: `removed` at `offset` becomes `inserted`.
///
/// The removed text is stored so that the edit can be inverted without the
/// original document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
  pub offset:   usize,
  pub removed:  Tendril,
  pub inserted: Tendril,
}

impl TextEdit {
  /// Builds an edit replacing `range` of `text` with `inserted`.
  pub fn replace(text: &Rope, range: Range<usize>, inserted: impl Into<Tendril>) -> Result<Self> {
    check_range(text, &range)?;
    let removed = text.byte_slice(range.clone()).to_string();
    Ok(Self {
      offset:   range.start,
      removed:  removed.into(),
      inserted: inserted.into(),
    })
  }

  pub fn insert(text: &Rope, offset: usize, inserted: impl Into<Tendril>) -> Result<Self> {
    Self::replace(text, offset..offset, inserted)
  }

  pub fn delete(text: &Rope, range: Range<usize>) -> Result<Self> {
    Self::replace(text, range, Tendril::new())
  }

  /// Range the edit covers before it is applied.
  pub fn old_range(&self) -> Range<usize> {
    self.offset..self.offset + self.removed.len()
  }

  /// Range the inserted text covers after the edit is applied.
  pub fn new_range(&self) -> Range<usize> {
    self.offset..self.offset + self.inserted.len()
  }

  pub fn is_empty(&self) -> bool {
    self.removed == self.inserted
  }

  #[must_use]
  pub fn invert(&self) -> Self {
    Self {
      offset:   self.offset,
      removed:  self.inserted.clone(),
      inserted: self.removed.clone(),
    }
  }

  /// Checks that the edit applies to `text` without mutating it.
  pub fn validate(&self, text: &Rope) -> Result<()> {
    let range = self.old_range();
    check_range(text, &range)?;
    if text.byte_slice(range) != self.removed.as_str() {
      return Err(TextError::Mismatch {
        offset: self.offset,
      });
    }
    Ok(())
  }

  pub fn apply(&self, text: &mut Rope) -> Result<()> {
    self.validate(text)?;
    let range = self.old_range();
    let start = text.byte_to_char(range.start);
    let end = text.byte_to_char(range.end);
    text.remove(start..end);
    text.insert(start, &self.inserted);
    Ok(())
  }
}

fn check_range(text: &Rope, range: &Range<usize>) -> Result<()> {
  if range.start > range.end {
    return Err(TextError::InvalidRange {
      start: range.start,
      end:   range.end,
    });
  }
  let len = text.len_bytes();
  if range.end > len {
    return Err(TextError::OutOfBounds {
      start: range.start,
      end: range.end,
      len,
    });
  }
  for offset in [range.start, range.end] {
    if !is_char_boundary(text, offset) {
      return Err(TextError::NotCharBoundary(offset));
    }
  }
  Ok(())
}

fn is_char_boundary(text: &Rope, offset: usize) -> bool {
  text.char_to_byte(text.byte_to_char(offset)) == offset
}

/// Number of lines, never less than one.
pub fn line_count(text: &Rope) -> usize {
  text.len_lines().max(1)
}

/// Line containing `offset`; offsets past the end map to the last line.
pub fn line_of(text: &Rope, offset: usize) -> usize {
  text.byte_to_line(offset.min(text.len_bytes()))
}

/// Byte offset at which `line` starts.
pub fn line_start(text: &Rope, line: usize) -> usize {
  text.line_to_byte(line.min(text.len_lines()))
}
