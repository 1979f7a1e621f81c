//! Segment generators: the injected capability that turns text into a
//! partition.

use std::borrow::Cow;

use ropey::Rope;

use crate::{
  Tendril,
  config::CellsConfig,
  segment::{
    Extra,
    Markers,
    Segment,
    SegmentKind,
  },
  text::TextEdit,
};

/// Computes the full segment list for a text.
///
/// Implementations must be deterministic and must return a list that
/// partitions every line of `text` (see
/// [`validate_partition`](crate::segment::validate_partition)). `hint` is the
/// edit that was just applied, if any; it may be ignored.
pub trait SegmentGenerator: Send + Sync {
  fn generate(&self, text: &Rope, hint: Option<&TextEdit>) -> Vec<Segment>;
}

impl<F> SegmentGenerator for F
where
  F: Fn(&Rope) -> Vec<Segment> + Send + Sync,
{
  fn generate(&self, text: &Rope, _hint: Option<&TextEdit>) -> Vec<Segment> {
    self(text)
  }
}

/// Generator for the "percent" cell format used by Jupytext and friends:
///
/// ```text
/// import os            <- leading code cell, no marker
/// # %% Load [markdown] <- markdown cell titled "Load"
/// Some prose
/// # %% tags=slow       <- code cell with extra data
/// run()
/// ```
///
/// Content before the first marker always forms its own code cell.
#[derive(Debug, Clone, Default)]
pub struct PercentGenerator {
  config: CellsConfig,
}

struct Header {
  kind:  SegmentKind,
  extra: Extra,
}

impl PercentGenerator {
  pub fn new(config: CellsConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &CellsConfig {
    &self.config
  }

  fn language(&self, kind: SegmentKind) -> Tendril {
    match kind {
      SegmentKind::Code => self.config.language.as_str().into(),
      SegmentKind::Markdown => "markdown".into(),
      SegmentKind::Raw => "text".into(),
    }
  }

  fn parse_header(&self, line: &str) -> Option<Header> {
    let rest = line.trim_start().strip_prefix(self.config.marker.as_str())?;
    if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
      return None;
    }

    let mut kind = SegmentKind::Code;
    let mut tagged = false;
    let mut title = Vec::new();
    let mut extra = Extra::new();
    for token in rest.split_whitespace() {
      let tag = token
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .filter(|_| !tagged);
      if let Some(tag) = tag {
        tagged = true;
        kind = self.kind_for_tag(tag);
      } else if let Some((key, value)) = token.split_once('=') {
        extra.insert(key.into(), value.trim_matches('"').into());
      } else {
        title.push(token);
      }
    }
    if !title.is_empty() {
      extra.insert("title".into(), title.join(" ").into());
    }

    Some(Header { kind, extra })
  }

  fn kind_for_tag(&self, tag: &str) -> SegmentKind {
    let matches = |tags: &[String]| tags.iter().any(|t| t.eq_ignore_ascii_case(tag));
    if matches(&self.config.markdown_tags) {
      SegmentKind::Markdown
    } else if matches(&self.config.raw_tags) {
      SegmentKind::Raw
    } else {
      SegmentKind::Code
    }
  }

  fn segment(&self, ordinal: usize, first: usize, last: usize, header: Option<Header>) -> Segment {
    let (kind, markers, extra) = match header {
      Some(header) => (header.kind, Markers::TOP, header.extra),
      None => (SegmentKind::Code, Markers::NONE, Extra::new()),
    };
    Segment {
      ordinal,
      kind,
      lines: (first, last).into(),
      markers,
      extra,
      language: self.language(kind),
    }
  }
}

impl SegmentGenerator for PercentGenerator {
  fn generate(&self, text: &Rope, _hint: Option<&TextEdit>) -> Vec<Segment> {
    let line_count = text.len_lines().max(1);
    let mut segments = Vec::new();
    let mut open: Option<(usize, Option<Header>)> = None;

    for index in 0..text.len_lines() {
      let line: Cow<str> = text.line(index).into();
      let Some(header) = self.parse_header(&line) else {
        if open.is_none() {
          open = Some((index, None));
        }
        continue;
      };
      if let Some((first, previous)) = open.take() {
        segments.push(self.segment(segments.len(), first, index - 1, previous));
      }
      open = Some((index, Some(header)));
    }

    let (first, header) = open.unwrap_or((0, None));
    segments.push(self.segment(segments.len(), first, line_count - 1, header));
    segments
  }
}
