//! Cell partition tracking for live text buffers.
//!
//! A buffer is split into an ordered list of contiguous line-range
//! [`Segment`](segment::Segment)s by an injected
//! [`SegmentGenerator`](generator::SegmentGenerator). The
//! [`PartitionTracker`](tracker::PartitionTracker) recomputes that list after
//! every edit and reports a trimmed diff, the
//! [`PointerRegistry`](registry::PointerRegistry) keeps one stable
//! [`SegmentPointer`](pointer::SegmentPointer) per segment across edits, and
//! the [`UndoAdapter`](undo::UndoAdapter) turns pointer changes into commands
//! an undo host can replay. [`Notebook`](notebook::Notebook) wires the whole
//! pipeline together for one buffer.

use smartstring::{
  LazyCompact,
  SmartString,
};

pub mod change;
pub mod config;
pub mod generator;
pub mod history;
pub mod notebook;
pub mod payload;
pub mod pointer;
pub mod registry;
pub mod resolver;
pub mod segment;
pub mod text;
pub mod tracker;
pub mod undo;
pub mod workspace;

pub type Tendril = SmartString<LazyCompact>;
