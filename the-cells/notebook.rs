//! Per-buffer host that drives the whole pipeline.
//!
//! A [`Notebook`] owns the text, the [`PartitionTracker`], the
//! [`PointerRegistry`], the [`UndoAdapter`] and the revision [`History`].
//! Every mutation goes through it so the order of the steps is fixed:
//!
//! 1. the tracker recomputes segments around the text edit;
//! 2. the registry turns the tracker event into pointer changes (or queues
//!    it during a bulk update) and the adapter stages one command;
//! 3. the history records the text edit;
//! 4. the adapter registers the staged command with the history.
//!
//! Undo and redo replay text first, then the pointer commands of the same
//! revision, and finally check that pointers and segments agree again.

use std::{
  collections::VecDeque,
  ops::Range,
  sync::Arc,
};

use ropey::Rope;
use the_cells_event::Listeners;
use thiserror::Error;

use crate::{
  Tendril,
  change::{
    ChangeRecord,
    ChangeSource,
  },
  generator::SegmentGenerator,
  history::{
    History,
    HistoryError,
    HistoryJump,
  },
  pointer::SegmentPointer,
  registry::{
    PointerEdit,
    PointerRegistry,
    PointersChanged,
    RegistryError,
  },
  segment::Segment,
  text::{
    TextEdit,
    TextError,
  },
  tracker::{
    BeforeSegmentsChange,
    PartitionTracker,
    SegmentCursor,
    SegmentsChanged,
  },
  undo::{
    CommandOrigin,
    Direction,
    PointerCommand,
    UndoAdapter,
    UndoError,
  },
  workspace::BufferId,
};

#[derive(Debug, Error)]
pub enum NotebookError {
  #[error(transparent)]
  Text(#[from] TextError),
  #[error(transparent)]
  Registry(#[from] RegistryError),
  #[error(transparent)]
  Undo(#[from] UndoError),
  #[error(transparent)]
  History(#[from] HistoryError),
  #[error("a bulk update is already in progress")]
  BulkUpdateInProgress,
  #[error("no bulk update in progress")]
  NotInBulkUpdate,
}

pub type Result<T> = std::result::Result<T, NotebookError>;

/// Tracker event waiting for the end of a bulk update, with the segment list
/// it produced.
#[derive(Debug)]
struct QueuedChange {
  event:    SegmentsChanged,
  segments: Vec<Segment>,
}

#[derive(Debug, Default)]
struct BulkUpdate {
  edits:  Vec<TextEdit>,
  queued: VecDeque<QueuedChange>,
}

#[derive(Debug)]
pub struct Notebook {
  id:       BufferId,
  text:     Rope,
  tracker:  PartitionTracker,
  registry: PointerRegistry,
  adapter:  UndoAdapter,
  history:  History,
  bulk:     Option<BulkUpdate>,
  version:  u64,
}

impl Notebook {
  pub fn new(id: BufferId, text: Rope, generator: Arc<dyn SegmentGenerator>) -> Self {
    let tracker = PartitionTracker::new(generator, &text);
    let registry = PointerRegistry::new(tracker.segments());
    Self {
      id,
      text,
      tracker,
      registry,
      adapter: UndoAdapter::new(),
      history: History::default(),
      bulk: None,
      version: 0,
    }
  }

  pub fn id(&self) -> BufferId {
    self.id
  }

  pub fn text(&self) -> &Rope {
    &self.text
  }

  /// Bumped on every applied text edit, replays included.
  pub fn version(&self) -> u64 {
    self.version
  }

  pub fn history(&self) -> &History {
    &self.history
  }

  pub fn segments(&self) -> &[Segment] {
    self.tracker.segments()
  }

  pub fn segments_from(&self, line: usize) -> SegmentCursor<'_> {
    self.tracker.segments_from(line)
  }

  pub fn segment_at(&self, line: usize) -> Option<&Segment> {
    self.tracker.segment_at(line)
  }

  pub fn modification_stamp(&self) -> u64 {
    self.tracker.modification_stamp()
  }

  pub fn pointers(&self) -> &[SegmentPointer] {
    self.registry.pointers()
  }

  pub fn pointer_for_ordinal(&self, ordinal: usize) -> Option<SegmentPointer> {
    self.registry.pointer_for_ordinal(ordinal)
  }

  pub fn create_pointer(&self, segment: &Segment) -> Option<SegmentPointer> {
    self.registry.create_pointer(segment)
  }

  pub fn before_change_listeners(&self) -> &Listeners<BeforeSegmentsChange> {
    self.tracker.before_listeners()
  }

  pub fn segment_listeners(&self) -> &Listeners<SegmentsChanged> {
    self.tracker.changed_listeners()
  }

  pub fn pointer_listeners(&self) -> &Listeners<PointersChanged> {
    self.registry.listeners()
  }

  pub fn is_bulk_updating(&self) -> bool {
    self.bulk.is_some()
  }

  /// Applies `edit` and returns the pointer changes it caused. Inside a bulk
  /// update the changes are deferred and nothing is returned.
  pub fn apply_edit(&mut self, edit: &TextEdit) -> Result<Vec<ChangeRecord>> {
    if edit.is_empty() {
      return Ok(Vec::new());
    }
    let Some(event) = self.apply_to_text(edit)? else {
      return Ok(Vec::new());
    };

    if let Some(bulk) = &mut self.bulk {
      bulk.edits.push(edit.clone());
      bulk.queued.push_back(QueuedChange {
        event,
        segments: self.tracker.segments().to_vec(),
      });
      return Ok(Vec::new());
    }

    let derived = self.derive_pointer_changes(&event, None);
    self.record_text(vec![edit.clone()], derived.is_ok());
    derived
  }

  pub fn replace(
    &mut self,
    range: Range<usize>,
    text: impl Into<Tendril>,
  ) -> Result<Vec<ChangeRecord>> {
    let edit = TextEdit::replace(&self.text, range, text)?;
    self.apply_edit(&edit)
  }

  pub fn insert(&mut self, offset: usize, text: impl Into<Tendril>) -> Result<Vec<ChangeRecord>> {
    let edit = TextEdit::insert(&self.text, offset, text)?;
    self.apply_edit(&edit)
  }

  pub fn delete(&mut self, range: Range<usize>) -> Result<Vec<ChangeRecord>> {
    let edit = TextEdit::delete(&self.text, range)?;
    self.apply_edit(&edit)
  }

  /// Starts a batch: edits still update the text and segments right away,
  /// but pointer changes wait for
  /// [`finish_bulk_update`](Self::finish_bulk_update).
  pub fn begin_bulk_update(&mut self) -> Result<()> {
    if self.bulk.is_some() {
      return Err(NotebookError::BulkUpdateInProgress);
    }
    self.bulk = Some(BulkUpdate::default());
    Ok(())
  }

  /// Flushes queued tracker events in arrival order, one undo command per
  /// edit, and records the whole batch as a single revision.
  pub fn finish_bulk_update(&mut self) -> Result<Vec<ChangeRecord>> {
    let Some(BulkUpdate { edits, queued }) = self.bulk.take() else {
      return Err(NotebookError::NotInBulkUpdate);
    };
    if edits.is_empty() {
      return Ok(Vec::new());
    }

    tracing::debug!(edits = edits.len(), "flushing bulk update");
    let flushed = queued
      .into_iter()
      .map(|QueuedChange { event, segments }| {
        self.derive_pointer_changes(&event, Some(&segments))
      })
      .collect::<Result<Vec<_>>>()
      .map(|batches| batches.concat());
    self.record_text(edits, flushed.is_ok());
    flushed
  }

  /// Retires the pointer of `segment` and binds a fresh one in its place.
  pub fn invalidate(&mut self, segment: &Segment) -> Result<Vec<ChangeRecord>> {
    self.ensure_no_bulk_update()?;
    let records = self.registry.invalidate(segment);
    Ok(self.commit_direct(records))
  }

  pub fn swap(&mut self, first: usize, second: usize) -> Result<Vec<ChangeRecord>> {
    self.ensure_no_bulk_update()?;
    let records = self.registry.swap(first, second);
    Ok(self.commit_direct(records))
  }

  pub fn modify(&mut self, edits: &[PointerEdit]) -> Result<Vec<ChangeRecord>> {
    self.ensure_no_bulk_update()?;
    let records = self.registry.modify(edits);
    Ok(self.commit_direct(records))
  }

  pub fn undo(&mut self) -> Result<bool> {
    self.ensure_no_bulk_update()?;
    let Some(jump) = self.history.undo() else {
      return Ok(false);
    };
    self.apply_history_jump(&jump)?;
    Ok(true)
  }

  pub fn redo(&mut self) -> Result<bool> {
    self.ensure_no_bulk_update()?;
    let Some(jump) = self.history.redo() else {
      return Ok(false);
    };
    self.apply_history_jump(&jump)?;
    Ok(true)
  }

  pub fn earlier(&mut self, steps: usize) -> Result<bool> {
    self.ensure_no_bulk_update()?;
    let jump = self.history.earlier(steps)?;
    if jump.is_empty() {
      return Ok(false);
    }
    self.apply_history_jump(&jump)?;
    Ok(true)
  }

  pub fn later(&mut self, steps: usize) -> Result<bool> {
    self.ensure_no_bulk_update()?;
    let jump = self.history.later(steps)?;
    if jump.is_empty() {
      return Ok(false);
    }
    self.apply_history_jump(&jump)?;
    Ok(true)
  }

  fn ensure_no_bulk_update(&self) -> Result<()> {
    match self.bulk {
      Some(_) => Err(NotebookError::BulkUpdateInProgress),
      None => Ok(()),
    }
  }

  /// Runs the tracker around `edit`. Returns the event unless the history is
  /// replaying, in which case the adapter keeps it for the command replay.
  fn apply_to_text(&mut self, edit: &TextEdit) -> Result<Option<SegmentsChanged>> {
    let event = self.tracker.apply_edit(&mut self.text, edit)?;
    self.version = self.version.saturating_add(1);
    Ok(self.adapter.route(&self.history, event))
  }

  /// Registry step of an organic edit. `segments` is the list right after
  /// the event when it is replayed late from a bulk queue.
  fn derive_pointer_changes(
    &mut self,
    event: &SegmentsChanged,
    segments: Option<&[Segment]>,
  ) -> Result<Vec<ChangeRecord>> {
    let segments = segments.unwrap_or(self.tracker.segments());
    let records = self.registry.segments_changed(event, segments)?;
    self.registry.publish(&records, ChangeSource::Edit);
    // Staged even when empty: replay pairs every edit command with one event.
    self
      .adapter
      .stage(PointerCommand::new(CommandOrigin::Edit, records.clone()));
    Ok(records)
  }

  /// Commits `edits` as one revision. The text is always recorded so the
  /// history matches the buffer; pointer commands only when every one of
  /// them was derived.
  fn record_text(&mut self, edits: Vec<TextEdit>, derived: bool) {
    self.history.commit_revision(edits);
    if !derived {
      tracing::error!("pointer changes failed to derive, revision keeps text only");
      self.adapter.discard_postponed();
    }
    self.adapter.text_recorded(&mut self.history);
  }

  fn commit_direct(&mut self, records: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    if records.is_empty() {
      return records;
    }
    self.registry.publish(&records, ChangeSource::Direct);
    self
      .adapter
      .stage(PointerCommand::new(CommandOrigin::Direct, records.clone()));
    self.history.commit_revision(Vec::new());
    self.adapter.text_recorded(&mut self.history);
    records
  }

  fn apply_history_jump(&mut self, jump: &HistoryJump) -> Result<()> {
    self.history.start_replay();
    let replayed = self.replay_steps(jump);
    self.history.finish_replay();
    self.adapter.discard_replays();
    replayed?;

    self.registry.check_consistency(self.tracker.segments())?;
    self.history.apply_jump(jump)?;
    Ok(())
  }

  fn replay_steps(&mut self, jump: &HistoryJump) -> Result<()> {
    for step in &jump.steps {
      for edit in &step.edits {
        self.apply_to_text(edit)?;
      }

      let mut applied = Vec::new();
      for command in &step.commands {
        applied.extend(
          self
            .adapter
            .replay(command, step.direction, &mut self.registry)?,
        );
      }
      let source = match step.direction {
        Direction::Backward => ChangeSource::Undo,
        Direction::Forward => ChangeSource::Redo,
      };
      tracing::debug!(
        revision = step.revision,
        ?source,
        records = applied.len(),
        "replayed pointer commands"
      );
      self.registry.publish(&applied, source);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::num::NonZeroUsize;

  use parking_lot::Mutex;

  use super::*;
  use crate::generator::PercentGenerator;

  fn notebook(text: &str) -> Notebook {
    Notebook::new(
      BufferId::new(NonZeroUsize::MIN),
      Rope::from(text),
      Arc::new(PercentGenerator::default()),
    )
  }

  fn lines(notebook: &Notebook) -> Vec<(usize, usize)> {
    notebook
      .segments()
      .iter()
      .map(|s| (s.lines.first, s.lines.last))
      .collect()
  }

  #[test]
  fn edit_commits_a_revision_with_its_command() {
    let mut notebook = notebook("a\n# %%\nb");
    notebook.insert(0, "x").unwrap();

    assert_eq!(notebook.history().current_revision(), 1);
    let commands = notebook.history().commands(1).unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].origin, CommandOrigin::Edit);
    assert_eq!(notebook.version(), 1);
  }

  #[test]
  fn empty_edit_is_ignored() {
    let mut notebook = notebook("abc");
    assert!(notebook.insert(1, "").unwrap().is_empty());
    assert!(notebook.history().is_empty());
  }

  #[test]
  fn undo_restores_text_segments_and_pointers() {
    let mut notebook = notebook("a\n# %%\nb\n# %%\nc");
    let before = notebook.pointers().to_vec();
    let segments = notebook.segments().to_vec();

    let start = notebook.text().line_to_byte(1);
    let end = notebook.text().line_to_byte(3);
    notebook.delete(start..end).unwrap();
    assert_eq!(lines(&notebook), vec![(0, 0), (1, 2)]);
    assert!(!before[1].is_valid());

    assert!(notebook.undo().unwrap());
    assert_eq!(notebook.text(), "a\n# %%\nb\n# %%\nc");
    assert_eq!(notebook.segments(), segments.as_slice());
    assert_eq!(notebook.pointers(), before.as_slice());
    assert_eq!(before[1].get(), Some(segments[1].clone()));

    assert!(notebook.redo().unwrap());
    assert!(!before[1].is_valid());
    assert!(!notebook.redo().unwrap());
  }

  #[test]
  fn direct_operations_are_undoable() {
    let mut notebook = notebook("a\n# %%\nb\n# %%\nc");
    let original = notebook.pointers().to_vec();

    assert_eq!(notebook.swap(0, 2).unwrap().len(), 1);
    assert_eq!(notebook.pointer_for_ordinal(0), Some(original[2].clone()));
    assert_eq!(notebook.history().current_revision(), 1);

    assert!(notebook.undo().unwrap());
    assert_eq!(notebook.pointers(), original.as_slice());
    assert_eq!(notebook.text(), "a\n# %%\nb\n# %%\nc");
  }

  #[test]
  fn no_op_direct_operations_leave_history_alone() {
    let mut notebook = notebook("a\n# %%\nb");
    assert!(notebook.swap(1, 1).unwrap().is_empty());
    assert!(notebook.swap(0, 5).unwrap().is_empty());
    assert!(notebook.history().is_empty());
  }

  #[test]
  fn bulk_update_defers_pointer_changes() {
    let mut notebook = notebook("a\n# %%\nb");
    let seen = Arc::new(Mutex::new(0));
    let sink = seen.clone();
    notebook
      .pointer_listeners()
      .subscribe(move |_: &PointersChanged| {
        *sink.lock() += 1;
        Ok(())
      });

    notebook.begin_bulk_update().unwrap();
    assert!(matches!(
      notebook.begin_bulk_update(),
      Err(NotebookError::BulkUpdateInProgress)
    ));
    notebook.insert(0, "# %%\n").unwrap();
    let end = notebook.text().len_bytes();
    notebook.insert(end, "\n# %%\nd").unwrap();
    assert_eq!(*seen.lock(), 0);
    assert_eq!(notebook.pointers().len(), 2);
    assert!(matches!(
      notebook.swap(0, 1),
      Err(NotebookError::BulkUpdateInProgress)
    ));

    let records = notebook.finish_bulk_update().unwrap();
    assert!(!records.is_empty());
    assert_eq!(*seen.lock(), 2);
    assert_eq!(notebook.pointers().len(), notebook.segments().len());
    assert_eq!(notebook.history().current_revision(), 1);
    assert_eq!(notebook.history().commands(1).unwrap().len(), 2);

    assert!(notebook.undo().unwrap());
    assert_eq!(notebook.text(), "a\n# %%\nb");
    assert_eq!(notebook.pointers().len(), 2);
  }

  #[test]
  fn finishing_without_bulk_update_fails() {
    let mut notebook = notebook("a");
    assert!(matches!(
      notebook.finish_bulk_update(),
      Err(NotebookError::NotInBulkUpdate)
    ));
  }

  #[test]
  fn failed_derivation_still_records_the_text() {
    let mut notebook = notebook("a\n# %%\nb");
    notebook.registry = PointerRegistry::new(&[]);

    assert!(matches!(
      notebook.insert(1, "x"),
      Err(NotebookError::Registry(_))
    ));
    assert_eq!(notebook.text(), "ax\n# %%\nb");
    assert_eq!(notebook.history().current_revision(), 1);
    assert!(notebook.history().commands(1).unwrap().is_empty());
    assert!(notebook.adapter.postponed().is_empty());
  }

  #[test]
  fn failed_bulk_flush_drops_its_commands() {
    let mut notebook = notebook("a\n# %%\nb");
    notebook.begin_bulk_update().unwrap();
    notebook.insert(1, "x").unwrap();
    notebook.insert(notebook.text().len_bytes(), "y").unwrap();
    if let Some(bulk) = &mut notebook.bulk {
      bulk.queued[1].segments.clear();
    }

    assert!(matches!(
      notebook.finish_bulk_update(),
      Err(NotebookError::Registry(RegistryError::OrdinalOutOfRange { .. }))
    ));
    assert!(!notebook.is_bulk_updating());
    assert!(notebook.adapter.postponed().is_empty());
    assert_eq!(notebook.history().current_revision(), 1);
    assert!(notebook.history().commands(1).unwrap().is_empty());

    // the next edit gets only its own command
    notebook.registry = PointerRegistry::new(notebook.segments());
    notebook.insert(0, "z").unwrap();
    assert_eq!(notebook.history().commands(2).unwrap().len(), 1);
  }

  #[test]
  fn pointer_events_carry_their_source() {
    let mut notebook = notebook("a\n# %%\nb");
    let sources = Arc::new(Mutex::new(Vec::new()));
    let sink = sources.clone();
    notebook
      .pointer_listeners()
      .subscribe(move |event: &PointersChanged| {
        sink.lock().push(event.source);
        Ok(())
      });

    notebook.insert(1, "x").unwrap();
    notebook.swap(0, 1).unwrap();
    notebook.undo().unwrap();
    notebook.undo().unwrap();
    notebook.redo().unwrap();

    assert_eq!(*sources.lock(), vec![
      ChangeSource::Edit,
      ChangeSource::Direct,
      ChangeSource::Undo,
      ChangeSource::Undo,
      ChangeSource::Redo,
    ]);
  }

  #[test]
  fn earlier_and_later_walk_several_revisions() {
    let mut notebook = notebook("a");
    notebook.insert(1, "\n# %%\nb").unwrap();
    let end = notebook.text().len_bytes();
    notebook.insert(end, "\n# %%\nc").unwrap();
    assert_eq!(notebook.segments().len(), 3);

    assert!(notebook.earlier(2).unwrap());
    assert_eq!(notebook.text(), "a");
    assert_eq!(notebook.pointers().len(), 1);
    assert!(!notebook.earlier(1).unwrap());

    assert!(notebook.later(5).unwrap());
    assert_eq!(notebook.segments().len(), 3);
    assert_eq!(notebook.pointers().len(), 3);
  }
}
