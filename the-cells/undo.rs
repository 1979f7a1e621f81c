//! Undo/redo integration for pointer changes.
//!
//! Each batch of pointer changes becomes one [`PointerCommand`] holding both
//! the forward records and their inverse. Commands are not handed to the
//! [`UndoHost`] right away: they wait in a postponed cell until the host says
//! it has recorded the text mutation itself, so that on undo the text is
//! always restored before the pointers are.
//!
//! While the host replays history, tracker events are not translated into
//! pointer changes. They are staged instead and each replayed edit command
//! consumes one of them before applying its stored records.

use std::collections::VecDeque;

use thiserror::Error;

use crate::{
  change::{
    ChangeRecord,
    invert_all,
  },
  registry::{
    PointerRegistry,
    RegistryError,
  },
  tracker::SegmentsChanged,
};

pub type Result<T> = std::result::Result<T, UndoError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UndoError {
  #[error("no postponed segment change to replay an edit command against")]
  MissingPostponedChanges,
  #[error("pointer replay failed: {0}")]
  Registry(#[from] RegistryError),
}

/// What produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandOrigin {
  /// A text edit; replaying needs the matching tracker event.
  Edit,
  /// A direct `invalidate`/`swap`/`modify` call.
  Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
  Backward,
  Forward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerCommand {
  pub origin:  CommandOrigin,
  pub forward: Vec<ChangeRecord>,
  pub inverse: Vec<ChangeRecord>,
}

impl PointerCommand {
  pub fn new(origin: CommandOrigin, forward: Vec<ChangeRecord>) -> Self {
    let inverse = invert_all(&forward);
    Self {
      origin,
      forward,
      inverse,
    }
  }

  pub fn records(&self, direction: Direction) -> &[ChangeRecord] {
    match direction {
      Direction::Backward => &self.inverse,
      Direction::Forward => &self.forward,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.forward.is_empty()
  }
}

/// The host-owned undo stack.
pub trait UndoHost {
  /// Whether an undo or redo is being replayed right now.
  fn is_replaying(&self) -> bool;

  fn register_invertible_action(&mut self, command: PointerCommand);
}

#[derive(Debug, Default)]
pub struct UndoAdapter {
  postponed: Vec<PointerCommand>,
  replayed:  VecDeque<SegmentsChanged>,
}

impl UndoAdapter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Routes a tracker event. Returns the event back when it should be turned
  /// into pointer changes, or stages it when the host is replaying.
  pub fn route(&mut self, host: &impl UndoHost, event: SegmentsChanged) -> Option<SegmentsChanged> {
    if host.is_replaying() {
      self.replayed.push_back(event);
      None
    } else {
      Some(event)
    }
  }

  /// Holds `command` until [`text_recorded`](Self::text_recorded).
  pub fn stage(&mut self, command: PointerCommand) {
    self.postponed.push(command);
  }

  pub fn postponed(&self) -> &[PointerCommand] {
    &self.postponed
  }

  pub fn staged_replays(&self) -> usize {
    self.replayed.len()
  }

  /// The host recorded the text mutation; registers every postponed command
  /// in staging order. Returns how many were registered.
  pub fn text_recorded(&mut self, host: &mut impl UndoHost) -> usize {
    let count = self.postponed.len();
    for command in self.postponed.drain(..) {
      host.register_invertible_action(command);
    }
    count
  }

  /// Drops postponed commands whose batch failed halfway, so they never
  /// reach the host. Returns how many there were.
  pub fn discard_postponed(&mut self) -> usize {
    let count = self.postponed.len();
    if count > 0 {
      tracing::warn!(count, "discarding postponed pointer commands");
    }
    self.postponed.clear();
    count
  }

  /// Applies `command` in `direction` to `registry` and returns the records
  /// that were applied.
  pub fn replay(
    &mut self,
    command: &PointerCommand,
    direction: Direction,
    registry: &mut PointerRegistry,
  ) -> Result<Vec<ChangeRecord>> {
    if command.origin == CommandOrigin::Edit {
      self
        .replayed
        .pop_front()
        .ok_or(UndoError::MissingPostponedChanges)?;
    }
    let records = command.records(direction);
    registry.apply_records(records)?;
    Ok(records.to_vec())
  }

  /// Drops staged replay events nothing consumed. Returns how many there
  /// were.
  pub fn discard_replays(&mut self) -> usize {
    let count = self.replayed.len();
    if count > 0 {
      tracing::warn!(count, "discarding unconsumed replayed segment changes");
    }
    self.replayed.clear();
    count
  }
}
