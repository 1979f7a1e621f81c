use std::num::NonZeroUsize;

use thiserror::Error;

use crate::{
  text::TextEdit,
  undo::{
    Direction,
    PointerCommand,
    UndoHost,
  },
};

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
  #[error("revision index {index} is out of bounds (max: {max})")]
  RevisionOutOfBounds { index: usize, max: usize },
}

/// One revision's worth of work to replay in one direction.
///
/// `edits` are ready to apply in order (already inverted and reversed when
/// going backward), and so are `commands`: replay each with
/// [`PointerCommand::records`] for `direction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStep {
  pub revision:  usize,
  pub direction: Direction,
  pub edits:     Vec<TextEdit>,
  pub commands:  Vec<PointerCommand>,
}

/// A pending jump in history that has not yet been applied.
///
/// The caller replays every step and only then calls
/// [`History::apply_jump`], so the history never points at a revision the
/// buffer has not reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryJump {
  pub steps:  Vec<ReplayStep>,
  pub target: usize,
}

impl HistoryJump {
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.steps.len()
  }
}

/// Revision tree of a buffer.
///
/// The vector always holds at least the empty root revision. Every other
/// revision knows its parent and the text edits that lead from the parent to
/// itself, plus the pointer commands registered for those edits. Undo replays
/// the inverted edits and then the inverse pointer records; redo follows the
/// `last_child` link of the current revision.
///
/// Committing while not at the newest revision starts a new branch; the old
/// branch stays reachable through [`History::jump_to`].
#[derive(Debug)]
pub struct History {
  revisions: Vec<Revision>,
  current:   usize,
  replaying: bool,
}

#[derive(Debug, Clone)]
struct Revision {
  parent:     usize,
  last_child: Option<NonZeroUsize>,
  edits:      Vec<TextEdit>,
  commands:   Vec<PointerCommand>,
}

impl Default for History {
  fn default() -> Self {
    Self {
      revisions: vec![Revision {
        parent:     0,
        last_child: None,
        edits:      Vec::new(),
        commands:   Vec::new(),
      }],
      current:   0,
      replaying: false,
    }
  }
}

impl History {
  /// Pushes a new revision made of `edits` after the current one.
  pub fn commit_revision(&mut self, edits: Vec<TextEdit>) {
    let new_current = self.revisions.len();
    self.revisions[self.current].last_child = NonZeroUsize::new(new_current);
    self.revisions.push(Revision {
      parent: self.current,
      last_child: None,
      edits,
      commands: Vec::new(),
    });
    self.current = new_current;
  }

  #[inline]
  pub fn current_revision(&self) -> usize {
    self.current
  }

  #[inline]
  pub const fn at_root(&self) -> bool {
    self.current == 0
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.revisions.len()
  }

  /// Whether only the root revision exists.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.revisions.len() <= 1
  }

  /// Pointer commands attached to `revision`.
  pub fn commands(&self, revision: usize) -> Result<&[PointerCommand]> {
    self.validate_revision(revision)?;
    Ok(&self.revisions[revision].commands)
  }

  pub fn start_replay(&mut self) {
    self.replaying = true;
  }

  pub fn finish_replay(&mut self) {
    self.replaying = false;
  }

  fn validate_revision(&self, revision: usize) -> Result<()> {
    if revision >= self.revisions.len() {
      return Err(HistoryError::RevisionOutOfBounds {
        index: revision,
        max:   self.revisions.len().saturating_sub(1),
      });
    }
    Ok(())
  }

  fn step(&self, revision: usize, direction: Direction) -> ReplayStep {
    let source = &self.revisions[revision];
    let (edits, commands) = match direction {
      Direction::Backward => {
        (
          source.edits.iter().rev().map(TextEdit::invert).collect(),
          source.commands.iter().rev().cloned().collect(),
        )
      },
      Direction::Forward => (source.edits.clone(), source.commands.clone()),
    };
    ReplayStep {
      revision,
      direction,
      edits,
      commands,
    }
  }

  /// Prepares an undo without mutating history state. `None` at the root.
  pub fn undo(&self) -> Option<HistoryJump> {
    if self.at_root() {
      return None;
    }

    Some(HistoryJump {
      steps:  vec![self.step(self.current, Direction::Backward)],
      target: self.revisions[self.current].parent,
    })
  }

  /// Prepares a redo along the `last_child` link. `None` when there is
  /// nothing to redo.
  pub fn redo(&self) -> Option<HistoryJump> {
    let last_child = self.revisions[self.current].last_child?;

    Some(HistoryJump {
      steps:  vec![self.step(last_child.get(), Direction::Forward)],
      target: last_child.get(),
    })
  }

  /// Moves the current revision to the jump target. Call only after every
  /// step was replayed.
  pub fn apply_jump(&mut self, jump: &HistoryJump) -> Result<()> {
    self.validate_revision(jump.target)?;
    self.current = jump.target;
    Ok(())
  }

  fn lowest_common_ancestor(&self, mut a: usize, mut b: usize) -> usize {
    use std::collections::HashSet;
    let mut a_path_set = HashSet::new();
    let mut b_path_set = HashSet::new();
    loop {
      a_path_set.insert(a);
      b_path_set.insert(b);
      if a_path_set.contains(&b) {
        return b;
      }
      if b_path_set.contains(&a) {
        return a;
      }
      a = self.revisions[a].parent; // the root is its own parent
      b = self.revisions[b].parent;
    }
  }

  /// Nodes from `n` up to `a`, excluding `a`. `a` must be an ancestor of `n`.
  fn path_up(&self, mut n: usize, a: usize) -> Vec<usize> {
    let mut path = Vec::new();
    while n != a {
      path.push(n);
      n = self.revisions[n].parent;
    }
    path
  }

  /// Prepares a jump to any revision, walking up to the common ancestor and
  /// back down the other branch.
  pub fn jump_to(&self, to: usize) -> Result<HistoryJump> {
    self.validate_revision(to)?;

    if to == self.current {
      return Ok(HistoryJump {
        steps:  Vec::new(),
        target: to,
      });
    }

    let lca = self.lowest_common_ancestor(self.current, to);
    let up = self.path_up(self.current, lca);
    let down = self.path_up(to, lca);

    let up_steps = up.iter().map(|&n| self.step(n, Direction::Backward));
    let down_steps = down.iter().rev().map(|&n| self.step(n, Direction::Forward));

    Ok(HistoryJump {
      steps:  up_steps.chain(down_steps).collect(),
      target: to,
    })
  }

  fn walk_parents(&self, mut from: usize, steps: usize) -> usize {
    for _ in 0..steps {
      if from == 0 {
        break;
      }
      from = self.revisions[from].parent;
    }
    from
  }

  fn walk_children(&self, mut from: usize, steps: usize) -> usize {
    for _ in 0..steps {
      match self.revisions[from].last_child {
        Some(child) => from = child.get(),
        None => break,
      }
    }
    from
  }

  /// Jump `steps` revisions back along the current branch.
  pub fn earlier(&self, steps: usize) -> Result<HistoryJump> {
    self.jump_to(self.walk_parents(self.current, steps))
  }

  /// Jump `steps` revisions forward along the current branch.
  pub fn later(&self, steps: usize) -> Result<HistoryJump> {
    self.jump_to(self.walk_children(self.current, steps))
  }
}

impl UndoHost for History {
  fn is_replaying(&self) -> bool {
    self.replaying
  }

  fn register_invertible_action(&mut self, command: PointerCommand) {
    if self.at_root() {
      tracing::error!("pointer command registered without a revision to attach it to");
      return;
    }
    self.revisions[self.current].commands.push(command);
  }
}
