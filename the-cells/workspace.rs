//! Explicit buffer-to-notebook registry.
//!
//! Whoever manages buffer lifetimes owns a [`Workspace`] and calls
//! [`Workspace::release`] when a buffer is disposed. Releasing drops the
//! notebook together with its tracker, pointers and history.

use std::{
  collections::BTreeMap,
  num::NonZeroUsize,
  sync::Arc,
};

use ropey::Rope;

use crate::{
  config::CellsConfig,
  generator::{
    PercentGenerator,
    SegmentGenerator,
  },
  notebook::Notebook,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(NonZeroUsize);

impl BufferId {
  pub const fn new(id: NonZeroUsize) -> Self {
    Self(id)
  }

  pub const fn get(self) -> NonZeroUsize {
    self.0
  }
}

impl From<NonZeroUsize> for BufferId {
  fn from(value: NonZeroUsize) -> Self {
    Self::new(value)
  }
}

pub struct Workspace {
  generator: Arc<dyn SegmentGenerator>,
  notebooks: BTreeMap<BufferId, Notebook>,
  next_id:   NonZeroUsize,
}

impl std::fmt::Debug for Workspace {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Workspace")
      .field("notebooks", &self.notebooks.keys().collect::<Vec<_>>())
      .field("next_id", &self.next_id)
      .finish_non_exhaustive()
  }
}

impl Default for Workspace {
  fn default() -> Self {
    Self::from_config(CellsConfig::default())
  }
}

impl Workspace {
  /// Workspace whose buffers use `generator` unless opened with their own.
  pub fn new(generator: Arc<dyn SegmentGenerator>) -> Self {
    Self {
      generator,
      notebooks: BTreeMap::new(),
      next_id: NonZeroUsize::MIN,
    }
  }

  pub fn from_config(config: CellsConfig) -> Self {
    Self::new(Arc::new(PercentGenerator::new(config)))
  }

  pub fn open(&mut self, text: impl Into<Rope>) -> BufferId {
    let generator = self.generator.clone();
    self.open_with(text, generator)
  }

  pub fn open_with(
    &mut self,
    text: impl Into<Rope>,
    generator: Arc<dyn SegmentGenerator>,
  ) -> BufferId {
    let id = BufferId::new(self.next_id);
    let next = self.next_id.get().saturating_add(1);
    self.next_id = NonZeroUsize::new(next).unwrap_or(self.next_id);

    self.notebooks.insert(id, Notebook::new(id, text.into(), generator));
    tracing::debug!(buffer = id.get().get(), "opened notebook");
    id
  }

  pub fn get(&self, id: BufferId) -> Option<&Notebook> {
    self.notebooks.get(&id)
  }

  pub fn get_mut(&mut self, id: BufferId) -> Option<&mut Notebook> {
    self.notebooks.get_mut(&id)
  }

  pub fn contains(&self, id: BufferId) -> bool {
    self.notebooks.contains_key(&id)
  }

  /// Removes the notebook of a disposed buffer.
  pub fn release(&mut self, id: BufferId) -> Option<Notebook> {
    let released = self.notebooks.remove(&id);
    if released.is_none() {
      tracing::warn!(buffer = id.get().get(), "released an unknown buffer");
    }
    released
  }

  pub fn ids(&self) -> impl Iterator<Item = BufferId> + '_ {
    self.notebooks.keys().copied()
  }

  pub fn len(&self) -> usize {
    self.notebooks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.notebooks.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::segment::{
    Segment,
    SegmentKind,
  };

  #[test]
  fn open_and_release() {
    let mut workspace = Workspace::default();
    let first = workspace.open("a\n# %%\nb");
    let second = workspace.open("");
    assert_ne!(first, second);
    assert_eq!(workspace.len(), 2);
    assert_eq!(workspace.get(first).map(|n| n.segments().len()), Some(2));
    assert_eq!(workspace.get(second).map(|n| n.id()), Some(second));

    assert!(workspace.release(first).is_some());
    assert!(!workspace.contains(first));
    assert!(workspace.release(first).is_none());
    assert_eq!(workspace.ids().collect::<Vec<_>>(), vec![second]);
  }

  #[test]
  fn ids_are_not_reused() {
    let mut workspace = Workspace::default();
    let first = workspace.open("x");
    workspace.release(first);
    assert_ne!(workspace.open("y"), first);
  }

  #[test]
  fn per_buffer_generator() {
    let mut workspace = Workspace::default();
    let whole = |text: &Rope| {
      let last = text.len_lines().max(1) - 1;
      vec![Segment::new(0, SegmentKind::Raw, (0, last), "text")]
    };
    let id = workspace.open_with("a\n# %%\nb", Arc::new(whole));

    let notebook = workspace.get_mut(id).unwrap();
    assert_eq!(notebook.segments().len(), 1);
    notebook.insert(0, "# %%\n").unwrap();
    assert_eq!(notebook.segments()[0].lines.last, 3);
  }
}
