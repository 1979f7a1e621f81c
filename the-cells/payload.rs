//! Caller data attached to pointers.
//!
//! Consumers (views, output renderers) read and write payloads from other
//! threads than the one editing the buffer, so unlike the rest of the crate
//! the map synchronises internally.

use std::{
  fmt,
  sync::{
    Arc,
    Weak,
  },
};

use foldhash::fast::RandomState;
use hashbrown::{
  HashMap,
  HashSet,
};
use parking_lot::{
  Mutex,
  RwLock,
};

use crate::pointer::{
  PointerId,
  SegmentPointer,
};

type Cleanup<V> = Box<dyn Fn(PointerId, V) + Send + Sync>;

/// Concurrent map from pointer identity to `V`.
///
/// An entry is dropped when its pointer retires for good, which is when the
/// last handle to it goes away (undo history keeps removed pointers alive).
/// The optional cleanup callback sees every value the map discards on its
/// own: retirement, [`remove_all`](Self::remove_all) and
/// [`clear`](Self::clear). [`remove`](Self::remove) hands the value back
/// instead. Each value is discarded at most once.
pub struct PayloadMap<V> {
  entries: RwLock<HashMap<PointerId, V, RandomState>>,
  hooked:  Mutex<HashSet<PointerId, RandomState>>,
  cleanup: Option<Cleanup<V>>,
}

impl<V> fmt::Debug for PayloadMap<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PayloadMap")
      .field("len", &self.entries.read().len())
      .finish_non_exhaustive()
  }
}

impl<V> PayloadMap<V>
where
  V: Send + Sync + 'static,
{
  pub fn new() -> Arc<Self> {
    Arc::new(Self::with_cleanup_opt(None))
  }

  pub fn with_cleanup(cleanup: impl Fn(PointerId, V) + Send + Sync + 'static) -> Arc<Self> {
    Arc::new(Self::with_cleanup_opt(Some(Box::new(cleanup))))
  }

  fn with_cleanup_opt(cleanup: Option<Cleanup<V>>) -> Self {
    Self {
      entries: RwLock::new(HashMap::with_hasher(RandomState::default())),
      hooked: Mutex::new(HashSet::with_hasher(RandomState::default())),
      cleanup,
    }
  }

  pub fn get(&self, pointer: &SegmentPointer) -> Option<V>
  where
    V: Clone,
  {
    self.entries.read().get(&pointer.id()).cloned()
  }

  /// Runs `f` against the payload without cloning it.
  pub fn with<R>(&self, pointer: &SegmentPointer, f: impl FnOnce(Option<&V>) -> R) -> R {
    f(self.entries.read().get(&pointer.id()))
  }

  pub fn contains(&self, pointer: &SegmentPointer) -> bool {
    self.entries.read().contains_key(&pointer.id())
  }

  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.read().is_empty()
  }

  /// Stores `value` for `pointer`, returning the previous value.
  pub fn set(self: &Arc<Self>, pointer: &SegmentPointer, value: V) -> Option<V> {
    let id = pointer.id();
    let previous = self.entries.write().insert(id, value);
    if self.hooked.lock().insert(id) {
      let map = Arc::downgrade(self);
      pointer.on_retire(Box::new(move |id| Self::retired(&map, id)));
    }
    previous
  }

  pub fn remove(&self, pointer: &SegmentPointer) -> Option<V> {
    self.entries.write().remove(&pointer.id())
  }

  /// Discards the payloads of `pointers`. Returns how many were present.
  pub fn remove_all<'a>(&self, pointers: impl IntoIterator<Item = &'a SegmentPointer>) -> usize {
    let removed: Vec<_> = {
      let mut entries = self.entries.write();
      pointers
        .into_iter()
        .filter_map(|pointer| entries.remove_entry(&pointer.id()))
        .collect()
    };
    let count = removed.len();
    self.discard(removed);
    count
  }

  /// Discards every payload.
  pub fn clear(&self) {
    let removed: Vec<_> = self.entries.write().drain().collect();
    self.discard(removed);
  }

  fn retired(map: &Weak<Self>, id: PointerId) {
    let Some(map) = map.upgrade() else {
      return;
    };
    map.hooked.lock().remove(&id);
    let removed = map.entries.write().remove(&id);
    if let Some(value) = removed {
      tracing::trace!(pointer = id.get().get(), "payload dropped with retired pointer");
      map.discard([(id, value)]);
    }
  }

  fn discard(&self, removed: impl IntoIterator<Item = (PointerId, V)>) {
    let Some(cleanup) = &self.cleanup else {
      return;
    };
    for (id, value) in removed {
      cleanup(id, value);
    }
  }
}
