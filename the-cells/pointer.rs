//! Stable identity handles to segments.

use std::{
  fmt,
  hash::{
    Hash,
    Hasher,
  },
  num::NonZeroU64,
  sync::{
    Arc,
    atomic::{
      AtomicU64,
      Ordering,
    },
  },
};

use parking_lot::{
  Mutex,
  RwLock,
};

use crate::segment::Segment;

static NEXT_POINTER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointerId(NonZeroU64);

impl PointerId {
  fn next() -> Self {
    let raw = NEXT_POINTER_ID.fetch_add(1, Ordering::Relaxed);
    Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
  }

  pub const fn get(self) -> NonZeroU64 {
    self.0
  }
}

/// Callback run once when the last handle to a pointer is dropped.
pub type RetireHook = Box<dyn FnOnce(PointerId) + Send>;

struct PointerInner {
  id:           PointerId,
  segment:      RwLock<Option<Segment>>,
  retire_hooks: Mutex<Vec<RetireHook>>,
}

impl Drop for PointerInner {
  fn drop(&mut self) {
    for hook in self.retire_hooks.get_mut().drain(..) {
      hook(self.id);
    }
  }
}

/// Shared handle to "the segment at this position", surviving edits.
///
/// Clones share identity: equality and hashing compare identity, never the
/// bound segment. A pointer whose segment was removed returns `None` from
/// [`get`](Self::get); only undoing the removal binds it again.
#[derive(Clone)]
pub struct SegmentPointer(Arc<PointerInner>);

impl SegmentPointer {
  pub(crate) fn new(segment: Segment) -> Self {
    Self(Arc::new(PointerInner {
      id:           PointerId::next(),
      segment:      RwLock::new(Some(segment)),
      retire_hooks: Mutex::new(Vec::new()),
    }))
  }

  pub fn id(&self) -> PointerId {
    self.0.id
  }

  /// The currently bound segment, if the pointer is still valid.
  pub fn get(&self) -> Option<Segment> {
    self.0.segment.read().clone()
  }

  /// Runs `f` against the bound segment without cloning it.
  pub fn with<R>(&self, f: impl FnOnce(Option<&Segment>) -> R) -> R {
    f(self.0.segment.read().as_ref())
  }

  pub fn is_valid(&self) -> bool {
    self.0.segment.read().is_some()
  }

  pub fn ordinal(&self) -> Option<usize> {
    self.with(|segment| segment.map(|s| s.ordinal))
  }

  pub(crate) fn is_bound_to(&self, segment: &Segment) -> bool {
    self.with(|bound| bound == Some(segment))
  }

  pub(crate) fn bind(&self, segment: Option<Segment>) {
    *self.0.segment.write() = segment;
  }

  /// Registers a callback run when the pointer is permanently retired, which
  /// is when its last handle (including those held by undo history) drops.
  pub fn on_retire(&self, hook: RetireHook) {
    self.0.retire_hooks.lock().push(hook);
  }
}

impl PartialEq for SegmentPointer {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl Eq for SegmentPointer {}

impl Hash for SegmentPointer {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.0.id.hash(state);
  }
}

impl fmt::Debug for SegmentPointer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut debug = f.debug_struct("SegmentPointer");
    debug.field("id", &self.0.id.get());
    self.with(|segment| match segment {
      Some(segment) => {
        debug
          .field("ordinal", &segment.ordinal)
          .field("lines", &segment.lines);
      },
      None => {
        debug.field("segment", &"<retired>");
      },
    });
    debug.finish()
  }
}
