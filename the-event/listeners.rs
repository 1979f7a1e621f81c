//! Subscribe/unsubscribe registry with fault-isolating dispatch.

use std::{
  any::Any,
  fmt,
  num::NonZeroU64,
  panic::{
    self,
    AssertUnwindSafe,
  },
  sync::{
    Arc,
    atomic::{
      AtomicU64,
      Ordering,
    },
  },
};

use parking_lot::RwLock;

/// A subscribed callback. Returning an error marks the delivery as failed but
/// never interrupts the dispatch.
pub type Listener<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`Listeners::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(NonZeroU64);

impl ListenerId {
  pub const fn get(self) -> NonZeroU64 {
    self.0
  }
}

impl fmt::Display for ListenerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// Ordered set of listeners for one event type.
///
/// Subscription goes through `&self` so consumers holding a shared reference
/// to the owner can register. Dispatch works on a snapshot of the current
/// listeners, so a listener may subscribe or unsubscribe while being called.
pub struct Listeners<E> {
  name:    &'static str,
  next_id: AtomicU64,
  entries: RwLock<Vec<(ListenerId, Listener<E>)>>,
}

impl<E> Listeners<E> {
  pub fn new(name: &'static str) -> Self {
    Self {
      name,
      next_id: AtomicU64::new(1),
      entries: RwLock::new(Vec::new()),
    }
  }

  /// Name used when logging listener faults.
  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn subscribe<F>(&self, listener: F) -> ListenerId
  where
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
  {
    let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
    // The counter starts at one and only grows.
    let id = ListenerId(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN));
    self.entries.write().push((id, Arc::new(listener)));
    id
  }

  /// Removes a listener. Returns false when the id was not subscribed.
  pub fn unsubscribe(&self, id: ListenerId) -> bool {
    let mut entries = self.entries.write();
    let before = entries.len();
    entries.retain(|(entry, _)| *entry != id);
    entries.len() != before
  }

  pub fn clear(&self) {
    self.entries.write().clear();
  }

  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.read().is_empty()
  }

  /// Delivers `event` to every listener in subscription order.
  ///
  /// Returns the number of listeners that failed (returned an error or
  /// panicked). Failures are logged and never propagated.
  pub fn dispatch(&self, event: &E) -> usize {
    let snapshot: Vec<_> = self.entries.read().clone();
    snapshot
      .iter()
      .filter(|(id, listener)| !call_safely(self.name, *id, listener.as_ref(), event))
      .count()
  }
}

impl<E> Default for Listeners<E> {
  fn default() -> Self {
    Self::new("listeners")
  }
}

impl<E> fmt::Debug for Listeners<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Listeners")
      .field("name", &self.name)
      .field("len", &self.len())
      .finish()
  }
}

/// Invokes one listener, catching both error returns and panics.
///
/// Returns true when the listener completed successfully.
pub fn call_safely<E: ?Sized>(
  name: &str,
  id: ListenerId,
  listener: &(dyn Fn(&E) -> anyhow::Result<()> + Send + Sync),
  event: &E,
) -> bool {
  match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
    Ok(Ok(())) => true,
    Ok(Err(err)) => {
      log::error!("{name} listener {id} failed: {err:#}");
      false
    },
    Err(payload) => {
      log::error!(
        "{name} listener {id} panicked: {}",
        panic_message(payload.as_ref())
      );
      false
    },
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    message
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.as_str()
  } else {
    "<non-string panic payload>"
  }
}
