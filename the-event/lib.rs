//! Listener registries for the cell tracking crates.
//!
//! Consumers subscribe fallible callbacks to a [`Listeners`] registry and the
//! owner dispatches events through it. Dispatch never lets a listener fault
//! escape: errors and panics are logged and the remaining listeners still run.

pub mod listeners;

pub use listeners::{
  Listener,
  ListenerId,
  Listeners,
  call_safely,
};
