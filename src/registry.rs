//! One slot per carrier thread naming the microthread mounted there.
//!
//! The slot is an owned value rather than a bare global so the occupancy
//! rules can be exercised against standalone instances; the public API works
//! through a thread-local ambient instance, so a slot can never be shared
//! between two carrier threads.

use std::cell::RefCell;
use std::sync::Arc;

use crate::carrier::SwitchPoint;
use crate::error::Error;
use crate::uthread::UThread;

/// What start/resume records before transferring control: the microthread
/// and the stack-side handle its inside-operations switch through.
#[derive(Clone)]
pub(crate) struct Mounted {
  pub thread: UThread,
  pub switch: Arc<dyn SwitchPoint>,
}

/// A carrier thread's current-microthread slot.
///
/// Occupied by start/resume immediately before the switch in, vacated by the
/// same call immediately after control returns. Holds at most one entry.
pub struct CurrentRegistry {
  slot: RefCell<Option<Mounted>>,
}

impl CurrentRegistry {
  pub fn new() -> CurrentRegistry {
    CurrentRegistry { slot: RefCell::new(None) }
  }

  /// The microthread mounted on this slot's carrier thread, if any. Safe to
  /// call from the microthread's own code while it runs; it sees itself.
  pub fn current(&self) -> Option<UThread> {
    self.slot.borrow().as_ref().map(|m| m.thread.clone())
  }

  pub(crate) fn mounted(&self) -> Option<Mounted> {
    self.slot.borrow().clone()
  }

  /// Claims the slot for `mounted`; refuses if another microthread already
  /// holds it (start/resume would nest).
  pub(crate) fn occupy(&self, mounted: Mounted) -> Result<(), Error> {
    let mut slot = self.slot.borrow_mut();
    if slot.is_some() {
      return Err(Error::AlreadyActive);
    }
    *slot = Some(mounted);
    Ok(())
  }

  /// Host-side claim at mount time. On an in-thread carrier the caller has
  /// already claimed this very slot, so an overwrite with the same
  /// microthread is expected rather than an error.
  pub(crate) fn mount_over(&self, mounted: Mounted) {
    *self.slot.borrow_mut() = Some(mounted);
  }

  pub(crate) fn release(&self) -> Option<Mounted> {
    self.slot.borrow_mut().take()
  }
}

impl Default for CurrentRegistry {
  fn default() -> CurrentRegistry {
    CurrentRegistry::new()
  }
}

thread_local! {
  static AMBIENT: CurrentRegistry = CurrentRegistry::new();
}

/// Runs `f` against the calling carrier thread's slot.
pub(crate) fn with_ambient<R>(f: impl FnOnce(&CurrentRegistry) -> R) -> R {
  AMBIENT.with(f)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::carrier::{Unmount, StackBounds, SwitchPoint};
  use crate::channel::Payload;

  struct InertPoint;

  impl SwitchPoint for InertPoint {
    fn switch_back(&self, _unmount: Unmount) -> Payload {
      panic!("inert switch point switched");
    }
    fn remaining(&self) -> usize {
      StackBounds::UNKNOWN.remaining_at(0)
    }
  }

  fn mounted(thread: &UThread) -> Mounted {
    Mounted { thread: thread.clone(), switch: Arc::new(InertPoint) }
  }

  #[test]
  fn slot_holds_at_most_one() {
    let a = UThread::builder().name("a").build().unwrap();
    let b = UThread::builder().name("b").build().unwrap();
    let reg = CurrentRegistry::new();

    assert!(reg.current().is_none());
    reg.occupy(mounted(&a)).unwrap();
    assert_eq!(reg.current().unwrap(), a);
    assert!(matches!(reg.occupy(mounted(&b)), Err(Error::AlreadyActive)));
    assert_eq!(reg.current().unwrap(), a);

    let released = reg.release().unwrap();
    assert_eq!(released.thread, a);
    assert!(reg.current().is_none());
    assert!(reg.release().is_none());
  }

  #[test]
  fn two_registries_are_independent() {
    let a = UThread::builder().name("a").build().unwrap();
    let one = CurrentRegistry::new();
    let two = CurrentRegistry::new();
    one.occupy(mounted(&a)).unwrap();
    assert!(two.current().is_none());
    two.occupy(mounted(&a)).unwrap();
    one.release();
    assert_eq!(two.current().unwrap(), a);
  }
}
