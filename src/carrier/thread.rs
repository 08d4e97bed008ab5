//! The portable carrier: a dedicated OS thread whose own stack is the
//! microthread's private region.
//!
//! The switch here is not a register swap but a strict rendez-vous: the
//! carrier side parks while the stack side runs and vice versa, so exactly
//! one of the two ever executes. That is the same observable contract the
//! in-thread asm carrier provides, without the platform dependence. The host
//! thread is spawned at construction (that is where allocation failure
//! surfaces) and parks until first mounted.

use std::io;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::Builder;

use crate::channel::Payload;

use super::{
  thread_stack_bounds, EntryBody, StackBounds, StackCarrier, StackRetired,
  SwitchPoint, Unmount,
};

enum ToStack {
  Mount(EntryBody, Payload),
  Switch(Payload),
}

struct Slots {
  to_stack: Option<ToStack>,
  to_carrier: Option<Unmount>,
  retired: bool,
}

/// The shared hand-off cell. One payload per direction, one waiter per side.
struct Rendezvous {
  slots: Mutex<Slots>,
  cv: Condvar,
}

impl Rendezvous {
  fn new() -> Arc<Rendezvous> {
    Arc::new(Rendezvous {
      slots: Mutex::new(Slots { to_stack: None, to_carrier: None, retired: false }),
      cv: Condvar::new(),
    })
  }
}

pub struct ThreadCarrier {
  shared: Arc<Rendezvous>,
  point: Arc<RendezvousPoint>,
}

impl ThreadCarrier {
  /// Spawns the host thread with the requested stack size and waits for it
  /// to report its stack bounds. The thread parks until first mounted.
  pub fn new(stack_size: usize, name: &str) -> io::Result<ThreadCarrier> {
    let shared = Rendezvous::new();
    let (bounds_tx, bounds_rx) = mpsc::channel();
    let host_shared = shared.clone();
    Builder::new()
      .name(format!("uthread:{name}"))
      .stack_size(stack_size)
      .spawn(move || host_main(host_shared, bounds_tx))?;
    // Thread startup failure past spawn() is not a thing; a closed channel
    // here would mean the host died before parking, so treat it as unknown.
    let point = bounds_rx
      .recv()
      .unwrap_or_else(|_| Arc::new(RendezvousPoint {
        shared: shared.clone(),
        bounds: StackBounds::UNKNOWN,
      }));
    Ok(ThreadCarrier { shared, point })
  }

  fn exchange(&self, msg: ToStack) -> Unmount {
    let mut slots = self.shared.slots.lock().unwrap();
    debug_assert!(slots.to_stack.is_none(), "switch while already switched in");
    slots.to_stack = Some(msg);
    self.shared.cv.notify_all();
    loop {
      if let Some(unmount) = slots.to_carrier.take() {
        return unmount;
      }
      slots = self.shared.cv.wait(slots).unwrap();
    }
  }
}

impl StackCarrier for ThreadCarrier {
  fn mount(&self, body: EntryBody, payload: Payload) -> Unmount {
    self.exchange(ToStack::Mount(body, payload))
  }

  fn switch_to(&self, payload: Payload) -> Unmount {
    self.exchange(ToStack::Switch(payload))
  }

  fn switch_point(&self) -> Arc<dyn SwitchPoint> {
    self.point.clone()
  }

  fn bounds(&self) -> StackBounds {
    self.point.bounds
  }

  fn retire(&self) {
    let mut slots = self.shared.slots.lock().unwrap();
    if slots.retired {
      return;
    }
    slots.retired = true;
    // Wakes a host parked in switch_back (or waiting to be mounted); it
    // unwinds its frames and exits, returning the stack to the OS.
    self.shared.cv.notify_all();
  }
}

/// Stack-side handle: lives on the host thread, hands control back to
/// whichever carrier call is parked in `exchange`.
struct RendezvousPoint {
  shared: Arc<Rendezvous>,
  bounds: StackBounds,
}

impl SwitchPoint for RendezvousPoint {
  fn switch_back(&self, unmount: Unmount) -> Payload {
    let mut slots = self.shared.slots.lock().unwrap();
    slots.to_carrier = Some(unmount);
    self.shared.cv.notify_all();
    loop {
      if slots.retired {
        drop(slots);
        resume_unwind(Box::new(StackRetired));
      }
      if let Some(msg) = slots.to_stack.take() {
        match msg {
          ToStack::Switch(payload) => return payload,
          ToStack::Mount(..) => unreachable!("mount delivered to a mounted stack"),
        }
      }
      slots = self.shared.cv.wait(slots).unwrap();
    }
  }

  fn remaining(&self) -> usize {
    let marker = 0u8;
    self.bounds.remaining_at(&marker as *const u8 as usize)
  }
}

fn host_main(shared: Arc<Rendezvous>, bounds_tx: mpsc::Sender<Arc<RendezvousPoint>>) {
  let point = Arc::new(RendezvousPoint {
    bounds: thread_stack_bounds().unwrap_or(StackBounds::UNKNOWN),
    shared: shared.clone(),
  });
  if bounds_tx.send(point.clone()).is_err() {
    return; // carrier construction abandoned
  }

  // Park until mounted or retired.
  let (body, payload) = {
    let mut slots = shared.slots.lock().unwrap();
    loop {
      if slots.retired {
        return;
      }
      match slots.to_stack.take() {
        Some(ToStack::Mount(body, payload)) => break (body, payload),
        Some(ToStack::Switch(_)) => unreachable!("switch_to before mount"),
        None => slots = shared.cv.wait(slots).unwrap(),
      }
    }
  };

  let outcome = catch_unwind(AssertUnwindSafe(|| {
    body(point.clone() as Arc<dyn SwitchPoint>, payload)
  }));
  match outcome {
    Ok(completion) => {
      // Entry ran to completion; deliver it, then park until the protocol
      // layer retires us. The thread must not end yet: a root scanner may
      // still hold this stack's region, and it is deregistered before
      // retire(), not before the payload is taken.
      let mut slots = shared.slots.lock().unwrap();
      slots.to_carrier = Some(Unmount::Exited(completion));
      shared.cv.notify_all();
      while !slots.retired {
        slots = shared.cv.wait(slots).unwrap();
      }
    }
    // The only unwind that escapes the entry glue is retirement; drop it
    // and let the stack die with the thread.
    Err(_) => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn carrier() -> ThreadCarrier {
    ThreadCarrier::new(256 * 1024, "test").expect("spawn carrier")
  }

  #[test]
  fn mount_switch_exit_cycle() {
    let c = carrier();
    let body: EntryBody = Box::new(|point, first| {
      assert!(first.is_none());
      let p = point.switch_back(Unmount::Suspended(Payload::value(1u32)));
      assert_eq!(p.downcast::<u32>().unwrap(), 2);
      Payload::value(3u32)
    });
    match c.mount(body, Payload::None) {
      Unmount::Suspended(p) => assert_eq!(p.downcast::<u32>().unwrap(), 1),
      other => panic!("expected suspension, got {other:?}"),
    }
    match c.switch_to(Payload::value(2u32)) {
      Unmount::Exited(p) => assert_eq!(p.downcast::<u32>().unwrap(), 3),
      other => panic!("expected exit, got {other:?}"),
    }
    c.retire();
  }

  #[test]
  fn host_outlives_a_normal_completion_until_retired() {
    let c = carrier();
    let body: EntryBody = Box::new(|_, _| Payload::None);
    match c.mount(body, Payload::None) {
      Unmount::Exited(p) => assert!(p.is_none()),
      other => panic!("expected exit, got {other:?}"),
    }
    // Three holders of the cell: the carrier, its switch point, and the
    // host thread still parked on its own stack awaiting retirement.
    assert_eq!(Arc::strong_count(&c.shared), 3);
    c.retire();
  }

  #[test]
  fn retire_before_mount_is_clean() {
    let c = carrier();
    c.retire();
    c.retire(); // idempotent
  }

  #[test]
  fn retire_unwinds_a_suspended_stack() {
    let c = carrier();
    let body: EntryBody = Box::new(|point, _| {
      point.switch_back(Unmount::Suspended(Payload::None));
      unreachable!("retired while suspended");
    });
    match c.mount(body, Payload::None) {
      Unmount::Suspended(p) => assert!(p.is_none()),
      other => panic!("expected suspension, got {other:?}"),
    }
    c.retire();
  }

  #[cfg(any(target_os = "linux", target_os = "macos"))]
  #[test]
  fn bounds_cover_the_host_stack() {
    let c = carrier();
    assert!(!c.bounds().is_unknown());
    assert!(c.bounds().size() >= 256 * 1024);
    let expected = c.bounds();
    let body: EntryBody = Box::new(move |point, _| {
      let headroom = point.remaining();
      assert!(headroom > 0);
      assert!(headroom < expected.size());
      Payload::None
    });
    match c.mount(body, Payload::None) {
      Unmount::Exited(p) => assert!(p.is_none()),
      other => panic!("expected exit, got {other:?}"),
    }
    c.retire();
  }
}
