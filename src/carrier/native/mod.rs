//! The in-thread carrier: suspend and resume are a register swap on the
//! calling thread, not a trip through the scheduler.
//!
//! Both sides of every hand-off run on the same OS thread, strictly taking
//! turns; the carrier's atomics are interior mutability for the paused stack
//! pointers, not cross-thread synchronization. Payloads cross the switch as
//! one machine word: a `Box` leaked into the word on one side and reclaimed
//! on the other.

mod stack;
mod x86_64;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::Payload;

use super::{page_size, EntryBody, StackBounds, StackCarrier, SwitchPoint, Unmount};
use stack::GuardedStack;

pub struct NativeCarrier {
  stack: Mutex<Option<GuardedStack>>,
  /// Where the microthread's stack is paused; zero unless suspended.
  resume_sp: AtomicUsize,
  point: Arc<NativePoint>,
}

impl NativeCarrier {
  /// Maps a guarded stack of `size` usable bytes. `size` must be
  /// page-aligned.
  pub fn new(size: usize) -> io::Result<NativeCarrier> {
    let stack = GuardedStack::new(size, page_size())?;
    let bounds = stack.bounds();
    Ok(NativeCarrier {
      stack: Mutex::new(Some(stack)),
      resume_sp: AtomicUsize::new(0),
      point: Arc::new(NativePoint {
        carrier_sp: AtomicUsize::new(0),
        bounds,
      }),
    })
  }

  /// Resumes the microthread stack paused at `sp` with `payload` and parks
  /// this side until it hands back.
  fn cross(&self, sp: *mut usize, payload: Payload) -> Unmount {
    let arg = Box::into_raw(Box::new(payload)) as usize;
    let paused = unsafe { x86_64::switch(sp, arg) };
    self.resume_sp.store(paused.stack as usize, Ordering::Relaxed);
    let unmount = unsafe { Box::from_raw(paused.arg as *mut Unmount) };
    *unmount
  }
}

impl StackCarrier for NativeCarrier {
  fn mount(&self, body: EntryBody, payload: Payload) -> Unmount {
    let end = {
      let guard = self.stack.lock().unwrap();
      guard.as_ref().map(GuardedStack::end)
    };
    let Some(end) = end else {
      // Retired; the protocol never mounts a retired carrier.
      return Unmount::Exited(Payload::None);
    };
    let point = self.point.clone();
    let sp = unsafe {
      x86_64::link_closure(end, move |outer: *mut usize, first: usize| {
        point.carrier_sp.store(outer as usize, Ordering::Relaxed);
        let first = unsafe { Box::from_raw(first as *mut Payload) };
        let completion = body(point.clone() as Arc<dyn SwitchPoint>, *first);
        point.hand_back(Unmount::Exited(completion));
        // An exited stack is never resumed, so control cannot come back.
        unreachable!("exited stack resumed");
      })
    };
    self.cross(sp, payload)
  }

  fn switch_to(&self, payload: Payload) -> Unmount {
    let sp = self.resume_sp.swap(0, Ordering::Relaxed) as *mut usize;
    debug_assert!(!sp.is_null(), "switch_to with no paused stack");
    self.cross(sp, payload)
  }

  fn switch_point(&self) -> Arc<dyn SwitchPoint> {
    self.point.clone()
  }

  fn bounds(&self) -> StackBounds {
    self.point.bounds
  }

  fn retire(&self) {
    // Unmaps the region. Idempotent; never called while mounted.
    self.stack.lock().unwrap().take();
  }
}

/// Stack-side handle: lives on the private stack's call chain, switches back
/// to whichever frame is parked in `cross`.
struct NativePoint {
  /// Where the carrier side is paused while the microthread runs.
  carrier_sp: AtomicUsize,
  bounds: StackBounds,
}

impl NativePoint {
  fn hand_back(&self, unmount: Unmount) -> Payload {
    let sp = self.carrier_sp.swap(0, Ordering::Relaxed) as *mut usize;
    let arg = Box::into_raw(Box::new(unmount)) as usize;
    let resumed = unsafe { x86_64::switch(sp, arg) };
    self.carrier_sp.store(resumed.stack as usize, Ordering::Relaxed);
    let payload = unsafe { Box::from_raw(resumed.arg as *mut Payload) };
    *payload
  }
}

impl SwitchPoint for NativePoint {
  fn switch_back(&self, unmount: Unmount) -> Payload {
    self.hand_back(unmount)
  }

  fn remaining(&self) -> usize {
    let marker = 0u8;
    self.bounds.remaining_at(&marker as *const u8 as usize)
  }
}
