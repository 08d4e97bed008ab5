//! Stack carriers: the platform-specific collaborators that own a private
//! stack region and the mechanism for mounting it on a carrier thread.
//!
//! The protocol layer ([`UThread`](crate::UThread)) is deliberately ignorant
//! of how a switch happens. It hands a carrier an [`EntryBody`] to run and
//! gets back an [`Unmount`] saying whether the far side suspended or exited;
//! code running *on* the private stack talks to its [`SwitchPoint`] to hand
//! control out again. Everything register- and memory-layout-shaped lives
//! behind these two traits.

use crate::channel::Payload;

#[cfg(unix)]
mod os_unix;
#[cfg(unix)]
pub use os_unix::*;

#[cfg(not(unix))]
mod os_fallback;
#[cfg(not(unix))]
pub use os_fallback::*;

pub mod thread;

#[cfg(all(feature = "asm", unix, target_arch = "x86_64"))]
pub mod native;

/// Fallback when the host stack size cannot be discovered.
pub const DEFAULT_STACK_SIZE: usize = 1 << 20;

/// Smallest acceptable stack, in pages: two usable plus one guard.
pub const MIN_STACK_PAGES: usize = 3;

/// Inclusive-low, exclusive-high bounds of a stack region.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StackBounds {
  pub lo: usize,
  pub hi: usize,
}

impl StackBounds {
  pub const UNKNOWN: StackBounds = StackBounds { lo: 0, hi: 0 };

  pub fn size(&self) -> usize {
    self.hi - self.lo
  }

  pub fn is_unknown(&self) -> bool {
    self.lo == 0 && self.hi == 0
  }

  /// Headroom between an address on this stack and the region floor.
  /// Zero if the address is not within bounds (or bounds are unknown).
  pub fn remaining_at(&self, sp: usize) -> usize {
    if sp >= self.lo && sp < self.hi { sp - self.lo } else { 0 }
  }
}

/// How a mounted microthread handed control back.
#[derive(Debug)]
pub enum Unmount {
  /// It suspended; the payload travels to the blocked start/resume, and the
  /// stack stays live for a later `switch_to`.
  Suspended(Payload),
  /// It is done, either by its entry returning or by an explicit exit. The
  /// stack contents are no longer meaningful.
  Exited(Payload),
}

/// The closure a carrier runs on its private stack at first mount. Receives
/// the stack-side switch handle and the payload carried by `mount`; its
/// return value is the microthread's completion payload.
pub type EntryBody =
  Box<dyn FnOnce(std::sync::Arc<dyn SwitchPoint>, Payload) -> Payload + Send>;

/// Carrier-side handle: owns the stack region and the switch mechanism.
///
/// `mount` and `switch_to` block the calling thread until the far side hands
/// control back; the protocol layer serializes them, so implementations may
/// assume at most one is in flight.
pub trait StackCarrier: Send + Sync {
  /// First transfer: runs `body` on the private stack.
  fn mount(&self, body: EntryBody, payload: Payload) -> Unmount;

  /// Re-enters a stack paused in `switch_back`, delivering `payload` as that
  /// call's return value.
  fn switch_to(&self, payload: Payload) -> Unmount;

  /// Stack-side handle for code running on the private stack.
  fn switch_point(&self) -> std::sync::Arc<dyn SwitchPoint>;

  /// Bounds of the private stack region, for root scanning.
  fn bounds(&self) -> StackBounds;

  /// Releases the stack region. Idempotent; never called while mounted.
  fn retire(&self);
}

/// Stack-side handle: how a mounted microthread hands control out.
pub trait SwitchPoint: Send + Sync {
  /// Transfers control to whichever call frame is blocked in
  /// `mount`/`switch_to`, carrying `unmount` as its result. For
  /// `Unmount::Suspended` this returns the payload the next `switch_to`
  /// delivers; for `Unmount::Exited` it never returns normally.
  fn switch_back(&self, unmount: Unmount) -> Payload;

  /// Headroom left on the private stack, measured here and now.
  fn remaining(&self) -> usize;
}

/// Unwind payload used by the thread-backed carrier to tear down a parked
/// stack when its microthread is disposed mid-suspension. The entry glue
/// recognizes it and lets the unwind continue silently.
pub(crate) struct StackRetired;
