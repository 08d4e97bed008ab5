//! The mmap'd stack region the native carrier switches onto.

use std::io;
use std::ptr::null_mut;

use libc::{
  c_int, c_void, MAP_ANONYMOUS, MAP_FAILED, MAP_FIXED, MAP_PRIVATE,
  PROT_NONE, PROT_READ, PROT_WRITE,
};

use crate::carrier::StackBounds;

/// A private stack with an inaccessible page below it, so overflow faults
/// immediately instead of corrupting whatever the allocator put next door.
pub struct GuardedStack {
  start: *mut u8, // base of the guard page
  size:  usize,   // usable bytes, page-aligned
  guard: usize,   // one page
}

// Owned region; the pointers are only dereferenced through the switch
// mechanism, which the protocol layer serializes.
unsafe impl Send for GuardedStack {}
unsafe impl Sync for GuardedStack {}

impl GuardedStack {
  /// Maps `size` usable bytes plus a guard page. `size` must already be
  /// page-aligned.
  ///
  /// No platform documents double-mapping a guarded stack for us, so we do
  /// it by hand: reserve the whole range `PROT_NONE`, then map the usable
  /// portion read-write over the top. The page left inaccessible is the
  /// guard.
  pub fn new(size: usize, page: usize) -> io::Result<GuardedStack> {
    debug_assert_eq!(size & (page - 1), 0);
    let total = page + size;
    let start =
      unsafe { libc::mmap(null_mut(), total, PROT_NONE, GUARD_FLAGS, -1, 0) };
    if start == MAP_FAILED {
      return Err(io::Error::last_os_error());
    }
    let usable = unsafe { start.cast::<u8>().add(page) }.cast::<c_void>();
    let mapped =
      unsafe { libc::mmap(usable, size, PROT_READ | PROT_WRITE, STACK_FLAGS, -1, 0) };
    if mapped == MAP_FAILED {
      let err = io::Error::last_os_error();
      unsafe { libc::munmap(start, total) };
      return Err(err);
    }
    Ok(GuardedStack { start: start.cast(), size, guard: page })
  }

  /// One past the highest usable address: where a descending stack begins.
  /// Page-aligned, which more than satisfies the ABI's 16-byte requirement.
  pub fn end(&self) -> *mut usize {
    unsafe { self.start.add(self.guard + self.size) }.cast()
  }

  /// The usable region, guard page excluded.
  pub fn bounds(&self) -> StackBounds {
    let lo = self.start as usize + self.guard;
    StackBounds { lo, hi: lo + self.size }
  }
}

impl Drop for GuardedStack {
  fn drop(&mut self) {
    unsafe { libc::munmap(self.start.cast(), self.guard + self.size) };
  }
}

const GUARD_FLAGS: c_int = MAP_ANONYMOUS | MAP_PRIVATE;

#[cfg(any(
  target_os = "freebsd",
  target_os = "linux",
  target_os = "netbsd",
  target_os = "openbsd"
))]
const STACK_FLAGS: c_int = MAP_ANONYMOUS | MAP_PRIVATE | MAP_FIXED | libc::MAP_STACK;
#[cfg(not(any(
  target_os = "freebsd",
  target_os = "linux",
  target_os = "netbsd",
  target_os = "openbsd"
)))]
const STACK_FLAGS: c_int = MAP_ANONYMOUS | MAP_PRIVATE | MAP_FIXED;
