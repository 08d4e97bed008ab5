//! Unix stack introspection: page size and the bounds of the calling
//! thread's own stack. Used for the default stack-size hint, for
//! [`stack_remaining`](crate::stack_remaining) on a plain carrier thread,
//! and by the thread-backed carrier to learn the region it should report to
//! the root scanner.

use super::StackBounds;

/// The operating system's standard page size (probably 4k).
pub fn page_size() -> usize {
  match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
    -1   => 4096, // sysconf has no business failing here; assume the usual
    size => size as usize,
  }
}

/// Rounds `size` up to a whole number of pages.
pub fn round_to_page(size: usize, page: usize) -> usize {
  (size + page - 1) & !(page - 1)
}

/// Bounds of the calling thread's stack, if the platform will say.
#[cfg(target_os = "linux")]
pub fn thread_stack_bounds() -> Option<StackBounds> {
  unsafe {
    let mut attr: libc::pthread_attr_t = std::mem::zeroed();
    if libc::pthread_getattr_np(libc::pthread_self(), &mut attr) != 0 {
      return None;
    }
    let mut addr: *mut libc::c_void = std::ptr::null_mut();
    let mut size: libc::size_t = 0;
    let rc = libc::pthread_attr_getstack(&attr, &mut addr, &mut size);
    libc::pthread_attr_destroy(&mut attr);
    if rc != 0 || addr.is_null() {
      return None;
    }
    let lo = addr as usize;
    Some(StackBounds { lo, hi: lo + size })
  }
}

#[cfg(target_os = "macos")]
pub fn thread_stack_bounds() -> Option<StackBounds> {
  unsafe {
    let me = libc::pthread_self();
    // Darwin hands out the *top* of the stack.
    let hi = libc::pthread_get_stackaddr_np(me) as usize;
    let size = libc::pthread_get_stacksize_np(me);
    if hi == 0 || size == 0 {
      return None;
    }
    Some(StackBounds { lo: hi - size, hi })
  }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn thread_stack_bounds() -> Option<StackBounds> {
  None
}
