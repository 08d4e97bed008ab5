//! Portable stand-ins for platforms without stack introspection.

use super::StackBounds;

pub fn page_size() -> usize {
  4096
}

pub fn round_to_page(size: usize, page: usize) -> usize {
  (size + page - 1) & !(page - 1)
}

pub fn thread_stack_bounds() -> Option<StackBounds> {
  None
}
