//! Root-scanner cooperation.
//!
//! A suspended microthread's stack holds live references that are not
//! reachable from any carrier thread's own stack, so a tracing collector
//! must be told where those stacks live. The scanner is handed the bounds of
//! every allocated-but-not-disposed stack and must stop seeing a region
//! promptly once its microthread exits or is disposed, before the memory is
//! returned.

use crate::carrier::StackBounds;

/// Collector-side view of microthread stacks.
///
/// `add_region` is called once per microthread when its stack is allocated;
/// `remove_region` when the microthread exits or is disposed, whichever
/// comes first. Calls may arrive from any thread.
pub trait RootScanner: Send + Sync {
  fn add_region(&self, region: StackBounds);
  fn remove_region(&self, region: StackBounds);
}

/// Default scanner for programs without a tracing collector.
#[derive(Debug, Default)]
pub struct NoopScanner;

impl RootScanner for NoopScanner {
  fn add_region(&self, _region: StackBounds) {}
  fn remove_region(&self, _region: StackBounds) {}
}
