use std::io;

use thiserror::Error;

use crate::uthread::Activity;

/// Everything that can go wrong *before* a switch happens.
///
/// Precondition violations are detected locally and reported without
/// transferring control, so they can never corrupt either stack. Faults that
/// travel *across* a switch are not errors at this level; they arrive as
/// [`Payload::Fault`](crate::Payload::Fault) values for the receiver to
/// re-raise or ignore.
#[derive(Debug, Error)]
pub enum Error {
  /// Stack allocation (or carrier thread spawn) failed at construction.
  #[error("stack allocation failed")]
  Resource(#[source] io::Error),

  /// The stack-size hint is below the floor of three pages.
  #[error("stack size {requested} below minimum {minimum}")]
  StackTooSmall { requested: usize, minimum: usize },

  /// This carrier thread already hosts a running microthread; start/resume
  /// would nest. Checked before any switch.
  #[error("carrier thread already hosts a running microthread")]
  AlreadyActive,

  /// Suspend or exit called with no running microthread on this thread.
  #[error("no microthread is running on this carrier thread")]
  NotActive,

  /// The microthread has been disposed.
  #[error("microthread has been disposed")]
  Destructed,

  /// Start requires an unstarted microthread. Exited microthreads do not
  /// restart; construct a fresh one.
  #[error("cannot start a microthread that is {0:?}")]
  NotUnstarted(Activity),

  /// Resume requires a suspended microthread.
  #[error("cannot resume a microthread that is {0:?}")]
  NotSuspended(Activity),

  /// Dispose attempted while the microthread is running.
  #[error("microthread is running; dispose after it suspends or exits")]
  Busy,
}

pub type Result<T> = std::result::Result<T, Error>;
