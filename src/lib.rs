//! Stackful cooperative microthreads.
//!
//! A [`UThread`] is a resumable computation with its own private call stack.
//! It runs only when some OS thread (a *carrier*) explicitly starts or
//! resumes it, and it keeps that carrier blocked until it hands control back
//! with [`suspend`] or [`exit`]. There is no preemption; a microthread and
//! its carrier never run at the same time. Every hand-off carries a
//! [`Payload`]: nothing, a value, or a fault for the far side to deal with.
//!
//! ```no_run
//! use uthread::{UThread, Payload, suspend};
//!
//! let ut = UThread::new()?;
//! let greeting = ut.start(|| {
//!   let reply = suspend(Payload::value("hello")).unwrap();
//!   println!("got {:?}", reply.downcast::<&str>());
//! })?;
//! assert_eq!(greeting.downcast::<&str>().unwrap(), "hello");
//! ut.resume(Payload::value("world"))?;
//! # Ok::<(), uthread::Error>(())
//! ```
//!
//! By default each microthread is backed by a dedicated parked OS thread,
//! which is portable and lets the borrow checker see the whole story. The
//! `asm` feature adds an in-thread stack-switching backend for x86-64 unix,
//! where suspend/resume is a register swap instead of a scheduler round trip.
//!
//! Suspended stacks are invisible to tracing garbage collectors unless told
//! otherwise; plug in a [`RootScanner`] to be notified while each stack
//! region is live. See the `carrier` module for the backend seam.

pub mod carrier;
mod channel;
mod error;
mod registry;
mod scanner;
mod uthread;

pub use channel::{Fault, PanicFault, Payload};
pub use error::{Error, Result};
pub use registry::CurrentRegistry;
pub use scanner::{NoopScanner, RootScanner};
pub use uthread::{
  current, exit, stack_remaining, suspend, Activity, Backend, UThread,
  UThreadBuilder,
};
