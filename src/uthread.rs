//! The microthread state machine and switching protocol.
//!
//! A [`UThread`] owns a private stack (through a
//! [`StackCarrier`](crate::carrier::StackCarrier)) and moves through
//! `Unstarted → Running → Suspended ⇄ Running → Exited`. Control transfer is
//! always a rendez-vous between exactly one outside caller (blocked in
//! [`start`](UThread::start)/[`resume`](UThread::resume)) and the code
//! running inside (which hands back via [`suspend`]/[`exit`]). Every
//! hand-off carries one [`Payload`] in the direction of transfer.
//!
//! All precondition checks happen before any switch, so a refused operation
//! never disturbs either stack.

use std::convert::Infallible;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::carrier::{
  self, thread::ThreadCarrier, EntryBody, StackBounds, StackCarrier,
  StackRetired, Unmount,
};
use crate::channel::{PanicFault, Payload};
use crate::error::{Error, Result};
use crate::registry::{self, CurrentRegistry, Mounted};
use crate::scanner::{NoopScanner, RootScanner};

const UNSTARTED: u8 = 0;
const RUNNING: u8 = 1;
const SUSPENDED: u8 = 2;
const EXITED: u8 = 3;

/// What a microthread is up to, as the legality rules see it.
///
/// `NotStarted` covers fresh, exited and disposed microthreads alike: none
/// of them may be resumed or suspended. Only a fresh one may be started; an
/// exited or disposed one reports `NotStarted` but refuses `start` too.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Activity {
  NotStarted,
  Suspended,
  Running,
}

fn activity_of(state: u8) -> Activity {
  match state {
    RUNNING   => Activity::Running,
    SUSPENDED => Activity::Suspended,
    _         => Activity::NotStarted,
  }
}

/// Which stack carrier backs a microthread.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Backend {
  /// Dedicated OS thread per microthread, strict rendez-vous hand-off.
  /// Portable; the default.
  #[default]
  Thread,
  /// In-thread stack-pointer swap over an mmap'd guard-page stack.
  #[cfg(all(feature = "asm", unix, target_arch = "x86_64"))]
  Native,
}

pub struct UThreadBuilder {
  name: String,
  stack_size: Option<usize>,
  scanner: Arc<dyn RootScanner>,
  backend: Backend,
}

impl UThreadBuilder {
  fn new() -> UThreadBuilder {
    UThreadBuilder {
      name: String::new(),
      stack_size: None,
      scanner: Arc::new(NoopScanner),
      backend: Backend::default(),
    }
  }

  /// Diagnostic label; immutable after construction.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Stack size hint in bytes, rounded up to whole pages. Zero or unset
  /// means "whatever the calling thread's stack size is", with a 1 MiB
  /// fallback when that cannot be discovered.
  pub fn stack_size(mut self, bytes: usize) -> Self {
    self.stack_size = if bytes == 0 { None } else { Some(bytes) };
    self
  }

  /// Root scanner to notify about this microthread's stack region.
  pub fn scanner(mut self, scanner: Arc<dyn RootScanner>) -> Self {
    self.scanner = scanner;
    self
  }

  pub fn backend(mut self, backend: Backend) -> Self {
    self.backend = backend;
    self
  }

  /// Allocates the private stack. This is where `Resource` and
  /// `StackTooSmall` surface.
  pub fn build(self) -> Result<UThread> {
    let page = carrier::page_size();
    let hint = self.stack_size.unwrap_or_else(|| {
      carrier::thread_stack_bounds()
        .map(|b| b.size())
        .unwrap_or(carrier::DEFAULT_STACK_SIZE)
    });
    let minimum = carrier::MIN_STACK_PAGES * page;
    let size = carrier::round_to_page(hint, page);
    if size < minimum {
      return Err(Error::StackTooSmall { requested: hint, minimum });
    }

    let stack: Arc<dyn StackCarrier> = match self.backend {
      Backend::Thread => {
        Arc::new(ThreadCarrier::new(size, &self.name).map_err(Error::Resource)?)
      }
      #[cfg(all(feature = "asm", unix, target_arch = "x86_64"))]
      Backend::Native => {
        Arc::new(carrier::native::NativeCarrier::new(size).map_err(Error::Resource)?)
      }
    };

    let bounds = stack.bounds();
    let inner = Arc::new(Inner {
      name: self.name,
      stack_size: size,
      state: AtomicU8::new(UNSTARTED),
      disposed: AtomicBool::new(false),
      carrier: Mutex::new(Some(stack)),
      scanner: self.scanner,
      registered: AtomicBool::new(false),
    });
    if !bounds.is_unknown() {
      inner.scanner.add_region(bounds);
      inner.registered.store(true, Ordering::Release);
    }
    Ok(UThread { inner })
  }
}

struct Inner {
  name: String,
  stack_size: usize,
  state: AtomicU8,
  disposed: AtomicBool,
  /// Taken on dispose; the lock serializes dispose against the state CAS in
  /// start/resume so a carrier is never retired under a switch.
  carrier: Mutex<Option<Arc<dyn StackCarrier>>>,
  scanner: Arc<dyn RootScanner>,
  /// Whether `scanner` currently knows our stack region.
  registered: AtomicBool,
}

/// A stackful cooperative microthread.
///
/// Handles are cheap clones of one shared microthread; equality is identity.
/// A suspended microthread may be handed to a different carrier thread and
/// resumed there, but never driven from two threads at once: the state
/// machine rejects the loser rather than queueing it.
#[derive(Clone)]
pub struct UThread {
  inner: Arc<Inner>,
}

impl PartialEq for UThread {
  fn eq(&self, other: &UThread) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl Eq for UThread {}

impl fmt::Debug for UThread {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("UThread")
      .field("name", &self.inner.name)
      .field("active", &self.active())
      .finish()
  }
}

impl UThread {
  /// A microthread with default stack size, name and backend.
  pub fn new() -> Result<UThread> {
    UThread::builder().build()
  }

  pub fn builder() -> UThreadBuilder {
    UThreadBuilder::new()
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// The resolved (page-rounded) stack size.
  pub fn stack_size(&self) -> usize {
    self.inner.stack_size
  }

  /// Pure state query; callable from any thread, including from inside the
  /// microthread itself. Reports `NotStarted` after disposal and after exit.
  pub fn active(&self) -> Activity {
    if self.inner.disposed.load(Ordering::Acquire) {
      return Activity::NotStarted;
    }
    activity_of(self.inner.state.load(Ordering::Acquire))
  }

  /// Runs `entry` on the private stack, blocking this carrier thread until
  /// the microthread first suspends or exits. Returns the payload the far
  /// side produced; a normal return of `entry` yields [`Payload::None`].
  pub fn start<F>(&self, entry: F) -> Result<Payload>
  where F: FnOnce() + Send + 'static {
    registry::with_ambient(|reg| self.start_on(reg, entry))
  }

  /// Delivers `payload` as the return value of the paused [`suspend`] call
  /// and blocks until the next suspend or exit.
  pub fn resume(&self, payload: Payload) -> Result<Payload> {
    registry::with_ambient(|reg| self.resume_on(reg, payload))
  }

  pub(crate) fn start_on<F>(&self, reg: &CurrentRegistry, entry: F) -> Result<Payload>
  where F: FnOnce() + Send + 'static {
    let stack = self.claim(reg, UNSTARTED, Error::NotUnstarted)?;
    let body = entry_body(self.clone(), entry);
    let unmount = stack.mount(body, Payload::None);
    let payload = self.unmounted(unmount, &stack);
    reg.release();
    Ok(payload)
  }

  pub(crate) fn resume_on(&self, reg: &CurrentRegistry, payload: Payload) -> Result<Payload> {
    let stack = self.claim(reg, SUSPENDED, Error::NotSuspended)?;
    let unmount = stack.switch_to(payload);
    let payload = self.unmounted(unmount, &stack);
    reg.release();
    Ok(payload)
  }

  /// Shared precondition ladder for start/resume: not disposed, slot free,
  /// state as expected. Checked in that order, all local, no switch. On
  /// success the state is already `Running` and the registry slot is ours.
  fn claim(
    &self,
    reg: &CurrentRegistry,
    from: u8,
    state_err: fn(Activity) -> Error,
  ) -> Result<Arc<dyn StackCarrier>> {
    let guard = self.inner.carrier.lock().unwrap();
    let Some(stack) = guard.as_ref() else {
      return Err(Error::Destructed);
    };
    if reg.mounted().is_some() {
      return Err(Error::AlreadyActive);
    }
    self.inner.state
      .compare_exchange(from, RUNNING, Ordering::AcqRel, Ordering::Acquire)
      .map_err(|found| state_err(activity_of(found)))?;
    let stack = stack.clone();
    drop(guard);
    if let Err(e) = reg.occupy(Mounted {
      thread: self.clone(),
      switch: stack.switch_point(),
    }) {
      // Unreachable in practice: the slot was empty two lines up and only
      // this thread writes it. Roll the state back rather than trust that.
      self.inner.state.store(from, Ordering::Release);
      return Err(e);
    }
    Ok(stack)
  }

  fn unmounted(&self, unmount: Unmount, stack: &Arc<dyn StackCarrier>) -> Payload {
    match unmount {
      Unmount::Suspended(payload) => {
        self.inner.state.store(SUSPENDED, Ordering::Release);
        payload
      }
      Unmount::Exited(payload) => {
        self.inner.state.store(EXITED, Ordering::Release);
        // The stack is dead; release it eagerly and get the scanner off it
        // before the memory goes away.
        self.drop_region(stack.bounds());
        stack.retire();
        payload
      }
    }
  }

  fn drop_region(&self, bounds: StackBounds) {
    if self.inner.registered.swap(false, Ordering::AcqRel) {
      self.inner.scanner.remove_region(bounds);
    }
  }

  /// Releases the stack region. Legal from any state except `Running`;
  /// idempotent. After disposal every operation reports `Destructed` and
  /// `active()` reports `NotStarted`.
  pub fn dispose(&self) -> Result<()> {
    let mut guard = self.inner.carrier.lock().unwrap();
    if guard.is_none() {
      return Ok(());
    }
    if self.inner.state.load(Ordering::Acquire) == RUNNING {
      return Err(Error::Busy);
    }
    let Some(stack) = guard.take() else {
      return Ok(());
    };
    self.inner.disposed.store(true, Ordering::Release);
    drop(guard);
    self.drop_region(stack.bounds());
    stack.retire();
    Ok(())
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    // Safety net only; dispose() is the primary release path. A Running
    // microthread cannot reach here (start/resume hold a handle).
    if let Ok(slot) = self.carrier.get_mut() {
      if let Some(stack) = slot.take() {
        if self.state.load(Ordering::Acquire) != RUNNING {
          if self.registered.swap(false, Ordering::AcqRel) {
            self.scanner.remove_region(stack.bounds());
          }
          stack.retire();
        }
      }
    }
  }
}

/// Wraps the user entry for the carrier: claims the host-side registry
/// slot, converts panics to fault payloads, and produces the completion
/// payload.
fn entry_body<F>(thread: UThread, entry: F) -> EntryBody
where F: FnOnce() + Send + 'static {
  Box::new(move |switch, _payload| {
    registry::with_ambient(|reg| reg.mount_over(Mounted { thread, switch }));
    let outcome = catch_unwind(AssertUnwindSafe(entry));
    registry::with_ambient(|reg| {
      reg.release();
    });
    match outcome {
      Ok(()) => Payload::None,
      Err(cause) if cause.is::<StackRetired>() => resume_unwind(cause),
      Err(cause) => Payload::fault(PanicFault::from_panic(cause)),
    }
  })
}

/// The microthread mounted on the calling carrier thread, if any.
pub fn current() -> Option<UThread> {
  registry::with_ambient(|reg| reg.current())
}

/// Gives up the CPU: switches back to whichever call frame is blocked in
/// `start`/`resume`, carrying `payload` as its return value. When somebody
/// resumes this microthread, `suspend` returns that resume's payload, with
/// every local variable and call frame exactly as left.
///
/// Callable only from inside a running microthread.
pub fn suspend(payload: Payload) -> Result<Payload> {
  let mounted =
    registry::with_ambient(|reg| reg.mounted()).ok_or(Error::NotActive)?;
  Ok(mounted.switch.switch_back(Unmount::Suspended(payload)))
}

/// Gives up the CPU forever: like [`suspend`], but the microthread becomes
/// `Exited` and can never run again. Never returns on success.
pub fn exit(payload: Payload) -> Result<Infallible> {
  let mounted =
    registry::with_ambient(|reg| reg.mounted()).ok_or(Error::NotActive)?;
  let _ = mounted.switch.switch_back(Unmount::Exited(payload));
  unreachable!("exited microthread was resumed");
}

/// Headroom on the currently mounted stack: the microthread's if one is
/// running here, otherwise this carrier thread's own. Zero when the bounds
/// cannot be discovered. Cooperative code polls this to detect
/// near-exhaustion before it corrupts adjacent memory.
pub fn stack_remaining() -> usize {
  if let Some(mounted) = registry::with_ambient(|reg| reg.mounted()) {
    return mounted.switch.remaining();
  }
  let marker = 0u8;
  match carrier::thread_stack_bounds() {
    Some(bounds) => bounds.remaining_at(&marker as *const u8 as usize),
    None => 0,
  }
}
