//! The x86-64 stack switch: four instructions each way, plus a trampoline
//! that terminates the new call chain.
//!
//! ABI notes that matter here:
//!
//! * `rsp` ought to be 16-byte aligned at every call; our stacks are
//!   page-aligned so the trampoline frame keeps that.
//! * There is a 128-byte red zone below `rsp` that leaf code may use; we
//!   spill the resume state there rather than moving `rsp` first.

use core::arch::asm;
use core::mem::ManuallyDrop;

/// The function the trampoline lands in. Receives the paused caller stack
/// and a pointer to the closure to bootstrap.
pub type InitFn = unsafe extern "C" fn(*mut usize, *const u8);

/// Result of resuming a paused stack: where that stack is now paused, and
/// the word it handed us.
#[repr(C)]
pub struct Switch {
  pub stack: *mut usize,
  pub arg:   usize,
}

/// Moves `closure` onto the new stack and calls it there.
///
/// The closure receives the paused calling stack (to switch back to) plus
/// the first word handed over by the `switch` that resumes it.
///
/// # Safety
///
/// * `stack` must be the end address of a properly aligned stack region.
/// * The region must carry a guard page, or the closure must provably never
///   overflow it (red zone and signal space included).
/// * The closure must never return and never let an unwind escape; it leaves
///   only by switching away.
pub unsafe fn link_closure<F>(stack: *mut usize, closure: F) -> *mut usize
where F: FnOnce(*mut usize, usize) {
  let f = ManuallyDrop::new(closure);
  let f = (&f as *const ManuallyDrop<F>).cast::<u8>();
  link_detached(bootstrap_closure::<F>, f as usize, stack)
}

unsafe extern "C" fn bootstrap_closure<F>(stack: *mut usize, closure: *const u8)
where F: FnOnce(*mut usize, usize) {
  // Move the closure home before the caller's frame can go away.
  let f = closure.cast::<F>().read();
  let resumed = switch(stack, 0);
  f(resumed.stack, resumed.arg);
}

/// Starts a new call chain on `stack`, entering `fun` via the trampoline.
///
/// # Safety
///
/// * `stack` must be a properly aligned end-of-region pointer.
/// * The region must have a guard page or never overflow.
#[inline(always)]
pub unsafe extern "C" fn link_detached(
  fun: InitFn,           // what the trampoline will call
  arg: usize,            // opaque word for `fun` (a closure pointer here)
  mut stack: *mut usize, // the end of the new stack region
) -> *mut usize {
  asm!(
    // Spill resume state into the red zone so this side can be resumed:
    // return address at rsp-8, frame pointer at -16, rbx (which llvm
    // reserves for its own ends) at -24.
    "lea rax, [rip + 2f]",
    "mov [rsp - 8],  rax",
    "mov [rsp - 16], rbp",
    "mov [rsp - 24], rbx",

    // Seed the new stack: trampoline address on top, fun just below where
    // the trampoline's `call [rsp]` will find it.
    "mov [rdx - 8],  rcx",
    "mov [rdx - 16], rdi",

    // Arguments for fun: rdi = our (paused) stack pointer, rsi already
    // carries arg untouched.
    "mov rdi, rsp",

    // Jump onto the new stack. Zeroed rbp marks the top of the call chain.
    "xor rbx, rbx",
    "xor rbp, rbp",
    "lea rsp, [rdx - 16]",
    "jmp rcx",

    // A later switch() lands here with rdx = the far side's paused stack
    // pointer and rsi = the word it sent.
    "2:",
    inout("rdi") fun => _,
    inout("rsi") arg => _,
    inout("rdx") stack,
    inout("rcx") uthread_trampoline => _,
    clobber_abi("C")
  );
  stack
}

/// Pauses the current stack and resumes the one paused at `stack`, handing
/// it `arg`. Returns when something switches back here.
///
/// # Safety
///
/// `stack` must hold the spilled state a previous `link_detached`/`switch`
/// left behind; anything else is undefined.
#[inline(always)]
pub unsafe extern "C" fn switch(mut stack: *mut usize, mut arg: usize) -> Switch {
  asm!(
    // Spill our resume state, mirroring link_detached.
    "lea rax, [rip + 2f]",
    "mov [rsp - 8],  rax",
    "mov [rsp - 16], rbp",
    "mov [rsp - 24], rbx",

    // Swap stacks: advertise ours in rdx, adopt theirs.
    "mov rdx, rsp",
    "mov rsp, rdi",

    // Restore their spilled state and resume them.
    "mov rbx, [rdi - 24]",
    "mov rbp, [rdi - 16]",
    "mov rax, [rdi - 8]",
    "jmp rax",

    // Resumption point: rdx = the other side's freshly paused stack
    // pointer, rsi = the word it sent.
    "2:",
    inout("rdi") stack => _,
    inout("rsi") arg,
    out("rdx") stack,
    out("rcx") _,
    out("rax") _,
    clobber_abi("C")
  );
  Switch { stack, arg }
}

// The trampoline becomes the first frame of the new call chain: called with
// an artificial frame, it calls the init function in a fresh frame and
// expects never to see it return. The cfi directives stop unwinders and
// debuggers walking past it.
extern "C" {
  fn uthread_trampoline();
}

core::arch::global_asm!(
  ".global uthread_trampoline",
  ".align 16",
  "uthread_trampoline:",
  ".cfi_startproc simple",
  ".cfi_undefined rip",
  ".cfi_undefined rsp",
  "call [rsp]",
  ".cfi_endproc"
);
