//! The interrupt-controller / board abstraction that the core consumes.
//!
//! An embedder implements `Port` once per target (NVIC on a Cortex-M,
//! PLIC on a RISC-V part, or a `std`-backed mock for host tests — see
//! `mg-sim`) and every other crate in this workspace is generic over it.
//! None of the methods here touch board bring-up, clocks, or GPIO; those
//! stay the embedder's problem, per the scope note in spec.md §1.

use crate::types::{CpuId, Priority, Vector};

/// Everything the dispatch engine needs from the surrounding hardware.
///
/// Implementations are expected to be zero-sized marker types (`impl Port
/// for MyBoard {}` on a unit struct) — every method takes `&self`-free
/// associated-function form precisely so that a `Port` can be threaded
/// through the core purely as a type parameter, with no runtime cost and
/// no `dyn` indirection in an ISR.
pub trait Port {
    /// Number of priority levels (`MG_PRIO_MAX`, spec.md §6). Bounds every
    /// per-CPU run-queue array.
    const PRIO_MAX: usize;

    /// Number of timer wheel buckets (`MG_TIMERQ_MAX`, spec.md §6).
    const TIMERQ_MAX: usize;

    /// Number of cores this board runs the kernel on (`MG_CPU_MAX`, spec.md
    /// §6). `1` for a uniprocessor port.
    const CPU_MAX: usize;

    /// Map a hardware vector to its logical priority. Monotone within a
    /// platform's priority bits.
    fn vect_to_prio(vect: Vector) -> Priority;

    /// Post `vect` as pending on `cpu`. Implementations use a local
    /// self-pend when `cpu == Self::this_cpu()` and the cross-core doorbell
    /// scheme (§4.5) otherwise.
    fn interrupt_request(cpu: CpuId, vect: Vector);

    /// Identify the core executing this call.
    fn this_cpu() -> CpuId;

    /// Disable interrupts on this core. Must nest safely: a second
    /// `critical_section_enter` while already inside one must not
    /// re-enable interrupts until the matching number of `leave` calls.
    ///
    /// # Safety
    /// Caller must pair every `enter` with exactly one `leave`, in LIFO
    /// order, on the same core.
    unsafe fn critical_section_enter();

    /// Re-enable interrupts if this was the outermost critical section.
    ///
    /// # Safety
    /// Must only be called to match a prior `critical_section_enter` on the
    /// same core.
    unsafe fn critical_section_leave();

    /// Count leading zeros of a 32-bit value. `x` is never zero when this
    /// is called.
    fn clz32(x: u32) -> u32;

    /// Park the calling core while spinning on a contended lock, to save
    /// power between polls. SMP only; uniprocessor ports may no-op.
    fn wait_event();

    /// Broadcast a wake to every core parked in `wait_event`, e.g. after
    /// releasing a lock they may be spinning on. SMP only; uniprocessor
    /// ports may no-op.
    fn send_event();
}
