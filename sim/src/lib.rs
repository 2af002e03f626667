//! A `std`-backed mock [`Port`] for `mg-core`'s test suite, plus a tiny
//! single-threaded interrupt-simulation driver.
//!
//! Grounded directly on the original project's own unit-test porting
//! layer (`tests/mg_port.h` + `tests/mocks.h`): `vect_to_prio` is the
//! identity function, critical sections are no-ops (tests run on one
//! thread), and posting priority 1 re-enters `context_schedule`
//! synchronously to simulate a true interrupt preempting the currently
//! running priority-0 actor — the same trick the original mocks use:
//! "the porting layer has to be designed in a way when activation of actor
//! with priority 1 causes immediate preemption."
//!
//! Two `Port`s are provided: [`HostPort`], a uniprocessor mock matching
//! the original's test geometry (`MG_PRIO_MAX = 2`, `MG_TIMERQ_MAX = 10`),
//! and [`HostPortSmp`], a two-core mock for the cross-core fan-out
//! scenario in spec.md §8. Tests must run single-threaded
//! (`cargo test -- --test-threads=1`): both mocks hold process-wide
//! `static` state, matching the one-registry-per-program model spec.md §9
//! calls for.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use mg_core::scheduler::Board;
use mg_core::{Registry, context_schedule};
use mg_port::{CpuId, Port, Priority, Vector};

/// Uniprocessor mock port, one-to-one with `tests/mg_port.h` /
/// `tests/mocks.h` in the original project.
pub struct HostPort;

static PENDING: AtomicU32 = AtomicU32::new(0);
static CRIT_DEPTH: AtomicU32 = AtomicU32::new(0);
static REGISTRY: Registry<HostPort> = Registry::new();

impl Port for HostPort {
    const PRIO_MAX: usize = 2;
    const TIMERQ_MAX: usize = 10;
    const CPU_MAX: usize = 1;

    fn vect_to_prio(vect: Vector) -> Priority {
        Priority::new(vect.get() as usize)
    }

    fn interrupt_request(cpu: CpuId, vect: Vector) {
        debug_assert_eq!(cpu.get(), 0, "HostPort only ever reports CpuId(0)");
        if vect.get() == 1 {
            context_schedule::<HostPort>(vect);
        } else {
            PENDING.fetch_or(1 << vect.get(), Ordering::SeqCst);
        }
    }

    fn this_cpu() -> CpuId {
        CpuId::new(0)
    }

    unsafe fn critical_section_enter() {
        CRIT_DEPTH.fetch_add(1, Ordering::SeqCst);
    }

    unsafe fn critical_section_leave() {
        CRIT_DEPTH.fetch_sub(1, Ordering::SeqCst);
    }

    fn clz32(x: u32) -> u32 {
        x.leading_zeros()
    }

    fn wait_event() {}
    fn send_event() {}
}

impl Board for HostPort {
    fn registry() -> &'static Registry<Self> {
        &REGISTRY
    }
}

/// Drain and return every vector `HostPort` was asked to post that did not
/// immediately preempt (everything but vector 1), for a test to pump by
/// calling `mg_core::context_schedule` itself.
pub fn take_pending() -> Vec<Vector> {
    let bits = PENDING.swap(0, Ordering::SeqCst);
    (0u32..32).filter(|b| bits & (1 << b) != 0).map(Vector::new).collect()
}

/// Reset `HostPort`'s process-wide mock state. Call at the start of every
/// test that touches it — there is exactly one registry for the whole
/// process, shared by every test in the binary.
pub fn reset() {
    PENDING.store(0, Ordering::SeqCst);
    CRIT_DEPTH.store(0, Ordering::SeqCst);
}

/// Two-core mock port for the cross-core fan-out scenario (spec.md §8,
/// scenario 6). There is no real second thread of execution: a test plays
/// the role of each core in turn via [`set_current_cpu`], then calls
/// `context_tick`/`context_schedule` itself to drain that core's share of
/// work, the way a single-threaded simulator steps a multi-core system.
pub struct HostPortSmp;

static SMP_PENDING: [AtomicU32; 2] = [AtomicU32::new(0), AtomicU32::new(0)];
static SMP_CRIT_DEPTH: AtomicU32 = AtomicU32::new(0);
static SMP_CURRENT_CPU: AtomicUsize = AtomicUsize::new(0);
static SMP_REGISTRY: Registry<HostPortSmp> = Registry::new();

impl Port for HostPortSmp {
    const PRIO_MAX: usize = 2;
    const TIMERQ_MAX: usize = 10;
    const CPU_MAX: usize = 2;

    fn vect_to_prio(vect: Vector) -> Priority {
        Priority::new(vect.get() as usize)
    }

    fn interrupt_request(cpu: CpuId, vect: Vector) {
        if cpu.get() == Self::this_cpu().get() && vect.get() == 1 {
            context_schedule::<HostPortSmp>(vect);
        } else {
            SMP_PENDING[cpu.get()].fetch_or(1 << vect.get(), Ordering::SeqCst);
        }
    }

    fn this_cpu() -> CpuId {
        CpuId::new(SMP_CURRENT_CPU.load(Ordering::SeqCst))
    }

    unsafe fn critical_section_enter() {
        SMP_CRIT_DEPTH.fetch_add(1, Ordering::SeqCst);
    }

    unsafe fn critical_section_leave() {
        SMP_CRIT_DEPTH.fetch_sub(1, Ordering::SeqCst);
    }

    fn clz32(x: u32) -> u32 {
        x.leading_zeros()
    }

    fn wait_event() {}
    fn send_event() {}
}

impl Board for HostPortSmp {
    fn registry() -> &'static Registry<Self> {
        &SMP_REGISTRY
    }
}

/// Make `this_cpu()` report `cpu` for the calling (single) test thread,
/// simulating "now we are core `cpu`".
pub fn set_current_cpu(cpu: usize) {
    SMP_CURRENT_CPU.store(cpu, Ordering::SeqCst);
}

/// Drain and return the pending, not-yet-dispatched vectors posted to
/// `cpu`.
pub fn take_pending_smp(cpu: usize) -> Vec<Vector> {
    let bits = SMP_PENDING[cpu].swap(0, Ordering::SeqCst);
    (0u32..32).filter(|b| bits & (1 << b) != 0).map(Vector::new).collect()
}

pub fn reset_smp() {
    SMP_PENDING[0].store(0, Ordering::SeqCst);
    SMP_PENDING[1].store(0, Ordering::SeqCst);
    SMP_CRIT_DEPTH.store(0, Ordering::SeqCst);
    SMP_CURRENT_CPU.store(0, Ordering::SeqCst);
}
