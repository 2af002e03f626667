//! Per-CPU dispatch: run queues, the timer wheel, and the two entry points
//! an embedder's ISRs call into, `context_schedule` and `context_tick`
//! (spec.md §4.5, §6).
//!
//! Rust has no generic `static`s — a `static FOO: T<P> = ...;` cannot
//! depend on a function's generic `P`. The process-wide scheduler state
//! spec.md §9 calls `g_mg_context` therefore has to be *owned* by the
//! embedder (one concrete `Port` per program) and merely *reached through*
//! this crate. [`Board`] is that seam: the embedder defines one
//! `static REGISTRY: Registry<MyPort> = Registry::new();` and implements
//! `Board::registry()` to hand back a reference to it. Every function here
//! is generic over `P: Board` and calls `P::registry()` to find its state,
//! exactly the way the teacher's `PerCpuData` is reached through a GS-base
//! pointer rather than a generic parameter.

use core::ptr::NonNull;

use mg_port::{Lock, Port, klog_trace};

use crate::actor::ActorCore;
use crate::list::Ring;

/// Extends [`Port`] with access to this program's single scheduler
/// registry. Implemented once, alongside `Port`, by the embedder.
pub trait Board: Port + Sized {
    fn registry() -> &'static Registry<Self>;
}

/// One core's scheduling state: `PRIO_MAX` run queues, `TIMERQ_MAX` timer
/// buckets, and a monotonic tick counter, all behind one lock (spec.md §3's
/// per-CPU-context entity).
pub struct CpuContext<P: Port> {
    lock: Lock<P, Inner<P>>,
}

struct Inner<P: Port> {
    run_queues: RunQueues<P>,
    timer_buckets: TimerBuckets<P>,
    ticks: u32,
}

// `P::PRIO_MAX`/`P::TIMERQ_MAX` are per-board constants; wrapping the
// const-generic arrays in their own newtypes keeps `Inner`'s definition
// readable and gives the timer wheel (crate::timer) a named type to take
// as a parameter instead of a bare array.
pub(crate) struct RunQueues<P: Port>(pub(crate) [Ring<ActorCore>; P::PRIO_MAX]);
pub(crate) struct TimerBuckets<P: Port>(pub(crate) [Ring<ActorCore>; P::TIMERQ_MAX]);

impl<P: Port> CpuContext<P> {
    const fn new() -> Self {
        Self {
            lock: Lock::new(Inner {
                run_queues: RunQueues([const { Ring::new() }; P::PRIO_MAX]),
                timer_buckets: TimerBuckets([const { Ring::new() }; P::TIMERQ_MAX]),
                ticks: 0,
            }),
        }
    }
}

/// The process-wide scheduler registry: one [`CpuContext`] per core. The
/// embedder owns the single instance of this type (see [`Board`]); nothing
/// in this crate allocates one itself.
pub struct Registry<P: Port> {
    cpus: [CpuContext<P>; P::CPU_MAX],
}

impl<P: Port> Registry<P> {
    pub const fn new() -> Self {
        Self {
            cpus: [const { CpuContext::new() }; P::CPU_MAX],
        }
    }
}

impl<P: Port> Default for Registry<P> {
    fn default() -> Self {
        Self::new()
    }
}

fn context<P: Board>(cpu: mg_port::CpuId) -> &'static CpuContext<P> {
    &P::registry().cpus[cpu.get()]
}

/// Seed a CPU's tick counter directly. Test-only: there is no production
/// need to set `ticks` to an arbitrary value, but spec.md §8's wraparound
/// scenario (invariant 5) starts from `ticks = 2^32 - 1`, which no amount
/// of real `context_tick` calls can reach in a test run.
#[cfg(test)]
pub(crate) fn set_ticks_for_test<P: Board>(cpu: mg_port::CpuId, ticks: u32) {
    context::<P>(cpu).lock.lock().ticks = ticks;
}

/// Place `actor` at the tail of its assigned priority's run queue on its
/// assigned CPU, then post the interrupt for its vector — spec.md §4.5's
/// "activation." May cross cores: the run queue append happens under the
/// *target* CPU's lock regardless of which CPU calls `activate`; only the
/// final `interrupt_request` needs the target's cooperation, and `Port`
/// impls are expected to fold that into a cross-core doorbell when
/// `cpu != Self::this_cpu()` (spec.md §4.6).
pub(crate) fn activate<P: Board>(actor: &ActorCore) {
    let cpu = actor.cpu();
    let ctx = context::<P>(cpu);
    {
        let mut inner = ctx.lock.lock();
        let prio = actor.priority().get();
        debug_assert!(prio < P::PRIO_MAX, "actor priority out of range");
        // SAFETY: `actor` is detached here — either this is its first
        // activation (never linked before) or it was just unlinked from a
        // queue/timer bucket/run queue by its caller.
        unsafe { inner.run_queues.0[prio].append(NonNull::from(actor)) };
    }
    klog_trace!(
        "activate: cpu={} vect={} prio={}",
        cpu.get(),
        actor.vect().get(),
        actor.priority().get()
    );
    P::interrupt_request(cpu, actor.vect());
}

/// `sleep_for`, spec.md §4.5: park `actor` in the timer wheel bucket for
/// `delay` ticks out from the current tick on its own CPU.
pub(crate) fn sleep<P: Board>(actor: &ActorCore, delay: u32) {
    debug_assert!(delay > 0, "zero-delay sleeps are a yield, handled by activate");
    let ctx = context::<P>(actor.cpu());
    let mut inner = ctx.lock.lock();
    let now = inner.ticks;
    let deadline = now.wrapping_add(delay);
    let bucket = crate::timer::msb_diff::<P>(now, deadline);
    // SAFETY: `actor` is detached (just suspended by its own callback).
    unsafe { inner.timer_buckets.0[bucket].append(NonNull::from(actor)) };
    drop(inner);
    klog_trace!("sleep: cpu={} delay={} deadline={} bucket={}", actor.cpu().get(), delay, deadline, bucket);
}

/// `context_schedule(vect)`, spec.md §4.5 and §6: called from the ISR for
/// `vect`. Drains that priority's run queue on the current CPU to empty,
/// running each actor to completion outside the lock.
pub fn context_schedule<P: Board>(vect: mg_port::Vector) {
    let prio = P::vect_to_prio(vect);
    debug_assert!(prio.get() < P::PRIO_MAX, "vect_to_prio returned an out-of-range priority");
    let ctx = context::<P>(P::this_cpu());

    loop {
        let next = {
            let mut inner = ctx.lock.lock();
            inner.run_queues.0[prio.get()].pop_front()
        };
        let Some(core) = next else { break };
        // SAFETY: `core` was just unlinked from the run queue we own, and
        // dispatches into the concrete `Actor<M, P>` that embeds it.
        unsafe { ActorCore::invoke(core) };
    }
}

/// `context_tick()`, spec.md §4.4 and §6: called from a periodic tick
/// source on each CPU. Advances that CPU's `ticks` by one and walks the
/// single bucket whose residents might have become due.
pub fn context_tick<P: Board>() {
    let ctx = context::<P>(P::this_cpu());

    let (new_ticks, bucket_index, stop_after) = {
        let mut inner = ctx.lock.lock();
        let old = inner.ticks;
        let new = old.wrapping_add(1);
        inner.ticks = new;
        let bucket_index = crate::timer::msb_diff::<P>(old, new);
        let stop_after = inner.timer_buckets.0[bucket_index].last();
        (new, bucket_index, stop_after)
    };

    let Some(stop_after) = stop_after else {
        return;
    };

    loop {
        let node = {
            let mut inner = ctx.lock.lock();
            let Some(node) = inner.timer_buckets.0[bucket_index].pop_front() else {
                break;
            };
            node
        };
        let reached_stop = node == stop_after;

        // SAFETY: `node` was just unlinked from the bucket this CPU owns.
        let core = unsafe { node.as_ref() };
        if core.timeout() == new_ticks {
            core.set_timeout(0);
            activate::<P>(core);
        } else {
            let mut inner = ctx.lock.lock();
            let next_bucket = crate::timer::msb_diff::<P>(new_ticks, core.timeout());
            // SAFETY: `node` is still detached (just unlinked above).
            unsafe { inner.timer_buckets.0[next_bucket].append(node) };
        }

        if reached_stop {
            break;
        }
    }
}

/// End-to-end dispatch tests against the literal scenarios of spec.md §8.
/// Per-module unit tests elsewhere cover the pieces in isolation; these
/// exercise the real `context_schedule`/`context_tick` entry points the
/// way an embedder's ISRs would.
#[cfg(test)]
mod scenario_tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use mg_port::{Port, Vector};
    use mg_sim::{HostPort, HostPortSmp};

    use crate::actor::{Actor, ActorCore, ActorOutcome};
    use crate::message::{Pool, Slot};
    use crate::queue::Queue;

    use super::{context, context_schedule, context_tick, set_ticks_for_test};

    // Scenario 2: preemption ordering. A (priority 0, vect 0) and B
    // (priority 1, vect 1) both park on the same queue, A first. Pushing
    // one message then a second must run B to completion before A: vector
    // 1 is `mg-sim`'s dedicated preemption vector, so activating B
    // re-enters `context_schedule` synchronously inside the second
    // `push`, strictly before the first push's pending vector-0 work is
    // ever pumped.
    #[test]
    fn preemption_ordering() {
        mg_sim::reset();

        static SEQ: AtomicU32 = AtomicU32::new(0);
        static A_SEEN: AtomicU32 = AtomicU32::new(0);
        static B_SEEN: AtomicU32 = AtomicU32::new(0);
        static Q: Queue<u32, HostPort> = Queue::new();
        static POOL: Pool<u32, 2, HostPort> = Pool::new();

        fn run_a(_c: &ActorCore, _m: Option<&Slot<u32>>) -> ActorOutcome<u32, HostPort> {
            A_SEEN.store(SEQ.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
            ActorOutcome::Suspend { delay: 0 }
        }
        fn run_b(_c: &ActorCore, _m: Option<&Slot<u32>>) -> ActorOutcome<u32, HostPort> {
            B_SEEN.store(SEQ.fetch_add(1, Ordering::SeqCst), Ordering::SeqCst);
            ActorOutcome::Suspend { delay: 0 }
        }

        static A: Actor<u32, HostPort> = Actor::new(run_a);
        static B: Actor<u32, HostPort> = Actor::new(run_b);

        A.init(Vector::new(0), Some(&Q));
        B.init(Vector::new(1), Some(&Q));

        let m1 = POOL.alloc(1).unwrap();
        unsafe { Q.push(m1) }; // delivered to A (parked first); A only queued, not yet run.
        assert_eq!(A_SEEN.load(Ordering::SeqCst), 0, "A must not run until pumped");

        let m2 = POOL.alloc(2).unwrap();
        unsafe { Q.push(m2) }; // delivered to B; vector 1 runs B synchronously, right here.
        assert_eq!(B_SEEN.load(Ordering::SeqCst), 0, "B runs first, with sequence number 0");

        for vect in mg_sim::take_pending() {
            context_schedule::<HostPort>(vect);
        }
        assert_eq!(A_SEEN.load(Ordering::SeqCst), 1, "A runs only after being pumped, second");
    }

    // Scenario 3: protothread-style re-await. One actor, one queue: wake,
    // increment, re-subscribe, twice.
    #[test]
    fn protothread_counts_two_wakeups_then_reparks() {
        mg_sim::reset();

        static COUNT: AtomicU32 = AtomicU32::new(0);
        static Q: Queue<u32, HostPort> = Queue::new();
        static POOL: Pool<u32, 2, HostPort> = Pool::new();

        fn on_wake(_c: &ActorCore, _m: Option<&Slot<u32>>) -> ActorOutcome<u32, HostPort> {
            COUNT.fetch_add(1, Ordering::SeqCst);
            ActorOutcome::Requeue(&Q)
        }
        static ACTOR: Actor<u32, HostPort> = Actor::new(on_wake);

        ACTOR.init(Vector::new(0), Some(&Q));
        assert_eq!(Q.len(), -1);

        unsafe { Q.push(POOL.alloc(1).unwrap()) };
        for vect in mg_sim::take_pending() {
            context_schedule::<HostPort>(vect);
        }
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
        assert_eq!(Q.len(), -1, "actor re-subscribes after waking");

        unsafe { Q.push(POOL.alloc(2).unwrap()) };
        for vect in mg_sim::take_pending() {
            context_schedule::<HostPort>(vect);
        }
        assert_eq!(COUNT.load(Ordering::SeqCst), 2);
        assert_eq!(Q.len(), -1);
    }

    // Scenario 4: delay. `sleep_for(10, self)`; 9 ticks leave it parked; the
    // 10th posts the interrupt; dispatch runs it exactly once more.
    #[test]
    fn delay_fires_on_the_tenth_tick() {
        mg_sim::reset();
        set_ticks_for_test::<HostPort>(mg_port::CpuId::new(0), 0);

        static COUNT: AtomicU32 = AtomicU32::new(0);

        fn on_timeout(_c: &ActorCore, _m: Option<&Slot<()>>) -> ActorOutcome<(), HostPort> {
            COUNT.fetch_add(1, Ordering::SeqCst);
            ActorOutcome::Suspend { delay: 10 }
        }
        static ACTOR: Actor<(), HostPort> = Actor::new(on_timeout);

        // First call, with no subscription, runs synchronously and suspends
        // for 10 ticks.
        ACTOR.init(Vector::new(0), None);
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);

        for _ in 0..9 {
            context_tick::<HostPort>();
        }
        assert!(mg_sim::take_pending().is_empty(), "not due yet");
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);

        context_tick::<HostPort>();
        let pending = mg_sim::take_pending();
        assert_eq!(pending, vec![Vector::new(0)], "tenth tick posts the interrupt");

        for vect in pending {
            context_schedule::<HostPort>(vect);
        }
        assert_eq!(COUNT.load(Ordering::SeqCst), 2, "callback ran exactly once more");
    }

    // Scenario 5: wraparound. `ticks` starts at `2^32 - 1`; a 2-tick sleep
    // fires correctly at tick 1.
    #[test]
    fn wraparound_sleep_fires_after_wrap() {
        mg_sim::reset();
        set_ticks_for_test::<HostPort>(mg_port::CpuId::new(0), 0xFFFF_FFFF);

        static COUNT: AtomicU32 = AtomicU32::new(0);

        fn on_timeout(_c: &ActorCore, _m: Option<&Slot<()>>) -> ActorOutcome<(), HostPort> {
            COUNT.fetch_add(1, Ordering::SeqCst);
            ActorOutcome::Suspend { delay: u32::MAX }
        }
        static ACTOR: Actor<(), HostPort> = Actor::new(on_timeout);

        ACTOR.init(Vector::new(0), None);
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);

        // The actor just suspended with an effectively-infinite delay; park
        // a second, real sleep_for(2) by driving it through Requeue is not
        // available here, so instead directly exercise the scheduling path
        // the same way `Actor::call` would for a short sleep: suspend with
        // delay 2 on the next invocation.
        fn on_timeout_short(_c: &ActorCore, _m: Option<&Slot<()>>) -> ActorOutcome<(), HostPort> {
            COUNT.fetch_add(1, Ordering::SeqCst);
            ActorOutcome::Suspend { delay: 2 }
        }
        static ACTOR2: Actor<(), HostPort> = Actor::new(on_timeout_short);
        ACTOR2.init(Vector::new(0), None);
        assert_eq!(COUNT.load(Ordering::SeqCst), 2);

        context_tick::<HostPort>(); // ticks: 0xFFFF_FFFF -> 0
        context_tick::<HostPort>(); // ticks: 0 -> 1, deadline reached
        let pending = mg_sim::take_pending();
        assert_eq!(pending, vec![Vector::new(0)], "deadline reached exactly at the wrapped tick");
        for vect in pending {
            context_schedule::<HostPort>(vect);
        }
        assert_eq!(COUNT.load(Ordering::SeqCst), 3);
    }

    // Scenario 6: SMP fan-out. Actor1 on CPU0 pushes 100 messages to a
    // queue Actor2 (CPU1) is subscribed to; Actor2 must run exactly 100
    // times and the per-CPU pending bitmap ends up empty on both cores.
    #[test]
    fn smp_fan_out_delivers_every_message() {
        mg_sim::reset_smp();

        static COUNT: AtomicU32 = AtomicU32::new(0);
        static Q: Queue<u32, HostPortSmp> = Queue::new();
        static POOL: Pool<u32, 8, HostPortSmp> = Pool::new();

        fn on_message(_c: &ActorCore, m: Option<&Slot<u32>>) -> ActorOutcome<u32, HostPortSmp> {
            if let Some(slot) = m {
                COUNT.fetch_add(1, Ordering::SeqCst);
                unsafe { POOL.free(core::ptr::NonNull::from(slot)) };
            }
            ActorOutcome::Requeue(&Q)
        }
        static RECEIVER: Actor<u32, HostPortSmp> = Actor::new(on_message);

        mg_sim::set_current_cpu(1);
        RECEIVER.init(Vector::new(0), Some(&Q));

        mg_sim::set_current_cpu(0);
        for i in 0..100u32 {
            let msg = POOL.alloc(i).unwrap_or_else(|| {
                // a bounded pool recycles; pump CPU1 so freed slots return.
                mg_sim::set_current_cpu(1);
                for vect in mg_sim::take_pending_smp(1) {
                    context_schedule::<HostPortSmp>(vect);
                }
                mg_sim::set_current_cpu(0);
                POOL.alloc(i).expect("pool recycled after CPU1 drained")
            });
            unsafe { Q.push(msg) };
        }

        mg_sim::set_current_cpu(1);
        for vect in mg_sim::take_pending_smp(1) {
            context_schedule::<HostPortSmp>(vect);
        }

        assert_eq!(COUNT.load(Ordering::SeqCst), 100);
        assert!(mg_sim::take_pending_smp(0).is_empty());
        assert!(mg_sim::take_pending_smp(1).is_empty());
    }

    // Scenario 7: zero-delay yield. Two same-priority actors each
    // `sleep_for(0, self)` repeatedly; they interleave one invocation at a
    // time because each re-enters the run queue tail.
    #[test]
    fn zero_delay_yield_interleaves() {
        mg_sim::reset();

        static TRACE: [AtomicU32; 4] = [
            AtomicU32::new(0),
            AtomicU32::new(0),
            AtomicU32::new(0),
            AtomicU32::new(0),
        ];
        static STEP: AtomicU32 = AtomicU32::new(0);

        fn run_x(_c: &ActorCore, _m: Option<&Slot<()>>) -> ActorOutcome<(), HostPort> {
            let step = STEP.fetch_add(1, Ordering::SeqCst) as usize;
            if step < TRACE.len() {
                TRACE[step].store(1, Ordering::SeqCst);
            }
            ActorOutcome::Suspend { delay: 0 }
        }
        fn run_y(_c: &ActorCore, _m: Option<&Slot<()>>) -> ActorOutcome<(), HostPort> {
            let step = STEP.fetch_add(1, Ordering::SeqCst) as usize;
            if step < TRACE.len() {
                TRACE[step].store(2, Ordering::SeqCst);
            }
            ActorOutcome::Suspend { delay: 0 }
        }
        static X: Actor<(), HostPort> = Actor::new(run_x);
        static Y: Actor<(), HostPort> = Actor::new(run_y);

        // Both vect 0 -> both priority 0 -> same run queue.
        X.init(Vector::new(0), None); // runs synchronously, step 0, re-yields (queued).
        Y.init(Vector::new(0), None); // runs synchronously, step 1, re-yields (queued).

        // `context_schedule` drains its run queue to empty, which for
        // perpetually-yielding actors never happens by design (a real ISR
        // just keeps running as long as there is work, bounded only by the
        // actors themselves eventually stopping). To observe a bounded
        // slice of the interleaving, step the same run-queue-pop/invoke
        // mechanics `context_schedule` uses, but only twice more.
        let ctx = context::<HostPort>(HostPort::this_cpu());
        for _ in 0..2 {
            let node = {
                let mut inner = ctx.lock.lock();
                inner.run_queues.0[0].pop_front()
            };
            if let Some(core) = node {
                unsafe { ActorCore::invoke(core) };
            }
        }

        let trace: Vec<u32> = TRACE.iter().map(|c| c.load(Ordering::SeqCst)).collect();
        assert_eq!(trace, vec![1, 2, 1, 2], "actors interleave one invocation at a time");

        // X and Y yield forever by construction; unlink them (without
        // invoking, which would just re-queue them again) so HostPort's
        // shared priority-0 run queue is empty for the next test.
        loop {
            let node = {
                let mut inner = ctx.lock.lock();
                inner.run_queues.0[0].pop_front()
            };
            if node.is_none() {
                break;
            }
        }
    }
}
