//! Actor creation and execution (spec.md §4.5).
//!
//! An [`Actor<M, P>`] pairs a callback (`fn(&ActorCore, Option<&mut M>) ->
//! ActorOutcome<M, P>`) with its scheduling bookkeeping. The bookkeeping
//! half, [`ActorCore`], deliberately knows nothing about `M`: it is what
//! gets linked into a per-CPU run queue or timer bucket, and those rings
//! hold actors of many different message types side by side. Getting from
//! an `ActorCore` back to the concrete `Actor<M, P>` that owns it uses the
//! same container-of idiom spec.md §4.1 describes for the intrusive list
//! itself, via `core::mem::offset_of!` (the teacher crate uses the same
//! macro for its context-switch assembly, `core/src/scheduler/switch_asm.rs`).

use core::ptr::NonNull;

use mg_port::{CpuId, Port, Priority, Vector};

use crate::list::{Link, Linked};
use crate::message::Slot;
use crate::queue::Queue;
use crate::scheduler::{self, Board};

/// Type-erased actor scheduling state: link, affinity, derived priority,
/// pending timeout, and the type-erased mailbox slot. Shared by every
/// `Actor<M, P>` regardless of `M`, so one `Ring<ActorCore>` run queue can
/// hold actors of unrelated message types.
pub struct ActorCore {
    link: Link<ActorCore>,
    vect: core::cell::Cell<Vector>,
    priority: core::cell::Cell<Priority>,
    cpu: core::cell::Cell<CpuId>,
    timeout: core::cell::Cell<u32>,
    mailbox: core::cell::Cell<Option<NonNull<()>>>,
    invoke: unsafe fn(NonNull<ActorCore>),
}

// SAFETY: an `ActorCore`'s fields are mutated only while the actor is
// exclusively owned by one of: the dispatcher running it, the run queue,
// one subscription queue, or one timer bucket — all lock-protected, per
// spec.md §3's actor-state invariant.
unsafe impl Send for ActorCore {}
unsafe impl Sync for ActorCore {}

unsafe impl Linked for ActorCore {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

impl ActorCore {
    const fn new(invoke: unsafe fn(NonNull<ActorCore>)) -> Self {
        Self {
            link: Link::new(),
            vect: core::cell::Cell::new(Vector::new(0)),
            priority: core::cell::Cell::new(Priority::new(0)),
            cpu: core::cell::Cell::new(CpuId::new(0)),
            timeout: core::cell::Cell::new(0),
            mailbox: core::cell::Cell::new(None),
            invoke,
        }
    }

    /// Derived priority, computed once in `Actor::init` from the actor's
    /// assigned vector (spec.md §3: "derived priority").
    pub fn priority(&self) -> Priority {
        self.priority.get()
    }

    /// The CPU this actor was initialized on; its run queue and timer
    /// buckets live there (spec.md §3: "actor's assigned CPU equals context
    /// hosting its run queue membership").
    pub fn cpu(&self) -> CpuId {
        self.cpu.get()
    }

    pub fn vect(&self) -> Vector {
        self.vect.get()
    }

    pub(crate) fn timeout(&self) -> u32 {
        self.timeout.get()
    }

    pub(crate) fn set_timeout(&self, timeout: u32) {
        self.timeout.set(timeout);
    }

    pub(crate) fn set_mailbox(&self, msg: NonNull<()>) {
        self.mailbox.set(Some(msg));
    }

    fn take_mailbox(&self) -> Option<NonNull<()>> {
        self.mailbox.take()
    }

    /// Dispatch through the type-erased trampoline recorded at
    /// construction. Called by the scheduler, which only ever sees
    /// `ActorCore`s, never the concrete `Actor<M, P>`.
    ///
    /// # Safety
    /// `core` must point to a live `ActorCore` embedded in some
    /// `Actor<M, P>`.
    pub(crate) unsafe fn invoke(core: NonNull<ActorCore>) {
        let f = unsafe { core.as_ref() }.invoke;
        unsafe { f(core) };
    }
}

/// What an actor's handler returns at the end of one invocation (spec.md
/// §4.5's `MG_ACTOR_SUSPEND` sentinel vs. "a queue pointer").
pub enum ActorOutcome<M: 'static, P: Board> {
    /// The actor is done running for now. `delay == 0` is a zero-delay
    /// yield (re-enter the run queue tail immediately); `delay > 0` parks
    /// the actor in the timer wheel for that many ticks.
    Suspend { delay: u32 },
    /// Re-subscribe to `queue` and, if a message is already waiting, run
    /// again immediately without returning to the dispatcher.
    Requeue(&'static Queue<M, P>),
}

/// An actor's handler: given the message parked in its mailbox (`None` on
/// the synchronous first call from `Actor::init` with no subscription), do
/// one episode of work and say what should happen next.
///
/// Unlike a bare `&mut M`, the handler is handed the whole [`Slot`] so it
/// can free the message back to its owning pool before suspending — the
/// same shape as the source callback receiving `struct mg_message_t *m`
/// and calling `mg_message_free(m)` itself (spec.md §4.5).
pub type ActorFn<M, P> = fn(&ActorCore, Option<&Slot<M>>) -> ActorOutcome<M, P>;

/// An actor: one callback plus the scheduling state it needs (spec.md
/// §4.5). `Actor::new` is `const fn`, so actors are ordinary `static`s:
///
/// ```ignore
/// static PRINTER: Actor<Ping, MyPort> = Actor::new(on_ping);
/// ```
pub struct Actor<M: 'static, P: Board> {
    core: ActorCore,
    handler: ActorFn<M, P>,
}

impl<M: 'static, P: Board> Actor<M, P> {
    pub const fn new(handler: ActorFn<M, P>) -> Self {
        Self {
            core: ActorCore::new(invoke_erased::<M, P>),
            handler,
        }
    }

    pub fn core(&'static self) -> &'static ActorCore {
        &self.core
    }

    /// `actor_init`, spec.md §4.5.
    ///
    /// If `initial_queue` is given, subscribes to it (the actor is parked,
    /// never invoked synchronously). Otherwise runs the actor once with a
    /// null mailbox, letting callback-style actors do startup work and
    /// immediately suspend.
    pub fn init(&'static self, vect: Vector, initial_queue: Option<&'static Queue<M, P>>) {
        self.core.vect.set(vect);
        self.core.priority.set(P::vect_to_prio(vect));
        self.core.cpu.set(P::this_cpu());

        match initial_queue {
            Some(queue) => {
                // SAFETY: `&self.core` is `'static` (the actor is a
                // `static`) and currently detached — this is its first use.
                let parked = unsafe { queue.pop(Some(NonNull::from(&self.core))) };
                debug_assert!(
                    parked.is_none(),
                    "actor initialized with a subscription must not receive a message synchronously"
                );
            }
            None => self.call(),
        }
    }

    /// `actor_call`, spec.md §4.5: drives one execution episode, looping
    /// internally while the actor keeps synchronously draining a
    /// requeued-to queue, and returning to the dispatcher only once the
    /// actor suspends or parks.
    fn call(&'static self) {
        loop {
            let mailbox = self.core.take_mailbox().map(NonNull::cast::<Slot<M>>);
            // SAFETY: a mailbox pointer on an `ActorCore` always came from
            // `Queue::push` or our own requeue loop below, and always
            // points to a live `Slot<M>` owned exclusively by this call.
            let arg = mailbox.map(|slot| unsafe { slot.as_ref() });

            match (self.handler)(&self.core, arg) {
                ActorOutcome::Suspend { delay } => {
                    if delay == 0 {
                        scheduler::activate::<P>(&self.core);
                    } else {
                        self.core.set_timeout(delay);
                        scheduler::sleep::<P>(&self.core, delay);
                    }
                    return;
                }
                ActorOutcome::Requeue(queue) => {
                    // SAFETY: same `'static`, now-detached `ActorCore`.
                    match unsafe { queue.pop(Some(NonNull::from(&self.core))) } {
                        Some(msg) => {
                            self.core.set_mailbox(msg.cast());
                            continue;
                        }
                        None => return,
                    }
                }
            }
        }
    }
}

unsafe fn invoke_erased<M: 'static, P: Board>(core: NonNull<ActorCore>) {
    let offset = core::mem::offset_of!(Actor<M, P>, core);
    // SAFETY: every `ActorCore` this trampoline is ever called with was
    // constructed by `Actor::<M, P>::new` as the `core` field of an
    // `Actor<M, P>`, so walking back by that field's offset recovers the
    // enclosing actor.
    let actor_ptr = unsafe { core.as_ptr().cast::<u8>().sub(offset) }.cast::<Actor<M, P>>();
    let actor = unsafe { &*actor_ptr };
    actor.call();
}
