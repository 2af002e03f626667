//! Dual-purpose queue (spec.md §4.3): holds either pending messages or
//! parked subscriber actors, never both.
//!
//! spec.md §9 asks for this explicitly: "convert the signed-`length`
//! encoding into an explicit two-variant state with a counter; compilers
//! optimize the tag away but the invariant becomes checkable." [`QueueState`]
//! is that two-variant (three, counting empty) state; [`Queue::len`] is the
//! retained signed counter, kept only for the observability the testable
//! properties in spec.md §8 ask for — nothing in `push`/`pop` branches on
//! its sign.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicI32, Ordering};

use mg_port::Lock;

use crate::actor::ActorCore;
use crate::list::Ring;
use crate::message::Slot;
use crate::scheduler::{self, Board};

pub(crate) enum QueueState<T> {
    Empty,
    Messages(Ring<Slot<T>>),
    Subscribers(Ring<ActorCore>),
}

impl<T> QueueState<T> {
    const fn new() -> Self {
        QueueState::Empty
    }
}

/// A FIFO that is, at any instant, either a ring of pending messages or a
/// ring of parked subscribers (spec.md §3's `Queue` invariant).
pub struct Queue<T, P: Board> {
    pub(crate) state: Lock<P, QueueState<T>>,
    len: AtomicI32,
}

impl<T, P: Board> Queue<T, P> {
    pub const fn new() -> Self {
        Self {
            state: Lock::new(QueueState::new()),
            len: AtomicI32::new(0),
        }
    }

    /// Signed occupancy: positive holds pending messages, negative holds
    /// parked subscribers, zero is empty. Observability only (spec.md §8,
    /// invariant 1) — never consulted by `push`/`pop` themselves.
    pub fn len(&self) -> i32 {
        self.len.load(Ordering::Relaxed)
    }

    /// `pop(subscriber)`, spec.md §4.3.
    ///
    /// If a message is pending, unlink and return it. Otherwise, if
    /// `subscriber` is `Some`, park it on this queue and return `None`.
    ///
    /// # Safety
    /// `subscriber`, if given, must point to a live, detached `ActorCore`
    /// that the caller will not touch again until this queue delivers a
    /// message to it.
    pub unsafe fn pop(&'static self, subscriber: Option<NonNull<ActorCore>>) -> Option<NonNull<Slot<T>>> {
        let mut guard = self.state.lock();
        match &mut *guard {
            QueueState::Messages(ring) => {
                let msg = ring.pop_front().expect("Messages state implies a non-empty ring");
                if ring.is_empty() {
                    *guard = QueueState::Empty;
                }
                self.len.fetch_sub(1, Ordering::Relaxed);
                Some(msg)
            }
            QueueState::Empty => {
                if let Some(actor) = subscriber {
                    let ring = Ring::new();
                    unsafe { ring.append(actor) };
                    *guard = QueueState::Subscribers(ring);
                    self.len.fetch_sub(1, Ordering::Relaxed);
                }
                None
            }
            QueueState::Subscribers(ring) => {
                if let Some(actor) = subscriber {
                    unsafe { ring.append(actor) };
                    self.len.fetch_sub(1, Ordering::Relaxed);
                }
                None
            }
        }
    }

    /// `push(msg)`, spec.md §4.3.
    ///
    /// If a subscriber is parked, hand the message straight to it and
    /// activate it (outside the queue lock, per spec.md §5's lock-ordering
    /// rule: queue lock released before the per-CPU lock is taken).
    /// Otherwise enqueue the message.
    ///
    /// # Safety
    /// `msg` must be a detached, live `Slot<T>` the caller has exclusive
    /// ownership of.
    pub unsafe fn push(&'static self, msg: NonNull<Slot<T>>) {
        let handoff = {
            let mut guard = self.state.lock();
            match &mut *guard {
                QueueState::Empty => {
                    let ring = Ring::new();
                    unsafe { ring.append(msg) };
                    *guard = QueueState::Messages(ring);
                    self.len.fetch_add(1, Ordering::Relaxed);
                    None
                }
                QueueState::Messages(ring) => {
                    unsafe { ring.append(msg) };
                    self.len.fetch_add(1, Ordering::Relaxed);
                    None
                }
                QueueState::Subscribers(ring) => {
                    let actor = ring
                        .pop_front()
                        .expect("Subscribers state implies a non-empty ring");
                    if ring.is_empty() {
                        *guard = QueueState::Empty;
                    }
                    self.len.fetch_add(1, Ordering::Relaxed);
                    Some(actor)
                }
            }
            // `guard` drops here, releasing the queue lock, strictly before
            // any activation below.
        };

        if let Some(actor) = handoff {
            // SAFETY: `actor` came from this queue's own subscriber ring.
            let core = unsafe { actor.as_ref() };
            core.set_mailbox(msg.cast());
            scheduler::activate::<P>(core);
        }
    }
}

impl<T, P: Board> Default for Queue<T, P> {
    fn default() -> Self {
        Self::new()
    }
}
