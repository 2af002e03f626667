//! Fixed-size message pool (spec.md §4.2).
//!
//! A [`Pool<T, N>`] hands out `N` instances of `Slot<T>` by bump allocation,
//! then by recycling from a free list once the bump region is exhausted. The
//! free list is a [`QueueState`] `Messages` ring, and the bump cursor lives
//! right next to it in the same locked `PoolState` — spec.md's own rationale
//! is reused verbatim: "reusing the queue as the free-list avoids a second
//! synchronization primitive," which only holds if there is exactly one
//! lock guarding both.
//!
//! Unlike the C source, a `Slot<T>` does not carry a back-reference to its
//! owning pool. Every call site that frees a message already has (or can
//! reach) the pool it came from, so `Pool::free` just takes `&self`; see
//! SPEC_FULL.md §4.2 for the full rationale.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use mg_port::{Lock, klog_warn};

use crate::scheduler::Board;

use crate::list::{Link, Linked, Ring};
use crate::queue::QueueState;

/// One pool-owned block. `T` is the payload; the embedded [`Link`] is used
/// interchangeably by the pool's free-list ring and by whichever user
/// `Queue` currently holds the message.
pub struct Slot<T> {
    link: Link<Slot<T>>,
    value: UnsafeCell<Option<T>>,
}

// SAFETY: `Slot<T>` is only ever linked into a ring while `'static` and
// accessed through a lock-protected `Pool`/`Queue`; see `Linked`'s contract.
unsafe impl<T> Linked for Slot<T> {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

// SAFETY: a slot's `value` is only ever touched by whichever of the pool's
// free list, a user queue, or an in-flight callback currently owns it —
// exactly one at a time, per spec.md §3's message-ownership invariant.
unsafe impl<T> Send for Slot<T> {}
unsafe impl<T> Sync for Slot<T> {}

impl<T> Slot<T> {
    const fn empty() -> Self {
        Self {
            link: Link::new(),
            value: UnsafeCell::new(None),
        }
    }

    /// Write `value` into this slot, overwriting whatever (if anything) was
    /// there. Used by `Pool::alloc` just before handing the slot to a
    /// caller.
    pub fn set(&self, value: T) {
        // SAFETY: caller holds the slot's sole owner at this instant.
        unsafe { *self.value.get() = Some(value) };
    }

    /// Take the payload, leaving the slot empty. Used by a receiving actor
    /// to move the message out of the slot.
    pub fn take(&self) -> Option<T> {
        // SAFETY: caller holds the slot's sole owner at this instant.
        unsafe { (*self.value.get()).take() }
    }

    /// Borrow the payload mutably without removing it. Used to hand a
    /// message to an actor's handler without copying it off the slot.
    pub fn as_mut(&self) -> Option<&mut T> {
        // SAFETY: caller holds the slot's sole owner at this instant.
        unsafe { (*self.value.get()).as_mut() }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// A bounded pool of `N` fixed-size `T` blocks plus a free-list ring.
///
/// `Pool::new` is `const fn`, so a pool is typically a `static`:
///
/// ```ignore
/// static MSG_POOL: Pool<Ping, 4, MyPort> = Pool::new();
/// ```
pub struct Pool<T, const N: usize, P: Board> {
    slots: [Slot<T>; N],
    state: Lock<P, PoolState<T>>,
}

struct PoolState<T> {
    /// Index of the next never-yet-allocated slot. Handing out a slot is
    /// only valid while `offset < N` (spec.md §9's Open Question, resolved
    /// conservatively: see SPEC_FULL.md §4.2).
    offset: usize,
    /// Recycled blocks, reusing `QueueState`'s `Messages` ring. Never
    /// reaches `Subscribers` — a free list never parks a subscriber.
    /// Sharing this field with `offset` under one `Lock` is the point: the
    /// bump cursor and the free list are the same resource (spec.md §9,
    /// "reusing the queue as the free-list avoids a second synchronization
    /// primitive"), so they mutate under the one lock, not two.
    free: QueueState<T>,
}

impl<T, const N: usize, P: Board> Pool<T, N, P> {
    pub const fn new() -> Self {
        Self {
            slots: [const { Slot::empty() }; N],
            state: Lock::new(PoolState {
                offset: 0,
                free: QueueState::new(),
            }),
        }
    }

    /// Allocate a block and write `value` into it, or return `None` if the
    /// pool is exhausted (bump region full, free list empty).
    pub fn alloc(&'static self, value: T) -> Option<NonNull<Slot<T>>> {
        let mut guard = self.state.lock();
        if guard.offset < N {
            let idx = guard.offset;
            guard.offset += 1;
            drop(guard);
            let slot = &self.slots[idx];
            slot.set(value);
            return Some(NonNull::from(slot));
        }
        // Bump region exhausted: pop from the free list under the same
        // guard that just checked `offset`.
        let recycled = match &mut guard.free {
            QueueState::Messages(ring) => {
                let slot = ring.pop_front().expect("Messages state implies a non-empty ring");
                if ring.is_empty() {
                    guard.free = QueueState::Empty;
                }
                Some(slot)
            }
            QueueState::Empty => None,
            QueueState::Subscribers(_) => unreachable!("a pool free list never holds subscribers"),
        };
        drop(guard);
        if recycled.is_none() {
            klog_warn!("pool exhausted: bump region and free list both empty");
        }
        recycled.inspect(|slot| {
            // SAFETY: `slot` came out of our own free-list ring and is one
            // of `self.slots`.
            unsafe { slot.as_ref() }.set(value);
        })
    }

    /// Return a block to the pool's free list.
    ///
    /// # Safety
    /// `slot` must be one of this pool's `N` blocks, currently owned by the
    /// caller (not present in any queue or free list).
    pub unsafe fn free(&'static self, slot: NonNull<Slot<T>>) {
        debug_assert!(self.owns(slot), "freed slot does not belong to this pool");
        let mut guard = self.state.lock();
        match &mut guard.free {
            QueueState::Empty => {
                let ring = Ring::new();
                unsafe { ring.append(slot) };
                guard.free = QueueState::Messages(ring);
            }
            QueueState::Messages(ring) => unsafe { ring.append(slot) },
            QueueState::Subscribers(_) => unreachable!("a pool free list never holds subscribers"),
        }
    }

    fn owns(&self, slot: NonNull<Slot<T>>) -> bool {
        let base = self.slots.as_ptr() as usize;
        let end = base + core::mem::size_of::<Slot<T>>() * N;
        let addr = slot.as_ptr() as usize;
        addr >= base && addr < end
    }

    /// Number of blocks never yet touched by the bump allocator (for
    /// diagnostics/tests only).
    pub fn bump_remaining(&'static self) -> usize {
        N - self.state.lock().offset
    }
}

impl<T, const N: usize, P: Board> Default for Pool<T, N, P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mg_sim::HostPort;

    static POOL: Pool<u32, 2, HostPort> = Pool::new();

    #[test]
    fn bump_then_recycle() {
        let a = POOL.alloc(1).expect("first block");
        let b = POOL.alloc(2).expect("second block");
        assert!(POOL.alloc(3).is_none(), "pool should be exhausted");

        unsafe { POOL.free(a) };
        let c = POOL.alloc(4).expect("recycled block");
        assert_eq!(unsafe { c.as_ref() }.take(), Some(4));
        assert_eq!(unsafe { b.as_ref() }.take(), Some(2));
    }
}
