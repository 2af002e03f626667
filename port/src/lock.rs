//! Critical sections and the ticket-free spinlock built on top of them.
//!
//! On a uniprocessor port both collapse to "disable interrupts": the
//! spinlock's compare-exchange always succeeds on the first try because
//! nothing else can be running concurrently. On SMP, [`Lock`] additionally
//! spins a test-and-set flag, so a lock holder cannot be preempted on its
//! own core (interrupts are off) and cannot be run over by another core
//! (the flag is still set) — matching spec.md §5's locking discipline.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::traits::Port;

/// RAII critical section: interrupts are disabled for the lifetime of the
/// guard and restored (if this was the outermost guard) on drop.
#[must_use = "the critical section ends as soon as this guard is dropped"]
pub struct CriticalGuard<P: Port> {
    _p: PhantomData<*const P>,
}

impl<P: Port> CriticalGuard<P> {
    #[inline]
    pub fn new() -> Self {
        // SAFETY: paired with the `leave()` in `Drop`, on the same core,
        // never reordered across the guard's lifetime.
        unsafe { P::critical_section_enter() };
        Self { _p: PhantomData }
    }
}

impl<P: Port> Default for CriticalGuard<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Port> Drop for CriticalGuard<P> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: matches the `enter()` taken in `new()`.
        unsafe { P::critical_section_leave() };
    }
}

/// A mutex that disables interrupts and, under SMP, additionally spins a
/// test-and-set flag so the critical section is exclusive across cores.
///
/// Lock ordering throughout this workspace: a `Queue`'s lock is always
/// released before a `CpuContext`'s lock is acquired, never the reverse —
/// see spec.md §5.
pub struct Lock<P: Port, T> {
    held: AtomicBool,
    data: UnsafeCell<T>,
    _p: PhantomData<P>,
}

// SAFETY: access to `data` is only ever granted through `LockGuard`, which
// is only constructed after `held` transitions false -> true.
unsafe impl<P: Port, T: Send> Send for Lock<P, T> {}
unsafe impl<P: Port, T: Send> Sync for Lock<P, T> {}

pub struct LockGuard<'a, P: Port, T> {
    lock: &'a Lock<P, T>,
    _crit: CriticalGuard<P>,
}

impl<P: Port, T> Lock<P, T> {
    #[inline]
    pub const fn new(data: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            data: UnsafeCell::new(data),
            _p: PhantomData,
        }
    }

    #[inline]
    pub fn lock(&self) -> LockGuard<'_, P, T> {
        let crit = CriticalGuard::<P>::new();
        while self
            .held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Another core holds the flag; interrupts are already disabled
            // on *this* core so we can only be spinning because of SMP
            // contention. Park until the holder's release wakes us.
            P::wait_event();
            spin_loop();
        }
        LockGuard {
            lock: self,
            _crit: crit,
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Option<LockGuard<'_, P, T>> {
        let crit = CriticalGuard::<P>::new();
        if self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(LockGuard {
                lock: self,
                _crit: crit,
            })
        } else {
            drop(crit);
            None
        }
    }
}

impl<'a, P: Port, T> Deref for LockGuard<'a, P, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: holding the guard proves exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, P: Port, T> DerefMut for LockGuard<'a, P, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard proves exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, P: Port, T> Drop for LockGuard<'a, P, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
        P::send_event();
        // `_crit` drops after this body, re-enabling interrupts last.
    }
}
