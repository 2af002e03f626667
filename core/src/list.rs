//! Intrusive doubly-linked ring — the sole collection primitive used by the
//! pool, queue, run queues, and timer wheel (spec.md §4.1).
//!
//! Rust redesign note (spec.md §9): the C source uses a self-cyclic
//! sentinel node so `mg_list_empty`/`mg_list_first` never have to special
//! case "no sentinel." That trick needs a node of the *same type* as the
//! payload sitting outside any real element, which doesn't translate
//! cleanly into a generic Rust type. Instead, an empty [`Ring`] is simply
//! `head == None`, and real elements stay circularly linked among
//! themselves — same O(1) complexity, no sentinel allocation.
//!
//! This module is the one place unsafe pointer arithmetic lives; everything
//! built on top of it (`message`, `queue`, `timer`, `scheduler`) only ever
//! sees safe `Ring`/`Link` APIs.

use core::cell::Cell;
use core::ptr::NonNull;

/// Embedded link field. `None` in both slots means the node is detached
/// (not a member of any ring).
pub struct Link<T: ?Sized> {
    prev: Cell<Option<NonNull<T>>>,
    next: Cell<Option<NonNull<T>>>,
}

impl<T> Link<T> {
    #[inline]
    pub const fn new() -> Self {
        Self {
            prev: Cell::new(None),
            next: Cell::new(None),
        }
    }

    #[inline]
    pub fn is_detached(&self) -> bool {
        self.prev.get().is_none()
    }
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Self::new()
    }
}

// `Link`/`Ring` are raw-pointer-based so auto traits don't apply. Every
// value linked into a ring in this workspace is a `'static` singleton
// (a `Pool`'s slots, an `Actor`'s core) mutated only under the owning
// `Queue`'s or `CpuContext`'s lock, so sharing the pointers across cores is
// sound; see spec.md §9's note on confining unsafe pointer arithmetic to
// this one module.
unsafe impl<T> Send for Link<T> {}
unsafe impl<T> Sync for Link<T> {}

/// A type that can be linked into a [`Ring`] of itself.
///
/// # Safety
/// `link()` must always return a reference to the same embedded `Link<Self>`
/// for the lifetime of the value. The implementor must never move once
/// linked (every ring member in this crate is `'static`, so this holds
/// trivially).
pub unsafe trait Linked: Sized {
    fn link(&self) -> &Link<Self>;
}

/// A circular intrusive ring of `T`. Holds no data of its own besides the
/// head pointer; every node lives wherever its owner (a `Pool`, `Queue`, or
/// `CpuContext`) put it.
pub struct Ring<T: Linked> {
    head: Cell<Option<NonNull<T>>>,
}

impl<T: Linked> Ring<T> {
    #[inline]
    pub const fn new() -> Self {
        Self {
            head: Cell::new(None),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }

    #[inline]
    pub fn first(&self) -> Option<NonNull<T>> {
        self.head.get()
    }

    #[inline]
    pub fn last(&self) -> Option<NonNull<T>> {
        let head = self.head.get()?;
        // SAFETY: `head` is a live ring member by invariant.
        Some(unsafe { head.as_ref() }.link().prev.get().unwrap())
    }

    /// Append `node` at the tail (before the conceptual sentinel, i.e. the
    /// new last element).
    ///
    /// # Safety
    /// `node` must point to a live, `'static`-for-its-linked-duration `T`
    /// that is currently detached (not a member of any ring).
    pub unsafe fn append(&self, node: NonNull<T>) {
        debug_assert!(unsafe { node.as_ref() }.link().is_detached());
        match self.head.get() {
            None => {
                let link = unsafe { node.as_ref() }.link();
                link.prev.set(Some(node));
                link.next.set(Some(node));
                self.head.set(Some(node));
            }
            Some(head) => {
                let tail = unsafe { head.as_ref() }.link().prev.get().unwrap();
                let node_link = unsafe { node.as_ref() }.link();
                node_link.prev.set(Some(tail));
                node_link.next.set(Some(head));
                unsafe { tail.as_ref() }.link().next.set(Some(node));
                unsafe { head.as_ref() }.link().prev.set(Some(node));
            }
        }
    }

    /// Detach `node`, which must currently be a member of this ring.
    ///
    /// # Safety
    /// `node` must be a live member of `self`.
    pub unsafe fn unlink(&self, node: NonNull<T>) {
        let link = unsafe { node.as_ref() }.link();
        let prev = link.prev.get().expect("unlink of detached node");
        let next = link.next.get().expect("unlink of detached node");

        if prev == node {
            // `node` was the sole element.
            self.head.set(None);
        } else {
            unsafe { prev.as_ref() }.link().next.set(Some(next));
            unsafe { next.as_ref() }.link().prev.set(Some(prev));
            if self.head.get() == Some(node) {
                self.head.set(Some(next));
            }
        }
        link.prev.set(None);
        link.next.set(None);
    }

    /// Remove and return the head element, or `None` if the ring is empty.
    #[inline]
    pub fn pop_front(&self) -> Option<NonNull<T>> {
        let head = self.head.get()?;
        // SAFETY: `head`, if present, is always a live member of `self`.
        unsafe { self.unlink(head) };
        Some(head)
    }
}

impl<T: Linked> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<T: Linked> Send for Ring<T> {}
unsafe impl<T: Linked> Sync for Ring<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        link: Link<Node>,
        id: u32,
    }

    unsafe impl Linked for Node {
        fn link(&self) -> &Link<Self> {
            &self.link
        }
    }

    impl Node {
        fn new(id: u32) -> Self {
            Self {
                link: Link::new(),
                id,
            }
        }
    }

    #[test]
    fn empty_ring_has_no_first_or_last() {
        let ring: Ring<Node> = Ring::new();
        assert!(ring.is_empty());
        assert!(ring.first().is_none());
        assert!(ring.last().is_none());
    }

    #[test]
    fn append_and_pop_is_fifo() {
        let a = Node::new(1);
        let b = Node::new(2);
        let c = Node::new(3);
        let ring: Ring<Node> = Ring::new();

        unsafe {
            ring.append(NonNull::from(&a));
            ring.append(NonNull::from(&b));
            ring.append(NonNull::from(&c));
        }

        assert_eq!(unsafe { ring.pop_front().unwrap().as_ref() }.id, 1);
        assert_eq!(unsafe { ring.pop_front().unwrap().as_ref() }.id, 2);
        assert_eq!(unsafe { ring.pop_front().unwrap().as_ref() }.id, 3);
        assert!(ring.pop_front().is_none());
    }

    #[test]
    fn unlink_middle_element_preserves_order() {
        let a = Node::new(1);
        let b = Node::new(2);
        let c = Node::new(3);
        let ring: Ring<Node> = Ring::new();

        unsafe {
            ring.append(NonNull::from(&a));
            ring.append(NonNull::from(&b));
            ring.append(NonNull::from(&c));
            ring.unlink(NonNull::from(&b));
        }

        assert!(b.link.is_detached());
        assert_eq!(unsafe { ring.pop_front().unwrap().as_ref() }.id, 1);
        assert_eq!(unsafe { ring.pop_front().unwrap().as_ref() }.id, 3);
        assert!(ring.is_empty());
    }

    #[test]
    fn last_tracks_tail_after_append() {
        let a = Node::new(1);
        let b = Node::new(2);
        let ring: Ring<Node> = Ring::new();
        unsafe {
            ring.append(NonNull::from(&a));
        }
        assert_eq!(unsafe { ring.last().unwrap().as_ref() }.id, 1);
        unsafe {
            ring.append(NonNull::from(&b));
        }
        assert_eq!(unsafe { ring.last().unwrap().as_ref() }.id, 2);
    }
}
