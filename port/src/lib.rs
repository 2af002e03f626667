#![no_std]
#![allow(clippy::missing_safety_doc)]

//! The board/interrupt-controller contract the `mg` kernel core consumes
//! (spec.md §4.6), plus the ambient infrastructure built directly on top
//! of it: critical sections, a spinlock, and the kernel logger.
//!
//! Nothing in this crate touches real hardware — it only defines the
//! trait a board support package implements, and small types generic over
//! it. See `mg-sim` for a host-runnable mock used by `mg-core`'s tests.

pub mod klog;
pub mod lock;
pub mod traits;
pub mod types;

pub use klog::{KlogBackend, KlogLevel, klog_get_level, klog_register_backend, klog_set_level};
pub use lock::{CriticalGuard, Lock, LockGuard};
pub use traits::Port;
pub use types::{CpuId, Priority, Vector};
