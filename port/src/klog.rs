//! Kernel logging subsystem.
//!
//! All log output funnels through a single **backend** function pointer,
//! registered by the embedder once a console/UART driver is up. Before
//! registration, log calls are silently dropped rather than buffered —
//! there is no allocator to buffer into.
//!
//! # Backend contract
//!
//! The backend receives the pre-formatted arguments for a single log line
//! and must write them atomically (no interleaving between cores) and
//! append its own line terminator.

use core::fmt;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

#[inline]
fn is_enabled(level: KlogLevel) -> bool {
    (level as u8) <= CURRENT_LEVEL.load(Ordering::Relaxed)
}

pub fn klog_set_level(level: KlogLevel) {
    CURRENT_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn klog_get_level() -> KlogLevel {
    match CURRENT_LEVEL.load(Ordering::Relaxed) {
        0 => KlogLevel::Error,
        1 => KlogLevel::Warn,
        2 => KlogLevel::Info,
        3 => KlogLevel::Debug,
        _ => KlogLevel::Trace,
    }
}

/// Signature of a klog backend: format the line and emit it, terminator
/// included, in one shot.
pub type KlogBackend = fn(fmt::Arguments<'_>);

/// Stored as a raw pointer; `null` means "no backend registered yet".
static BACKEND: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Register the backend that kernel log lines are routed to.
pub fn klog_register_backend(backend: KlogBackend) {
    BACKEND.store(backend as *mut (), Ordering::Release);
}

#[doc(hidden)]
pub fn klog_dispatch(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !is_enabled(level) {
        return;
    }
    let ptr = BACKEND.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    // SAFETY: `ptr` was stored from a valid `KlogBackend` fn pointer by
    // `klog_register_backend` and function pointers never change size.
    let backend: KlogBackend = unsafe { core::mem::transmute(ptr) };
    backend(args);
}

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {
        $crate::klog::klog_dispatch($crate::klog::KlogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {
        $crate::klog::klog_dispatch($crate::klog::KlogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {
        $crate::klog::klog_dispatch($crate::klog::KlogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {
        $crate::klog::klog_dispatch($crate::klog::KlogLevel::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_trace {
    ($($arg:tt)*) => {
        $crate::klog::klog_dispatch($crate::klog::KlogLevel::Trace, format_args!($($arg)*))
    };
}
