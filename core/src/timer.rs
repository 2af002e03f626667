//! Timer wheel bucket selection (spec.md §4.4).
//!
//! Bucket placement and tick processing live in [`crate::scheduler`]
//! (they share its per-CPU lock); this module holds only the bucket-index
//! arithmetic, so it can be unit tested in isolation from the scheduler's
//! locking.

use mg_port::Port;

/// `msb_diff(a, b) = min(bit_width - 1 - clz(a ^ b), TIMERQ_MAX - 1)`.
///
/// The highest bit on which `a` and `b` differ partitions deadlines into
/// exponentially increasing "distance" classes: bucket 0 holds next-tick
/// deadlines, bucket 1 holds 2-3 ticks out, and so on, with the top bucket
/// a catch-all. Because the inputs are XORed, 32-bit wraparound of a
/// monotonic tick counter is handled with no special case, provided sleep
/// delays stay under `2^31` (spec.md §4.4).
pub(crate) fn msb_diff<P: Port>(a: u32, b: u32) -> usize {
    debug_assert_ne!(a, b, "msb_diff is only meaningful for distinct tick values");
    let diff = a ^ b;
    let highest_bit = 31 - P::clz32(diff);
    (highest_bit as usize).min(P::TIMERQ_MAX - 1)
}
