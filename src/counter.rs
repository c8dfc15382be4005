//! Mixed-radix ripple-carry counter over the outer dimensions of a walk.

use smallvec::SmallVec;

/// Stack-allocated Vec for per-dimension counters.
/// 8 digits cover walks up to rank 11 without touching the heap.
type SVec<T> = SmallVec<[T; 8]>;

/// Mixed-radix counter: digit `i` counts in `[0, limits[i])`.
///
/// The last digit is the least significant. [`advance`](Self::advance) increments
/// it and propagates carries towards digit 0, which enumerates the outer
/// coordinates in row-major order without recursion.
#[derive(Debug, Clone)]
pub(crate) struct RippleCounter {
    digits: SVec<usize>,
    limits: SVec<usize>,
}

impl RippleCounter {
    /// Counter starting at all zeros. Every limit must be non-zero.
    pub(crate) fn new(limits: &[usize]) -> Self {
        debug_assert!(limits.iter().all(|&l| l > 0));
        Self {
            digits: SmallVec::from_elem(0, limits.len()),
            limits: SmallVec::from_slice(limits),
        }
    }

    #[inline]
    pub(crate) fn digits(&self) -> &[usize] {
        &self.digits
    }

    /// Step to the next value. Returns `false` once the counter wraps around to
    /// all zeros, i.e. after the last value has been visited.
    #[inline]
    pub(crate) fn advance(&mut self) -> bool {
        for (digit, &limit) in self.digits.iter_mut().zip(self.limits.iter()).rev() {
            *digit += 1;
            if *digit < limit {
                return true;
            }
            *digit = 0;
        }
        false
    }
}
