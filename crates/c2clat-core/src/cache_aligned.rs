//! Cache-line-aware wrappers.
//!
//! - [`CacheAligned<T>`]: forces a value onto its own cache line so the
//!   ping-pong baton does not share a line with the counters and scratch
//!   fields around it.
//! - [`AtomicF64`]: an `f64` stored as bits in an `AtomicU64`, for the
//!   per-streak scratch values published across a barrier.
//!
//! # Cache-Line Size
//!
//! We assume 64-byte cache lines (x86-64 and most AArch64 parts). Apple
//! M-series cores use 128-byte lines, so [`CacheAligned`] over-aligns to 128.

use std::sync::atomic::{AtomicU64, Ordering};

/// Alignment used by [`CacheAligned`] in bytes.
pub const CACHE_LINE_BYTES: usize = 128;

// ---------------------------------------------------------------------------
// CacheAligned<T>
// ---------------------------------------------------------------------------

/// Wraps a value so it starts on a cache-line boundary and owns the line.
///
/// `#[repr(C, align(128))]` guarantees the address is 128-byte aligned and
/// the size is rounded up to a multiple of 128 bytes.
#[repr(C, align(128))]
pub struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    #[inline]
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Default> Default for CacheAligned<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheAligned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// AtomicF64
// ---------------------------------------------------------------------------

/// An `f64` with atomic load/store, stored as its bit pattern.
#[derive(Default)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.bits.load(order))
    }

    #[inline]
    pub fn store(&self, value: f64, order: Ordering) {
        self.bits.store(value.to_bits(), order);
    }
}

impl std::fmt::Debug for AtomicF64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}
