//! Typed atomic-primitive layer with explicit, caller-chosen memory ordering.
//!
//! Every container in this crate consumes this module exclusively for shared
//! mutable state; no raw non-atomic concurrent access to a shared field is
//! permitted anywhere in the crate (SPEC_FULL §4.2). Unlike a hardcoded
//! SeqCst/Acquire/Release layer, every operation here takes an explicit
//! [`Ordering`] so a container can state its own ordering discipline at each
//! call site instead of inheriting one baked into the primitive.

pub use std::sync::atomic::Ordering;
use std::sync::atomic::{AtomicPtr, AtomicU64};

/// A 64-bit atomic cell with explicit-ordering operations.
#[derive(Debug, Default)]
#[repr(transparent)]
pub struct AtomicCell64(AtomicU64);

impl AtomicCell64 {
    #[inline]
    pub const fn new(v: u64) -> Self {
        Self(AtomicU64::new(v))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> u64 {
        self.0.load(order)
    }

    #[inline]
    pub fn store(&self, v: u64, order: Ordering) {
        self.0.store(v, order);
    }

    /// Returns the previously observed value; success is `prev == expected`.
    #[inline]
    pub fn compare_exchange(
        &self,
        expected: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> u64 {
        self.0
            .compare_exchange(expected, new, success, failure)
            .unwrap_or_else(|prev| prev)
    }

    #[inline]
    pub fn compare_exchange_weak(
        &self,
        expected: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> u64 {
        self.0
            .compare_exchange_weak(expected, new, success, failure)
            .unwrap_or_else(|prev| prev)
    }

    #[inline]
    pub fn exchange(&self, v: u64, order: Ordering) -> u64 {
        self.0.swap(v, order)
    }

    #[inline]
    pub fn fetch_add(&self, v: u64, order: Ordering) -> u64 {
        self.0.fetch_add(v, order)
    }

    #[inline]
    pub fn fetch_sub(&self, v: u64, order: Ordering) -> u64 {
        self.0.fetch_sub(v, order)
    }

    #[inline]
    pub fn fetch_and(&self, v: u64, order: Ordering) -> u64 {
        self.0.fetch_and(v, order)
    }

    #[inline]
    pub fn fetch_or(&self, v: u64, order: Ordering) -> u64 {
        self.0.fetch_or(v, order)
    }
}

/// A raw-pointer atomic cell with explicit-ordering operations, the
/// pointer-valued counterpart to [`AtomicCell64`].
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicCellPtr<T>(AtomicPtr<T>);

impl<T> AtomicCellPtr<T> {
    #[inline]
    pub fn new(p: *mut T) -> Self {
        Self(AtomicPtr::new(p))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> *mut T {
        self.0.load(order)
    }

    #[inline]
    pub fn store(&self, p: *mut T, order: Ordering) {
        self.0.store(p, order);
    }

    /// Returns the previously observed pointer; success is `prev == expected`.
    #[inline]
    pub fn compare_exchange(
        &self,
        expected: *mut T,
        new: *mut T,
        success: Ordering,
        failure: Ordering,
    ) -> *mut T {
        self.0
            .compare_exchange(expected, new, success, failure)
            .unwrap_or_else(|prev| prev)
    }

    #[inline]
    pub fn compare_exchange_weak(
        &self,
        expected: *mut T,
        new: *mut T,
        success: Ordering,
        failure: Ordering,
    ) -> *mut T {
        self.0
            .compare_exchange_weak(expected, new, success, failure)
            .unwrap_or_else(|prev| prev)
    }

    #[inline]
    pub fn exchange(&self, p: *mut T, order: Ordering) -> *mut T {
        self.0.swap(p, order)
    }
}

/// Full two-way fence, for the rare case where a standalone barrier (rather
/// than an ordered load/store pair) is needed.
#[inline]
pub fn full_fence() {
    std::sync::atomic::fence(Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell64_cas_returns_previous_value() {
        let c = AtomicCell64::new(1);
        let prev = c.compare_exchange(1, 2, Ordering::AcqRel, Ordering::Acquire);
        assert_eq!(prev, 1);
        assert_eq!(c.load(Ordering::Acquire), 2);

        let prev2 = c.compare_exchange(1, 3, Ordering::AcqRel, Ordering::Acquire);
        assert_eq!(prev2, 2);
        assert_eq!(c.load(Ordering::Acquire), 2);
    }

    #[test]
    fn cell_ptr_exchange_roundtrip() {
        let mut a = 1i32;
        let mut b = 2i32;
        let cell = AtomicCellPtr::new(std::ptr::addr_of_mut!(a));
        let prev = cell.exchange(std::ptr::addr_of_mut!(b), Ordering::AcqRel);
        assert_eq!(prev, std::ptr::addr_of_mut!(a));
        assert_eq!(cell.load(Ordering::Acquire), std::ptr::addr_of_mut!(b));
    }
}
