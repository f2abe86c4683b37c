//! Folly-style SPSC ring buffer (SPEC_FULL §4.7).
//!
//! A single-producer single-consumer ring buffer of `(key, value)` pairs,
//! fixed at a power-of-two capacity. `head`/`tail` are unbounded `u64`
//! sequence numbers (index into the buffer is `seq & mask`), each cached by
//! the opposite side to avoid a cross-core read on every operation, and each
//! placed in its own 128-byte-aligned wrapper to prevent false sharing.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::invariants::{
    debug_assert_bounded_count, debug_assert_initialized_read, debug_assert_monotonic,
    debug_assert_no_wrap,
};
use crate::result::{DsOpType, DsResult, Kv, Metadata, Stats, StatsSnapshot, now_nanos};

/// 128-byte alignment wrapper, preventing prefetcher-induced false sharing
/// between the producer-hot and consumer-hot fields below.
#[repr(align(128))]
struct CacheAligned<T> {
    value: T,
}

impl<T> CacheAligned<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// Single-producer single-consumer ring of `Kv` pairs.
#[repr(C)]
pub struct RingSpsc {
    tail: CacheAligned<AtomicU64>,
    cached_head: CacheAligned<UnsafeCell<u64>>,

    head: CacheAligned<AtomicU64>,
    cached_tail: CacheAligned<UnsafeCell<u64>>,

    capacity: usize,
    mask: usize,
    buffer: UnsafeCell<Box<[MaybeUninit<Kv>]>>,

    stats: Stats,
}

// SAFETY: the producer side (`insert`) only ever touches `tail`,
// `cached_head`, and buffer slots in `[tail, tail+n)`; the consumer side
// (`pop`/`iterate`) only ever touches `head`, `cached_tail`, and slots in
// `[head, tail)`. The two ranges never overlap for a correctly used SPSC ring.
unsafe impl Send for RingSpsc {}
unsafe impl Sync for RingSpsc {}

impl RingSpsc {
    /// Creates a ring with room for `capacity` elements. `capacity` is
    /// rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, MaybeUninit::uninit);

        Self {
            tail: CacheAligned::new(AtomicU64::new(0)),
            cached_head: CacheAligned::new(UnsafeCell::new(0)),
            head: CacheAligned::new(AtomicU64::new(0)),
            cached_tail: CacheAligned::new(UnsafeCell::new(0)),
            capacity,
            mask: capacity - 1,
            buffer: UnsafeCell::new(buffer.into_boxed_slice()),
            stats: Stats::new(),
        }
    }

    pub fn metadata() -> Metadata {
        Metadata {
            name: "ring_spsc",
            description: "Folly-style single-producer single-consumer ring buffer",
            node_size: std::mem::size_of::<Kv>() as u32,
            requires_locking: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Producer: appends one element. Returns `Full` if there is no room.
    ///
    /// One slot is always held back so a full ring (`tail - head == capacity
    /// - 1`) can be told apart from an empty one; usable capacity is
    /// therefore `capacity - 1`, not `capacity`.
    pub fn insert(&self, key: u64, value: u64) -> DsResult {
        let start = now_nanos();
        let usable = self.capacity - 1;
        let tail = self.tail.load(Ordering::Relaxed);

        // SAFETY: `cached_head` is written only by the producer (this path).
        let cached_head = unsafe { *self.cached_head.get() };
        let mut space = usable.saturating_sub(tail.wrapping_sub(cached_head) as usize);

        if space == 0 {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: written only by the producer; the Acquire load above
            // synchronizes with the consumer's Release store to `head`.
            unsafe { *self.cached_head.get() = head };
            space = usable.saturating_sub(tail.wrapping_sub(head) as usize);
            if space == 0 {
                self.stats.record(DsOpType::Insert, DsResult::Full, start);
                return DsResult::Full;
            }
        }

        let idx = (tail as usize) & self.mask;
        // SAFETY: slot `idx` lies in `[tail, tail+capacity)` which is not
        // readable by the consumer (consumer only reads `[head, tail)`).
        unsafe {
            let buf = &mut *self.buffer.get();
            buf[idx] = MaybeUninit::new(Kv::new(key, value));
        }

        let new_tail = tail.wrapping_add(1);
        debug_assert_bounded_count!(new_tail.wrapping_sub(self.head.load(Ordering::Relaxed)) as usize, self.capacity);
        debug_assert_monotonic!("tail", tail, new_tail);
        debug_assert_no_wrap!("tail", tail, new_tail);
        self.tail.store(new_tail, Ordering::Release);

        self.stats.add_elements(1);
        self.stats.record(DsOpType::Insert, DsResult::Success, start);
        DsResult::Success
    }

    /// Consumer: removes and returns the oldest element. Returns `NotFound`
    /// if the ring is empty.
    pub fn pop(&self) -> (DsResult, Option<Kv>) {
        let start = now_nanos();
        let head = self.head.load(Ordering::Relaxed);

        // SAFETY: `cached_tail` is written only by the consumer (this path).
        let mut cached_tail = unsafe { *self.cached_tail.get() };
        if head == cached_tail {
            cached_tail = self.tail.load(Ordering::Acquire);
            // SAFETY: written only by the consumer; the Acquire load above
            // synchronizes with the producer's Release store to `tail`.
            unsafe { *self.cached_tail.get() = cached_tail };
            if head == cached_tail {
                self.stats.record(DsOpType::Pop, DsResult::NotFound, start);
                return (DsResult::NotFound, None);
            }
        }

        debug_assert_initialized_read!(head, head, cached_tail);
        let idx = (head as usize) & self.mask;
        // SAFETY: slot `idx` was published by the producer's Release store to
        // `tail` and the Acquire above synchronizes with it; only the
        // consumer reads `[head, tail)`.
        let item = unsafe {
            let buf = &*self.buffer.get();
            buf[idx].assume_init_read()
        };

        let new_head = head.wrapping_add(1);
        debug_assert_monotonic!("head", head, new_head);
        self.head.store(new_head, Ordering::Release);

        self.stats.add_elements(-1);
        self.stats.record(DsOpType::Pop, DsResult::Success, start);
        (DsResult::Success, Some(item))
    }

    /// Consumer: linear scan over the currently readable window for `key`.
    /// Does not consume. `Invalid` is never returned; absence is `NotFound`.
    pub fn search(&self, key: u64) -> (DsResult, Option<u64>) {
        let start = now_nanos();
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let mut pos = head;
        while pos != tail {
            let idx = (pos as usize) & self.mask;
            // SAFETY: `[head, tail)` is fully initialized and stable for the
            // duration of this scan (single consumer, no concurrent pop).
            let kv = unsafe {
                let buf = &*self.buffer.get();
                buf[idx].assume_init_read()
            };
            if kv.key == key {
                self.stats.record(DsOpType::Search, DsResult::Success, start);
                return (DsResult::Success, Some(kv.value));
            }
            pos = pos.wrapping_add(1);
        }
        self.stats.record(DsOpType::Search, DsResult::NotFound, start);
        (DsResult::NotFound, None)
    }

    /// Consumer: calls `f` with every currently readable element, oldest
    /// first, without consuming them.
    pub fn iterate<F: FnMut(Kv) -> bool>(&self, mut f: F) -> DsResult {
        let start = now_nanos();
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let mut pos = head;
        while pos != tail {
            let idx = (pos as usize) & self.mask;
            // SAFETY: see `search`.
            let kv = unsafe {
                let buf = &*self.buffer.get();
                buf[idx].assume_init_read()
            };
            if !f(kv) {
                break;
            }
            pos = pos.wrapping_add(1);
        }
        self.stats.record(DsOpType::Iterate, DsResult::Success, start);
        DsResult::Success
    }

    /// Re-derives occupancy from `head`/`tail` and checks it against the
    /// usable capacity (`capacity - 1`; see [`RingSpsc::insert`]).
    pub fn verify(&self) -> DsResult {
        let start = now_nanos();
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        let count = tail.wrapping_sub(head);
        let result = if count as usize <= self.capacity - 1 {
            DsResult::Success
        } else {
            DsResult::Corrupt
        };
        self.stats.record(DsOpType::Verify, result, start);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_pop_fifo_order() {
        let ring = RingSpsc::new(4);
        assert_eq!(ring.insert(1, 10), DsResult::Success);
        assert_eq!(ring.insert(2, 20), DsResult::Success);
        assert_eq!(ring.pop(), (DsResult::Success, Some(Kv::new(1, 10))));
        assert_eq!(ring.pop(), (DsResult::Success, Some(Kv::new(2, 20))));
        assert_eq!(ring.pop(), (DsResult::NotFound, None));
    }

    #[test]
    fn insert_past_usable_capacity_is_full() {
        // capacity 4 holds one slot back, so only 3 elements fit.
        let ring = RingSpsc::new(4);
        assert_eq!(ring.insert(1, 1), DsResult::Success);
        assert_eq!(ring.insert(2, 2), DsResult::Success);
        assert_eq!(ring.insert(3, 3), DsResult::Success);
        assert_eq!(ring.insert(4, 4), DsResult::Full);
    }

    #[test]
    fn search_and_iterate_do_not_consume() {
        let ring = RingSpsc::new(8);
        ring.insert(1, 10);
        ring.insert(2, 20);
        assert_eq!(ring.search(2), (DsResult::Success, Some(20)));
        let mut seen = Vec::new();
        ring.iterate(|kv| {
            seen.push(kv.key);
            true
        });
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn verify_reports_success_for_well_formed_ring() {
        let ring = RingSpsc::new(4);
        ring.insert(1, 1);
        assert_eq!(ring.verify(), DsResult::Success);
    }

    #[test]
    fn wraps_around_buffer() {
        let ring = RingSpsc::new(2);
        for i in 0..10u64 {
            assert_eq!(ring.insert(i, i), DsResult::Success);
            assert_eq!(ring.pop(), (DsResult::Success, Some(Kv::new(i, i))));
        }
    }
}
