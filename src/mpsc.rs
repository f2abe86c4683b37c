//! Vyukov-style intrusive, wait-free-producer unbounded MPSC queue
//! (SPEC_FULL §4.6).
//!
//! Producers publish via a single atomic `head` exchange followed by a
//! release-store link, with no CAS retry loop — a producer never blocks on
//! another producer. The single consumer advances a privately-owned `tail`
//! pointer. A transient "stalled" window is possible: a producer has claimed
//! `head` but has not yet linked its node into the previous tail's `next`
//! field. The consumer detects this (rather than misreporting the queue as
//! empty) and reports [`DsResult::Busy`]; a dummy stub node guarantees the
//! consumer can always make forward progress around a stalled producer.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::arena::{Arena, Cursor};
use crate::atomics::{AtomicCellPtr, Ordering};
use crate::invariants::debug_assert_list_count_consistent;
use crate::result::{DsOpType, DsResult, Kv, Metadata, Stats, StatsSnapshot, now_nanos};

struct Node {
    next: AtomicCellPtr<Node>,
    kv: MaybeUninit<Kv>,
}

/// Multi-producer single-consumer unbounded queue of `Kv` pairs.
pub struct Mpsc<'a> {
    arena: &'a Arena,
    head: AtomicCellPtr<Node>,
    tail: UnsafeCell<*mut Node>,
    stub: *mut Node,
    stats: Stats,
}

// SAFETY: `head` is the only field touched by producers, always through
// atomic exchange/store; `tail` is touched only by the single consumer.
unsafe impl Send for Mpsc<'_> {}
unsafe impl Sync for Mpsc<'_> {}

impl<'a> Mpsc<'a> {
    /// Creates an empty queue, allocating its stub node from `arena` via a
    /// throwaway cursor (the stub lives for the lifetime of the queue).
    pub fn new(arena: &'a Arena) -> Result<Self, DsResult> {
        let mut cursor = Cursor::new();
        let stub = arena.alloc::<Node>(&mut cursor)?;
        // SAFETY: freshly allocated, not yet reachable from anywhere.
        unsafe {
            stub.as_ptr().write(Node {
                next: AtomicCellPtr::new(std::ptr::null_mut()),
                kv: MaybeUninit::uninit(),
            });
        }
        Ok(Self {
            arena,
            head: AtomicCellPtr::new(stub.as_ptr()),
            tail: UnsafeCell::new(stub.as_ptr()),
            stub: stub.as_ptr(),
            stats: Stats::new(),
        })
    }

    pub fn metadata() -> Metadata {
        Metadata {
            name: "mpsc",
            description: "Vyukov intrusive wait-free-producer unbounded MPSC queue",
            node_size: std::mem::size_of::<Node>() as u32,
            requires_locking: false,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Links `node` to the current head and publishes it to the consumer.
    /// `node` must not already be reachable from the queue.
    fn publish(&self, node: *mut Node) {
        // SAFETY: `node` is not yet reachable; clearing its `next` field
        // cannot race with anything.
        unsafe { (*node).next.store(std::ptr::null_mut(), Ordering::Relaxed) };
        let prev = self.head.exchange(node, Ordering::AcqRel);
        // SAFETY: `prev` was the head an instant ago; it stays valid because
        // the consumer only ever frees a node after observing it is no
        // longer `head` (see `pop`'s stalled-detection branch).
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// Producer: appends `(key, value)`. `cursor` is the calling producer's
    /// own allocation context (SPEC_FULL §5, restricted context). Fails only
    /// if the arena is exhausted.
    pub fn insert(&self, cursor: &mut Cursor, key: u64, value: u64) -> DsResult {
        let start = now_nanos();
        let node = match self.arena.alloc::<Node>(cursor) {
            Ok(p) => p.as_ptr(),
            Err(e) => {
                self.stats.record(DsOpType::Insert, e, start);
                return e;
            }
        };
        // SAFETY: freshly allocated, not yet reachable from anywhere.
        unsafe { (*node).kv = MaybeUninit::new(Kv::new(key, value)) };
        self.publish(node);

        self.stats.add_elements(1);
        self.stats.record(DsOpType::Insert, DsResult::Success, start);
        DsResult::Success
    }

    /// Consumer: removes and returns the oldest element.
    ///
    /// Returns `Busy` (not `NotFound`) if a producer has claimed `head` but
    /// has not yet linked its node in — the queue is not logically empty,
    /// the caller should retry.
    pub fn pop(&self) -> (DsResult, Option<Kv>) {
        let start = now_nanos();
        // SAFETY: `tail` is touched only by the single consumer.
        let mut tail = unsafe { *self.tail.get() };
        // SAFETY: `tail` always points at a live node (stub or previously
        // linked producer node).
        let mut next = unsafe { (*tail).next.load(Ordering::Acquire) };

        if std::ptr::eq(tail, self.stub) {
            if next.is_null() {
                self.stats.record(DsOpType::Pop, DsResult::NotFound, start);
                return (DsResult::NotFound, None);
            }
            // SAFETY: `tail` is touched only by the consumer.
            unsafe { *self.tail.get() = next };
            tail = next;
            next = unsafe { (*tail).next.load(Ordering::Acquire) };
        }

        if !next.is_null() {
            return self.take(tail, next, start);
        }

        if !std::ptr::eq(tail, self.head.load(Ordering::Acquire)) {
            // A producer has exchanged `head` but not yet linked its node.
            self.stats.record(DsOpType::Pop, DsResult::Busy, start);
            return (DsResult::Busy, None);
        }

        // Push the stub to break the stall and guarantee progress.
        self.publish(self.stub);
        next = unsafe { (*tail).next.load(Ordering::Acquire) };
        if !next.is_null() {
            return self.take(tail, next, start);
        }

        self.stats.record(DsOpType::Pop, DsResult::NotFound, start);
        (DsResult::NotFound, None)
    }

    fn take(&self, tail: *mut Node, next: *mut Node, start: u64) -> (DsResult, Option<Kv>) {
        // SAFETY: `tail` is touched only by the consumer.
        unsafe { *self.tail.get() = next };
        // SAFETY: `tail`'s `kv` was written by its producer before the
        // Release store that linked it in; the Acquire load that found
        // `next` synchronizes with that store.
        let value = unsafe { (*tail).kv.assume_init_read() };
        if !std::ptr::eq(tail, self.stub) {
            // SAFETY: `tail` was allocated by `self.arena` and is now
            // unreachable from the queue (the consumer already advanced
            // past it).
            unsafe { self.arena.free(NonNull::new_unchecked(tail)) };
        }
        self.stats.add_elements(-1);
        self.stats.record(DsOpType::Pop, DsResult::Success, start);
        (DsResult::Success, Some(value))
    }

    /// Consumer: linear scan from the current tail for `key`, without
    /// consuming. Does not observe items behind a stalled producer.
    pub fn search(&self, key: u64) -> (DsResult, Option<u64>) {
        let start = now_nanos();
        // SAFETY: `tail` is touched only by the consumer.
        let mut cur = unsafe { *self.tail.get() };
        loop {
            // SAFETY: `cur` is always a live node owned by this queue.
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            if !std::ptr::eq(next, self.stub) {
                // SAFETY: see `take`.
                let kv = unsafe { (*next).kv.assume_init_read() };
                if kv.key == key {
                    self.stats.record(DsOpType::Search, DsResult::Success, start);
                    return (DsResult::Success, Some(kv.value));
                }
            }
            cur = next;
        }
        self.stats.record(DsOpType::Search, DsResult::NotFound, start);
        (DsResult::NotFound, None)
    }

    /// Consumer: calls `f` with every currently linked element, oldest
    /// first, without consuming.
    pub fn iterate<F: FnMut(Kv) -> bool>(&self, mut f: F) -> DsResult {
        let start = now_nanos();
        // SAFETY: `tail` is touched only by the consumer.
        let mut cur = unsafe { *self.tail.get() };
        loop {
            // SAFETY: `cur` is always a live node owned by this queue.
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            if !std::ptr::eq(next, self.stub) {
                // SAFETY: see `take`.
                let kv = unsafe { (*next).kv.assume_init_read() };
                if !f(kv) {
                    break;
                }
            }
            cur = next;
        }
        self.stats.record(DsOpType::Iterate, DsResult::Success, start);
        DsResult::Success
    }

    /// Walks the chain from the current tail and checks the walked length
    /// against the published element count.
    pub fn verify(&self) -> DsResult {
        let start = now_nanos();
        // SAFETY: `tail` is touched only by the consumer.
        let mut cur = unsafe { *self.tail.get() };
        let mut walked = 0u64;
        loop {
            // SAFETY: `cur` is always a live node owned by this queue.
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            if !std::ptr::eq(next, self.stub) {
                walked += 1;
            }
            cur = next;
        }
        let published = self.stats.snapshot().current_elements;
        debug_assert_list_count_consistent!(walked, published);
        let result = if walked == published {
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
    use crate::config::SMALL_TEST_CONFIG;

    #[test]
    fn insert_pop_fifo_order() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let q = Mpsc::new(&arena).unwrap();
        let mut cursor = Cursor::new();
        assert_eq!(q.insert(&mut cursor, 1, 10), DsResult::Success);
        assert_eq!(q.insert(&mut cursor, 2, 20), DsResult::Success);
        assert_eq!(q.pop(), (DsResult::Success, Some(Kv::new(1, 10))));
        assert_eq!(q.pop(), (DsResult::Success, Some(Kv::new(2, 20))));
        assert_eq!(q.pop(), (DsResult::NotFound, None));
    }

    #[test]
    fn multiple_producer_cursors_interleave() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let q = Mpsc::new(&arena).unwrap();
        let mut c1 = Cursor::new();
        let mut c2 = Cursor::new();
        assert_eq!(q.insert(&mut c1, 1, 1), DsResult::Success);
        assert_eq!(q.insert(&mut c2, 2, 2), DsResult::Success);
        assert_eq!(q.insert(&mut c1, 3, 3), DsResult::Success);

        let mut seen = Vec::new();
        while let (DsResult::Success, Some(kv)) = q.pop() {
            seen.push(kv.key);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn search_iterate_verify() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let q = Mpsc::new(&arena).unwrap();
        let mut cursor = Cursor::new();
        q.insert(&mut cursor, 1, 10);
        q.insert(&mut cursor, 2, 20);
        assert_eq!(q.search(2), (DsResult::Success, Some(20)));
        let mut seen = Vec::new();
        q.iterate(|kv| {
            seen.push(kv.key);
            true
        });
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(q.verify(), DsResult::Success);
    }
}
