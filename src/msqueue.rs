//! Michael-Scott lock-free FIFO queue (SPEC_FULL §4.4).
//!
//! Classic two-pointer (`head`/`tail`) algorithm with a permanent dummy node
//! at the front. A producer that finds `tail.next` already linked helps
//! swing `tail` forward before retrying its own CAS (cooperative
//! tail-swing); a consumer that finds `head == tail` but `tail.next`
//! non-null helps swing `tail` the same way before retrying its own
//! dequeue. Both the enqueue and dequeue CAS loops are bounded by
//! [`MAX_CAS_RETRIES`] (SPEC_FULL §5), past which the caller sees
//! [`DsResult::Busy`] rather than spinning unboundedly.
//!
//! Per SPEC_FULL §9 (reclamation left open), a dequeued node becomes the new
//! dummy and the old dummy is never returned to the arena — this queue never
//! calls [`crate::arena::Arena::free`], trading memory for the absence of
//! any hazard-pointer/epoch scheme to make that free safe under concurrent
//! readers.

use std::mem::MaybeUninit;

use crate::arena::{Arena, Cursor};
use crate::atomics::{AtomicCellPtr, Ordering};
use crate::invariants::debug_assert_list_count_consistent;
use crate::result::{DsOpType, DsResult, Kv, Metadata, Stats, StatsSnapshot, now_nanos};

/// Upper bound on CAS retries in `insert`/`delete` before reporting
/// transient contention instead of spinning forever.
const MAX_CAS_RETRIES: u32 = 1000;

struct Node {
    next: AtomicCellPtr<Node>,
    kv: MaybeUninit<Kv>,
}

/// Lock-free Michael-Scott FIFO queue of `Kv` pairs.
pub struct MsQueue<'a> {
    arena: &'a Arena,
    head: AtomicCellPtr<Node>,
    tail: AtomicCellPtr<Node>,
    stats: Stats,
}

// SAFETY: every reachable `Node` is published via a Release CAS/store and
// observed via a matching Acquire load before being dereferenced; `head` and
// `tail` are only ever advanced through CAS, never written unconditionally.
unsafe impl Send for MsQueue<'_> {}
unsafe impl Sync for MsQueue<'_> {}

impl<'a> MsQueue<'a> {
    /// Creates an empty queue, allocating its permanent dummy node from
    /// `arena` via a throwaway cursor.
    pub fn new(arena: &'a Arena) -> Result<Self, DsResult> {
        let mut cursor = Cursor::new();
        let dummy = arena.alloc::<Node>(&mut cursor)?;
        // SAFETY: freshly allocated, not yet reachable from anywhere.
        unsafe {
            dummy.as_ptr().write(Node {
                next: AtomicCellPtr::new(std::ptr::null_mut()),
                kv: MaybeUninit::uninit(),
            });
        }
        Ok(Self {
            arena,
            head: AtomicCellPtr::new(dummy.as_ptr()),
            tail: AtomicCellPtr::new(dummy.as_ptr()),
            stats: Stats::new(),
        })
    }

    pub fn metadata() -> Metadata {
        Metadata {
            name: "msqueue",
            description: "Michael-Scott lock-free FIFO queue",
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

    /// Enqueues `(key, value)`. `cursor` is the calling producer's own
    /// allocation context. Returns `NoMem` if the arena is exhausted, `Busy`
    /// if [`MAX_CAS_RETRIES`] is exceeded under contention.
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
        unsafe {
            (*node).next.store(std::ptr::null_mut(), Ordering::Relaxed);
            (*node).kv = MaybeUninit::new(Kv::new(key, value));
        }

        for _ in 0..MAX_CAS_RETRIES {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: `tail` was just loaded from a live atomic; nodes are
            // never freed while reachable (see module docs).
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };

            if !std::ptr::eq(tail, self.tail.load(Ordering::Acquire)) {
                continue;
            }

            if next.is_null() {
                // SAFETY: `tail` is a live node.
                let cas = unsafe {
                    (*tail).next.compare_exchange(
                        std::ptr::null_mut(),
                        node,
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                };
                if cas.is_null() {
                    // Linked in; best-effort tail swing, failure is fine —
                    // the next producer or consumer will help it along.
                    let _ = self.tail.compare_exchange(
                        tail,
                        node,
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                    self.stats.add_elements(1);
                    self.stats.record(DsOpType::Insert, DsResult::Success, start);
                    return DsResult::Success;
                }
            } else {
                // Cooperative tail-swing: another producer linked a node but
                // hasn't advanced `tail` yet. Help it, then retry.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
            }
        }

        self.stats.record(DsOpType::Insert, DsResult::Busy, start);
        DsResult::Busy
    }

    /// Dequeues the oldest element. Returns `NotFound` if the queue is
    /// empty, `Busy` if [`MAX_CAS_RETRIES`] is exceeded under contention.
    pub fn delete(&self) -> (DsResult, Option<Kv>) {
        let start = now_nanos();
        for _ in 0..MAX_CAS_RETRIES {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: `head` is a live node (the permanent dummy, or a
            // previously dequeued node that became the new dummy).
            let next = unsafe { (*head).next.load(Ordering::Acquire) };

            if !std::ptr::eq(head, self.head.load(Ordering::Acquire)) {
                continue;
            }

            if std::ptr::eq(head, tail) {
                if next.is_null() {
                    self.stats.record(DsOpType::Delete, DsResult::NotFound, start);
                    return (DsResult::NotFound, None);
                }
                // Cooperative tail-swing: a producer linked a node but
                // hasn't advanced `tail` yet. Help it, then retry.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                continue;
            }

            // SAFETY: the Acquire load of `next` above synchronizes with the
            // producer's Release store that linked it; `next`'s `kv` was
            // written before that store.
            let value = unsafe { (*next).kv.assume_init_read() };
            let cas = self.head.compare_exchange(head, next, Ordering::Release, Ordering::Relaxed);
            if std::ptr::eq(cas, head) {
                self.stats.add_elements(-1);
                self.stats.record(DsOpType::Delete, DsResult::Success, start);
                return (DsResult::Success, Some(value));
            }
        }

        self.stats.record(DsOpType::Delete, DsResult::Busy, start);
        (DsResult::Busy, None)
    }

    /// Best-effort scan from the current head for `key`. Racy under
    /// concurrent inserts/deletes.
    pub fn search(&self, key: u64) -> (DsResult, Option<u64>) {
        let start = now_nanos();
        let mut cur = self.head.load(Ordering::Acquire);
        loop {
            // SAFETY: `cur` is always a live node.
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            // SAFETY: see `delete`.
            let kv = unsafe { (*next).kv.assume_init_read() };
            if kv.key == key {
                self.stats.record(DsOpType::Search, DsResult::Success, start);
                return (DsResult::Success, Some(kv.value));
            }
            cur = next;
        }
        self.stats.record(DsOpType::Search, DsResult::NotFound, start);
        (DsResult::NotFound, None)
    }

    /// Best-effort walk over every currently linked element, oldest first.
    /// Racy under concurrent access, like [`MsQueue::search`].
    pub fn iterate<F: FnMut(Kv) -> bool>(&self, mut f: F) -> DsResult {
        let start = now_nanos();
        let mut cur = self.head.load(Ordering::Acquire);
        loop {
            // SAFETY: `cur` is always a live node.
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            // SAFETY: see `delete`.
            let kv = unsafe { (*next).kv.assume_init_read() };
            if !f(kv) {
                break;
            }
            cur = next;
        }
        self.stats.record(DsOpType::Iterate, DsResult::Success, start);
        DsResult::Success
    }

    /// Walks the chain from `head` and checks the walked length against the
    /// published element count, tolerating up to `slack` of drift (SPEC_FULL
    /// §9 Decision 2) since a concurrent insert/delete can run between the
    /// walk and the count snapshot. Call sites without a specific tolerance
    /// in mind should pass `100`.
    pub fn verify(&self, slack: u64) -> DsResult {
        let start = now_nanos();
        let mut cur = self.head.load(Ordering::Acquire);
        let mut walked = 0u64;
        loop {
            // SAFETY: `cur` is always a live node.
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            walked += 1;
            cur = next;
        }
        let published = self.stats.snapshot().current_elements;
        debug_assert_list_count_consistent!(walked, published);
        let result = if walked.abs_diff(published) <= slack {
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
    fn insert_delete_fifo_order() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let q = MsQueue::new(&arena).unwrap();
        let mut cursor = Cursor::new();
        assert_eq!(q.insert(&mut cursor, 1, 10), DsResult::Success);
        assert_eq!(q.insert(&mut cursor, 2, 20), DsResult::Success);
        assert_eq!(q.delete(), (DsResult::Success, Some(Kv::new(1, 10))));
        assert_eq!(q.delete(), (DsResult::Success, Some(Kv::new(2, 20))));
        assert_eq!(q.delete(), (DsResult::NotFound, None));
    }

    #[test]
    fn many_producers_one_consumer_preserves_all_elements() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let q = MsQueue::new(&arena).unwrap();
        let mut c1 = Cursor::new();
        let mut c2 = Cursor::new();
        for i in 0..10u64 {
            let cursor = if i % 2 == 0 { &mut c1 } else { &mut c2 };
            assert_eq!(q.insert(cursor, i, i), DsResult::Success);
        }
        let mut seen = Vec::new();
        while let (DsResult::Success, Some(kv)) = q.delete() {
            seen.push(kv.key);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn search_iterate_verify() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let q = MsQueue::new(&arena).unwrap();
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
        assert_eq!(q.verify(100), DsResult::Success);
    }
}
