//! Ck-style single-producer single-consumer FIFO (SPEC_FULL §4.8).
//!
//! Built on the classic stub/dummy-node trick: `head` always points at a
//! retired "stub" node whose payload has already been consumed; the real
//! next value lives in `head.next`. This means `head` (consumer-owned) and
//! `tail` (producer-owned) are plain, non-atomic pointers — the only atomic
//! operation on the fast path is the producer's Release store that links a
//! new node in, observed by the consumer's Acquire load. Retired stub nodes
//! are returned to a small Treiber stack ([`recycle_push`]/[`recycle_pop`])
//! so the producer can reuse them instead of going back to the arena on
//! every insert.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::arena::{Arena, Cursor};
use crate::invariants::debug_assert_list_count_consistent;
use crate::result::{DsOpType, DsResult, Kv, Metadata, Stats, StatsSnapshot, now_nanos};

struct Node {
    next: AtomicPtr<Node>,
    kv: MaybeUninit<Kv>,
}

/// Single-producer single-consumer FIFO of `Kv` pairs, node-allocated out of
/// a shared [`Arena`].
pub struct FifoSpsc<'a> {
    arena: &'a Arena,
    head: UnsafeCell<*mut Node>,
    tail: UnsafeCell<*mut Node>,
    producer_cursor: UnsafeCell<Cursor>,
    recycle_head: AtomicPtr<Node>,
    stats: Stats,
}

// SAFETY: `head`/`tail`/`producer_cursor` are each touched by exactly one
// side (consumer, producer, producer respectively) of a single-producer
// single-consumer usage pattern; `recycle_head` is the only field shared by
// both sides and is always accessed through atomic CAS.
unsafe impl Send for FifoSpsc<'_> {}
unsafe impl Sync for FifoSpsc<'_> {}

impl<'a> FifoSpsc<'a> {
    /// Creates an empty FIFO, allocating its initial stub node from `arena`.
    pub fn new(arena: &'a Arena) -> Result<Self, DsResult> {
        let mut cursor = Cursor::new();
        let stub = arena.alloc::<Node>(&mut cursor)?;
        // SAFETY: freshly allocated, not yet reachable from anywhere.
        unsafe {
            stub.as_ptr().write(Node {
                next: AtomicPtr::new(std::ptr::null_mut()),
                kv: MaybeUninit::uninit(),
            });
        }
        Ok(Self {
            arena,
            head: UnsafeCell::new(stub.as_ptr()),
            tail: UnsafeCell::new(stub.as_ptr()),
            producer_cursor: UnsafeCell::new(cursor),
            recycle_head: AtomicPtr::new(std::ptr::null_mut()),
            stats: Stats::new(),
        })
    }

    pub fn metadata() -> Metadata {
        Metadata {
            name: "fifo_spsc",
            description: "Ck-style single-producer single-consumer FIFO with node recycling",
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

    fn recycle_push(&self, node: *mut Node) {
        loop {
            let head = self.recycle_head.load(Ordering::Relaxed);
            // SAFETY: `node` was just unlinked from the live chain by the
            // consumer and is not reachable from anywhere else.
            unsafe { (*node).next.store(head, Ordering::Relaxed) };
            if self
                .recycle_head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    fn recycle_pop(&self) -> Option<*mut Node> {
        loop {
            let head = self.recycle_head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            // SAFETY: nodes on the recycle stack were retired by the
            // consumer and are only ever linked through `recycle_head`.
            let next = unsafe { (*head).next.load(Ordering::Relaxed) };
            if self
                .recycle_head
                .compare_exchange_weak(head, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return Some(head);
            }
        }
    }

    /// Producer: appends `(key, value)`. Fails only if the arena is
    /// exhausted and no recycled node is available.
    pub fn insert(&self, key: u64, value: u64) -> DsResult {
        let start = now_nanos();

        let node_ptr = if let Some(recycled) = self.recycle_pop() {
            recycled
        } else {
            // SAFETY: `producer_cursor` is touched only here, the producer's
            // single call site.
            let cursor = unsafe { &mut *self.producer_cursor.get() };
            match self.arena.alloc::<Node>(cursor) {
                Ok(p) => p.as_ptr(),
                Err(e) => {
                    self.stats.record(DsOpType::Insert, e, start);
                    return e;
                }
            }
        };

        // SAFETY: `node_ptr` is either freshly allocated or was popped off
        // the recycle stack, in both cases owned solely by the producer here.
        unsafe {
            (*node_ptr).next.store(std::ptr::null_mut(), Ordering::Relaxed);
            (*node_ptr).kv = MaybeUninit::new(Kv::new(key, value));
        }

        // SAFETY: `tail` is touched only by the producer.
        let tail = unsafe { *self.tail.get() };
        // SAFETY: `tail` is the producer's privately tracked last node; the
        // Release store publishes `node_ptr` (and the value written above)
        // to the consumer's Acquire load in `pop`/`search`/`iterate`.
        unsafe { (*tail).next.store(node_ptr, Ordering::Release) };
        // SAFETY: `tail` is touched only by the producer.
        unsafe { *self.tail.get() = node_ptr };

        self.stats.add_elements(1);
        self.stats.record(DsOpType::Insert, DsResult::Success, start);
        DsResult::Success
    }

    /// Consumer: removes and returns the oldest element. `NotFound` if empty.
    pub fn pop(&self) -> (DsResult, Option<Kv>) {
        let start = now_nanos();
        // SAFETY: `head` is touched only by the consumer.
        let head = unsafe { *self.head.get() };
        // SAFETY: `head` always points at a live stub node (initial node or
        // a previously-popped one).
        let next = unsafe { (*head).next.load(Ordering::Acquire) };
        if next.is_null() {
            self.stats.record(DsOpType::Pop, DsResult::NotFound, start);
            return (DsResult::NotFound, None);
        }

        // SAFETY: the Acquire load above synchronizes with the producer's
        // Release store, so `next`'s `kv` field (written before that store)
        // is visible here.
        let value = unsafe { (*next).kv.assume_init_read() };
        // SAFETY: `head` is touched only by the consumer.
        unsafe { *self.head.get() = next };
        self.recycle_push(head);

        self.stats.add_elements(-1);
        self.stats.record(DsOpType::Pop, DsResult::Success, start);
        (DsResult::Success, Some(value))
    }

    /// Consumer: linear scan for `key` without consuming.
    pub fn search(&self, key: u64) -> (DsResult, Option<u64>) {
        let start = now_nanos();
        // SAFETY: `head` is touched only by the consumer.
        let mut cur = unsafe { *self.head.get() };
        loop {
            // SAFETY: `cur` is always a live node owned by this FIFO.
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            // SAFETY: see `pop`.
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

    /// Consumer: calls `f` with every currently queued element, oldest
    /// first, without consuming.
    pub fn iterate<F: FnMut(Kv) -> bool>(&self, mut f: F) -> DsResult {
        let start = now_nanos();
        // SAFETY: `head` is touched only by the consumer.
        let mut cur = unsafe { *self.head.get() };
        loop {
            // SAFETY: `cur` is always a live node owned by this FIFO.
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            // SAFETY: see `pop`.
            let kv = unsafe { (*next).kv.assume_init_read() };
            if !f(kv) {
                break;
            }
            cur = next;
        }
        self.stats.record(DsOpType::Iterate, DsResult::Success, start);
        DsResult::Success
    }

    /// Walks the live chain and checks the walked length against the
    /// published element count.
    pub fn verify(&self) -> DsResult {
        let start = now_nanos();
        // SAFETY: `head` is touched only by the consumer; `verify` is a
        // consumer-side operation.
        let mut cur = unsafe { *self.head.get() };
        let mut walked = 0u64;
        loop {
            // SAFETY: `cur` is always a live node owned by this FIFO.
            let next = unsafe { (*cur).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            walked += 1;
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
