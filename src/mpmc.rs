//! Vyukov bounded multi-producer multi-consumer array queue (SPEC_FULL §4.5).
//!
//! Each slot carries its own sequence number; a producer or consumer reads
//! that sequence to tell whether the slot is free for it, compares it
//! against its own reservation position (`dif = seq - pos`), and on a match
//! takes it with a single CAS on the shared `enq_pos`/`deq_pos` counter. A
//! losing CAS means another thread raced it to the same slot; the thread
//! re-reads and retries up to [`MAX_CAS_RETRIES`] times before giving up with
//! [`DsResult::Busy`] (SPEC_FULL §5, bounded retry budget).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crate::atomics::{AtomicCell64, Ordering};
use crate::backoff::Backoff;
use crate::invariants::debug_assert_mpmc_window;
use crate::result::{DsOpType, DsResult, Kv, Metadata, Stats, StatsSnapshot, now_nanos};

/// Upper bound on CAS retries before an `insert`/`delete` gives up and
/// reports transient contention rather than spinning forever.
const MAX_CAS_RETRIES: u32 = 1000;

struct Cell {
    seq: AtomicCell64,
    kv: UnsafeCell<MaybeUninit<Kv>>,
}

/// Bounded MPMC queue of `Kv` pairs with a fixed, power-of-two capacity.
pub struct BoundedMpmc {
    buffer: Box<[Cell]>,
    mask: usize,
    enq_pos: AtomicCell64,
    deq_pos: AtomicCell64,
    stats: Stats,
}

// SAFETY: every slot's `kv` is guarded by its own `seq` sequence number,
// which is only ever advanced by the single producer/consumer that won the
// `enq_pos`/`deq_pos` CAS for that slot; the sequence protocol ensures no
// two threads ever read or write the same slot's `kv` concurrently.
unsafe impl Send for BoundedMpmc {}
unsafe impl Sync for BoundedMpmc {}

impl BoundedMpmc {
    /// Creates a queue with room for `capacity` elements. Returns `Invalid`
    /// unless `capacity` is a power of two `>= 2`.
    pub fn new(capacity: usize) -> Result<Self, DsResult> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(DsResult::Invalid);
        }
        let buffer = (0..capacity)
            .map(|i| Cell {
                seq: AtomicCell64::new(i as u64),
                kv: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            buffer,
            mask: capacity - 1,
            enq_pos: AtomicCell64::new(0),
            deq_pos: AtomicCell64::new(0),
            stats: Stats::new(),
        })
    }

    pub fn metadata() -> Metadata {
        Metadata {
            name: "mpmc",
            description: "Vyukov bounded multi-producer multi-consumer array queue",
            node_size: std::mem::size_of::<Cell>() as u32,
            requires_locking: false,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Approximate occupancy; racy under concurrent access, like the
    /// reference implementation's `len()`.
    pub fn len(&self) -> usize {
        let tail = self.enq_pos.load(Ordering::Acquire);
        let head = self.deq_pos.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Inserts `(key, value)`. Returns `Full` if the queue is at capacity,
    /// `Busy` if [`MAX_CAS_RETRIES`] is exceeded under contention.
    pub fn insert(&self, key: u64, value: u64) -> DsResult {
        let start = now_nanos();
        let mut pos = self.enq_pos.load(Ordering::Relaxed);
        let mut backoff = Backoff::new();

        for _ in 0..MAX_CAS_RETRIES {
            let idx = (pos as usize) & self.mask;
            let cell = &self.buffer[idx];
            let seq = cell.seq.load(Ordering::Acquire);
            let dif = seq as i64 - pos as i64;

            if dif == 0 {
                let prev = self.enq_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                if prev == pos {
                    // SAFETY: winning this CAS makes this thread the sole
                    // writer of slot `idx` until it stores the next-lap
                    // sequence below.
                    unsafe { (*cell.kv.get()) = MaybeUninit::new(Kv::new(key, value)) };
                    cell.seq.store(pos + 1, Ordering::Release);
                    debug_assert_mpmc_window!(
                        pos + 1,
                        self.deq_pos.load(Ordering::Relaxed),
                        self.capacity()
                    );
                    self.stats.add_elements(1);
                    self.stats.record(DsOpType::Insert, DsResult::Success, start);
                    return DsResult::Success;
                }
                pos = prev;
                backoff.snooze();
            } else if dif < 0 {
                self.stats.record(DsOpType::Insert, DsResult::Full, start);
                return DsResult::Full;
            } else {
                pos = self.enq_pos.load(Ordering::Relaxed);
                backoff.snooze();
            }
        }

        self.stats.record(DsOpType::Insert, DsResult::Busy, start);
        DsResult::Busy
    }

    /// Removes and returns the oldest element. Returns `NotFound` if the
    /// queue is empty, `Busy` if [`MAX_CAS_RETRIES`] is exceeded under
    /// contention.
    pub fn delete(&self) -> (DsResult, Option<Kv>) {
        let start = now_nanos();
        let mut pos = self.deq_pos.load(Ordering::Relaxed);
        let mut backoff = Backoff::new();

        for _ in 0..MAX_CAS_RETRIES {
            let idx = (pos as usize) & self.mask;
            let cell = &self.buffer[idx];
            let seq = cell.seq.load(Ordering::Acquire);
            let dif = seq as i64 - (pos as i64 + 1);

            if dif == 0 {
                let prev = self.deq_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                if prev == pos {
                    // SAFETY: winning this CAS makes this thread the sole
                    // reader of slot `idx`; the Acquire load of `seq` above
                    // synchronizes with the producer's Release store.
                    let value = unsafe { (*cell.kv.get()).assume_init_read() };
                    cell.seq.store(pos + self.mask as u64 + 1, Ordering::Release);
                    self.stats.add_elements(-1);
                    self.stats.record(DsOpType::Delete, DsResult::Success, start);
                    return (DsResult::Success, Some(value));
                }
                pos = prev;
                backoff.snooze();
            } else if dif < 0 {
                self.stats.record(DsOpType::Delete, DsResult::NotFound, start);
                return (DsResult::NotFound, None);
            } else {
                pos = self.deq_pos.load(Ordering::Relaxed);
                backoff.snooze();
            }
        }

        self.stats.record(DsOpType::Delete, DsResult::Busy, start);
        (DsResult::Busy, None)
    }

    /// Best-effort scan of the currently occupied window for `key`. Racy
    /// under concurrent inserts/deletes, like [`BoundedMpmc::len`].
    pub fn search(&self, key: u64) -> (DsResult, Option<u64>) {
        let start = now_nanos();
        let head = self.deq_pos.load(Ordering::Acquire);
        let tail = self.enq_pos.load(Ordering::Acquire);
        let mut pos = head;
        while pos != tail {
            let idx = (pos as usize) & self.mask;
            let cell = &self.buffer[idx];
            if cell.seq.load(Ordering::Acquire) == pos + 1 {
                // SAFETY: `seq == pos + 1` means a producer has published
                // this slot and no consumer has claimed it yet as of the
                // load above.
                let kv = unsafe { (*cell.kv.get()).assume_init_read() };
                if kv.key == key {
                    self.stats.record(DsOpType::Search, DsResult::Success, start);
                    return (DsResult::Success, Some(kv.value));
                }
            }
            pos = pos.wrapping_add(1);
        }
        self.stats.record(DsOpType::Search, DsResult::NotFound, start);
        (DsResult::NotFound, None)
    }

    /// Best-effort scan over the currently occupied window, oldest first.
    /// Racy under concurrent access, like [`BoundedMpmc::search`].
    pub fn iterate<F: FnMut(Kv) -> bool>(&self, mut f: F) -> DsResult {
        let start = now_nanos();
        let head = self.deq_pos.load(Ordering::Acquire);
        let tail = self.enq_pos.load(Ordering::Acquire);
        let mut pos = head;
        while pos != tail {
            let idx = (pos as usize) & self.mask;
            let cell = &self.buffer[idx];
            if cell.seq.load(Ordering::Acquire) == pos + 1 {
                // SAFETY: see `search`.
                let kv = unsafe { (*cell.kv.get()).assume_init_read() };
                if !f(kv) {
                    break;
                }
            }
            pos = pos.wrapping_add(1);
        }
        self.stats.record(DsOpType::Iterate, DsResult::Success, start);
        DsResult::Success
    }

    /// Checks INV-MPMC-01: `deq_pos <= enq_pos <= deq_pos + capacity`.
    pub fn verify(&self) -> DsResult {
        let start = now_nanos();
        let deq = self.deq_pos.load(Ordering::Acquire);
        let enq = self.enq_pos.load(Ordering::Acquire);
        let result = if deq <= enq && enq <= deq.wrapping_add(self.capacity() as u64) {
            DsResult::Success
        } else {
            DsResult::Corrupt
        };
        self.stats.record(DsOpType::Verify, result, start);
        result
    }
}
