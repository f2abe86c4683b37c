//! Result codes, operation vocabulary, and statistics shared by every container.
//!
//! This module is the "no container calls into another container" ambient layer:
//! every `src/*.rs` container module consumes [`DsResult`], [`DsOpType`], [`Metadata`]
//! and [`Stats`] but none of them depend on each other.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Closed result-code enumeration. Every container operation returns one of these.
///
/// `NotFound` and `Busy` are deliberately distinct: the former is a final,
/// logical verdict, the latter is transient contention that a caller must not
/// treat as absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsResult {
    Success,
    NotFound,
    Exists,
    NoMem,
    Invalid,
    Corrupt,
    Busy,
    Full,
}

impl DsResult {
    /// True for the single success variant.
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, DsResult::Success)
    }
}

/// Construction-time errors that do not fit the per-operation [`DsResult`] protocol.
///
/// `DsResult` covers the outcome of an operation on an already-live container;
/// these cover the handful of fallible constructors (arena/config) that run
/// once before any operation exists to report a result for.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum DsError {
    #[error("page_size must be a power of two and at least 64, got {0}")]
    InvalidPageSize(usize),
    #[error("region_size must be a multiple of page_size, got region_size={region_size}, page_size={page_size}")]
    InvalidRegionSize { region_size: usize, page_size: usize },
    #[error("region holds {pages} page(s), need at least 1")]
    RegionTooSmall { pages: usize },
}

/// Operation-type tag, used for statistics and for the harness-facing
/// [`Operation`] dispatch record. Extends the reference API's six-entry
/// enum with `Pop`, matching this spec's optional `pop(out)` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DsOpType {
    Init = 0,
    Insert,
    Delete,
    Search,
    Verify,
    Iterate,
    Pop,
}

impl DsOpType {
    const COUNT: usize = 7;

    const ALL: [DsOpType; Self::COUNT] = [
        DsOpType::Init,
        DsOpType::Insert,
        DsOpType::Delete,
        DsOpType::Search,
        DsOpType::Verify,
        DsOpType::Iterate,
        DsOpType::Pop,
    ];
}

/// Data-structure identity probe, returned by every container's metadata operation.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub name: &'static str,
    pub description: &'static str,
    pub node_size: u32,
    pub requires_locking: bool,
}

/// A single key/value element. No container interprets the bits beyond equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Kv {
    pub key: u64,
    pub value: u64,
}

impl Kv {
    #[inline]
    pub const fn new(key: u64, value: u64) -> Self {
        Self { key, value }
    }
}

/// Dispatch record used by the (external, out-of-scope) harness to describe a
/// single operation. Carried for interface completeness per SPEC_FULL §6; the
/// core never constructs or consumes these itself.
#[derive(Debug, Clone, Copy)]
pub struct Operation {
    pub op_type: DsOpType,
    pub kv: Kv,
    pub result: DsResult,
}

/// Monotonic nanosecond clock, for statistics only — never used for correctness.
#[inline]
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Per-operation-type counters: invocation count, failure count, cumulative
/// wall time. All fields use relaxed ordering — statistics are observational,
/// never linearizing (SPEC_FULL §5).
#[derive(Debug, Default)]
struct OpStats {
    count: AtomicU64,
    failures: AtomicU64,
    total_time_ns: AtomicU64,
}

/// A stable snapshot of [`Stats`], safe to read without further synchronization.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpStatsSnapshot {
    pub count: u64,
    pub failures: u64,
    pub total_time_ns: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub ops: [OpStatsSnapshot; DsOpType::COUNT],
    pub current_elements: u64,
    pub max_elements: u64,
    pub memory_used: u64,
}

impl StatsSnapshot {
    pub fn op(&self, op_type: DsOpType) -> OpStatsSnapshot {
        self.ops[op_type as usize]
    }
}

/// Container-wide statistics, matching `struct ds_stats` from the reference
/// implementation's API template. Every container embeds one and exposes it
/// via `stats()`/`reset_stats()`.
#[derive(Debug, Default)]
pub struct Stats {
    ops: [OpStats; DsOpType::COUNT],
    current_elements: AtomicU64,
    max_elements: AtomicU64,
    memory_used: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one operation. `start_ns` should come from
    /// [`now_nanos`] taken before the operation began.
    pub fn record(&self, op_type: DsOpType, result: DsResult, start_ns: u64) {
        let op = &self.ops[op_type as usize];
        op.count.fetch_add(1, Ordering::Relaxed);
        if !result.is_success() {
            op.failures.fetch_add(1, Ordering::Relaxed);
        }
        let elapsed = now_nanos().saturating_sub(start_ns);
        op.total_time_ns.fetch_add(elapsed, Ordering::Relaxed);
    }

    /// Updates the live-element gauge and the high-water mark, both relaxed.
    pub fn set_current_elements(&self, n: u64) {
        self.current_elements.store(n, Ordering::Relaxed);
        self.max_elements.fetch_max(n, Ordering::Relaxed);
    }

    pub fn add_elements(&self, delta: i64) {
        let prev = if delta >= 0 {
            self.current_elements.fetch_add(delta as u64, Ordering::Relaxed)
        } else {
            self.current_elements.fetch_sub((-delta) as u64, Ordering::Relaxed)
        };
        let new_val = prev.wrapping_add(delta as u64);
        self.max_elements.fetch_max(new_val, Ordering::Relaxed);
    }

    pub fn set_memory_used(&self, bytes: u64) {
        self.memory_used.store(bytes, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for op in &self.ops {
            op.count.store(0, Ordering::Relaxed);
            op.failures.store(0, Ordering::Relaxed);
            op.total_time_ns.store(0, Ordering::Relaxed);
        }
        self.max_elements.store(
            self.current_elements.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut ops = [OpStatsSnapshot::default(); DsOpType::COUNT];
        for (i, op) in self.ops.iter().enumerate() {
            ops[i] = OpStatsSnapshot {
                count: op.count.load(Ordering::Relaxed),
                failures: op.failures.load(Ordering::Relaxed),
                total_time_ns: op.total_time_ns.load(Ordering::Relaxed),
            };
        }
        StatsSnapshot {
            ops,
            current_elements: self.current_elements.load(Ordering::Relaxed),
            max_elements: self.max_elements.load(Ordering::Relaxed),
            memory_used: self.memory_used.load(Ordering::Relaxed),
        }
    }
}
