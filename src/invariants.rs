//! Debug assertion macros for the quantified invariants in `SPEC_FULL.md` §8.
//!
//! These macros provide runtime checks for invariants that would otherwise be
//! silent corruption. They are only active in debug builds
//! (`#[cfg(debug_assertions)]`, via `debug_assert!`), so there is zero
//! overhead in release builds.

// =============================================================================
// INV-SEQ-01: Bounded Count (SPSC ring / MPMC bounded queue occupancy)
// =============================================================================

/// Assert that occupancy does not exceed the usable capacity (one slot is
/// always held back to distinguish full from empty).
///
/// **Invariant**: `0 <= (write - read) <= capacity - 1` (SPEC_FULL §8, SPSC
/// ring).
///
/// Used in: `ring_spsc::RingSpsc::insert`.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity - 1,
            "INV-SEQ-01 violated: count {} exceeds usable capacity {}",
            $count,
            $capacity - 1
        )
    };
}

// =============================================================================
// INV-SEQ-02: Monotonic Progress
// =============================================================================

/// Assert that a sequence number only increases.
///
/// **Invariant**: `new_value >= old_value`.
///
/// Used in: ring write/read index advance, MPMC `enq_pos`/`deq_pos` advance.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-SEQ-02 violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-SEQ-03: No Wrap-Around (extremely unlikely but detectable)
// =============================================================================

/// Assert that we haven't wrapped around the u64 sequence space.
///
/// **Invariant**: at realistic throughput, wrap takes decades; this detects
/// bugs where a sequence jumps backwards unexpectedly rather than normal
/// wrapping arithmetic.
///
/// Used in: `ring_spsc::Ring::commit_internal`.
macro_rules! debug_assert_no_wrap {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new > $old || $old.wrapping_sub($new) > (1u64 << 32),
            "INV-SEQ-03 potential wrap detected: {} went from {} to {} (delta: {})",
            $name,
            $old,
            $new,
            $new.wrapping_sub($old)
        )
    };
}

// =============================================================================
// INV-INIT-01: Initialized Range Check
// =============================================================================

/// Assert that a read targets an initialized ring slot.
///
/// **Invariant**: `buffer[i]` is initialized iff `head <= sequence(i) < tail`.
///
/// Used in: `ring_spsc::Ring::consume_batch` before `assume_init_read()`.
macro_rules! debug_assert_initialized_read {
    ($pos:expr, $head:expr, $tail:expr) => {
        debug_assert!(
            $pos >= $head && $pos < $tail,
            "INV-INIT-01 violated: reading slot at seq {} outside initialized range [{}, {})",
            $pos,
            $head,
            $tail
        )
    };
}

// =============================================================================
// INV-MPMC-01: enq_pos / deq_pos ordering
// =============================================================================

/// Assert the MPMC bounded-queue position invariant.
///
/// **Invariant**: `deq_pos <= enq_pos <= deq_pos + capacity` (SPEC_FULL §8).
///
/// Used in: `mpmc::BoundedMpmc::insert`/`delete` after a successful reservation CAS.
macro_rules! debug_assert_mpmc_window {
    ($enq_pos:expr, $deq_pos:expr, $capacity:expr) => {
        debug_assert!(
            $deq_pos <= $enq_pos && $enq_pos <= $deq_pos.wrapping_add($capacity as u64),
            "INV-MPMC-01 violated: deq_pos {} <= enq_pos {} <= deq_pos + capacity {} failed",
            $deq_pos,
            $enq_pos,
            $deq_pos.wrapping_add($capacity as u64)
        )
    };
}

// =============================================================================
// INV-ARENA-01: Page refcount non-negative
// =============================================================================

/// Assert a page's live-object refcount never underflows.
///
/// **Invariant**: I2 (SPEC_FULL §3) — every live object's page has refcount >= 1.
///
/// Used in: `arena::Page::dec_refcount`.
macro_rules! debug_assert_refcount_nonneg {
    ($prev:expr) => {
        debug_assert!(
            $prev > 0,
            "INV-ARENA-01 violated: page refcount underflowed (was {})",
            $prev
        )
    };
}

// =============================================================================
// INV-LIST-01: count matches live node walk
// =============================================================================

/// Assert the doubly-linked list's `count` field matches an observed walk length.
///
/// **Invariant**: (SPEC_FULL §8, List) `count == |{k : k currently present}|`.
///
/// Used in: `list::List::verify`.
macro_rules! debug_assert_list_count_consistent {
    ($walked:expr, $count:expr) => {
        debug_assert!(
            $walked == $count,
            "INV-LIST-01 violated: walk visited {} nodes but count is {}",
            $walked,
            $count
        )
    };
}

// =============================================================================
// INV-BST-01: leaf count matches published element count
// =============================================================================

/// Assert the BST's leaf count (excluding sentinels) matches its published
/// element counter.
///
/// **Invariant**: (SPEC_FULL §8, BST) leaf count equals published count.
///
/// Used in: `bst::Bst::verify`.
macro_rules! debug_assert_bst_leaf_count {
    ($leaves:expr, $elements:expr) => {
        debug_assert!(
            $leaves == $elements,
            "INV-BST-01 violated: verify found {} leaves but {} elements are published",
            $leaves,
            $elements
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_bst_leaf_count;
pub(crate) use debug_assert_initialized_read;
pub(crate) use debug_assert_list_count_consistent;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_mpmc_window;
pub(crate) use debug_assert_no_wrap;
pub(crate) use debug_assert_refcount_nonneg;
