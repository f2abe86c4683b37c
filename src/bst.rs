//! Ellen / Fatourou / Ruppert / van Breugel non-blocking binary search tree
//! (SPEC_FULL §4.9).
//!
//! Leaf-oriented: every key-value pair lives in a leaf, internal nodes only
//! carry routing keys, and two sentinel leaves (`INF1 < INF2`, both larger
//! than any real key) keep the root permanently internal. Every internal
//! node carries an `update` word packing a 2-bit state (`Clean`/`IFlag`/
//! `Mark`/`DFlag`) with a pointer to the descriptor driving the in-flight
//! operation, if any. A thread that finds a non-`Clean` node it needs to
//! touch *helps* that operation to completion before retrying its own —
//! this is what makes progress non-blocking: no thread can be stalled
//! forever by another thread's crash or preemption. Helping is always
//! bounded iteration, never recursion.
//!
//! `Node` is a single flat struct carrying both leaf and internal fields
//! (discriminated by `kind`) rather than a real Rust enum, so that `left`/
//! `right`/`update` can be addressed as plain fields from helper code that
//! doesn't know which case it has yet — mirroring the reference
//! implementation's `bst_tree_node` base-struct pattern, collapsed into one
//! allocation.

use std::collections::VecDeque;
use std::ptr;

use crate::arena::{Arena, Cursor};
use crate::atomics::{AtomicCell64, AtomicCellPtr, Ordering};
use crate::invariants::debug_assert_bst_leaf_count;
use crate::result::{DsOpType, DsResult, Kv, Metadata, Stats, StatsSnapshot, now_nanos};

/// Upper bound on tree depth a search will descend before giving up
/// (SPEC_FULL §9 Decision). Not a balance guarantee — just a sanity bound.
const MAX_DEPTH: usize = 64;
/// Upper bound on retries for `insert`/`delete` under contention
/// (`BST_MAX_RETRIES` in the reference implementation).
const MAX_CAS_RETRIES: u32 = 100;

const INF1: u64 = u64::MAX - 1;
const INF2: u64 = u64::MAX;

#[inline]
fn is_sentinel(key: u64) -> bool {
    key == INF1 || key == INF2
}

const TAG_MASK: u64 = 0b11;
const TAG_CLEAN: u64 = 0;
const TAG_IFLAG: u64 = 1;
const TAG_MARK: u64 = 2;
const TAG_DFLAG: u64 = 3;
const CLEAN_WORD: u64 = 0;

#[inline]
fn pack(tag: u64, ptr: *mut u8) -> u64 {
    (ptr as u64) | tag
}

#[inline]
fn tag_of(word: u64) -> u64 {
    word & TAG_MASK
}

#[inline]
fn ptr_of(word: u64) -> *mut u8 {
    (word & !TAG_MASK) as *mut u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Internal,
    Leaf,
}

struct Node {
    kind: NodeKind,
    /// Routing key (internal) or the stored key (leaf).
    key: u64,
    /// Unused for internal nodes.
    value: u64,
    /// Unused for leaf nodes.
    left: AtomicCellPtr<Node>,
    /// Unused for leaf nodes.
    right: AtomicCellPtr<Node>,
    /// Unused for leaf nodes. Packs `(state, descriptor pointer)`.
    update: AtomicCell64,
}

/// Insert descriptor: install `new_internal` in place of `l`, which is
/// `p`'s right child if `l_is_right`, else its left child.
struct IInfo {
    p: *mut Node,
    new_internal: *mut Node,
    l: *mut Node,
    l_is_right: bool,
}

/// Delete descriptor: once `p` is marked, splice `p`'s surviving child
/// (the sibling of `l`) into `gp` in place of `p`.
struct DInfo {
    gp: *mut Node,
    p: *mut Node,
    l: *mut Node,
    p_is_right: bool,
    l_is_right: bool,
}

struct Located {
    gp: *mut Node,
    p: *mut Node,
    l: *mut Node,
    p_is_right: bool,
    l_is_right: bool,
}

/// Ellen-style non-blocking binary search tree of `Kv` pairs.
pub struct Bst<'a> {
    arena: &'a Arena,
    root: *mut Node,
    stats: Stats,
}

// SAFETY: every pointer reachable through `root` is published via a
// Release CAS and observed via a matching Acquire load before being
// dereferenced; `update` words are the sole coordination point for
// concurrent mutation and are always read before any corresponding pointer.
unsafe impl Send for Bst<'_> {}
unsafe impl Sync for Bst<'_> {}

impl<'a> Bst<'a> {
    /// Creates an empty tree: a root internal node (routing key `INF2`)
    /// whose children are the two sentinel leaves.
    pub fn new(arena: &'a Arena) -> Result<Self, DsResult> {
        let mut cursor = Cursor::new();
        let leaf_inf1 = arena.alloc::<Node>(&mut cursor)?;
        let leaf_inf2 = arena.alloc::<Node>(&mut cursor)?;
        let root = arena.alloc::<Node>(&mut cursor)?;

        // SAFETY: all three are freshly allocated and not yet reachable.
        unsafe {
            leaf_inf1.as_ptr().write(Node {
                kind: NodeKind::Leaf,
                key: INF1,
                value: 0,
                left: AtomicCellPtr::new(ptr::null_mut()),
                right: AtomicCellPtr::new(ptr::null_mut()),
                update: AtomicCell64::new(CLEAN_WORD),
            });
            leaf_inf2.as_ptr().write(Node {
                kind: NodeKind::Leaf,
                key: INF2,
                value: 0,
                left: AtomicCellPtr::new(ptr::null_mut()),
                right: AtomicCellPtr::new(ptr::null_mut()),
                update: AtomicCell64::new(CLEAN_WORD),
            });
            root.as_ptr().write(Node {
                kind: NodeKind::Internal,
                key: INF2,
                value: 0,
                left: AtomicCellPtr::new(leaf_inf1.as_ptr()),
                right: AtomicCellPtr::new(leaf_inf2.as_ptr()),
                update: AtomicCell64::new(CLEAN_WORD),
            });
        }

        Ok(Self {
            arena,
            root: root.as_ptr(),
            stats: Stats::new(),
        })
    }

    pub fn metadata() -> Metadata {
        Metadata {
            name: "bst",
            description: "Ellen-Fatourou-Ruppert-van Breugel non-blocking binary search tree",
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

    /// Descends from the root, tracking the last internal node (`p`), the
    /// one before it (`gp`), and which child each step took. Bounded by
    /// [`MAX_DEPTH`].
    fn locate(&self, key: u64) -> Located {
        let mut gp: *mut Node = ptr::null_mut();
        let mut p: *mut Node = ptr::null_mut();
        let mut p_is_right = false;
        let mut l_is_right = false;
        let mut node = self.root;

        for _ in 0..MAX_DEPTH {
            // SAFETY: `node` starts at `self.root` and is only ever advanced
            // to a child loaded with Acquire from a live internal node.
            let n = unsafe { &*node };
            if n.kind == NodeKind::Leaf {
                break;
            }
            gp = p;
            p_is_right = l_is_right;
            p = node;
            if key < n.key {
                node = n.left.load(Ordering::Acquire);
                l_is_right = false;
            } else {
                node = n.right.load(Ordering::Acquire);
                l_is_right = true;
            }
        }

        Located {
            gp,
            p,
            l: node,
            p_is_right,
            l_is_right,
        }
    }

    fn cas_child(&self, parent: *mut Node, is_right: bool, expected: *mut Node, new: *mut Node) {
        // SAFETY: `parent` is always a live internal node reached via `locate`
        // or stored in a descriptor produced by `locate`.
        let p = unsafe { &*parent };
        let field = if is_right { &p.right } else { &p.left };
        let _ = field.compare_exchange(expected, new, Ordering::AcqRel, Ordering::Relaxed);
    }

    fn help(&self, word: u64) {
        match tag_of(word) {
            TAG_IFLAG => self.help_insert(ptr_of(word) as *mut IInfo),
            TAG_DFLAG => self.help_delete(ptr_of(word) as *mut DInfo),
            TAG_MARK => self.help_marked(ptr_of(word) as *mut DInfo),
            _ => {}
        }
    }

    fn help_insert(&self, iinfo: *mut IInfo) {
        // SAFETY: descriptors are only ever reached through an `update` word
        // that is still tagged with the matching state, which this function
        // is about to clear; no descriptor is freed while reachable.
        let info = unsafe { &*iinfo };
        self.cas_child(info.p, info.l_is_right, info.l, info.new_internal);
        let p = unsafe { &*info.p };
        let expected = pack(TAG_IFLAG, iinfo as *mut u8);
        let _ = p.update.compare_exchange(expected, CLEAN_WORD, Ordering::AcqRel, Ordering::Relaxed);
    }

    fn help_delete(&self, dinfo: *mut DInfo) {
        // SAFETY: see `help_insert`.
        let info = unsafe { &*dinfo };
        let p = unsafe { &*info.p };
        let marked = pack(TAG_MARK, dinfo as *mut u8);
        let _ = p.update.compare_exchange(CLEAN_WORD, marked, Ordering::AcqRel, Ordering::Relaxed);
        self.help_marked(dinfo);
    }

    fn help_marked(&self, dinfo: *mut DInfo) {
        // SAFETY: see `help_insert`.
        let info = unsafe { &*dinfo };
        let p = unsafe { &*info.p };
        let other = if info.l_is_right {
            p.left.load(Ordering::Acquire)
        } else {
            p.right.load(Ordering::Acquire)
        };
        self.cas_child(info.gp, info.p_is_right, info.p, other);
        let gp = unsafe { &*info.gp };
        let expected = pack(TAG_DFLAG, dinfo as *mut u8);
        let _ = gp.update.compare_exchange(expected, CLEAN_WORD, Ordering::AcqRel, Ordering::Relaxed);
    }

    /// Inserts `(key, value)`. `cursor` is the calling thread's own
    /// allocation context. `key` equal to either sentinel is `Invalid`. If
    /// `key` is already present its value is updated in place (a fresh leaf
    /// is CAS-swapped in for the old one) rather than rejected; `Busy` is
    /// returned if [`MAX_CAS_RETRIES`] is exceeded under contention.
    pub fn insert(&self, cursor: &mut Cursor, key: u64, value: u64) -> DsResult {
        if is_sentinel(key) {
            return DsResult::Invalid;
        }
        let start = now_nanos();

        for _ in 0..MAX_CAS_RETRIES {
            let loc = self.locate(key);
            // SAFETY: `loc.l` is a live leaf (or, pathologically, the node
            // at which `MAX_DEPTH` was exhausted; see `locate`).
            let leaf = unsafe { &*loc.l };
            if loc.p.is_null() {
                continue;
            }

            let p_node = unsafe { &*loc.p };
            let p_update = p_node.update.load(Ordering::Acquire);
            if tag_of(p_update) != TAG_CLEAN {
                self.help(p_update);
                continue;
            }

            if leaf.kind == NodeKind::Leaf && leaf.key == key {
                let updated = match self.arena.alloc::<Node>(cursor) {
                    Ok(p) => p.as_ptr(),
                    Err(e) => {
                        self.stats.record(DsOpType::Insert, e, start);
                        return e;
                    }
                };
                // SAFETY: freshly allocated, not yet reachable from anywhere.
                unsafe {
                    updated.write(Node {
                        kind: NodeKind::Leaf,
                        key,
                        value,
                        left: AtomicCellPtr::new(ptr::null_mut()),
                        right: AtomicCellPtr::new(ptr::null_mut()),
                        update: AtomicCell64::new(CLEAN_WORD),
                    });
                }
                let field = if loc.l_is_right { &p_node.right } else { &p_node.left };
                let prev = field.compare_exchange(loc.l, updated, Ordering::AcqRel, Ordering::Relaxed);
                if std::ptr::eq(prev, loc.l) {
                    self.stats.record(DsOpType::Insert, DsResult::Success, start);
                    return DsResult::Success;
                }
                continue;
            }

            let new_leaf = match self.arena.alloc::<Node>(cursor) {
                Ok(p) => p.as_ptr(),
                Err(e) => {
                    self.stats.record(DsOpType::Insert, e, start);
                    return e;
                }
            };
            let new_internal = match self.arena.alloc::<Node>(cursor) {
                Ok(p) => p.as_ptr(),
                Err(e) => {
                    self.stats.record(DsOpType::Insert, e, start);
                    return e;
                }
            };
            let iinfo = match self.arena.alloc::<IInfo>(cursor) {
                Ok(p) => p.as_ptr(),
                Err(e) => {
                    self.stats.record(DsOpType::Insert, e, start);
                    return e;
                }
            };

            // SAFETY: all three are freshly allocated and not yet reachable.
            unsafe {
                new_leaf.write(Node {
                    kind: NodeKind::Leaf,
                    key,
                    value,
                    left: AtomicCellPtr::new(ptr::null_mut()),
                    right: AtomicCellPtr::new(ptr::null_mut()),
                    update: AtomicCell64::new(CLEAN_WORD),
                });
                let (left, right, routing_key) = if key < leaf.key {
                    (new_leaf, loc.l, leaf.key)
                } else {
                    (loc.l, new_leaf, key)
                };
                new_internal.write(Node {
                    kind: NodeKind::Internal,
                    key: routing_key,
                    value: 0,
                    left: AtomicCellPtr::new(left),
                    right: AtomicCellPtr::new(right),
                    update: AtomicCell64::new(CLEAN_WORD),
                });
                iinfo.write(IInfo {
                    p: loc.p,
                    new_internal,
                    l: loc.l,
                    l_is_right: loc.l_is_right,
                });
            }

            let cas_word = pack(TAG_IFLAG, iinfo as *mut u8);
            let prev = p_node.update.compare_exchange(p_update, cas_word, Ordering::AcqRel, Ordering::Acquire);
            if prev == p_update {
                self.help_insert(iinfo);
                self.stats.add_elements(1);
                self.stats.record(DsOpType::Insert, DsResult::Success, start);
                return DsResult::Success;
            }
            // Lost the race; `new_leaf`/`new_internal`/`iinfo` are leaked
            // (reclamation is out of scope, SPEC_FULL §9) and we retry.
        }

        self.stats.record(DsOpType::Insert, DsResult::Busy, start);
        DsResult::Busy
    }

    /// Removes `key`. `cursor` is the calling thread's own allocation
    /// context (descriptors are arena-allocated). Returns `NotFound` if
    /// absent, `Busy` if [`MAX_CAS_RETRIES`] is exceeded under contention.
    pub fn delete(&self, cursor: &mut Cursor, key: u64) -> DsResult {
        let start = now_nanos();

        for _ in 0..MAX_CAS_RETRIES {
            let loc = self.locate(key);
            // SAFETY: see `insert`.
            let leaf = unsafe { &*loc.l };
            if leaf.kind != NodeKind::Leaf || leaf.key != key {
                self.stats.record(DsOpType::Delete, DsResult::NotFound, start);
                return DsResult::NotFound;
            }
            if loc.gp.is_null() || loc.p.is_null() {
                continue;
            }

            let gp_node = unsafe { &*loc.gp };
            let gp_update = gp_node.update.load(Ordering::Acquire);
            if tag_of(gp_update) != TAG_CLEAN {
                self.help(gp_update);
                continue;
            }
            let p_node = unsafe { &*loc.p };
            let p_update = p_node.update.load(Ordering::Acquire);
            if tag_of(p_update) != TAG_CLEAN {
                self.help(p_update);
                continue;
            }

            let dinfo = match self.arena.alloc::<DInfo>(cursor) {
                Ok(p) => p.as_ptr(),
                Err(e) => {
                    self.stats.record(DsOpType::Delete, e, start);
                    return e;
                }
            };
            // SAFETY: freshly allocated, not yet reachable.
            unsafe {
                dinfo.write(DInfo {
                    gp: loc.gp,
                    p: loc.p,
                    l: loc.l,
                    p_is_right: loc.p_is_right,
                    l_is_right: loc.l_is_right,
                });
            }

            let cas_word = pack(TAG_DFLAG, dinfo as *mut u8);
            let prev = gp_node.update.compare_exchange(gp_update, cas_word, Ordering::AcqRel, Ordering::Acquire);
            if prev == gp_update {
                self.help_delete(dinfo);
                self.stats.add_elements(-1);
                self.stats.record(DsOpType::Delete, DsResult::Success, start);
                return DsResult::Success;
            }
            // Lost the race; help whoever won, `dinfo` is leaked, retry.
            self.help(prev);
        }

        self.stats.record(DsOpType::Delete, DsResult::Busy, start);
        DsResult::Busy
    }

    /// Wait-free lookup: no flags, no helping, just a bounded descent.
    pub fn search(&self, key: u64) -> (DsResult, Option<u64>) {
        let start = now_nanos();
        let loc = self.locate(key);
        // SAFETY: see `insert`.
        let leaf = unsafe { &*loc.l };
        if leaf.kind == NodeKind::Leaf && !is_sentinel(leaf.key) && leaf.key == key {
            self.stats.record(DsOpType::Search, DsResult::Success, start);
            (DsResult::Success, Some(leaf.value))
        } else {
            self.stats.record(DsOpType::Search, DsResult::NotFound, start);
            (DsResult::NotFound, None)
        }
    }

    /// Removes and returns the minimum element (leftmost non-sentinel
    /// leaf), useful for priority-queue-style consumption. `NotFound` if
    /// the tree holds no real elements.
    pub fn pop(&self, cursor: &mut Cursor) -> (DsResult, Option<Kv>) {
        let start = now_nanos();
        let mut node = self.root;
        for _ in 0..MAX_DEPTH {
            // SAFETY: see `locate`.
            let n = unsafe { &*node };
            if n.kind == NodeKind::Leaf {
                break;
            }
            node = n.left.load(Ordering::Acquire);
        }
        // SAFETY: see `locate`.
        let leaf = unsafe { &*node };
        if leaf.kind != NodeKind::Leaf || is_sentinel(leaf.key) {
            self.stats.record(DsOpType::Pop, DsResult::NotFound, start);
            return (DsResult::NotFound, None);
        }

        let kv = Kv::new(leaf.key, leaf.value);
        let result = self.delete(cursor, leaf.key);
        self.stats.record(DsOpType::Pop, result, start);
        match result {
            DsResult::Success => (DsResult::Success, Some(kv)),
            other => (other, None),
        }
    }

    /// In-order traversal, calling `f` with every real (non-sentinel)
    /// element. Not linearizable against concurrent mutation — a
    /// best-effort diagnostic, like the reference implementation's.
    pub fn iterate<F: FnMut(Kv) -> bool>(&self, mut f: F) -> DsResult {
        let start = now_nanos();
        let mut stack: Vec<*mut Node> = Vec::new();
        let mut current = self.root;

        loop {
            while !current.is_null() {
                // SAFETY: see `locate`.
                let n = unsafe { &*current };
                if n.kind == NodeKind::Leaf {
                    break;
                }
                stack.push(current);
                current = n.left.load(Ordering::Acquire);
            }
            if current.is_null() {
                break;
            }
            // SAFETY: see `locate`.
            let leaf = unsafe { &*current };
            if !is_sentinel(leaf.key) && !f(Kv::new(leaf.key, leaf.value)) {
                break;
            }
            match stack.pop() {
                Some(parent) => {
                    // SAFETY: `parent` was just visited as a live internal node.
                    let p = unsafe { &*parent };
                    current = p.right.load(Ordering::Acquire);
                }
                None => break,
            }
        }

        self.stats.record(DsOpType::Iterate, DsResult::Success, start);
        DsResult::Success
    }

    /// Bounded breadth-first walk checking that every internal node has two
    /// children and that the leaf count matches the published element
    /// count (`INV-BST-01`).
    pub fn verify(&self) -> DsResult {
        let start = now_nanos();
        const MAX_VISITED: u64 = 1_000_000;

        let mut queue: VecDeque<*mut Node> = VecDeque::new();
        queue.push_back(self.root);
        let mut leaves = 0u64;
        let mut visited = 0u64;
        let mut corrupt = false;

        while let Some(node) = queue.pop_front() {
            visited += 1;
            if visited > MAX_VISITED || node.is_null() {
                corrupt = true;
                break;
            }
            // SAFETY: every pointer pushed onto `queue` was loaded from a
            // live node's `left`/`right` field.
            let n = unsafe { &*node };
            match n.kind {
                NodeKind::Leaf => {
                    if !is_sentinel(n.key) {
                        leaves += 1;
                    }
                }
                NodeKind::Internal => {
                    let l = n.left.load(Ordering::Acquire);
                    let r = n.right.load(Ordering::Acquire);
                    if l.is_null() || r.is_null() {
                        corrupt = true;
                        break;
                    }
                    queue.push_back(l);
                    queue.push_back(r);
                }
            }
        }

        let published = self.stats.snapshot().current_elements;
        debug_assert_bst_leaf_count!(leaves, published);
        let result = if corrupt || leaves != published {
            DsResult::Corrupt
        } else {
            DsResult::Success
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
    fn insert_search_delete_roundtrip() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let bst = Bst::new(&arena).unwrap();
        let mut cursor = Cursor::new();

        assert_eq!(bst.insert(&mut cursor, 5, 50), DsResult::Success);
        assert_eq!(bst.insert(&mut cursor, 3, 30), DsResult::Success);
        assert_eq!(bst.insert(&mut cursor, 8, 80), DsResult::Success);
        assert_eq!(bst.insert(&mut cursor, 5, 99), DsResult::Success);

        assert_eq!(bst.search(5), (DsResult::Success, Some(99)));
        assert_eq!(bst.search(3), (DsResult::Success, Some(30)));
        assert_eq!(bst.search(100), (DsResult::NotFound, None));

        assert_eq!(bst.verify(), DsResult::Success);

        assert_eq!(bst.delete(&mut cursor, 3), DsResult::Success);
        assert_eq!(bst.search(3), (DsResult::NotFound, None));
        assert_eq!(bst.delete(&mut cursor, 3), DsResult::NotFound);

        assert_eq!(bst.verify(), DsResult::Success);
    }

    #[test]
    fn sentinel_keys_are_invalid() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let bst = Bst::new(&arena).unwrap();
        let mut cursor = Cursor::new();
        assert_eq!(bst.insert(&mut cursor, u64::MAX, 1), DsResult::Invalid);
        assert_eq!(bst.insert(&mut cursor, u64::MAX - 1, 1), DsResult::Invalid);
    }

    #[test]
    fn pop_returns_minimum_each_time() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let bst = Bst::new(&arena).unwrap();
        let mut cursor = Cursor::new();
        for k in [5u64, 1, 9, 3, 7] {
            bst.insert(&mut cursor, k, k * 10);
        }

        let mut popped = Vec::new();
        loop {
            match bst.pop(&mut cursor) {
                (DsResult::Success, Some(kv)) => popped.push(kv.key),
                (DsResult::NotFound, None) => break,
                other => panic!("unexpected pop result: {other:?}"),
            }
        }
        assert_eq!(popped, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn iterate_visits_in_sorted_order() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let bst = Bst::new(&arena).unwrap();
        let mut cursor = Cursor::new();
        for k in [5u64, 1, 9, 3, 7] {
            bst.insert(&mut cursor, k, k);
        }
        let mut seen = Vec::new();
        bst.iterate(|kv| {
            seen.push(kv.key);
            true
        });
        assert_eq!(seen, vec![1, 3, 5, 7, 9]);
    }
}
