//! Mutex-serialized doubly-linked list (SPEC_FULL §4.1 / the baseline,
//! locking container).
//!
//! Nodes follow the BSD `LIST_ENTRY` idiom: each node's `pprev` points at the
//! `next` field of its predecessor (or at the head's `first` field for the
//! first node), so removal never needs to walk backwards to find the
//! predecessor. Unlike the lock-free containers in this crate, every
//! operation here holds a single coarse [`Mutex`] for its entire duration;
//! `Metadata::requires_locking` is `true`.

use std::ptr;
use std::sync::Mutex;

use crate::arena::{Arena, Cursor};
use crate::invariants::debug_assert_list_count_consistent;
use crate::result::{DsOpType, DsResult, Kv, Metadata, Stats, now_nanos};

struct Node {
    next: *mut Node,
    pprev: *mut *mut Node,
    kv: Kv,
}

struct State {
    first: *mut Node,
    count: u64,
    cursor: Cursor,
}

/// A doubly-linked list of `(key, value)` pairs, allocated out of a shared
/// [`Arena`].
pub struct List<'a> {
    arena: &'a Arena,
    state: Mutex<State>,
    stats: Stats,
}

// SAFETY: every field reachable from `state` is only ever touched while
// holding `state`'s mutex.
unsafe impl Send for List<'_> {}
unsafe impl Sync for List<'_> {}

impl<'a> List<'a> {
    pub fn new(arena: &'a Arena) -> Self {
        Self {
            arena,
            state: Mutex::new(State {
                first: ptr::null_mut(),
                count: 0,
                cursor: Cursor::new(),
            }),
            stats: Stats::new(),
        }
    }

    pub fn metadata() -> Metadata {
        Metadata {
            name: "list",
            description: "mutex-serialized doubly-linked list",
            node_size: std::mem::size_of::<Node>() as u32,
            requires_locking: true,
        }
    }

    pub fn stats(&self) -> crate::result::StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Inserts `(key, value)`. If `key` is already present, updates its
    /// value in place rather than rejecting the write. Returns `NoMem` if
    /// the arena is exhausted on a fresh key.
    pub fn insert(&self, key: u64, value: u64) -> DsResult {
        let start = now_nanos();
        let mut state = self.state.lock().expect("list mutex poisoned");

        let mut cur = state.first;
        while !cur.is_null() {
            // SAFETY: `cur` is either null or a node inserted by this list's
            // own `insert`, never freed while reachable from `state.first`,
            // and exclusively accessed under `state`'s lock.
            let node = unsafe { &mut *cur };
            if node.kv.key == key {
                node.kv.value = value;
                let result = DsResult::Success;
                self.stats.record(DsOpType::Insert, result, start);
                return result;
            }
            cur = node.next;
        }

        let ptr = match self.arena.alloc::<Node>(&mut state.cursor) {
            Ok(p) => p.as_ptr(),
            Err(e) => {
                self.stats.record(DsOpType::Insert, e, start);
                return e;
            }
        };

        let old_first = state.first;
        // SAFETY: `ptr` was just allocated and is not yet reachable from
        // anywhere else.
        unsafe {
            ptr::write(
                ptr,
                Node {
                    next: old_first,
                    pprev: ptr::addr_of_mut!(state.first),
                    kv: Kv::new(key, value),
                },
            );
        }
        if !old_first.is_null() {
            // SAFETY: `old_first` is a live node owned by this list.
            unsafe { (*old_first).pprev = ptr::addr_of_mut!((*ptr).next) };
        }
        state.first = ptr;
        state.count += 1;

        let count = state.count;
        drop(state);
        self.stats.set_current_elements(count);
        self.stats.record(DsOpType::Insert, DsResult::Success, start);
        DsResult::Success
    }

    /// Removes `key`. Returns `NotFound` if absent.
    pub fn delete(&self, key: u64) -> DsResult {
        let start = now_nanos();
        let mut state = self.state.lock().expect("list mutex poisoned");

        let mut cur = state.first;
        while !cur.is_null() {
            // SAFETY: see `insert`.
            let node = unsafe { &*cur };
            if node.kv.key == key {
                let next = node.next;
                let pprev = node.pprev;
                // SAFETY: `pprev` points at either `state.first` or a live
                // predecessor's `next` field; both remain valid under the lock.
                unsafe { *pprev = next };
                if !next.is_null() {
                    // SAFETY: `next` is a live node owned by this list.
                    unsafe { (*next).pprev = pprev };
                }
                state.count -= 1;
                let count = state.count;

                let node_ptr = match std::ptr::NonNull::new(cur) {
                    Some(p) => p,
                    None => unreachable!("cur checked non-null above"),
                };
                drop(state);
                // SAFETY: `node_ptr` was allocated by `self.arena` in `insert`
                // and has just been unlinked, so this is its only free.
                unsafe { self.arena.free(node_ptr) };
                self.stats.set_current_elements(count);
                self.stats.record(DsOpType::Delete, DsResult::Success, start);
                return DsResult::Success;
            }
            cur = node.next;
        }

        self.stats.record(DsOpType::Delete, DsResult::NotFound, start);
        DsResult::NotFound
    }

    /// Looks up `key`. Returns `Some(value)` on a hit.
    pub fn search(&self, key: u64) -> (DsResult, Option<u64>) {
        let start = now_nanos();
        let state = self.state.lock().expect("list mutex poisoned");
        let mut cur = state.first;
        while !cur.is_null() {
            // SAFETY: see `insert`.
            let node = unsafe { &*cur };
            if node.kv.key == key {
                self.stats.record(DsOpType::Search, DsResult::Success, start);
                return (DsResult::Success, Some(node.kv.value));
            }
            cur = node.next;
        }
        self.stats.record(DsOpType::Search, DsResult::NotFound, start);
        (DsResult::NotFound, None)
    }

    /// Calls `f` with every `(key, value)` pair in list order. Stops early if
    /// `f` returns `false`.
    pub fn iterate<F: FnMut(Kv) -> bool>(&self, mut f: F) -> DsResult {
        let start = now_nanos();
        let state = self.state.lock().expect("list mutex poisoned");
        let mut cur = state.first;
        while !cur.is_null() {
            // SAFETY: see `insert`.
            let node = unsafe { &*cur };
            if !f(node.kv) {
                break;
            }
            cur = node.next;
        }
        self.stats.record(DsOpType::Iterate, DsResult::Success, start);
        DsResult::Success
    }

    /// Walks the list and checks that the walked length matches `count`.
    /// Returns `Corrupt` on mismatch.
    pub fn verify(&self) -> DsResult {
        let start = now_nanos();
        let state = self.state.lock().expect("list mutex poisoned");
        let mut walked = 0u64;
        let mut cur = state.first;
        while !cur.is_null() {
            // SAFETY: see `insert`.
            let node = unsafe { &*cur };
            walked += 1;
            cur = node.next;
        }
        debug_assert_list_count_consistent!(walked, state.count);
        let result = if walked == state.count {
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
    fn insert_search_delete_roundtrip() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let list = List::new(&arena);

        assert_eq!(list.insert(1, 10), DsResult::Success);
        assert_eq!(list.insert(2, 20), DsResult::Success);
        assert_eq!(list.insert(1, 99), DsResult::Success);

        assert_eq!(list.search(1), (DsResult::Success, Some(99)));
        assert_eq!(list.search(2), (DsResult::Success, Some(20)));
        assert_eq!(list.search(3), (DsResult::NotFound, None));

        assert_eq!(list.verify(), DsResult::Success);

        assert_eq!(list.delete(1), DsResult::Success);
        assert_eq!(list.search(1), (DsResult::NotFound, None));
        assert_eq!(list.delete(1), DsResult::NotFound);

        assert_eq!(list.verify(), DsResult::Success);
    }

    #[test]
    fn iterate_visits_all_elements() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let list = List::new(&arena);
        for i in 0..5 {
            list.insert(i, i * 10);
        }
        let mut seen = Vec::new();
        list.iterate(|kv| {
            seen.push(kv.key);
            true
        });
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn exhausted_arena_returns_nomem_on_insert() {
        let arena = Arena::new(SMALL_TEST_CONFIG).unwrap();
        let list = List::new(&arena);
        let mut last = DsResult::Success;
        for i in 0..100_000u64 {
            last = list.insert(i, i);
            if last == DsResult::NoMem {
                break;
            }
        }
        assert_eq!(last, DsResult::NoMem);
    }
}
