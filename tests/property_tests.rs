//! Property-based tests for the quantified invariants in `SPEC_FULL.md` §8.

use proptest::prelude::*;

use arena_ds::{Arena, ArenaConfig, Bst, BoundedMpmc, Cursor, DsResult, List, MsQueue, RingSpsc};

// =============================================================================
// INV-SEQ-01 / ring bounded count
// "0 <= (write - read) mod S <= S - 1"
// =============================================================================

proptest! {
    #[test]
    fn prop_ring_never_exceeds_capacity(
        inserts in prop::collection::vec(any::<u64>(), 0..200),
        pop_every in 1usize..5,
    ) {
        let ring = RingSpsc::new(8);
        let usable = ring.capacity() - 1;

        for (i, v) in inserts.iter().enumerate() {
            let _ = ring.insert(*v, *v);
            prop_assert!(ring.len() <= usable);
            if i % pop_every == 0 {
                ring.pop();
            }
            prop_assert!(ring.len() <= usable);
        }
    }
}

// =============================================================================
// (MPMC bounded) deq_pos <= enq_pos <= deq_pos + capacity
// =============================================================================

proptest! {
    #[test]
    fn prop_mpmc_window_holds(
        ops in prop::collection::vec(prop::bool::ANY, 0..200),
    ) {
        let q = BoundedMpmc::new(16).unwrap();
        for do_insert in ops {
            if do_insert {
                q.insert(1, 1);
            } else {
                q.delete();
            }
            prop_assert_eq!(q.verify(), DsResult::Success);
        }
    }
}

// =============================================================================
// (List) count == |{k : present}| after any serialized sequence of inserts/deletes
// =============================================================================

proptest! {
    #[test]
    fn prop_list_count_matches_membership(
        keys in prop::collection::vec(0u64..20, 0..100),
    ) {
        let arena = Arena::new(ArenaConfig::default()).unwrap();
        let list = List::new(&arena);
        let mut present = std::collections::HashSet::new();

        for (i, key) in keys.iter().enumerate() {
            if i % 3 == 2 {
                list.delete(*key);
                present.remove(key);
            } else {
                list.insert(*key, *key);
                present.insert(*key);
            }
        }

        prop_assert_eq!(list.verify(), DsResult::Success);
        let mut seen = Vec::new();
        list.iterate(|kv| {
            seen.push(kv.key);
            true
        });
        prop_assert_eq!(seen.len(), present.len());
    }
}

// =============================================================================
// (BST) in-order traversal yields strictly increasing keys; leaf count == published count
// =============================================================================

proptest! {
    #[test]
    fn prop_bst_inorder_is_sorted_and_leaf_count_matches(
        keys in prop::collection::hash_set(0u64..10_000, 0..64),
    ) {
        let arena = Arena::new(ArenaConfig::default()).unwrap();
        let bst = Bst::new(&arena).unwrap();
        let mut cursor = Cursor::new();
        for key in &keys {
            bst.insert(&mut cursor, *key, *key);
        }

        let mut seen = Vec::new();
        bst.iterate(|kv| {
            seen.push(kv.key);
            true
        });

        for window in seen.windows(2) {
            prop_assert!(window[0] < window[1], "BST iterate not strictly increasing");
        }
        prop_assert_eq!(seen.len(), keys.len());
        prop_assert_eq!(bst.verify(), DsResult::Success);
    }
}

// =============================================================================
// (MS queue) every reachable node is dequeued exactly once; no phantom values.
// =============================================================================

proptest! {
    #[test]
    fn prop_msqueue_preserves_every_inserted_key_exactly_once(
        keys in prop::collection::vec(0u64..1000, 0..150),
    ) {
        let arena = Arena::new(ArenaConfig::default()).unwrap();
        let q = MsQueue::new(&arena).unwrap();
        let mut cursor = Cursor::new();
        for (i, key) in keys.iter().enumerate() {
            q.insert(&mut cursor, *key, i as u64);
        }

        let mut drained = Vec::new();
        while let (DsResult::Success, Some(kv)) = q.delete() {
            drained.push(kv.value);
        }
        drained.sort_unstable();
        let mut expected: Vec<u64> = (0..keys.len() as u64).collect();
        expected.sort_unstable();
        prop_assert_eq!(drained, expected);
        prop_assert_eq!(q.verify(100), DsResult::Success);
    }
}

// =============================================================================
// (All) no address returned by alloc is returned again before the matching free.
// =============================================================================

proptest! {
    #[test]
    fn prop_arena_never_double_allocates_a_live_address(
        alloc_free in prop::collection::vec(prop::bool::ANY, 0..300),
    ) {
        let arena = Arena::new(ArenaConfig::default()).unwrap();
        let mut cursor = Cursor::new();
        let mut live: Vec<std::ptr::NonNull<u64>> = Vec::new();
        let mut seen_addrs = std::collections::HashSet::new();

        for do_alloc in alloc_free {
            if do_alloc || live.is_empty() {
                if let Ok(p) = arena.alloc::<u64>(&mut cursor) {
                    let addr = p.as_ptr() as usize;
                    prop_assert!(
                        !seen_addrs.contains(&addr) || !live.iter().any(|l| l.as_ptr() as usize == addr),
                        "address {:#x} handed out while still live",
                        addr
                    );
                    seen_addrs.insert(addr);
                    live.push(p);
                }
            } else if let Some(p) = live.pop() {
                unsafe { arena.free(p) };
            }
        }
    }
}
