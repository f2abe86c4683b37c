//! End-to-end scenarios, one per container, mirroring `SPEC_FULL.md`'s
//! testable-properties section.

use std::sync::Arc;
use std::thread;

use arena_ds::{Arena, ArenaConfig, Bst, BoundedMpmc, Cursor, DsResult, FifoSpsc, Kv, List, MsQueue, Mpsc, RingSpsc};

#[test]
fn ring_spsc_fills_drains_and_reports_full_then_empty() {
    let ring = RingSpsc::new(4);
    assert_eq!(ring.insert(1, 10), DsResult::Success);
    assert_eq!(ring.insert(2, 20), DsResult::Success);
    assert_eq!(ring.insert(3, 30), DsResult::Success);
    assert_eq!(ring.insert(4, 40), DsResult::Full);

    assert_eq!(ring.pop(), (DsResult::Success, Some(Kv::new(1, 10))));
    assert_eq!(ring.pop(), (DsResult::Success, Some(Kv::new(2, 20))));
    assert_eq!(ring.pop(), (DsResult::Success, Some(Kv::new(3, 30))));
    assert_eq!(ring.pop(), (DsResult::NotFound, None));
}

#[test]
fn mpmc_capacity_two_full_then_drain_then_refill() {
    let q = BoundedMpmc::new(2).unwrap();
    assert_eq!(q.insert(7, 7), DsResult::Success);
    assert_eq!(q.insert(8, 8), DsResult::Success);
    assert_eq!(q.insert(9, 9), DsResult::Full);

    assert_eq!(q.delete(), (DsResult::Success, Some(Kv::new(7, 7))));
    assert_eq!(q.insert(9, 9), DsResult::Success);
    assert_eq!(q.delete(), (DsResult::Success, Some(Kv::new(8, 8))));
    assert_eq!(q.delete(), (DsResult::Success, Some(Kv::new(9, 9))));
}

#[test]
fn ms_queue_two_producers_one_consumer_every_element_exactly_once() {
    let arena = Arena::new(ArenaConfig::default()).unwrap();
    let queue = Arc::new(MsQueue::new(&arena).unwrap());

    let q1 = Arc::clone(&queue);
    let t1 = thread::spawn(move || {
        let mut cursor = Cursor::new();
        q1.insert(&mut cursor, 1, 0xa)
    });
    let q2 = Arc::clone(&queue);
    let t2 = thread::spawn(move || {
        let mut cursor = Cursor::new();
        q2.insert(&mut cursor, 2, 0xb)
    });
    assert_eq!(t1.join().unwrap(), DsResult::Success);
    assert_eq!(t2.join().unwrap(), DsResult::Success);

    let mut seen = Vec::new();
    while let (DsResult::Success, Some(kv)) = queue.delete() {
        seen.push(kv);
    }
    seen.sort_by_key(|kv| kv.key);
    assert_eq!(seen, vec![Kv::new(1, 0xa), Kv::new(2, 0xb)]);
    assert_eq!(queue.verify(100), DsResult::Success);
}

#[test]
fn bst_insert_search_delete_over_unsorted_keys() {
    let arena = Arena::new(ArenaConfig::default()).unwrap();
    let bst = Bst::new(&arena).unwrap();
    let mut cursor = Cursor::new();

    for key in [50u64, 30, 70, 20, 40] {
        assert_eq!(bst.insert(&mut cursor, key, key), DsResult::Success);
    }

    assert_eq!(bst.search(30), (DsResult::Success, Some(30)));
    assert_eq!(bst.search(45), (DsResult::NotFound, None));
    assert_eq!(bst.delete(&mut cursor, 30), DsResult::Success);
    assert_eq!(bst.search(30), (DsResult::NotFound, None));
    assert_eq!(bst.verify(), DsResult::Success);
}

#[test]
fn mpsc_single_producer_retries_through_busy_until_drained_in_order() {
    let arena = Arena::new(ArenaConfig::default()).unwrap();
    let queue = Mpsc::new(&arena).unwrap();
    let mut cursor = Cursor::new();

    const N: u64 = 200;
    for i in 1..=N {
        assert_eq!(queue.insert(&mut cursor, i, i * 1000), DsResult::Success);
    }

    let mut drained = Vec::new();
    while drained.len() < N as usize {
        match queue.pop() {
            (DsResult::Success, Some(kv)) => drained.push(kv.key),
            (DsResult::Busy, None) => continue,
            (DsResult::NotFound, None) => break,
            other => panic!("unexpected pop result: {other:?}"),
        }
    }
    assert_eq!(drained, (1..=N).collect::<Vec<_>>());
}

#[test]
fn list_serialized_update_delete_and_verify() {
    let arena = Arena::new(ArenaConfig::default()).unwrap();
    let list = List::new(&arena);

    assert_eq!(list.insert(1, 1), DsResult::Success);
    assert_eq!(list.insert(2, 2), DsResult::Success);
    assert_eq!(list.insert(1, 9), DsResult::Success);
    assert_eq!(list.search(1), (DsResult::Success, Some(9)));

    assert_eq!(list.delete(2), DsResult::Success);
    assert_eq!(list.verify(), DsResult::Success);

    let mut remaining = Vec::new();
    list.iterate(|kv| {
        remaining.push(kv.key);
        true
    });
    assert_eq!(remaining, vec![1]);
}

#[test]
fn fifo_spsc_producer_consumer_threads_preserve_order() {
    let arena = Arena::new(ArenaConfig::default()).unwrap();
    let fifo = Arc::new(FifoSpsc::new(&arena).unwrap());

    const N: u64 = 1000;
    let producer_fifo = Arc::clone(&fifo);
    let producer = thread::spawn(move || {
        for i in 0..N {
            while producer_fifo.insert(i, i) == DsResult::NoMem {
                thread::yield_now();
            }
        }
    });

    let mut drained = Vec::new();
    while (drained.len() as u64) < N {
        match fifo.pop() {
            (DsResult::Success, Some(kv)) => drained.push(kv.key),
            (DsResult::NotFound, None) => thread::yield_now(),
            other => panic!("unexpected pop result: {other:?}"),
        }
    }
    producer.join().unwrap();
    assert_eq!(drained, (0..N).collect::<Vec<_>>());
}
