use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use arena_ds::{
    Arena, ArenaConfig, Bst, BoundedMpmc, Cursor, DsResult, HIGH_THROUGHPUT_CONFIG, List, MsQueue,
    RingSpsc,
};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

const MSGS_PER_THREAD: u64 = 1_000_000;

fn bench_ring_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_spsc");
    group.throughput(Throughput::Elements(MSGS_PER_THREAD));

    group.bench_function("single_producer_consumer", |b| {
        b.iter(|| {
            let ring = Arc::new(RingSpsc::new(1024));
            let producer_ring = Arc::clone(&ring);

            let producer = thread::spawn(move || {
                let mut sent = 0u64;
                while sent < MSGS_PER_THREAD {
                    if producer_ring.insert(sent, sent) == DsResult::Success {
                        sent += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut received = 0u64;
            while received < MSGS_PER_THREAD {
                match ring.pop() {
                    (DsResult::Success, Some(kv)) => {
                        black_box(kv);
                        received += 1;
                    }
                    _ => std::hint::spin_loop(),
                }
            }
            producer.join().unwrap();
        });
    });

    group.finish();
}

fn bench_bounded_mpmc(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded_mpmc");

    for num_producers in [2, 4, 8] {
        let total_msgs = MSGS_PER_THREAD * num_producers as u64;
        group.throughput(Throughput::Elements(total_msgs));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{num_producers}P_1C")),
            &num_producers,
            |b, &n| {
                b.iter(|| {
                    let q = Arc::new(BoundedMpmc::new(4096).unwrap());
                    let mut handles = Vec::new();

                    for _ in 0..n {
                        let qp = Arc::clone(&q);
                        handles.push(thread::spawn(move || {
                            let mut sent = 0u64;
                            while sent < MSGS_PER_THREAD {
                                if qp.insert(sent, sent) == DsResult::Success {
                                    sent += 1;
                                } else {
                                    std::hint::spin_loop();
                                }
                            }
                        }));
                    }

                    let target = MSGS_PER_THREAD * n as u64;
                    let mut received = 0u64;
                    while received < target {
                        if let (DsResult::Success, Some(kv)) = q.delete() {
                            black_box(kv);
                            received += 1;
                        } else {
                            std::hint::spin_loop();
                        }
                    }

                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_msqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("msqueue");

    for num_producers in [2, 4] {
        let per_producer = 200_000u64;
        let total_msgs = per_producer * num_producers as u64;
        group.throughput(Throughput::Elements(total_msgs));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{num_producers}P_1C")),
            &num_producers,
            |b, &n| {
                b.iter(|| {
                    let arena = Arc::new(Arena::new(ArenaConfig::default()).unwrap());
                    let queue = Arc::new(MsQueue::new(&arena).unwrap());
                    let mut handles = Vec::new();

                    for _ in 0..n {
                        let qp = Arc::clone(&queue);
                        handles.push(thread::spawn(move || {
                            let mut cursor = Cursor::new();
                            for i in 0..per_producer {
                                while qp.insert(&mut cursor, i, i) != DsResult::Success {
                                    std::hint::spin_loop();
                                }
                            }
                        }));
                    }

                    let target = per_producer * n as u64;
                    let mut received = 0u64;
                    while received < target {
                        if let (DsResult::Success, Some(kv)) = queue.delete() {
                            black_box(kv);
                            received += 1;
                        } else {
                            std::hint::spin_loop();
                        }
                    }

                    for h in handles {
                        h.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_bst(c: &mut Criterion) {
    let mut group = c.benchmark_group("bst");

    let n = 50_000u64;
    group.throughput(Throughput::Elements(n));

    group.bench_function("insert_then_search_all", |b| {
        b.iter(|| {
            let arena = Arena::new(HIGH_THROUGHPUT_CONFIG).unwrap();
            let tree = Bst::new(&arena).unwrap();
            let mut cursor = Cursor::new();
            for key in 0..n {
                tree.insert(&mut cursor, key, key);
            }
            for key in 0..n {
                black_box(tree.search(key));
            }
        });
    });

    group.finish();
}

fn bench_list_vs_mutex(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_contention");

    let counter = AtomicU64::new(0);
    let arena = Arena::new(ArenaConfig::default()).unwrap();
    let list = List::new(&arena);

    group.bench_function("serialized_insert_delete", |b| {
        b.iter(|| {
            let key = counter.fetch_add(1, Ordering::Relaxed);
            list.insert(key, key);
            black_box(list.search(key));
            list.delete(key);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_ring_spsc,
    bench_bounded_mpmc,
    bench_msqueue,
    bench_bst,
    bench_list_vs_mutex
);
criterion_main!(benches);
