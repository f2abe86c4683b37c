//! arena-ds - Concurrent non-blocking data structures over a shared page arena
//!
//! A library of lock-free and wait-free containers that all draw node
//! storage from a single [`Arena`](arena::Arena): a doubly-linked list, a
//! Michael-Scott FIFO, a Vyukov bounded MPMC array queue, a Vyukov unbounded
//! MPSC queue, a Folly-style SPSC ring, a Ck-style SPSC FIFO, and an
//! Ellen-Fatourou-Ruppert-van Breugel non-blocking binary search tree.
//!
//! Every operation returns a closed [`DsResult`](result::DsResult) rather
//! than panicking or blocking — contention shows up as `Busy`, exhaustion as
//! `NoMem`/`Full`, and structural problems as `Corrupt`, never as a thread
//! that never returns.
//!
//! # Example
//!
//! ```
//! use arena_ds::{Arena, ArenaConfig, Cursor, MsQueue};
//!
//! let arena = Arena::new(ArenaConfig::default()).unwrap();
//! let queue = MsQueue::new(&arena).unwrap();
//! let mut cursor = Cursor::new();
//!
//! queue.insert(&mut cursor, 1, 100);
//! assert_eq!(queue.delete().1.map(|kv| kv.value), Some(100));
//! ```

mod arena;
mod atomics;
mod backoff;
mod bst;
mod config;
mod fifo_spsc;
mod invariants;
mod list;
mod mpmc;
mod mpsc;
mod msqueue;
mod result;
mod ring_spsc;

pub use arena::{Arena, Cursor};
pub use backoff::Backoff;
pub use bst::Bst;
pub use config::{ArenaConfig, HIGH_THROUGHPUT_CONFIG, SMALL_TEST_CONFIG};
pub use fifo_spsc::FifoSpsc;
pub use list::List;
pub use mpmc::BoundedMpmc;
pub use mpsc::Mpsc;
pub use msqueue::MsQueue;
pub use result::{
    DsError, DsOpType, DsResult, Kv, Metadata, Operation, OpStatsSnapshot, Stats, StatsSnapshot,
    now_nanos,
};
pub use ring_spsc::RingSpsc;
