//! chained-hashmap: a single-threaded hash map using separate chaining,
//! where every chain is a contiguous run of one shared doubly-linked
//! sequence.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a chained hash map whose full traversal is one list walk, with
//!   stable handles and explicit, fallible allocation.
//! - Layers:
//!   - Sequence<T>: arena-backed doubly-linked ring with a sentinel.
//!     Positions are generational keys; `move_before` relinks a node
//!     without allocating.
//!   - ChainedHashMap<K, V, S, E>: entries in a slot arena, their order in
//!     a `Sequence`, and a bucket directory holding the head position of
//!     each bucket's run.
//!   - Memory: the strategy consulted before a record is created and told
//!     when it is released, with a move/copy propagation policy.
//!
//! Constraints
//! - Single-threaded: `!Send`/`!Sync` (the strategy is shared through `Rc`).
//! - Contiguity: entries of one bucket are adjacent in the sequence and the
//!   directory slot names the first of them.
//! - Unique keys: inserting a present key returns the existing handle and
//!   changes nothing.
//! - Handles survive inserts, rehashes and erasure of other entries; they
//!   never resolve after their own entry is erased.
//!
//! Hasher and rehashing invariants
//! - Each entry stores its `u64` hash, computed once at insert. Lookups,
//!   erase, rehash and clone read the stored hash; `K: Hash` is never
//!   invoked after insertion.
//! - Bucket membership is `hash % bucket_count`. A run ends at the first
//!   node of another bucket, so different hashes can share a run.
//! - Rehash relinks every node in original order in front of its new
//!   bucket's head. It allocates nothing and cannot fail.
//! - Growth doubles the bucket count when, before an insert, the load
//!   factor (a real ratio) exceeds `MAX_LOAD_FACTOR`.
//!
//! Allocation
//! - Each live entry holds one `Entry` record and one `Node` record from
//!   the map's `Memory`. A refused request surfaces as `AllocError` and the
//!   operation leaves the map exactly as it was.
//! - `Clone`, `Extend` and `FromIterator` panic on refusal; `try_clone`,
//!   `try_clone_from` and `try_extend` report it.
//! - Move assignment (`assign`) adopts the source's memory when the
//!   target's policy says so; otherwise it moves the books into the
//!   target's strategy first.
//!
//! Reentrancy
//! - Methods that call user `Hash` or key-equality code take a debug-only
//!   guard. Calling back into the same map from those callbacks panics in
//!   debug builds. `Drop` of erased keys and values runs after the
//!   structure is consistent again.

pub mod chained_hash_map;
mod chained_hash_map_proptest;
pub mod equality;
pub mod error;
pub mod memory;
mod reentrancy;
pub mod sequence;

// Public surface
pub use chained_hash_map::{ChainedHashMap, Handle, DEFAULT_BUCKETS, MAX_LOAD_FACTOR};
pub use equality::{KeyEquality, StdEq};
pub use error::MapError;
pub use hashbrown::hash_map::DefaultHashBuilder;
pub use memory::{AllocError, Budget, Global, Memory, MemoryStrategy, Propagation, Record};
pub use sequence::{Position, Sequence};
