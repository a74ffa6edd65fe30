//! ChainedHashMap: separate chaining where every chain is a contiguous run
//! of one shared `Sequence`.
//!
//! Invariant (contiguity): entries whose cached hash falls in the same
//! bucket are adjacent in `order`, and `directory[b]` holds the position of
//! the first of them, or `None` when the bucket is empty. Insert links a new
//! entry in front of its bucket's run; erase repairs the slot when it removes
//! a run head; rehash relinks every entry, in original order, in front of
//! its new bucket's head.

use crate::equality::{KeyEquality, StdEq};
use crate::error::MapError;
use crate::memory::{AllocError, Memory, Record};
use crate::reentrancy::DebugReentrancy;
use crate::sequence::{self, Position, Sequence};
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;
use hashbrown::hash_map::DefaultHashBuilder;
use slotmap::SlotMap;

/// Bucket count of a freshly constructed map.
pub const DEFAULT_BUCKETS: usize = 16;

/// Load factor above which the next insert doubles the bucket count.
pub const MAX_LOAD_FACTOR: f64 = 0.9;

/// Records granted for every stored entry.
const NEW_ENTRY: &[(Record, usize)] = &[(Record::Entry, 1), (Record::Node, 1)];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RehashTrigger {
    LoadFactor,
    Requested,
}

impl fmt::Display for RehashTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RehashTrigger::LoadFactor => "load factor",
            RehashTrigger::Requested => "requested",
        })
    }
}

slotmap::new_key_type! {
    struct EntryKey;
}

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    // Computed once at insertion; never recomputed.
    hash: u64,
}

/// Position of an entry in the map's traversal order.
///
/// Stays valid across inserts, rehashes and erasure of other entries; after
/// its own entry is erased it resolves to nothing, even if the slot is
/// reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(Position);

impl Handle {
    pub fn position(self) -> Position {
        self.0
    }

    pub fn key<'a, K, V, S, E>(&self, map: &'a ChainedHashMap<K, V, S, E>) -> Option<&'a K> {
        map.handle_key(*self)
    }

    pub fn value<'a, K, V, S, E>(&self, map: &'a ChainedHashMap<K, V, S, E>) -> Option<&'a V> {
        map.handle_value(*self)
    }

    pub fn value_mut<'a, K, V, S, E>(
        &self,
        map: &'a mut ChainedHashMap<K, V, S, E>,
    ) -> Option<&'a mut V> {
        map.handle_value_mut(*self)
    }
}

pub struct ChainedHashMap<K, V, S = DefaultHashBuilder, E = StdEq> {
    hasher: S,
    eq: E,
    entries: SlotMap<EntryKey, Entry<K, V>>,
    // Every entry, bucket runs kept contiguous.
    order: Sequence<EntryKey>,
    // Bucket index -> head of that bucket's run. Never owns anything.
    directory: Vec<Option<Position>>,
    memory: Memory,
    reentrancy: DebugReentrancy,
}

impl<K, V> ChainedHashMap<K, V> {
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }

    /// Start with `buckets` buckets (at least one).
    pub fn with_buckets(buckets: usize) -> Self {
        Self::from_parts(buckets, DefaultHashBuilder::default(), StdEq, Memory::global())
    }

    pub fn new_in(memory: Memory) -> Self {
        Self::from_parts(DEFAULT_BUCKETS, DefaultHashBuilder::default(), StdEq, memory)
    }
}

impl<K, V, S, E> ChainedHashMap<K, V, S, E> {
    pub fn from_parts(buckets: usize, hasher: S, eq: E, memory: Memory) -> Self {
        Self {
            hasher,
            eq,
            entries: SlotMap::with_key(),
            order: Sequence::new_in(memory.clone()),
            directory: vec![None; buckets.max(1)],
            memory,
            reentrancy: DebugReentrancy::new(),
        }
    }

    pub fn with_hasher(hasher: S) -> Self
    where
        E: Default,
    {
        Self::from_parts(DEFAULT_BUCKETS, hasher, E::default(), Memory::global())
    }

    pub fn with_hasher_and_eq(hasher: S, eq: E) -> Self {
        Self::from_parts(DEFAULT_BUCKETS, hasher, eq, Memory::global())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.directory.len()
    }

    /// Entries per bucket, as a real ratio.
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.directory.len() as f64
    }

    pub fn max_load_factor(&self) -> f64 {
        MAX_LOAD_FACTOR
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    pub fn key_eq(&self) -> &E {
        &self.eq
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    #[inline]
    fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.directory.len() as u64) as usize
    }

    #[inline]
    fn entry_at(&self, pos: Position) -> Option<&Entry<K, V>> {
        self.entries.get(*self.order.get(pos)?)
    }

    /// Bucket of the entry at `pos`; `None` for `END` or a stale position.
    #[inline]
    fn bucket_at(&self, pos: Position) -> Option<usize> {
        self.entry_at(pos).map(|e| self.bucket_of(e.hash))
    }

    pub(crate) fn handle_key(&self, h: Handle) -> Option<&K> {
        self.entry_at(h.0).map(|e| &e.key)
    }

    pub(crate) fn handle_value(&self, h: Handle) -> Option<&V> {
        self.entry_at(h.0).map(|e| &e.value)
    }

    pub(crate) fn handle_value_mut(&mut self, h: Handle) -> Option<&mut V> {
        let key = *self.order.get(h.0)?;
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    /// Head of bucket `index`'s run.
    pub fn bucket_head(&self, index: usize) -> Option<Handle> {
        self.directory.get(index).copied().flatten().map(Handle)
    }

    /// Number of entries in bucket `index`.
    pub fn bucket_len(&self, index: usize) -> usize {
        let Some(mut pos) = self.directory.get(index).copied().flatten() else {
            return 0;
        };
        let mut n = 0;
        while self.bucket_at(pos) == Some(index) {
            n += 1;
            match self.order.next(pos) {
                Some(next) => pos = next,
                None => break,
            }
        }
        n
    }

    /// First entry in traversal order.
    pub fn begin(&self) -> Option<Handle> {
        let first = self.order.begin();
        (!first.is_end()).then_some(Handle(first))
    }

    /// Entry after `h` in traversal order; `None` at the end or for a stale
    /// handle.
    pub fn next_handle(&self, h: Handle) -> Option<Handle> {
        self.order
            .next(h.0)
            .filter(|p| !p.is_end() && !h.0.is_end())
            .map(Handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.order.positions().map(Handle)
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            order: &self.order,
            entries: &self.entries,
            front: self.order.begin(),
            back: self.order.prev(Position::END).unwrap_or(Position::END),
            remaining: self.len(),
        }
    }

    /// Mutable traversal in the same order as `iter`.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            front: self.order.begin(),
            back: self.order.prev(Position::END).unwrap_or(Position::END),
            remaining: self.entries.len(),
            order: &self.order,
            entries: &mut self.entries,
            _marker: PhantomData,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(_, k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, _, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.iter_mut().map(|(_, _, v)| v)
    }

    /// Remove the entry at `handle`, returning its key and value. `None` for
    /// a stale handle.
    pub fn erase(&mut self, handle: Handle) -> Option<(K, V)> {
        let pos = handle.0;
        let key = *self.order.get(pos)?;
        let bucket = self.bucket_of(self.entries.get(key)?.hash);

        // Run heads are recognised structurally: the previous node is END or
        // belongs to another bucket.
        let prev_bucket = self.order.prev(pos).and_then(|p| self.bucket_at(p));
        if prev_bucket != Some(bucket) {
            debug_assert_eq!(self.directory[bucket], Some(pos));
            let successor = self
                .order
                .next(pos)
                .filter(|&n| self.bucket_at(n) == Some(bucket));
            self.directory[bucket] = successor;
        }

        self.order.erase(pos);
        let entry = self.entries.remove(key)?;
        self.memory.deallocate(Record::Entry, 1);
        Some((entry.key, entry.value))
    }

    /// Erase every entry from `first` up to, not including, `last` (`None`
    /// for the end). Returns how many were erased.
    ///
    /// `last` must be live and reachable from `first` in traversal order;
    /// otherwise everything from `first` to the end is erased.
    pub fn erase_range(&mut self, first: Handle, last: Option<Handle>) -> usize {
        let stop = last.map_or(Position::END, |h| h.0);
        debug_assert!(self.order.contains(stop), "erase_range end handle is stale");
        let mut cur = first.0;
        let mut erased = 0;
        while cur != stop && !cur.is_end() {
            // Step past `cur` while its position is still live.
            let Some(next) = self.order.next(cur) else {
                break;
            };
            if self.erase(Handle(cur)).is_some() {
                erased += 1;
            }
            cur = next;
        }
        erased
    }

    /// Drop every entry; the bucket count is kept.
    pub fn clear(&mut self) {
        let n = self.entries.len();
        self.order.clear();
        self.directory.iter_mut().for_each(|slot| *slot = None);
        let old = core::mem::take(&mut self.entries);
        self.memory.deallocate(Record::Entry, n);
        drop(old);
    }

    /// Rebuild the runs for `buckets` buckets (at least one). Allocates
    /// nothing, never hashes, and keeps every handle valid.
    pub fn rehash(&mut self, buckets: usize) {
        self.rebucket(buckets, RehashTrigger::Requested);
    }

    /// Same as `rehash(buckets)`.
    pub fn reserve(&mut self, buckets: usize) {
        self.rehash(buckets);
    }

    fn grow_if_needed(&mut self) {
        if self.load_factor() > MAX_LOAD_FACTOR {
            self.rebucket(self.directory.len() * 2, RehashTrigger::LoadFactor);
        }
    }

    fn rebucket(&mut self, buckets: usize, trigger: RehashTrigger) {
        let buckets = buckets.max(1);
        let old = self.directory.len();
        self.directory.clear();
        self.directory.resize(buckets, None);

        // Entries not yet relinked always form a prefix of `order` and the
        // relinked ones a suffix, so relinking the current front `len` times
        // visits every entry once, in original order. Cached hashes only.
        for _ in 0..self.order.len() {
            let pos = self.order.begin();
            let Some(&key) = self.order.get(pos) else {
                break;
            };
            let bucket = self.bucket_of(self.entries[key].hash);
            let head = self.directory[bucket].unwrap_or(Position::END);
            self.order.move_before(head, pos);
            self.directory[bucket] = Some(pos);
        }
        log::debug!(
            "rehash ({}): {} entries from {} to {} buckets",
            trigger,
            self.len(),
            old,
            buckets
        );
    }

    /// Store `entry` and link it immediately before `before`. On refusal
    /// nothing is left behind.
    fn store(&mut self, entry: Entry<K, V>, before: Position) -> Result<Position, AllocError> {
        self.memory.allocate_all(NEW_ENTRY)?;
        Ok(self.store_reserved(entry, before))
    }

    fn store_reserved(&mut self, entry: Entry<K, V>, before: Position) -> Position {
        let key = self.entries.insert(entry);
        self.order.insert_reserved(before, key)
    }

    /// Link a new entry, whose records are already granted, as the head of
    /// its bucket's run.
    fn link_reserved(&mut self, entry: Entry<K, V>) -> Position {
        let bucket = self.bucket_of(entry.hash);
        let head = self.directory[bucket].unwrap_or(Position::END);
        let pos = self.store_reserved(entry, head);
        self.directory[bucket] = Some(pos);
        pos
    }

    fn find_hashed<Q>(&self, hash: u64, q: &Q) -> Option<Position>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        E: KeyEquality<Q>,
    {
        let bucket = self.bucket_of(hash);
        let mut pos = self.directory[bucket]?;
        // The run ends at the first entry of another bucket, or at END.
        while let Some(e) = self.entry_at(pos) {
            if self.bucket_of(e.hash) != bucket {
                break;
            }
            if e.hash == hash && self.eq.equivalent(e.key.borrow(), q) {
                return Some(pos);
            }
            pos = self.order.next(pos)?;
        }
        None
    }

    /// Move construction: the result owns every entry; `self` is left
    /// empty with `DEFAULT_BUCKETS` buckets and the same hasher, equality
    /// and memory.
    pub fn take(&mut self) -> Self
    where
        S: Clone,
        E: Clone,
    {
        let empty = Self::from_parts(
            DEFAULT_BUCKETS,
            self.hasher.clone(),
            self.eq.clone(),
            self.memory.clone(),
        );
        core::mem::replace(self, empty)
    }

    /// Move assignment: `other`'s entries move into `self` and `other` is
    /// left empty. When the target's policy does not propagate on move and
    /// the strategies differ, the books move into `self`'s strategy first;
    /// a refusal there leaves both maps untouched.
    pub fn assign(&mut self, other: &mut Self) -> Result<(), AllocError>
    where
        S: Clone,
        E: Clone,
    {
        if self.memory.policy().on_move_assign || self.memory.same_strategy(&other.memory) {
            *self = other.take();
            return Ok(());
        }
        let n = other.len();
        self.memory.take_over(
            &other.memory,
            &[(Record::Node, n), (Record::Entry, n)],
        )?;
        let mut moved = other.take();
        moved.order.rehome(self.memory.clone());
        moved.memory = self.memory.clone();
        *self = moved;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn check_structure(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        let mut prev = None;
        let mut count = 0;
        for pos in self.order.positions() {
            let b = self.bucket_at(pos).ok_or("sequence node without entry")?;
            if prev != Some(b) {
                if !seen.insert(b) {
                    return Err(format!("bucket {b} split into several runs"));
                }
                if self.directory[b] != Some(pos) {
                    return Err(format!("bucket {b} slot is not its run head"));
                }
            }
            prev = Some(b);
            count += 1;
        }
        for (b, slot) in self.directory.iter().enumerate() {
            if slot.is_some() && !seen.contains(&b) {
                return Err(format!("bucket {b} slot set for an empty bucket"));
            }
        }
        if count != self.entries.len() {
            return Err(format!(
                "{count} linked nodes for {} entries",
                self.entries.len()
            ));
        }
        Ok(())
    }
}

impl<K, V, S, E> ChainedHashMap<K, V, S, E>
where
    K: Hash,
    S: BuildHasher,
{
    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    pub fn find<Q>(&self, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEquality<Q>,
    {
        let _g = self.reentrancy.enter();
        let hash = self.make_hash(q);
        self.find_hashed(hash, q).map(Handle)
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEquality<Q>,
    {
        self.find(q).is_some()
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEquality<Q>,
    {
        let h = self.find(q)?;
        self.handle_value(h)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEquality<Q>,
    {
        let h = self.find(q)?;
        self.handle_value_mut(h)
    }

    /// Like `get`, but an absent key is an error.
    pub fn at<Q>(&self, q: &Q) -> Result<&V, MapError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEquality<Q>,
    {
        self.get(q).ok_or(MapError::KeyNotFound)
    }

    pub fn at_mut<Q>(&mut self, q: &Q) -> Result<&mut V, MapError>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEquality<Q>,
    {
        self.get_mut(q).ok_or(MapError::KeyNotFound)
    }

    /// Bucket index `q` maps to under the current bucket count.
    pub fn bucket<Q>(&self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
    {
        let _g = self.reentrancy.enter();
        self.bucket_of(self.make_hash(q))
    }

    /// Insert `key -> value` unless `key` is present. Returns the entry's
    /// handle and whether it was inserted; a present key keeps its value.
    pub fn insert(&mut self, key: K, value: V) -> Result<(Handle, bool), AllocError>
    where
        E: KeyEquality<K>,
    {
        self.insert_with(key, || value)
    }

    /// Insert with a lazily built value; `make` runs only when `key` is
    /// vacant.
    pub fn insert_with<F>(&mut self, key: K, make: F) -> Result<(Handle, bool), AllocError>
    where
        E: KeyEquality<K>,
        F: FnOnce() -> V,
    {
        let (hash, found) = {
            let _g = self.reentrancy.enter();
            let hash = self.make_hash(&key);
            (hash, self.find_hashed(hash, &key))
        };
        if let Some(pos) = found {
            self.grow_if_needed();
            return Ok((Handle(pos), false));
        }
        let entry = Entry {
            key,
            value: make(),
            hash,
        };
        // Records first: a refusal must return before any rehash.
        self.memory.allocate_all(NEW_ENTRY)?;
        self.grow_if_needed();
        Ok((Handle(self.link_reserved(entry)), true))
    }

    /// Value for `key`, inserting `V::default()` first if absent.
    pub fn get_or_insert_default(&mut self, key: K) -> Result<&mut V, AllocError>
    where
        E: KeyEquality<K>,
        V: Default,
    {
        let (h, _) = self.insert_with(key, V::default)?;
        Ok(self
            .handle_value_mut(h)
            .expect("entry located by insert_with must be live"))
    }

    /// Erase the entry for `q`, returning its value.
    pub fn remove<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEquality<Q>,
    {
        let h = self.find(q)?;
        self.erase(h).map(|(_, v)| v)
    }

    /// Insert every pair, stopping at the first refusal. Pairs inserted
    /// before the refusal stay.
    pub fn try_extend<I>(&mut self, iter: I) -> Result<(), AllocError>
    where
        I: IntoIterator<Item = (K, V)>,
        E: KeyEquality<K>,
    {
        for (k, v) in iter {
            self.insert(k, v)?;
        }
        Ok(())
    }
}

impl<K, V, S, E> ChainedHashMap<K, V, S, E>
where
    K: Clone,
    V: Clone,
    S: Clone,
    E: Clone,
{
    /// Deep copy with the same bucket count and traversal order. Cached
    /// hashes are reused; the hasher is not called.
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        self.clone_in(self.memory.select_on_copy())
    }

    /// Copy assignment. On refusal `self` is unchanged.
    pub fn try_clone_from(&mut self, source: &Self) -> Result<(), AllocError> {
        let memory = if self.memory.policy().on_copy_assign {
            source.memory.clone()
        } else {
            self.memory.clone()
        };
        *self = source.clone_in(memory)?;
        Ok(())
    }

    fn clone_in(&self, memory: Memory) -> Result<Self, AllocError> {
        let mut copy = Self::from_parts(
            self.directory.len(),
            self.hasher.clone(),
            self.eq.clone(),
            memory,
        );
        // Same bucket count and order, so the first entry seen for a bucket
        // is its run head.
        for &key in self.order.iter() {
            let e = &self.entries[key];
            let pos = copy.store(
                Entry {
                    key: e.key.clone(),
                    value: e.value.clone(),
                    hash: e.hash,
                },
                Position::END,
            )?;
            let bucket = copy.bucket_of(e.hash);
            if copy.directory[bucket].is_none() {
                copy.directory[bucket] = Some(pos);
            }
        }
        Ok(copy)
    }
}

impl<K, V, S, E> Drop for ChainedHashMap<K, V, S, E> {
    fn drop(&mut self) {
        self.memory.deallocate(Record::Entry, self.entries.len());
    }
}

impl<K, V, S, E> Default for ChainedHashMap<K, V, S, E>
where
    S: Default,
    E: Default,
{
    fn default() -> Self {
        Self::from_parts(DEFAULT_BUCKETS, S::default(), E::default(), Memory::global())
    }
}

impl<K, V, S, E> Clone for ChainedHashMap<K, V, S, E>
where
    K: Clone,
    V: Clone,
    S: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        self.try_clone()
            .unwrap_or_else(|e| panic!("ChainedHashMap::clone: {e}"))
    }

    fn clone_from(&mut self, source: &Self) {
        if let Err(e) = self.try_clone_from(source) {
            panic!("ChainedHashMap::clone_from: {e}");
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S, E> fmt::Debug for ChainedHashMap<K, V, S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(_, k, v)| (k, v)))
            .finish()
    }
}

/// Equal when both hold the same key/value pairs, in any order.
impl<K, V, S, E> PartialEq for ChainedHashMap<K, V, S, E>
where
    K: Hash,
    V: PartialEq,
    S: BuildHasher,
    E: KeyEquality<K>,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(_, k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, S, E> Extend<(K, V)> for ChainedHashMap<K, V, S, E>
where
    K: Hash,
    S: BuildHasher,
    E: KeyEquality<K>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        if let Err(e) = self.try_extend(iter) {
            panic!("ChainedHashMap::extend: {e}");
        }
    }
}

impl<K, V, S, E> FromIterator<(K, V)> for ChainedHashMap<K, V, S, E>
where
    K: Hash,
    S: BuildHasher + Default,
    E: KeyEquality<K> + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut m = Self::default();
        m.extend(iter);
        m
    }
}

/// Traversal in sequence order, lazy and double-ended.
pub struct Iter<'a, K, V> {
    order: &'a Sequence<EntryKey>,
    entries: &'a SlotMap<EntryKey, Entry<K, V>>,
    front: Position,
    back: Position,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    #[inline]
    fn entry(&self, pos: Position) -> Option<(Handle, &'a K, &'a V)> {
        let e = self.entries.get(*self.order.get(pos)?)?;
        Some((Handle(pos), &e.key, &e.value))
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (Handle, &'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.entry(self.front)?;
        self.front = self.order.next(self.front)?;
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.entry(self.back)?;
        self.back = self.order.prev(self.back)?;
        self.remaining -= 1;
        Some(item)
    }
}

impl<'a, K, V> ExactSizeIterator for Iter<'a, K, V> {}

/// Mutable traversal in sequence order, lazy and double-ended. The links
/// are read through `order` while values are reached through `entries`.
pub struct IterMut<'a, K, V> {
    order: &'a Sequence<EntryKey>,
    entries: *mut SlotMap<EntryKey, Entry<K, V>>,
    front: Position,
    back: Position,
    remaining: usize,
    _marker: PhantomData<&'a mut Entry<K, V>>,
}

impl<'a, K, V> IterMut<'a, K, V> {
    /// # Safety
    /// `pos` must not have been yielded before by this iterator.
    #[inline]
    unsafe fn entry(&mut self, pos: Position) -> Option<(Handle, &'a K, &'a mut V)> {
        let key = *self.order.get(pos)?;
        // SAFETY: the iterator was built from `&'a mut` access to the entry
        // arena, which `order` does not alias. Each entry is linked once in
        // `order` and yielded at most once, so the references never alias.
        let e = unsafe { (*self.entries).get_mut(key)? };
        Some((Handle(pos), &e.key, &mut e.value))
    }
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (Handle, &'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // SAFETY: `front` only advances and `remaining` stops it before it
        // reaches an entry already taken from the back.
        let item = unsafe { self.entry(self.front)? };
        self.front = self.order.next(self.front)?;
        self.remaining -= 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V> DoubleEndedIterator for IterMut<'a, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // SAFETY: as in `next`, with the ends swapped.
        let item = unsafe { self.entry(self.back)? };
        self.back = self.order.prev(self.back)?;
        self.remaining -= 1;
        Some(item)
    }
}

impl<'a, K, V> ExactSizeIterator for IterMut<'a, K, V> {}

/// Owning traversal in sequence order.
pub struct IntoIter<K, V> {
    order: sequence::IntoIter<EntryKey>,
    entries: SlotMap<EntryKey, Entry<K, V>>,
    memory: Memory,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let key = self.order.next()?;
        let e = self.entries.remove(key)?;
        self.memory.deallocate(Record::Entry, 1);
        Some((e.key, e.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.order.size_hint()
    }
}

impl<K, V> Drop for IntoIter<K, V> {
    fn drop(&mut self) {
        self.memory.deallocate(Record::Entry, self.entries.len());
    }
}

impl<K, V, S, E> IntoIterator for ChainedHashMap<K, V, S, E> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(mut self) -> IntoIter<K, V> {
        let order = self.order.take();
        let entries = core::mem::take(&mut self.entries);
        IntoIter {
            order: order.into_iter(),
            entries,
            memory: self.memory.clone(),
        }
    }
}

impl<'a, K, V, S, E> IntoIterator for &'a ChainedHashMap<K, V, S, E> {
    type Item = (Handle, &'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}
