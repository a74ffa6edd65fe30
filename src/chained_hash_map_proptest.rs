#![cfg(test)]

// Property tests for ChainedHashMap kept inside the crate so the structural
// check (`check_structure`) can run after every operation.

use crate::chained_hash_map::{ChainedHashMap, Handle};
use crate::memory::{Budget, Memory, Record};
use crate::StdEq;
use hashbrown::hash_map::DefaultHashBuilder;
use proptest::prelude::*;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::rc::Rc;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed operations shrink towards earlier keys and shorter lists.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertWith(usize, i32),
    Erase(usize),
    Remove(usize),
    Find(usize),
    Contains(String),
    Mutate(usize, i32),
    Bump(usize),
    EraseFirst(usize),
    Reserve(usize),
    Clear,
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,4}", 1..=40).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertWith(i, v)),
            2 => idx.clone().prop_map(OpI::Erase),
            2 => idx.clone().prop_map(OpI::Remove),
            2 => idx.clone().prop_map(OpI::Find),
            1 => prop_oneof![contains_pool, "[a-z]{0,4}"].prop_map(OpI::Contains),
            1 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => idx.clone().prop_map(OpI::Bump),
            1 => (0usize..4).prop_map(OpI::EraseFirst),
            1 => (0usize..40).prop_map(OpI::Reserve),
            1 => Just(OpI::Clear),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Drives `sut` and a std HashMap through `ops`. After every op:
// - bucket runs are contiguous and every directory slot is its run head;
// - size parity with the model;
// - handles of erased entries never resolve;
// - handles of live entries still resolve to their key (rehash included).
fn run_state_machine<S: BuildHasher>(
    mut sut: ChainedHashMap<Key, i32, S, StdEq>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<Key, i32> = HashMap::new();
    let mut live: HashMap<Key, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();
    let calls = Rc::new(Cell::new(0));

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let (h, fresh) = sut.insert(k.clone(), v).expect("global memory never refuses");
                prop_assert_eq!(fresh, !already, "inserted flag must mirror absence");
                if fresh {
                    live.insert(k.clone(), h);
                    model.insert(k, v);
                } else {
                    prop_assert_eq!(Some(&h), live.get(&k), "duplicate returns the live handle");
                }
            }
            OpI::InsertWith(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let counter = calls.clone();
                let before = counter.get();
                let (h, fresh) = sut
                    .insert_with(k.clone(), move || {
                        counter.set(counter.get() + 1);
                        v
                    })
                    .expect("global memory never refuses");
                prop_assert_eq!(fresh, !already);
                if fresh {
                    prop_assert_eq!(calls.get(), before + 1, "constructor runs once on insert");
                    live.insert(k.clone(), h);
                    model.insert(k, v);
                } else {
                    prop_assert_eq!(calls.get(), before, "constructor skipped on duplicate");
                }
            }
            OpI::Erase(i) => {
                let k = key_from(pool, i);
                if let Some(h) = live.remove(&k) {
                    let (kk, vv) = sut.erase(h).expect("live handle erases");
                    prop_assert!(kk == k);
                    prop_assert_eq!(Some(vv), model.remove(&k));
                    stale.push(h);
                } else {
                    prop_assert!(sut.find(&k).is_none());
                }
            }
            OpI::Remove(i) => {
                let k = key_from(pool, i);
                let got = sut.remove(k.0.as_str());
                prop_assert_eq!(got, model.remove(&k));
                if let Some(h) = live.remove(&k) {
                    stale.push(h);
                }
            }
            OpI::Find(i) => {
                let k = key_from(pool, i);
                let s = sut.find(&k);
                prop_assert_eq!(s.is_some(), model.contains_key(&k));
                if let Some(h) = s {
                    prop_assert_eq!(Some(&h), live.get(&k));
                    prop_assert_eq!(h.value(&sut), model.get(&k));
                }
            }
            OpI::Contains(s) => {
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(sut.contains_key(s.as_str()), has_model);
            }
            OpI::Mutate(i, d) => {
                let k = key_from(pool, i);
                if let Some(&h) = live.get(&k) {
                    let vr = h.value_mut(&mut sut);
                    prop_assert!(vr.is_some(), "live handle should resolve");
                    if let Some(vr) = vr {
                        *vr = vr.saturating_add(d);
                    }
                    if let Some(mv) = model.get_mut(&k) {
                        *mv = mv.saturating_add(d);
                    }
                }
            }
            OpI::Bump(i) => {
                let k = key_from(pool, i);
                let fresh = !model.contains_key(&k);
                let v = sut.get_or_insert_default(k.clone()).expect("global memory never refuses");
                *v = v.wrapping_add(1);
                let mv = model.entry(k.clone()).or_insert(0);
                *mv = mv.wrapping_add(1);
                if fresh {
                    let h = sut.find(&k).expect("just inserted");
                    live.insert(k, h);
                }
            }
            OpI::EraseFirst(n) => {
                let first = sut.begin();
                let handles: Vec<Handle> = sut.handles().take(n).collect();
                let stop = sut.handles().nth(n);
                if let Some(first) = first {
                    let erased = sut.erase_range(first, stop);
                    prop_assert_eq!(erased, handles.len());
                    live.retain(|k, h| {
                        if handles.contains(h) {
                            model.remove(k);
                            false
                        } else {
                            true
                        }
                    });
                    stale.extend(handles);
                }
            }
            OpI::Reserve(n) => {
                sut.reserve(n);
                prop_assert_eq!(sut.bucket_count(), n.max(1));
            }
            OpI::Clear => {
                let buckets = sut.bucket_count();
                sut.clear();
                prop_assert_eq!(sut.bucket_count(), buckets);
                stale.extend(live.drain().map(|(_, h)| h));
                model.clear();
            }
            OpI::Iterate => {
                let s: BTreeSet<(Key, i32)> = sut.iter().map(|(_, k, v)| (k.clone(), *v)).collect();
                let m: BTreeSet<(Key, i32)> = model.iter().map(|(k, v)| (k.clone(), *v)).collect();
                prop_assert_eq!(s, m);
            }
        }

        if let Err(msg) = sut.check_structure() {
            prop_assert!(false, "{}", msg);
        }
        for &h in &stale {
            prop_assert!(h.value(&sut).is_none());
        }
        for (k, h) in &live {
            prop_assert_eq!(h.key(&sut), Some(k));
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

// Every key collides on one hash value.
#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

// Few distinct hash values, so buckets hold keys with different hashes.
#[derive(Clone, Default)]
struct NarrowBuildHasher;
struct NarrowHasher(u64);
impl BuildHasher for NarrowBuildHasher {
    type Hasher = NarrowHasher;
    fn build_hasher(&self) -> Self::Hasher {
        NarrowHasher(0)
    }
}
impl Hasher for NarrowHasher {
    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = self.0.wrapping_mul(31).wrapping_add(u64::from(*b));
        }
    }
    fn finish(&self) -> u64 {
        self.0 % 48
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    // Property: state-machine equivalence against std::collections::HashMap.
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_state_machine(ChainedHashMap::with_hasher(DefaultHashBuilder::default()), &pool, ops)?;
    }

    // Property: the same, with every key colliding.
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_state_machine(ChainedHashMap::with_hasher(ConstBuildHasher), &pool, ops)?;
    }

    // Property: the same, with distinct hashes sharing buckets.
    #[test]
    fn prop_state_machine_with_shared_buckets((pool, ops) in arb_scenario()) {
        run_state_machine(ChainedHashMap::with_hasher(NarrowBuildHasher), &pool, ops)?;
    }

    // Property: under a tight budget every refusal leaves the map as it was,
    // and all records are returned once the map is gone.
    #[test]
    fn prop_refusals_are_atomic(keys in proptest::collection::vec(0u16..200, 1..80), limit in 0usize..60) {
        let books = Budget::with_limit(limit);
        {
            let mut sut: ChainedHashMap<u16, u16, NarrowBuildHasher> = ChainedHashMap::from_parts(
                crate::DEFAULT_BUCKETS,
                NarrowBuildHasher,
                StdEq,
                Memory::new(books.clone()),
            );
            let mut model: BTreeSet<u16> = BTreeSet::new();
            for k in keys {
                let before: Vec<u16> = sut.keys().copied().collect();
                let buckets = sut.bucket_count();
                match sut.insert(k, k) {
                    Ok((_, fresh)) => {
                        prop_assert_eq!(fresh, model.insert(k));
                    }
                    Err(_) => {
                        prop_assert!(!model.contains(&k), "duplicates never allocate");
                        let after: Vec<u16> = sut.keys().copied().collect();
                        prop_assert_eq!(before, after);
                        prop_assert_eq!(sut.bucket_count(), buckets, "a refusal never rehashes");
                    }
                }
                if let Err(msg) = sut.check_structure() {
                    prop_assert!(false, "{}", msg);
                }
                prop_assert_eq!(books.live(Record::Entry), sut.len());
                prop_assert_eq!(books.live(Record::Node), sut.len());
            }
        }
        prop_assert_eq!(books.live_total(), 0);
    }
}
