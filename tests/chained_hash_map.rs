use chained_hashmap::{
    AllocError, Budget, ChainedHashMap, Handle, MapError, Memory, Propagation, Record, StdEq,
    DEFAULT_BUCKETS,
};
use std::collections::HashSet;
use std::hash::{BuildHasher, Hasher};

// Hashes a u64 key to itself, so bucket membership is `key % bucket_count`.
#[derive(Clone, Default)]
struct IdentityBuildHasher;
struct IdentityHasher(u64);
impl BuildHasher for IdentityBuildHasher {
    type Hasher = IdentityHasher;
    fn build_hasher(&self) -> IdentityHasher {
        IdentityHasher(0)
    }
}
impl Hasher for IdentityHasher {
    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 = self.0.rotate_left(8) ^ u64::from(*b);
        }
    }
    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }
    fn finish(&self) -> u64 {
        self.0
    }
}

type IdMap<V> = ChainedHashMap<u64, V, IdentityBuildHasher>;

fn id_map<V>() -> IdMap<V> {
    ChainedHashMap::with_hasher(IdentityBuildHasher)
}

fn id_map_in<V>(memory: Memory) -> IdMap<V> {
    ChainedHashMap::from_parts(DEFAULT_BUCKETS, IdentityBuildHasher, StdEq, memory)
}

// Checks through the public API that each bucket is one run headed by the
// directory slot.
fn assert_contiguous<V, S: BuildHasher>(m: &ChainedHashMap<u64, V, S>) {
    let mut seen = HashSet::new();
    let mut prev = None;
    for h in m.handles() {
        let b = m.bucket(h.key(m).unwrap());
        if prev != Some(b) {
            assert!(seen.insert(b), "bucket {b} appears as two runs");
            assert_eq!(m.bucket_head(b), Some(h), "bucket {b} head");
        }
        prev = Some(b);
    }
    for b in 0..m.bucket_count() {
        assert_eq!(m.bucket_head(b).is_some(), seen.contains(&b));
        let run = m.handles().filter(|h| m.bucket(h.key(m).unwrap()) == b).count();
        assert_eq!(m.bucket_len(b), run);
    }
}

fn keys<V, S>(m: &ChainedHashMap<u64, V, S>) -> Vec<u64> {
    m.keys().copied().collect()
}

#[test]
fn insert_find_erase_basics() {
    let mut m: ChainedHashMap<String, i32> = ChainedHashMap::new();
    assert!(m.is_empty());
    assert_eq!(m.bucket_count(), DEFAULT_BUCKETS);

    let (h, inserted) = m.insert("a".to_string(), 1).expect("insert ok");
    assert!(inserted);
    assert_eq!(m.find("a"), Some(h));
    assert_eq!(h.key(&m).map(String::as_str), Some("a"));
    *h.value_mut(&mut m).unwrap() += 41;
    assert_eq!(m.get("a"), Some(&42));

    assert_eq!(m.erase(h), Some(("a".to_string(), 42)));
    assert!(m.find("a").is_none());
    assert!(m.is_empty());
}

#[test]
fn three_keys_in_bucket_three_form_one_run() {
    let mut m = id_map();
    m.insert(3, "three").unwrap();
    m.insert(19, "nineteen").unwrap();
    m.insert(35, "thirty-five").unwrap();
    assert_eq!(keys(&m), vec![35, 19, 3]);
    assert_eq!(m.bucket(&19), 3);
    assert_eq!(m.bucket_len(3), 3);
    assert_contiguous(&m);

    m.remove(&19);
    assert_eq!(keys(&m), vec![35, 3]);
    assert_eq!(m.bucket_head(3), m.find(&35));
    m.remove(&35);
    assert_eq!(m.bucket_head(3), m.find(&3));
    assert_contiguous(&m);
}

#[test]
fn new_bucket_runs_start_at_the_end() {
    let mut m = id_map();
    for k in [1u64, 2, 17, 3, 18, 33] {
        m.insert(k, ()).unwrap();
    }
    // Runs of 1, 2 and 3 in the order their buckets were first used.
    assert_eq!(keys(&m), vec![33, 17, 1, 18, 2, 3]);
    assert_contiguous(&m);
}

#[test]
fn growth_happens_past_nine_tenths() {
    let mut m = id_map();
    for k in 0..15u64 {
        m.insert(k, k).unwrap();
    }
    assert_eq!(m.bucket_count(), 16);
    assert!(m.load_factor() > m.max_load_factor());

    // A duplicate still runs the growth check.
    let (_, inserted) = m.insert(0, 99).unwrap();
    assert!(!inserted);
    assert_eq!(m.bucket_count(), 32);
    assert_eq!(m.get(&0), Some(&0));

    for k in 15..40u64 {
        m.insert(k, k).unwrap();
    }
    assert!(m.bucket_count() >= 64);
    assert!(m.load_factor() <= 0.9 + 1.0 / m.bucket_count() as f64);
    for k in 0..40u64 {
        assert_eq!(m.get(&k), Some(&k));
    }
    assert_contiguous(&m);
}

#[test]
fn rehash_matches_a_fresh_build_in_the_same_order() {
    let mut m = id_map();
    for k in [5u64, 21, 6, 37, 22, 7, 53] {
        m.insert(k, ()).unwrap();
    }
    let before = keys(&m);
    m.reserve(8);

    // Inserting the pre-rehash traversal into an 8-bucket map, one by one,
    // gives the same shape.
    let mut fresh: IdMap<()> =
        ChainedHashMap::from_parts(8, IdentityBuildHasher, StdEq, Memory::global());
    for k in &before {
        fresh.insert(*k, ()).unwrap();
    }
    assert_eq!(keys(&m), keys(&fresh));
    assert_contiguous(&m);
}

#[test]
fn handles_stay_valid_across_rehash_and_other_erasures() {
    let mut m: ChainedHashMap<String, usize> = ChainedHashMap::new();
    let handles: Vec<Handle> = (0..100)
        .map(|i| m.insert(format!("k{i}"), i).unwrap().0)
        .collect();
    for (i, h) in handles.iter().enumerate().filter(|(i, _)| i % 3 == 0) {
        assert_eq!(m.erase(*h).map(|(_, v)| v), Some(i));
    }
    for (i, h) in handles.iter().enumerate() {
        if i % 3 == 0 {
            assert!(h.value(&m).is_none());
        } else {
            assert_eq!(h.value(&m), Some(&i));
        }
    }
}

#[test]
fn at_reports_missing_keys() {
    let mut m: ChainedHashMap<String, i32> = ChainedHashMap::new();
    assert_eq!(m.at("nope"), Err(MapError::KeyNotFound));
    m.insert("yes".to_string(), 7).unwrap();
    assert_eq!(m.at("yes"), Ok(&7));
    *m.at_mut("yes").unwrap() = 8;
    assert_eq!(m.at("yes"), Ok(&8));
    assert_eq!(MapError::KeyNotFound.to_string(), "key not found");
}

#[test]
fn default_insertion_counts_words() {
    let mut m: ChainedHashMap<&str, usize> = ChainedHashMap::new();
    for w in "a b a c b a".split(' ') {
        *m.get_or_insert_default(w).unwrap() += 1;
    }
    assert_eq!(m.get(&"a"), Some(&3));
    assert_eq!(m.get(&"b"), Some(&2));
    assert_eq!(m.get(&"c"), Some(&1));
}

#[test]
fn iteration_views_agree() {
    let mut m = id_map();
    for k in [4u64, 20, 5] {
        m.insert(k, k * 2).unwrap();
    }
    let by_iter: Vec<(u64, u64)> = m.iter().map(|(_, k, v)| (*k, *v)).collect();
    let by_ref: Vec<(u64, u64)> = (&m).into_iter().map(|(_, k, v)| (*k, *v)).collect();
    let ks: Vec<u64> = m.keys().copied().collect();
    let vs: Vec<u64> = m.values().copied().collect();
    assert_eq!(by_iter, by_ref);
    assert_eq!(by_iter.iter().map(|p| p.0).collect::<Vec<_>>(), ks);
    assert_eq!(by_iter.iter().map(|p| p.1).collect::<Vec<_>>(), vs);
    assert_eq!(m.iter().len(), 3);

    for v in m.values_mut() {
        *v += 1;
    }
    assert_eq!(m.get(&20), Some(&41));

    let owned: Vec<(u64, u64)> = m.into_iter().collect();
    assert_eq!(owned, vec![(20, 41), (4, 9), (5, 11)]);
}

#[test]
fn collect_extend_and_debug() {
    let mut m: ChainedHashMap<u64, &str, IdentityBuildHasher> =
        [(1, "one"), (2, "two")].into_iter().collect();
    m.extend([(3, "three"), (1, "uno")]);
    assert_eq!(m.len(), 3);
    assert_eq!(m.get(&1), Some(&"one"), "existing keys are kept");
    assert_eq!(format!("{m:?}"), r#"{1: "one", 2: "two", 3: "three"}"#);
}

#[test]
fn clear_keeps_bucket_count() {
    let mut m = id_map();
    for k in 0..20u64 {
        m.insert(k, ()).unwrap();
    }
    let buckets = m.bucket_count();
    m.clear();
    assert!(m.is_empty());
    assert_eq!(m.bucket_count(), buckets);
    assert!((0..buckets).all(|b| m.bucket_head(b).is_none()));
    m.insert(1, ()).unwrap();
    assert_contiguous(&m);
}

#[test]
fn erase_range_whole_map_and_empty_range() {
    let mut m = id_map();
    for k in 0..10u64 {
        m.insert(k, ()).unwrap();
    }
    let first = m.begin().unwrap();
    assert_eq!(m.erase_range(first, Some(first)), 0);
    assert_eq!(m.len(), 10);
    assert_eq!(m.erase_range(first, None), 10);
    assert!(m.is_empty());
    assert!(m.begin().is_none());
}

#[test]
fn clone_copies_shape_and_is_independent() {
    let mut a = id_map();
    for k in [8u64, 24, 9, 40] {
        a.insert(k, k.to_string()).unwrap();
    }
    let mut b = a.clone();
    assert_eq!(keys(&a), keys(&b));
    assert_eq!(a, b);
    b.get_mut(&8).unwrap().push('!');
    assert_eq!(a.get(&8).map(String::as_str), Some("8"));
    assert_ne!(a, b);

    let mut c = id_map();
    c.insert(1, "x".to_string()).unwrap();
    c.clone_from(&a);
    assert_eq!(c, a);
    assert!(!c.contains_key(&1));
}

#[test]
fn take_moves_and_leaves_fresh_source() {
    let mut a = id_map();
    for k in 0..30u64 {
        a.insert(k, ()).unwrap();
    }
    let b = a.take();
    assert_eq!(b.len(), 30);
    assert!(a.is_empty());
    assert_eq!(a.bucket_count(), DEFAULT_BUCKETS);
    a.insert(7, ()).unwrap();
    assert!(a.contains_key(&7));
}

#[test]
fn move_assign_adopts_source_memory_by_default() {
    let src_books = Budget::unlimited();
    let dst_books = Budget::unlimited();
    let mut src = id_map_in(Memory::new(src_books.clone()));
    let mut dst = id_map_in(Memory::new(dst_books.clone()));
    src.insert(1, "a").unwrap();
    dst.insert(2, "b").unwrap();

    dst.assign(&mut src).unwrap();
    assert!(src.is_empty());
    assert_eq!(keys(&dst), vec![1]);
    assert_eq!(dst_books.live_total(), 0, "old target contents released");
    assert_eq!(src_books.live_total(), 2);
    drop(dst);
    assert_eq!(src_books.live_total(), 0);
}

#[test]
fn move_assign_without_propagation_moves_the_books() {
    let keep = Propagation {
        on_copy_assign: false,
        on_move_assign: false,
    };
    let src_books = Budget::unlimited();
    let dst_books = Budget::with_limit(4);
    let mut src = id_map_in(Memory::new(src_books.clone()));
    let mut dst = id_map_in(Memory::new(dst_books.clone()).with_policy(keep));
    for k in 0..3u64 {
        src.insert(k, ()).unwrap();
    }

    // Three entries need six records; the target allows four.
    let err = dst.assign(&mut src).unwrap_err();
    assert_eq!(err.record, Record::Entry);
    assert_eq!(src.len(), 3);
    assert_eq!(src_books.live_total(), 6);
    assert_eq!(dst_books.live_total(), 0);

    dst_books.set_limit(None);
    dst.assign(&mut src).unwrap();
    assert_eq!(src_books.live_total(), 0);
    assert_eq!(dst_books.live_total(), 6);
    dst.remove(&1);
    assert_eq!(dst_books.live_total(), 4);
    drop(dst);
    assert_eq!(dst_books.live_total(), 0);
}

#[test]
fn copy_assign_respects_policy() {
    let src_books = Budget::unlimited();
    let dst_books = Budget::unlimited();
    let mut src = id_map_in(Memory::new(src_books.clone()));
    src.insert(1, "a").unwrap();
    src.insert(2, "b").unwrap();

    let mut dst = id_map_in(Memory::new(dst_books.clone()));
    dst.try_clone_from(&src).unwrap();
    assert_eq!(dst_books.live_total(), 4, "target keeps its own strategy");
    assert_eq!(src_books.live_total(), 4);

    let share = Propagation {
        on_copy_assign: true,
        on_move_assign: true,
    };
    let mut dst2 = id_map_in(Memory::new(Budget::unlimited()).with_policy(share));
    dst2.try_clone_from(&src).unwrap();
    assert!(dst2.memory().same_strategy(src.memory()));
    assert_eq!(src_books.live_total(), 8);
}

#[test]
fn refused_clone_leaves_target_untouched() {
    let books = Budget::unlimited();
    let mut src = id_map_in(Memory::new(books.clone()));
    for k in 0..5u64 {
        src.insert(k, ()).unwrap();
    }
    books.set_limit(Some(12));
    let err: AllocError = src.try_clone().unwrap_err();
    assert_eq!(books.live_total(), 10);
    assert!(err.to_string().contains("refused"));

    let mut dst = id_map_in(Memory::new(books.clone()));
    let err = dst.try_clone_from(&src);
    assert!(err.is_err());
    assert!(dst.is_empty());
    assert_eq!(books.live_total(), 10);
}

#[test]
fn try_extend_stops_at_refusal() {
    let books = Budget::with_limit(6);
    let mut m = id_map_in(Memory::new(books.clone()));
    let res = m.try_extend((0..5u64).map(|k| (k, ())));
    assert!(res.is_err());
    assert_eq!(m.len(), 3);
    assert_eq!(books.live_total(), 6);
}

#[test]
#[should_panic(expected = "refused")]
fn extend_panics_on_refusal() {
    let mut m = id_map_in(Memory::new(Budget::with_limit(2)));
    m.extend([(1, ()), (2, ())]);
}
