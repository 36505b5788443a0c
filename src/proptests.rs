use super::*;

use crate::table::tests::Colliding;
use proptest::prelude::*;
use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// Check the structural invariants lookups depend on:
/// - `len` matches the number of occupied slots;
/// - every occupied slot is reachable from its key's home slot without
///   crossing an empty slot or an earlier copy of the same key.
fn validate_table<KS, VS, S, K>(t: &Table<KS, VS, S>, key_at: impl Fn(usize) -> K)
where
    KS: SlotStore,
    VS: SlotStore,
    S: BuildHasher,
    K: Hash + Eq + Debug,
{
    let occupancy = t.occupancy();
    assert_eq!(
        occupancy.occupied_count(),
        t.len(),
        "len must match occupied slot count"
    );
    let cap = t.capacity();
    for slot in (0..cap).filter(|&i| occupancy.is_occupied(i)) {
        let key = key_at(slot);
        let mut i = (t.hasher().hash_one(&key) % cap as u64) as usize;
        while i != slot {
            assert_ne!(
                occupancy.state(i),
                SlotState::Empty,
                "empty slot {i} breaks the chain to {key:?} at {slot}"
            );
            if occupancy.is_occupied(i) {
                assert_ne!(key_at(i), key, "duplicate live key {key:?}");
            }
            i = (i + 1) % cap;
        }
    }
}

#[derive(Clone, Debug)]
enum Op<K, V> {
    Insert(K, V),
    Remove(K),
    Get(K),
    Reserve(usize),
    Compact,
}

fn ops_strategy<K, V>(
    key: impl Strategy<Value = K> + Clone,
    value: impl Strategy<Value = V>,
    len: usize,
) -> impl Strategy<Value = Vec<Op<K, V>>>
where
    K: Debug + Clone,
    V: Debug + Clone,
{
    let op = prop_oneof![
        50 => (key.clone(), value).prop_map(|(k, v)| Op::Insert(k, v)),
        25 => key.clone().prop_map(Op::Remove),
        20 => key.prop_map(Op::Get),
        3 => (0usize..200).prop_map(Op::Reserve),
        2 => Just(Op::Compact),
    ];
    prop::collection::vec(op, 0..=len)
}

/// Small key space so erase/reinsert cycles hit the same slots.
fn small_key() -> impl Strategy<Value = u16> + Clone {
    0u16..96
}

fn word_key() -> impl Strategy<Value = String> + Clone {
    "[a-e]{0,3}"
}

/// Apply `ops` to `t` and a std map, asserting they agree at every step.
/// `read` looks a key up in `t` and returns an owned copy of its value.
fn run_ops<KS, VS, S, K, V>(
    t: &mut Table<KS, VS, S>,
    ops: Vec<Op<K, V>>,
    read: impl Fn(&Table<KS, VS, S>, &K) -> Option<V>,
) -> std::result::Result<StdHashMap<K, V>, TestCaseError>
where
    KS: SlotStoreMut<Item = K> + KeyStore<K>,
    VS: SlotStoreMut<Item = V>,
    S: BuildHasher,
    K: Hash + Eq + Clone + Debug,
    V: Clone + PartialEq + Debug,
{
    let mut m: StdHashMap<K, V> = StdHashMap::new();
    for op in ops {
        match op {
            Op::Insert(key, value) => {
                let old_t = t.insert(key.clone(), value.clone()).unwrap();
                let old_m = m.insert(key, value);
                prop_assert_eq!(old_t, old_m);
            }
            Op::Remove(key) => {
                let old_t = t.remove(&key).unwrap();
                let old_m = m.remove(&key);
                prop_assert_eq!(old_t, old_m);
            }
            Op::Get(key) => {
                prop_assert_eq!(read(t, &key), m.get(&key).cloned());
                prop_assert_eq!(t.contains(&key), m.contains_key(&key));
            }
            Op::Reserve(n) => {
                let cap = t.capacity();
                t.reserve(n).unwrap();
                if n <= t.len() {
                    prop_assert_eq!(t.capacity(), cap, "reserve below len must not resize");
                }
            }
            Op::Compact => t.compact().unwrap(),
        }
        prop_assert_eq!(t.len(), m.len());
    }
    Ok(m)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_flat(ops in ops_strategy(small_key(), any::<u64>(), 1500)) {
        let mut t: FlatHashMap<u16, u64> = FlatHashMap::new();
        let m = run_ops(&mut t, ops, |t, k| t.get(k).copied())?;
        validate_table(&t, |i| *t.key_store().get(i));
        let mut got: Vec<(u16, u64)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let mut expected: Vec<(u16, u64)> = m.into_iter().collect();
        got.sort();
        expected.sort();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_equivalence_colliding(ops in ops_strategy(0u16..24, any::<u8>(), 400)) {
        let mut t: FlatHashMap<u16, u8, Colliding> = FlatHashMap::new();
        let m = run_ops(&mut t, ops, |t, k| t.get(k).copied())?;
        validate_table(&t, |i| *t.key_store().get(i));
        prop_assert_eq!(t.len(), m.len());
    }

    #[test]
    fn prop_equivalence_strings(ops in ops_strategy(word_key(), any::<i32>(), 1000)) {
        let mut t: HashMap<String, i32> = HashMap::new();
        let m = run_ops(&mut t, ops, |t, k| t.get(k).copied())?;
        validate_table(&t, |i| t.key_store().get(i).clone());
        for (k, v) in &m {
            prop_assert_eq!(t.get(k.as_str()), Some(v));
        }
    }

    #[test]
    fn prop_set_equivalence(
        ops in prop::collection::vec((any::<bool>(), small_key()), 0..1000)
    ) {
        let mut s: FlatHashSet<u16> = FlatHashSet::new();
        let mut m: StdHashSet<u16> = StdHashSet::new();
        for (insert, key) in ops {
            if insert {
                prop_assert_eq!(s.insert(key).unwrap(), m.insert(key));
            } else {
                prop_assert_eq!(s.erase(&key).unwrap(), m.remove(&key));
            }
            prop_assert_eq!(s.len(), m.len());
        }
        validate_table(s.as_table(), |i| *s.as_table().key_store().get(i));
        let mut got: Vec<u16> = s.iter().copied().collect();
        let mut expected: Vec<u16> = m.into_iter().collect();
        got.sort_unstable();
        expected.sort_unstable();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_growth_preserves_contents(keys in prop::collection::vec(any::<u64>(), 0..500)) {
        let mut t: FlatHashMap<u64, u64> = FlatHashMap::with_capacity(1);
        let mut seen = StdHashMap::new();
        for (i, k) in keys.into_iter().enumerate() {
            let cap = t.capacity();
            t.insert(k, i as u64).unwrap();
            seen.insert(k, i as u64);
            if t.capacity() != cap {
                for (k, v) in &seen {
                    prop_assert_eq!(t.get(k), Some(v));
                }
            }
        }
        prop_assert!(t.len() as f64 <= t.capacity() as f64);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_flat_round_trip(ops in ops_strategy(small_key(), any::<u32>(), 600)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("round_trip.tbl");
        let mut t: FlatHashMap<u16, u32> = FlatHashMap::new();
        run_ops(&mut t, ops, |t, k| t.get(k).copied())?;
        t.write(&path).unwrap();

        let mapped = FlatHashMap::<u16, u32>::open(&path).unwrap();
        prop_assert_eq!(mapped.len(), t.len());
        for (k, v) in &t {
            prop_assert!(mapped.contains(k));
            prop_assert_eq!(mapped.at(k).unwrap(), v);
        }
        for k in 0u16..96 {
            prop_assert_eq!(mapped.contains(&k), t.contains(&k));
        }
    }

    #[test]
    fn prop_string_round_trip(ops in ops_strategy(word_key(), any::<u64>(), 600)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strings.tbl");
        let mut t: StrKeyMap<u64> = StrKeyMap::new();
        run_ops(&mut t, ops, |t, k| t.get(k).copied())?;
        t.write(&path).unwrap();

        let mapped: MappedStrKeyMap<u64> = StrKeyMap::<u64>::open(&path).unwrap();
        prop_assert_eq!(mapped.len(), t.len());
        for (k, v) in &t {
            prop_assert_eq!(mapped.at(k.as_str()).unwrap(), v);
        }
        validate_table(&mapped, |i| mapped.key_store().get(i).to_string());
    }

    #[test]
    fn prop_parallel_matches_sequential(
        keys in prop::collection::hash_set(any::<u32>(), 1..300),
        threads in 1usize..64,
    ) {
        let mut t: FlatHashMap<u32, u64> = FlatHashMap::new();
        for k in &keys {
            t.insert(*k, u64::from(*k) % 1000).unwrap();
        }
        let threads = threads.min(t.len());
        let table = Arc::new(t);
        let pool = ThreadPool::new(4).unwrap();

        let sequential = table.fold((0u64, 0usize), |acc: &mut (u64, usize), _k: &u32, v: &u64| {
            acc.0 += v;
            acc.1 += 1;
        });
        let parallel = parallel_traverse(
            &table,
            &pool,
            Some(threads),
            <(u64, usize)>::default,
            |acc: &mut (u64, usize), _k: &u32, v: &u64| {
                acc.0 += v;
                acc.1 += 1;
            },
            |total: &mut (u64, usize), part: (u64, usize)| {
                total.0 += part.0;
                total.1 += part.1;
            },
            (0u64, 0usize),
        )
        .wait()
        .unwrap();
        prop_assert_eq!(parallel, sequential);
        prop_assert_eq!(parallel.1, keys.len());
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_erase_then_reinsert_on_one_chain() {
    let keys: Vec<u16> = vec![1, 2, 3, 4, 5, 6];

    // Every key collides, so each erase order leaves a different pattern of
    // tombstones along one probe chain.
    for_each_permutation(&keys, |perm| {
        let mut t: FlatHashMap<u16, u16, Colliding> = FlatHashMap::with_capacity(16);
        for &k in &keys {
            t.insert(k, k * 10).unwrap();
        }
        for (n, &k) in perm.iter().enumerate().take(3) {
            assert_eq!(t.remove(&k).unwrap(), Some(k * 10));
            assert!(!t.contains(&k));
            validate_table(&t, |i| *t.key_store().get(i));
            assert_eq!(t.len(), keys.len() - n - 1);
        }
        for &k in &perm[..3] {
            assert_eq!(t.insert(k, k).unwrap(), None);
        }
        assert_eq!(t.capacity(), 16, "refilling tombstones must not grow");
        validate_table(&t, |i| *t.key_store().get(i));
        for &k in &keys {
            assert!(t.contains(&k));
        }
    });
}
