//! Property-based tests for the bit-vector engine.

use std::collections::BTreeSet;

use proptest::prelude::*;
use sparsebits::{BitVector, OptMode, SortOrder};

const SIZE: u64 = 1 << 20;

fn vector_from(ids: &[u64]) -> BitVector {
    let mut bv = BitVector::with_size(SIZE);
    bv.set_ids(ids, SortOrder::Unknown).unwrap();
    bv
}

fn id_set(ids: &[u64]) -> BTreeSet<u64> {
    ids.iter().copied().collect()
}

fn ids_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..SIZE, 0..200)
}

proptest! {
    /// a OR a = a; a AND a = a
    #[test]
    fn prop_idempotence(ids in ids_strategy()) {
        let a = vector_from(&ids);

        let mut t = a.clone();
        t.or_with(&a);
        prop_assert!(t == a);

        let mut t = a.clone();
        t.and_with(&a);
        prop_assert!(t == a);
    }

    /// a XOR a = empty; a SUB a = empty
    #[test]
    fn prop_self_annihilation(ids in ids_strategy()) {
        let a = vector_from(&ids);

        let mut t = a.clone();
        t.xor_with(&a);
        prop_assert_eq!(t.count(), 0);

        let mut t = a.clone();
        t.sub_with(&a);
        prop_assert_eq!(t.count(), 0);
    }

    /// algebra matches the model set operations
    #[test]
    fn prop_algebra_matches_model(
        ids_a in ids_strategy(),
        ids_b in ids_strategy(),
    ) {
        let a = vector_from(&ids_a);
        let b = vector_from(&ids_b);
        let sa = id_set(&ids_a);
        let sb = id_set(&ids_b);

        let mut t = a.clone();
        t.or_with(&b);
        prop_assert_eq!(t.count(), sa.union(&sb).count() as u64);

        let mut t = a.clone();
        t.and_with(&b);
        prop_assert_eq!(t.count(), sa.intersection(&sb).count() as u64);

        let mut t = a.clone();
        t.sub_with(&b);
        prop_assert_eq!(t.count(), sa.difference(&sb).count() as u64);

        let mut t = a.clone();
        t.xor_with(&b);
        prop_assert_eq!(t.count(), sa.symmetric_difference(&sb).count() as u64);
    }

    /// three-operand forms agree with the in-place forms
    #[test]
    fn prop_three_operand_agrees(
        ids_a in ids_strategy(),
        ids_b in ids_strategy(),
    ) {
        let a = vector_from(&ids_a);
        let b = vector_from(&ids_b);

        let mut by_assign = BitVector::new();
        by_assign.assign_or(&a, &b, OptMode::Compress);
        let mut in_place = a.clone();
        in_place.or_with(&b);
        prop_assert!(by_assign == in_place);

        by_assign.assign_xor(&a, &b, OptMode::None);
        let mut in_place = a.clone();
        in_place.xor_with(&b);
        prop_assert!(by_assign == in_place);

        by_assign.assign_and(&a, &b, OptMode::Compress);
        let mut in_place = a.clone();
        in_place.and_with(&b);
        prop_assert!(by_assign == in_place);

        by_assign.assign_sub(&a, &b, OptMode::None);
        let mut in_place = a.clone();
        in_place.sub_with(&b);
        prop_assert!(by_assign == in_place);
    }

    /// invert(invert(a)) = a
    #[test]
    fn prop_invert_involution(ids in ids_strategy()) {
        let a = vector_from(&ids);
        let mut t = a.clone();
        t.invert();
        prop_assert_eq!(t.count(), SIZE - a.count());
        t.invert();
        prop_assert!(t == a);
    }

    /// shift_right then shift_left is the identity when nothing overflows
    #[test]
    fn prop_shift_round_trip(ids in prop::collection::vec(0u64..SIZE - 1, 0..150)) {
        let a = vector_from(&ids);
        let mut t = a.clone();
        let carry = t.shift_right();
        prop_assert!(!carry);
        let dropped = t.shift_left();
        prop_assert!(!dropped);
        prop_assert!(t == a);
    }

    /// shift_right moves every set position one step up
    #[test]
    fn prop_shift_right_model(ids in ids_strategy()) {
        let a = vector_from(&ids);
        let model: BTreeSet<u64> = id_set(&ids)
            .iter()
            .map(|&p| p + 1)
            .filter(|&p| p < SIZE)
            .collect();
        let had_top = a.test(SIZE - 1);

        let mut t = a.clone();
        let carry = t.shift_right();
        prop_assert_eq!(carry, had_top);
        prop_assert_eq!(t.count(), model.len() as u64);
        for &p in &model {
            prop_assert!(t.test(p), "missing {}", p);
        }
    }

    /// insert followed by erase at the same position is the identity
    #[test]
    fn prop_insert_erase_identity(
        ids in ids_strategy(),
        pos in 0u64..SIZE,
        val in any::<bool>(),
    ) {
        let a = vector_from(&ids);
        let mut t = a.clone();
        t.insert(pos, val).unwrap();
        prop_assert_eq!(t.test(pos), val);
        t.erase(pos).unwrap();
        prop_assert!(t == a);
        prop_assert_eq!(t.size(), a.size());
    }

    /// optimize never changes the reported set of positions
    #[test]
    fn prop_optimize_preserves(ids in ids_strategy()) {
        let a = vector_from(&ids);
        let mut t = a.clone();
        t.optimize(OptMode::Compress);
        prop_assert_eq!(t.count(), a.count());
        for &id in &ids {
            prop_assert!(t.test(id));
        }
        prop_assert!(t == a);
    }

    /// select(rank(i)) = i for set bits; rank(select(r)) = r
    #[test]
    fn prop_rank_select_round_trip(ids in ids_strategy()) {
        let a = vector_from(&ids);
        let rs = a.build_rs_index();
        let sorted: Vec<u64> = id_set(&ids).into_iter().collect();
        for (k, &id) in sorted.iter().enumerate() {
            let rank = (k + 1) as u64;
            prop_assert_eq!(a.rank(id, &rs), rank);
            prop_assert_eq!(a.select(rank, &rs), Some(id));
        }
        prop_assert_eq!(a.select(sorted.len() as u64 + 1, &rs), None);
    }

    /// count_range agrees with the rank index and with a naive model
    #[test]
    fn prop_count_consistency(
        ids in ids_strategy(),
        bounds in (0u64..SIZE, 0u64..SIZE),
    ) {
        let (x, y) = bounds;
        let (l, r) = if x <= y { (x, y) } else { (y, x) };
        let a = vector_from(&ids);
        let rs = a.build_rs_index();
        let naive = id_set(&ids).iter().filter(|&&p| p >= l && p <= r).count() as u64;
        prop_assert_eq!(a.count_range(l, r).unwrap(), naive);
        prop_assert_eq!(a.count_range_rs(l, r, &rs).unwrap(), naive);
        let by_rank = a.count_to(r, &rs) - if l == 0 { 0 } else { a.count_to(l - 1, &rs) };
        prop_assert_eq!(by_rank, naive);
    }

    /// iteration yields exactly the sorted set of positions
    #[test]
    fn prop_iteration_matches(ids in ids_strategy()) {
        let a = vector_from(&ids);
        let expected: Vec<u64> = id_set(&ids).into_iter().collect();
        let collected: Vec<u64> = a.ones().collect();
        prop_assert_eq!(collected, expected);
    }

    /// find_rank agrees with the sorted model
    #[test]
    fn prop_find_rank(ids in ids_strategy()) {
        let a = vector_from(&ids);
        let sorted: Vec<u64> = id_set(&ids).into_iter().collect();
        for (k, &id) in sorted.iter().enumerate() {
            prop_assert_eq!(a.find_rank((k + 1) as u64, 0), Some(id));
        }
    }

    /// bulk clear/keep agree with the model
    #[test]
    fn prop_bulk_keep_clear(
        ids in ids_strategy(),
        mask in ids_strategy(),
    ) {
        let sa = id_set(&ids);
        let sm = id_set(&mask);

        let mut t = vector_from(&ids);
        t.keep_ids(&mask, SortOrder::Unknown).unwrap();
        prop_assert_eq!(t.count(), sa.intersection(&sm).count() as u64);

        let mut t = vector_from(&ids);
        t.clear_ids(&mask, SortOrder::Unknown).unwrap();
        prop_assert_eq!(t.count(), sa.difference(&sm).count() as u64);
    }

    /// compare is a total order consistent with first-mismatch semantics
    #[test]
    fn prop_compare_antisymmetric(
        ids_a in ids_strategy(),
        ids_b in ids_strategy(),
    ) {
        let a = vector_from(&ids_a);
        let b = vector_from(&ids_b);
        prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
        prop_assert_eq!(a.compare(&b) == core::cmp::Ordering::Equal, a == b);
    }
}
