//! Property-based tests: tree invariants under random insertion and
//! pruning sequences, comparator negation laws, and bitvector set algebra.

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

use waypoint_act::ExecTree;
use waypoint_core::trace::PathLimits;
use waypoint_core::{Args, BoolExpr, EnumBitVec, ExecPath, Input, InputSignature, IntExpr, Pcid, RunStatus, TracePC};

const BUDGET: i64 = 4_000_000_000;

fn sig() -> InputSignature {
    let mut sig = InputSignature::new();
    sig.add_numeric("a").unwrap();
    sig
}

fn input(n: i64) -> Input {
    let numeric: Args = [("a".to_string(), n)].into();
    Input::new(Args::new(), numeric)
}

/// Short paths over a tiny PCID alphabet to force prefix sharing.
fn path_strategy() -> impl Strategy<Value = ExecPath> {
    prop::collection::vec(1u32..=6, 1..=8)
}

fn build_tree(paths: &[ExecPath]) -> ExecTree {
    let mut tree = ExecTree::new(sig(), PathLimits::new(1000), BUDGET);
    let mut rng = StdRng::seed_from_u64(11);
    for (i, path) in paths.iter().enumerate() {
        tree.insert(path, input(i as i64), RunStatus::Ok, &mut rng);
    }
    tree
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    // --- Tree invariants (structure and input index) ---

    #[test]
    fn insertion_preserves_invariants(paths in prop::collection::vec(path_strategy(), 1..24)) {
        let tree = build_tree(&paths);
        prop_assert!(tree.invariants_hold());
    }

    #[test]
    fn inserted_paths_are_found_again(paths in prop::collection::vec(path_strategy(), 1..16)) {
        let tree = build_tree(&paths);
        for (i, path) in paths.iter().enumerate() {
            prop_assert!(tree.has_path(path));
            // Every input identifies a unique leaf whose recorded path is
            // the inserted one.
            let leaf = tree.leaf_of(&input(i as i64));
            if let Some(leaf) = leaf {
                prop_assert!(tree.is_leaf(leaf));
                prop_assert_eq!(tree.path_of_input(&input(i as i64)).unwrap(), path.clone());
            }
        }
    }

    #[test]
    fn pruning_preserves_invariants(
        paths in prop::collection::vec(path_strategy(), 1..16),
        nd in prop::collection::btree_set(1u32..=6, 0..4),
    ) {
        let mut tree = build_tree(&paths);
        let mut tpc = TracePC::mock(100, 1000);
        let nd: Vec<Pcid> = nd.into_iter().collect();
        tpc.mark_nd(&nd);
        tree.prune(&tpc);
        prop_assert!(tree.invariants_hold());

        // Pruned versions of all inserted paths are still recognized.
        for path in &paths {
            let pruned = tpc.prune(path);
            if !pruned.is_empty() {
                prop_assert!(tree.has_path(&pruned));
            }
        }
    }

    // --- Comparator negation laws ---

    #[test]
    fn negation_agrees_with_boolean_complement(a in -100i64..100, b in -100i64..100) {
        let args: Args = [("x".to_string(), a), ("y".to_string(), b)].into();
        let x = || IntExpr::var("x");
        let y = || IntExpr::var("y");
        let comparators: Vec<BoolExpr> = vec![
            x().eq_expr(y()),
            x().ne_expr(y()),
            x().lt(y()),
            x().gt(y()),
            x().le(y()),
            x().ge(y()),
        ];
        for e in comparators {
            let negated = !e.clone();
            prop_assert_eq!(negated.eval(&args).unwrap(), !e.eval(&args).unwrap());
            // Double negation restores the original tree.
            prop_assert_eq!(!!e.clone(), e);
        }
    }

    #[test]
    fn simplify_cancels_double_negation(a in -100i64..100) {
        let e = IntExpr::var("x").lt(a);
        let double = BoolExpr::Not(Box::new(BoolExpr::Not(Box::new(e.clone()))));
        prop_assert_eq!(waypoint_core::expr::simplify(double), e);
    }

    // --- Bitvector set algebra ---

    #[test]
    fn intersection_distributes_over_union(a in 0u64..256, b in 0u64..256, c in 0u64..256) {
        let bv = |bits: u64| {
            let mut v = EnumBitVec::new("p", 0, 8);
            for i in 0..8 {
                if bits & (1 << i) != 0 {
                    v.set(i);
                }
            }
            v
        };
        let (a, b, c) = (bv(a), bv(b), bv(c));
        let lhs = &(&a | &b) & &c;
        let rhs = &(&a & &c) | &(&b & &c);
        prop_assert_eq!(lhs, rhs);
    }

    #[test]
    fn complement_is_an_involution(a in 0u64..256) {
        let mut v = EnumBitVec::new("p", 0, 8);
        for i in 0..8 {
            if a & (1 << i) != 0 {
                v.set(i);
            }
        }
        prop_assert_eq!(!&!&v, v);
    }
}
