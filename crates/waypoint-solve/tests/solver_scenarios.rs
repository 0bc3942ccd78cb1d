//! Scenario tests for the two solvers and the joined generator. These
//! exercise real Z3 queries.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::SeedableRng;

use waypoint_act::{CondKind, Condition, Predicate};
use waypoint_core::{BoolExpr, InputSignature, IntExpr};
use waypoint_solve::{EnumSolver, InputGenerator, NumericSolver, SolveError, SolverOptions};

const BUDGET: i64 = 4_000_000_000;

fn rng() -> StdRng {
    StdRng::seed_from_u64(17)
}

// ============================================================================
// Enum solver
// ============================================================================

fn enum_sig() -> InputSignature {
    let mut sig = InputSignature::new();
    sig.add_enum_entries("x", vec!["X0".into(), "X1".into(), "X2".into()])
        .unwrap();
    sig.add_enum_entries("y", vec!["Y0".into(), "Y1".into(), "Y2".into()])
        .unwrap();
    sig.add_enum_entries("z", vec!["Z0".into(), "Z1".into(), "Z2".into()])
        .unwrap();
    sig
}

fn equality_cond(expr: BoolExpr) -> Condition {
    Condition::from_predicate(
        Predicate::Enum {
            inclusion: None,
            equality: Some(expr),
        },
        BUDGET,
    )
}

#[test]
fn draws_satisfy_equality_and_inequality_together() {
    // Three-valued enums with x == y and y != z: every draw must honor
    // both conditions at once.
    let mut solver = EnumSolver::new(&enum_sig());
    solver
        .set_condition(&[
            equality_cond(IntExpr::var("x").eq_expr(IntExpr::var("y"))),
            equality_cond(IntExpr::var("y").ne_expr(IntExpr::var("z"))),
        ])
        .unwrap();

    let mut rng = rng();
    let mut seen_x = BTreeSet::new();
    for _ in 0..64 {
        let args = solver.draw(&mut rng).expect("constraints are satisfiable");
        assert_eq!(args["x"], args["y"]);
        assert_ne!(args["y"], args["z"]);
        seen_x.insert(args["x"]);
    }
    // The draw is random, not pinned to one witness.
    assert!(seen_x.len() > 1);
}

#[test]
fn inclusion_conditions_intersect_the_allowed_sets() {
    let sig = enum_sig();
    let mut allowed = sig.enum_params()[0].bitvec();
    allowed.set(1);
    allowed.set(2);
    let cond = Condition::from_predicate(
        Predicate::Enum {
            inclusion: Some(allowed),
            equality: None,
        },
        BUDGET,
    );

    let mut solver = EnumSolver::new(&sig);
    solver.set_condition(&[cond]).unwrap();
    let mut rng = rng();
    for _ in 0..32 {
        let args = solver.draw(&mut rng).unwrap();
        assert!(args["x"] == 1 || args["x"] == 2);
    }
}

#[test]
fn contradictory_equalities_are_fatal() {
    let mut solver = EnumSolver::new(&enum_sig());
    let result = solver.set_condition(&[
        equality_cond(IntExpr::var("x").eq_expr(IntExpr::var("y"))),
        equality_cond(IntExpr::var("x").ne_expr(IntExpr::var("y"))),
    ]);
    assert!(matches!(
        result,
        Err(SolveError::UnsatEnumConstraints(_))
    ));
}

// ============================================================================
// Numeric solver
// ============================================================================

fn numeric_sig() -> InputSignature {
    let mut sig = InputSignature::new();
    sig.add_numeric("a").unwrap();
    sig.add_numeric("b").unwrap();
    sig
}

#[test]
fn hard_constraints_always_hold_soft_constraints_flip() {
    let sig = numeric_sig();
    let hard = vec![
        IntExpr::var("a").ge(1),
        IntExpr::var("b").ge(1),
    ];
    let soft = vec![IntExpr::var("a").eq_expr(IntExpr::var("b"))];
    let opts = SolverOptions {
        mut_rate: 0.0,
        ..SolverOptions::default()
    };
    let mut solver = NumericSolver::new(&sig, opts, hard, soft).unwrap();
    let mut rng = rng();

    solver.set_condition(&[], true);
    for _ in 0..16 {
        let args = solver.draw(&mut rng).unwrap().unwrap();
        assert!(args["a"] >= 1 && args["b"] >= 1);
        assert_eq!(args["a"], args["b"]);
    }

    solver.set_condition(&[], false);
    for _ in 0..16 {
        let args = solver.draw(&mut rng).unwrap().unwrap();
        assert!(args["a"] >= 1 && args["b"] >= 1);
        assert_ne!(args["a"], args["b"]);
    }
}

#[test]
fn unsatisfiable_hard_constraints_fail_at_init() {
    let sig = numeric_sig();
    // The basic domain is [-64, 64]; demanding 1000 is impossible.
    let hard = vec![IntExpr::var("a").ge(1000)];
    let result = NumericSolver::new(&sig, SolverOptions::default(), hard, Vec::new());
    assert!(matches!(result, Err(SolveError::UnsatInitConstraints)));
}

#[test]
fn history_forces_distinct_draws_until_the_domain_is_spent() {
    let mut sig = InputSignature::new();
    sig.add_numeric("a").unwrap();
    let opts = SolverOptions {
        mut_rate: 0.0,
        ..SolverOptions::default()
    };
    let mut solver = NumericSolver::new(&sig, opts, Vec::new(), Vec::new()).unwrap();
    solver.set_condition(&[], true);
    let mut rng = rng();

    // Domain [-64, 64] holds exactly 129 values.
    let mut seen = BTreeSet::new();
    for i in 0..129 {
        let args = solver
            .draw(&mut rng)
            .unwrap()
            .unwrap_or_else(|| panic!("draw {} must succeed", i));
        assert!((-64..=64).contains(&args["a"]));
        assert!(seen.insert(args["a"]), "draw {} repeated a value", i);
    }
    // The 130th draw exhausts the history and falls back to a repeat.
    let args = solver.draw(&mut rng).unwrap().unwrap();
    assert!(seen.contains(&args["a"]));
}

#[test]
fn path_conditions_constrain_draws() {
    let sig = numeric_sig();
    let opts = SolverOptions {
        mut_rate: 0.0,
        ..SolverOptions::default()
    };
    let mut solver = NumericSolver::new(&sig, opts, Vec::new(), Vec::new()).unwrap();
    let cond = Condition::from_predicate(
        Predicate::Numeric(Some(
            IntExpr::var("a").gt(IntExpr::var("b")) & IntExpr::var("b").ge(0),
        )),
        BUDGET,
    );
    solver.set_condition(std::slice::from_ref(&cond), true);

    let mut rng = rng();
    for _ in 0..32 {
        let args = solver.draw(&mut rng).unwrap().unwrap();
        assert!(args["a"] > args["b"]);
        assert!(args["b"] >= 0);
    }
}

#[test]
fn neglect_and_invalid_conditions_do_not_constrain() {
    let sig = numeric_sig();
    let mut solver =
        NumericSolver::new(&sig, SolverOptions::default(), Vec::new(), Vec::new()).unwrap();
    let invalid = Condition::new(CondKind::Numeric, BUDGET);
    solver.set_condition(std::slice::from_ref(&invalid), true);
    let mut rng = rng();
    assert!(solver.draw(&mut rng).unwrap().is_some());
}

// ============================================================================
// Joined generator
// ============================================================================

#[test]
fn generator_produces_complete_inputs() {
    let mut sig = enum_sig();
    sig.add_numeric("n").unwrap();
    let mut generator =
        InputGenerator::new(&sig, SolverOptions::default(), Vec::new(), Vec::new()).unwrap();
    let mut rng = rng();
    generator.set_condition(&[], &[], &mut rng).unwrap();

    for _ in 0..16 {
        let input = generator.gen(&mut rng).unwrap().expect("space is satisfiable");
        assert_eq!(input.enum_args().len(), 3);
        assert_eq!(input.numeric_args().len(), 1);
        for value in input.enum_args().values() {
            assert!((0..3).contains(value));
        }
    }
}

#[test]
fn generator_soft_conformance_varies_across_condition_sets() {
    let mut sig = InputSignature::new();
    sig.add_numeric("a").unwrap();
    sig.add_numeric("b").unwrap();
    let soft = vec![IntExpr::var("a").eq_expr(IntExpr::var("b"))];
    let opts = SolverOptions {
        mut_rate: 0.0,
        ..SolverOptions::default()
    };
    let mut generator = InputGenerator::new(&sig, opts, Vec::new(), soft).unwrap();
    let mut rng = rng();

    let mut conforming = 0;
    let mut violating = 0;
    for _ in 0..40 {
        generator.set_condition(&[], &[], &mut rng).unwrap();
        let input = generator.gen(&mut rng).unwrap().unwrap();
        if input.numeric_args()["a"] == input.numeric_args()["b"] {
            conforming += 1;
        } else {
            violating += 1;
        }
    }
    // The coin is fair; forty flips produce both sides.
    assert!(conforming > 0 && violating > 0);
}
