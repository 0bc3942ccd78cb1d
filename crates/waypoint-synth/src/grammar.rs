//! Grammar builders for the two condition families.
//!
//! The enum grammar only produces (negated) equalities between parameters
//! of the same group. The numeric grammar is the linear-arithmetic
//! fragment: and/or/not over {=, <, <=} of sums and differences of
//! `c*x`, `x/c`, `x%c`, variables, and small constants.

use waypoint_core::{BoolExpr, InputSignature, IntExpr};

use crate::ast::{FunSpec, IoConstraint, ProductionRule, SygusFile};

const START: &str = "Start";
const DEFAULT_FUN_NAME: &str = "f";

/// Constant pool offered to the numeric grammar.
pub const NUMERIC_LITERALS: [i64; 6] = [0, 1, 2, 3, 4, 5];

fn nt_bool(symbol: &str) -> BoolExpr {
    BoolExpr::Var(symbol.to_string())
}

fn nt_int(symbol: &str) -> IntExpr {
    IntExpr::Var(symbol.to_string())
}

/// `Start -> BoolExpr | (not BoolExpr)`,
/// `BoolExpr -> (= EnumType_i EnumType_i)` per group,
/// `EnumType_i -> <params of group i>`.
pub fn enum_equality_rules(sig: &InputSignature) -> Vec<ProductionRule> {
    const BOOL: &str = "BoolExpr";

    let mut bool_rhs = Vec::new();
    let mut group_rules = Vec::new();
    for (i, group) in sig.enum_groups().iter().enumerate() {
        let symbol = format!("EnumType_{}", i);
        bool_rhs.push(nt_int(&symbol).eq_expr(nt_int(&symbol)));
        group_rules.push(ProductionRule::ints(
            symbol,
            group.iter().map(|p| IntExpr::var(p.name())).collect(),
        ));
    }

    let mut rules = vec![
        ProductionRule::bools(
            START,
            vec![nt_bool(BOOL), BoolExpr::Not(Box::new(nt_bool(BOOL)))],
        ),
        ProductionRule::bools(BOOL, bool_rhs),
    ];
    rules.extend(group_rules);
    rules
}

/// The linear-arithmetic grammar used for numeric conditions.
pub fn numeric_linear_rules(sig: &InputSignature) -> Vec<ProductionRule> {
    const BOOL0: &str = "BoolExpr0";
    const BOOL1: &str = "BoolExpr1";
    const INT0: &str = "IntExpr0";
    const INT1: &str = "IntExpr1";
    const CONST: &str = "ConstExpr";
    const VAR: &str = "VarExpr";

    let vars: Vec<IntExpr> = sig
        .numeric_params()
        .iter()
        .map(|p| IntExpr::var(p.name()))
        .collect();
    let consts: Vec<IntExpr> = NUMERIC_LITERALS.iter().map(|&v| IntExpr::Const(v)).collect();

    vec![
        ProductionRule::bools(START, vec![nt_bool(BOOL0)]),
        ProductionRule::bools(
            BOOL0,
            vec![
                nt_bool(BOOL1),
                BoolExpr::And(Box::new(nt_bool(BOOL1)), Box::new(nt_bool(BOOL1))),
                BoolExpr::Or(Box::new(nt_bool(BOOL1)), Box::new(nt_bool(BOOL1))),
                BoolExpr::Not(Box::new(nt_bool(BOOL1))),
            ],
        ),
        ProductionRule::bools(
            BOOL1,
            vec![
                nt_int(INT0).eq_expr(nt_int(INT0)),
                nt_int(INT0).lt(nt_int(INT0)),
                nt_int(INT0).le(nt_int(INT0)),
            ],
        ),
        ProductionRule::ints(
            INT0,
            vec![
                nt_int(INT1),
                IntExpr::Add(Box::new(nt_int(INT0)), Box::new(nt_int(INT0))),
                IntExpr::Sub(Box::new(nt_int(INT0)), Box::new(nt_int(INT0))),
            ],
        ),
        ProductionRule::ints(
            INT1,
            vec![
                nt_int(CONST),
                nt_int(VAR),
                IntExpr::Mul(Box::new(nt_int(CONST)), Box::new(nt_int(VAR))),
                IntExpr::Div(Box::new(nt_int(VAR)), Box::new(nt_int(CONST))),
                IntExpr::Mod(Box::new(nt_int(VAR)), Box::new(nt_int(CONST))),
            ],
        ),
        ProductionRule::ints(CONST, consts),
        ProductionRule::ints(VAR, vars),
    ]
}

/// Assemble a complete problem for the given condition family.
pub fn sygus_file(
    rules: Vec<ProductionRule>,
    params: Vec<String>,
    constraints: Vec<IoConstraint>,
) -> SygusFile {
    SygusFile {
        fun: FunSpec {
            name: DEFAULT_FUN_NAME.to_string(),
            params,
            rules,
        },
        constraints,
    }
}

/// Build the I/O constraint lines for one side of an example set.
pub fn io_constraints(examples: &[Vec<i64>], result: bool) -> Vec<IoConstraint> {
    examples
        .iter()
        .map(|values| IoConstraint {
            fname: DEFAULT_FUN_NAME.to_string(),
            values: values.clone(),
            result,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> InputSignature {
        let mut sig = InputSignature::new();
        sig.add_enum_range("x", 0, 3).unwrap();
        sig.add_enum_range("y", 0, 3).unwrap();
        sig.add_enum_range("wide", 0, 7).unwrap();
        sig.add_numeric("a").unwrap();
        sig.add_numeric("b").unwrap();
        sig
    }

    #[test]
    fn enum_grammar_has_one_equality_per_group() {
        let rules = enum_equality_rules(&sig());
        // Start, BoolExpr, and one EnumType_i per group.
        assert_eq!(rules.len(), 4);
        let rendered = rules
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(rendered.contains("(= EnumType_0 EnumType_0)"));
        assert!(rendered.contains("(= EnumType_1 EnumType_1)"));
        assert!(rendered.contains("(EnumType_0 Int (\n            x y))"));
        assert!(rendered.contains("(EnumType_1 Int (\n            wide))"));
    }

    #[test]
    fn numeric_grammar_offers_linear_atoms() {
        let rules = numeric_linear_rules(&sig());
        let rendered = rules
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(rendered.contains("(* ConstExpr VarExpr)"));
        assert!(rendered.contains("(/ VarExpr ConstExpr)"));
        assert!(rendered.contains("(% VarExpr ConstExpr)"));
        assert!(rendered.contains("0 1 2 3 4 5"));
        assert!(rendered.contains("a b"));
    }
}
