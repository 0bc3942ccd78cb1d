//! Translation from the crate's expression algebra to Z3.
//!
//! Every query declares its variables into a fresh context, so no Z3 state
//! outlives a single `draw`; solver-level state (history, conditions) is
//! kept as plain expressions on our side.

use std::collections::HashMap;

use z3::ast::{Ast, Bool, Int};
use z3::Context;

use waypoint_core::{BoolExpr, IntExpr};

use crate::error::{SolveError, SolveResult};

/// Declare one Z3 integer constant per variable name.
pub fn declare_ints<'c>(ctx: &'c Context, names: &[String]) -> HashMap<String, Int<'c>> {
    names
        .iter()
        .map(|name| (name.clone(), Int::new_const(ctx, name.as_str())))
        .collect()
}

pub fn int_to_z3<'c>(
    ctx: &'c Context,
    vars: &HashMap<String, Int<'c>>,
    expr: &IntExpr,
) -> SolveResult<Int<'c>> {
    match expr {
        IntExpr::Const(v) => Ok(Int::from_i64(ctx, *v)),
        IntExpr::Var(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| SolveError::UnknownVar(name.clone())),
        IntExpr::Ite(c, l, r) => {
            let c = bool_to_z3(ctx, vars, c)?;
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(c.ite(&l, &r))
        }
        IntExpr::Add(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(Int::add(ctx, &[&l, &r]))
        }
        IntExpr::Sub(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(Int::sub(ctx, &[&l, &r]))
        }
        IntExpr::Mul(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(Int::mul(ctx, &[&l, &r]))
        }
        IntExpr::Div(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(l.div(&r))
        }
        IntExpr::Mod(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(l.modulo(&r))
        }
    }
}

pub fn bool_to_z3<'c>(
    ctx: &'c Context,
    vars: &HashMap<String, Int<'c>>,
    expr: &BoolExpr,
) -> SolveResult<Bool<'c>> {
    match expr {
        // Grammar nonterminals never reach a solver query.
        BoolExpr::Var(name) => Err(SolveError::UnknownVar(name.clone())),
        BoolExpr::Not(b) => Ok(bool_to_z3(ctx, vars, b)?.not()),
        BoolExpr::And(l, r) => {
            let l = bool_to_z3(ctx, vars, l)?;
            let r = bool_to_z3(ctx, vars, r)?;
            Ok(Bool::and(ctx, &[&l, &r]))
        }
        BoolExpr::Or(l, r) => {
            let l = bool_to_z3(ctx, vars, l)?;
            let r = bool_to_z3(ctx, vars, r)?;
            Ok(Bool::or(ctx, &[&l, &r]))
        }
        BoolExpr::Eq(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(l._eq(&r))
        }
        BoolExpr::Neq(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(l._eq(&r).not())
        }
        BoolExpr::Lt(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(l.lt(&r))
        }
        BoolExpr::Gt(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(l.gt(&r))
        }
        BoolExpr::Le(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(l.le(&r))
        }
        BoolExpr::Ge(l, r) => {
            let l = int_to_z3(ctx, vars, l)?;
            let r = int_to_z3(ctx, vars, r)?;
            Ok(l.ge(&r))
        }
    }
}
