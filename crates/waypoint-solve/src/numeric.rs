//! SMT-backed draws for the numeric parameters.
//!
//! Constraint blocks, strongest first:
//! - *basic*: every variable confined to the configured domain,
//! - *hard*: user and command-line constraints (infeasibility is fatal),
//! - *soft*: user preferences; each condition-set flips a coin to conform
//!   to or violate the whole block,
//! - *path*: the valid numeric conditions along the scheduled path,
//! - *history*: negations of prior concrete assignments, so repeated draws
//!   diversify until the constrained space is exhausted.
//!
//! Each draw assembles a fresh Z3 context and solver; everything durable
//! is kept as plain expressions.

use rand::Rng;
use tracing::{debug, trace};
use z3::{Config, Context, SatResult, Solver};

use waypoint_act::{Condition, Predicate};
use waypoint_core::{Args, BoolExpr, InputSignature, IntExpr};

use crate::error::{SolveError, SolveResult};
use crate::smt::{bool_to_z3, declare_ints};

/// Numeric-domain and mutation knobs, straight from the CLI.
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    pub int_min: i64,
    pub int_max: i64,
    pub mut_rate: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            int_min: -64,
            int_max: 64,
            mut_rate: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum MutOp {
    Eq,
    Neq,
    Lt,
    Le,
}

pub struct NumericSolver {
    params: Vec<String>,
    opts: SolverOptions,
    hard: Vec<BoolExpr>,
    soft: Vec<BoolExpr>,
    path: Vec<BoolExpr>,
    conform_soft: bool,
    history: Vec<Args>,
}

impl NumericSolver {
    /// Build the solver and verify the hard constraints are satisfiable
    /// over the basic domain.
    pub fn new(
        sig: &InputSignature,
        opts: SolverOptions,
        hard: Vec<BoolExpr>,
        soft: Vec<BoolExpr>,
    ) -> SolveResult<Self> {
        let solver = Self {
            params: sig.numeric_param_names(),
            opts,
            hard,
            soft,
            path: Vec::new(),
            conform_soft: true,
            history: Vec::new(),
        };
        if !solver.is_satisfiable()? {
            return Err(SolveError::UnsatInitConstraints);
        }
        Ok(solver)
    }

    /// Install the path conditions for the next draws. Clears the draw
    /// history: a new path means a new space to cover.
    pub fn set_condition(&mut self, conds: &[Condition], conform_soft: bool) {
        self.path = conds
            .iter()
            .filter_map(|cond| match cond.predicate() {
                Predicate::Numeric(Some(expr)) if !cond.invalid() => Some(expr.clone()),
                _ => None,
            })
            .collect();
        self.conform_soft = conform_soft;
        self.history.clear();
    }

    pub fn is_satisfiable(&self) -> SolveResult<bool> {
        Ok(self.solve(None, false)?.is_some())
    }

    /// Draw a satisfying assignment.
    ///
    /// With probability `mut_rate` (and at least two parameters) a random
    /// relational constraint between two parameters is tried first; when
    /// that is infeasible the unmutated query runs. A depleted history is
    /// cleared and the draw retried once.
    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> SolveResult<Option<Args>> {
        if rng.gen::<f64>() < self.opts.mut_rate && self.params.len() > 1 {
            let mutation = self.rand_constraint(rng);
            if let Some(args) = self.solve(Some(&mutation), true)? {
                self.record(&args);
                return Ok(Some(args));
            }
        }

        if let Some(args) = self.solve(None, true)? {
            self.record(&args);
            return Ok(Some(args));
        }

        // Every distinct assignment has been drawn; start over.
        debug!("numeric assignment history exhausted; clearing");
        self.history.clear();
        let args = self.solve(None, true)?;
        if let Some(args) = &args {
            self.record(args);
        }
        Ok(args)
    }

    fn record(&mut self, args: &Args) {
        if !self.params.is_empty() {
            self.history.push(args.clone());
        }
    }

    /// A random `x <op> y` over two distinct parameters.
    fn rand_constraint<R: Rng + ?Sized>(&self, rng: &mut R) -> BoolExpr {
        let n = self.params.len();
        let first = rng.gen_range(0..n);
        let second = (first + rng.gen_range(0..n - 1) + 1) % n;
        let x = IntExpr::var(&self.params[first]);
        let y = IntExpr::var(&self.params[second]);
        let op = match rng.gen_range(0..4) {
            0 => MutOp::Eq,
            1 => MutOp::Neq,
            2 => MutOp::Lt,
            _ => MutOp::Le,
        };
        trace!(?op, first = %self.params[first], second = %self.params[second], "mutation constraint");
        match op {
            MutOp::Eq => x.eq_expr(y),
            MutOp::Neq => x.ne_expr(y),
            MutOp::Lt => x.lt(y),
            MutOp::Le => x.le(y),
        }
    }

    fn solve(&self, extra: Option<&BoolExpr>, with_history: bool) -> SolveResult<Option<Args>> {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let vars = declare_ints(&ctx, &self.params);
        let solver = Solver::new(&ctx);

        for name in &self.params {
            let basic = IntExpr::var(name).ge(self.opts.int_min)
                & IntExpr::var(name).le(self.opts.int_max);
            solver.assert(&bool_to_z3(&ctx, &vars, &basic)?);
        }
        for hard in &self.hard {
            solver.assert(&bool_to_z3(&ctx, &vars, hard)?);
        }
        if !self.soft.is_empty() {
            let soft = BoolExpr::conjoin(self.soft.iter().cloned());
            let soft = if self.conform_soft { soft } else { !soft };
            solver.assert(&bool_to_z3(&ctx, &vars, &soft)?);
        }
        for path in &self.path {
            solver.assert(&bool_to_z3(&ctx, &vars, path)?);
        }
        if with_history {
            for prior in &self.history {
                let assignment = BoolExpr::conjoin(
                    prior
                        .iter()
                        .map(|(name, value)| IntExpr::var(name).eq_expr(*value)),
                );
                solver.assert(&bool_to_z3(&ctx, &vars, &!assignment)?);
            }
        }
        if let Some(extra) = extra {
            solver.assert(&bool_to_z3(&ctx, &vars, extra)?);
        }

        match solver.check() {
            SatResult::Sat => {
                let model = solver.get_model().expect("sat result without a model");
                let mut args = Args::new();
                for name in &self.params {
                    let value = model
                        .eval(&vars[name], true)
                        .and_then(|v| v.as_i64())
                        .expect("model missing a declared variable");
                    args.insert(name.clone(), value);
                }
                Ok(Some(args))
            }
            SatResult::Unsat | SatResult::Unknown => Ok(None),
        }
    }
}
