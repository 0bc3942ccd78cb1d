//! One draw = one complete input: the enum solver and the numeric solver
//! joined together.

use rand::Rng;

use waypoint_act::Condition;
use waypoint_core::{BoolExpr, Input, InputSignature};

use crate::enums::EnumSolver;
use crate::error::SolveResult;
use crate::numeric::{NumericSolver, SolverOptions};

pub struct InputGenerator {
    enum_solver: EnumSolver,
    numeric_solver: NumericSolver,
}

impl InputGenerator {
    pub fn new(
        sig: &InputSignature,
        opts: SolverOptions,
        hard: Vec<BoolExpr>,
        soft: Vec<BoolExpr>,
    ) -> SolveResult<Self> {
        Ok(Self {
            enum_solver: EnumSolver::new(sig),
            numeric_solver: NumericSolver::new(sig, opts, hard, soft)?,
        })
    }

    /// Install path conditions for the coming draws. Each invocation flips
    /// a fresh coin for soft-constraint conformance.
    pub fn set_condition<R: Rng + ?Sized>(
        &mut self,
        enum_conds: &[Condition],
        numeric_conds: &[Condition],
        rng: &mut R,
    ) -> SolveResult<()> {
        let conform_soft = rng.gen_bool(0.5);
        self.enum_solver.set_condition(enum_conds)?;
        self.numeric_solver.set_condition(numeric_conds, conform_soft);
        Ok(())
    }

    /// Draw an input, or `None` when either side has nothing left to offer.
    pub fn gen<R: Rng + ?Sized>(&mut self, rng: &mut R) -> SolveResult<Option<Input>> {
        let Some(enum_args) = self.enum_solver.draw(rng) else {
            return Ok(None);
        };
        let Some(numeric_args) = self.numeric_solver.draw(rng)? else {
            return Ok(None);
        };
        Ok(Some(Input::new(enum_args, numeric_args)))
    }
}
