//! Fuzzer configuration built by the user's driver file.
//!
//! All shared state the engine needs from the user, the parameter
//! signature and the numeric constraints, lives in one owned value handed
//! to `driver`; nothing is registered through process globals.

use waypoint_core::{BoolExpr, InputSignature, IntExpr, SignatureError};

#[derive(Debug, Default, Clone)]
pub struct FuzzConfig {
    sig: InputSignature,
    hard: Vec<BoolExpr>,
    soft: Vec<BoolExpr>,
}

impl FuzzConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an enum parameter by its entry names (values `0..len`).
    pub fn enum_arg(&mut self, name: &str, entries: &[&str]) -> Result<(), SignatureError> {
        self.sig
            .add_enum_entries(name, entries.iter().map(|e| e.to_string()).collect())
    }

    /// Declare an enum parameter by value range `[start, start + size)`.
    pub fn enum_arg_range(
        &mut self,
        name: &str,
        start: i64,
        size: usize,
    ) -> Result<(), SignatureError> {
        self.sig.add_enum_range(name, start, size)
    }

    /// Declare an integer parameter. The returned expression is the
    /// symbolic handle to use in constraints.
    pub fn int_arg(&mut self, name: &str) -> Result<IntExpr, SignatureError> {
        self.sig.add_numeric(name)?;
        Ok(IntExpr::var(name))
    }

    /// Every generated input satisfies all hard constraints.
    pub fn add_hard_constraint(&mut self, constraint: BoolExpr) {
        self.hard.push(constraint);
    }

    pub fn add_hard_constraints(&mut self, constraints: impl IntoIterator<Item = BoolExpr>) {
        self.hard.extend(constraints);
    }

    /// Each generation batch conforms to or violates the whole soft block,
    /// by coin flip.
    pub fn add_soft_constraint(&mut self, constraint: BoolExpr) {
        self.soft.push(constraint);
    }

    pub fn add_soft_constraints(&mut self, constraints: impl IntoIterator<Item = BoolExpr>) {
        self.soft.extend(constraints);
    }

    pub fn signature(&self) -> &InputSignature {
        &self.sig
    }

    pub fn hard_constraints(&self) -> &[BoolExpr] {
        &self.hard
    }

    pub fn soft_constraints(&self) -> &[BoolExpr] {
        &self.soft
    }

    pub(crate) fn into_parts(self) -> (InputSignature, Vec<BoolExpr>, Vec<BoolExpr>) {
        (self.sig, self.hard, self.soft)
    }
}
