//! Solver errors. Unsatisfiable *user* constraints are fatal: when the
//! declared inputs cannot satisfy the hard constraints, no amount of
//! fuzzing makes progress.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("enum constraints are unsatisfiable: {0}")]
    UnsatEnumConstraints(String),

    #[error("hard numeric constraints are unsatisfiable over the declared domain")]
    UnsatInitConstraints,

    #[error("expected an equality between enum parameters, got `{0}`")]
    BadEqualityShape(String),

    #[error("unknown solver variable `{0}`")]
    UnknownVar(String),
}

pub type SolveResult<T> = Result<T, SolveError>;
