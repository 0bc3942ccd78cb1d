//! Engine-level errors and the budget-exhaustion signal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Not a failure: the wall-clock or generation budget ran out. The
    /// driver turns this into a normal exit.
    #[error("time or generation budget exhausted")]
    BudgetExhausted,

    #[error("no parameters declared; register at least one enum or int arg")]
    EmptySignature,

    /// The traced section never ran. The driver file returned before
    /// reaching its `traced` block.
    #[error("empty execution path; the callback returned before the traced section")]
    EmptyPath,

    #[error("failed to parse `--constraint`: {0}")]
    BadConstraint(String),

    #[error("failed to parse `--run_cmd_input`: {0}")]
    BadCmdInput(String),

    #[error(transparent)]
    Signature(#[from] waypoint_core::SignatureError),

    #[error(transparent)]
    Solve(#[from] waypoint_solve::SolveError),

    #[error(transparent)]
    Synth(#[from] waypoint_synth::SynthError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
