//! Error types shared by the core crate.

use thiserror::Error;

/// Error raised while evaluating a symbolic expression over concrete
/// arguments.
///
/// Division or modulo by zero inside a learned condition is *not* a fatal
/// condition for the fuzzer: callers treat it as an incorrect evaluation
/// for the example at hand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("unbound variable: {0}")]
    UnboundVar(String),
}

/// Error raised while declaring parameters or decoding serialized inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("parameter name `{0}` is declared twice")]
    DuplicateParam(String),

    #[error("enum `{name}` has duplicate entry `{entry}`")]
    DuplicateEntry { name: String, entry: String },

    #[error("enum `{name}` has {size} values; at most 64 are supported")]
    EnumTooWide { name: String, size: usize },

    #[error("enum `{name}` must have at least one value")]
    EmptyEnum { name: String },

    #[error("expected {expected} serialized args, found {found}")]
    ShortInput { expected: usize, found: usize },
}
