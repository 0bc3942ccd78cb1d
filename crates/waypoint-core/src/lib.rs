//! Core types for the waypoint path-aware fuzzer.
//!
//! This crate holds everything the higher layers agree on: execution paths
//! and program-counter identifiers, fuzz inputs over named scalar
//! parameters, the symbolic expression algebra used for learned branch
//! conditions, per-parameter enum bitvectors, the input signature registry,
//! and the coverage tracer that records and de-noises execution paths.

pub mod bitvec;
pub mod defs;
pub mod error;
pub mod expr;
pub mod signature;
pub mod trace;

pub use bitvec::{EnumBitVec, EnumBitVecArray};
pub use defs::{
    common_prefix_len, Args, ExecPath, Input, Pcid, RunStatus, EPSILON_PCID,
    STATUS_EXPECTED_EXCEPTION, STATUS_PASS, STATUS_UNEXPECTED_EXCEPTION,
};
pub use error::{EvalError, SignatureError};
pub use expr::{BoolExpr, EqualityCondition, EqualityKind, IntExpr};
pub use signature::{EnumParam, InputSignature, NumericParam};
pub use trace::{global_tracer, traced, PathLimits, TracePC};
