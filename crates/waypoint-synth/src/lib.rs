//! SyGuS interop: problem files handed to the external synthesizer, and
//! the `define-fun` responses parsed back into branch-condition bodies.
//!
//! The synthesizer itself is an opaque subprocess (duet). Everything here
//! is synchronous; the only concurrency crossing is the subprocess wait,
//! which is bounded by the caller's remaining synthesis budget.

pub mod ast;
pub mod error;
pub mod grammar;
pub mod parser;
pub mod runner;

pub use ast::{FunSpec, IoConstraint, ProductionRule, RuleRhs, SygusFile, SynthFun};
pub use error::{SynthError, SynthResult};
pub use grammar::{enum_equality_rules, numeric_linear_rules, sygus_file};
pub use parser::parse_define_fun;
pub use runner::{DuetSynthesizer, FnSynthesizer, Synthesizer};
