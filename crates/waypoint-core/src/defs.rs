//! Shared primitive types: program-counter ids, execution paths, inputs.

use std::collections::BTreeMap;
use std::fmt;

/// Identifier of one instrumented program-counter location.
///
/// Guard slots are assigned ids `1..=N` at instrumentation init; `0` is
/// reserved as the epsilon marker for an empty radix-tree edge.
pub type Pcid = u32;

/// The reserved "no token" id used for epsilon edges in the coverage tree.
pub const EPSILON_PCID: Pcid = 0;

/// Ordered sequence of PCIDs produced by one callback invocation.
pub type ExecPath = Vec<Pcid>;

/// Named scalar arguments. `BTreeMap` so that argument sets have a stable
/// lexicographic order; `Input` ordering and the tree's input index rely
/// on it.
pub type Args = BTreeMap<String, i64>;

/// One concrete fuzz input: a complete assignment for every declared enum
/// parameter and every declared numeric parameter.
///
/// Ordering is lexicographic on `(enum_args, numeric_args)`, which is what
/// the derived impls produce given the field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Input {
    enum_args: Args,
    numeric_args: Args,
}

impl Input {
    pub fn new(enum_args: Args, numeric_args: Args) -> Self {
        Self {
            enum_args,
            numeric_args,
        }
    }

    pub fn enum_args(&self) -> &Args {
        &self.enum_args
    }

    pub fn numeric_args(&self) -> &Args {
        &self.numeric_args
    }

    /// Look up an argument by name, regardless of kind.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.enum_args
            .get(name)
            .or_else(|| self.numeric_args.get(name))
            .copied()
    }
}

/// Length of the longest common prefix of two paths.
pub fn common_prefix_len(a: &[Pcid], b: &[Pcid]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Result code returned by the user callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Normal completion; the path is recorded.
    Ok,
    /// Skip this input; it is neither recorded nor a counter-example.
    Pass,
    /// The path ends in an expected throw; recorded and colored in dumps.
    ExpectedException,
    /// Aborts the run unless exceptions are ignored.
    UnexpectedException,
}

/// Callback return code for [`RunStatus::Pass`].
pub const STATUS_PASS: i32 = -1;
/// Callback return code for [`RunStatus::ExpectedException`].
pub const STATUS_EXPECTED_EXCEPTION: i32 = -2;
/// Callback return code for [`RunStatus::UnexpectedException`].
pub const STATUS_UNEXPECTED_EXCEPTION: i32 = -3;

impl RunStatus {
    /// Map a raw callback return code. Any non-negative code counts as
    /// normal completion.
    pub fn from_code(code: i32) -> Self {
        match code {
            STATUS_PASS => RunStatus::Pass,
            STATUS_EXPECTED_EXCEPTION => RunStatus::ExpectedException,
            STATUS_UNEXPECTED_EXCEPTION => RunStatus::UnexpectedException,
            _ => RunStatus::Ok,
        }
    }

    pub fn is_recordable(self) -> bool {
        matches!(self, RunStatus::Ok | RunStatus::ExpectedException)
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        let mut first = true;
        for value in self.enum_args.values().chain(self.numeric_args.values()) {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", value)?;
            first = false;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, i64)]) -> Args {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn input_orders_enum_args_before_numeric_args() {
        let a = Input::new(args(&[("e", 0)]), args(&[("n", 9)]));
        let b = Input::new(args(&[("e", 1)]), args(&[("n", 0)]));
        assert!(a < b);

        let c = Input::new(args(&[("e", 0)]), args(&[("n", 10)]));
        assert!(a < c);
    }

    #[test]
    fn run_status_from_code() {
        assert_eq!(RunStatus::from_code(0), RunStatus::Ok);
        assert_eq!(RunStatus::from_code(7), RunStatus::Ok);
        assert_eq!(RunStatus::from_code(-1), RunStatus::Pass);
        assert_eq!(RunStatus::from_code(-2), RunStatus::ExpectedException);
        assert_eq!(RunStatus::from_code(-3), RunStatus::UnexpectedException);
    }
}
