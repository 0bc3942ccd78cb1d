//! Command-line surface of a waypoint driver binary.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use waypoint_core::{BoolExpr, InputSignature, IntExpr};

use crate::error::{EngineError, EngineResult};

/// Leaf scheduling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Schedule {
    /// Uniform-random choice among tree leaves.
    #[default]
    Rand,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "waypoint",
    about = "Path-aware coverage-guided fuzzer",
    rename_all = "snake_case"
)]
pub struct Options {
    /// Path to the external SyGuS synthesizer binary. Falls back to the
    /// WAYPOINT_DUET environment variable.
    #[arg(long)]
    pub duet_bin: Option<PathBuf>,

    /// Synthesis budget for each branch condition, in seconds.
    #[arg(long, default_value_t = 4.0)]
    pub synthesis_budget: f64,

    /// Corpus directory. Created (or auto-named) when absent.
    #[arg(long)]
    pub corpus: Option<PathBuf>,

    /// Write a coverage CSV to the given file.
    #[arg(long)]
    pub output_cov: Option<PathBuf>,

    /// Append a statistics CSV to the given file every 300 seconds.
    #[arg(long)]
    pub output_stat: Option<PathBuf>,

    /// Colorize tree dumps (0 or 1).
    #[arg(long, default_value_t = 1)]
    pub colorize: u8,

    /// Replay the corpus and exit; no fuzzing.
    #[arg(long)]
    pub run_only: bool,

    /// Replay only seeds whose generation count is in
    /// [run_corpus_from_gen, run_corpus_to_gen). Negative from-value
    /// includes initial seeds.
    #[arg(long, default_value_t = -1)]
    pub run_corpus_from_gen: i64,

    #[arg(long, default_value_t = i64::MAX)]
    pub run_corpus_to_gen: i64,

    /// Replay only seeds written in [run_corpus_from_time,
    /// run_corpus_to_time) seconds. Negative from-value includes initial
    /// seeds.
    #[arg(long, default_value_t = -1)]
    pub run_corpus_from_time: i64,

    #[arg(long, default_value_t = i64::MAX)]
    pub run_corpus_to_time: i64,

    /// Run one input given on the command line (comma or space separated)
    /// and exit.
    #[arg(long)]
    pub run_cmd_input: Option<String>,

    /// Extra hard constraints, comma separated, e.g.
    /// "arg0>=0, arg2==arg3". argN refers to the Nth declared parameter
    /// (enums first).
    #[arg(long)]
    pub constraint: Option<String>,

    /// Treat unexpected exceptions as expected instead of aborting.
    #[arg(long)]
    pub ignore_exception: bool,

    /// Leaf scheduling strategy.
    #[arg(long, value_enum, default_value_t = Schedule::Rand)]
    pub schedule: Schedule,

    /// Minimum value of the numeric-argument domain.
    #[arg(long = "min", default_value_t = -64)]
    pub int_min: i64,

    /// Maximum value of the numeric-argument domain.
    #[arg(long = "max", default_value_t = 64)]
    pub int_max: i64,

    /// Probability of pushing a random relational constraint into a draw.
    #[arg(long, default_value_t = 0.2)]
    pub mut_rate: f64,

    /// Floor of the dynamic accuracy threshold for numeric conditions.
    #[arg(long, default_value_t = 0.6)]
    pub cond_accuracy_threshold: f64,

    /// Disable nondeterministic-branch pruning; conflicts neglect the
    /// subtree below the lowest common ancestor instead.
    #[arg(long)]
    pub wo_nbp: bool,

    /// Wall-clock budget in seconds.
    #[arg(long, default_value_t = u64::MAX)]
    pub max_total_time: u64,

    /// Total input-generation budget.
    #[arg(long, default_value_t = u64::MAX)]
    pub max_total_gen: u64,

    /// Time bucket (seconds) for coverage-CSV replay.
    #[arg(long, default_value_t = 0)]
    pub cov_interval_time: u64,

    /// Generation bucket for coverage-CSV replay.
    #[arg(long, default_value_t = 0)]
    pub cov_interval_gen: u64,

    /// Maximum number of engine iterations.
    #[arg(long = "iter", default_value_t = u64::MAX)]
    pub max_iter: u64,

    /// Verbosity: 0, 1, or 2.
    #[arg(long, default_value_t = 0)]
    pub verbose: u8,

    /// Inputs generated per scheduled leaf.
    #[arg(long, default_value_t = 10)]
    pub max_gen_per_iter: u32,

    /// Time bound per scheduled leaf, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    pub max_time_per_iter: u64,

    /// Warm-up iterations before fuzzing.
    #[arg(long, default_value_t = 64)]
    pub warmup: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options::parse_from::<_, &str>([])
    }
}

impl Options {
    pub fn colorize(&self) -> bool {
        self.colorize != 0
    }

    pub fn synthesis_budget_ns(&self) -> i64 {
        (self.synthesis_budget * 1e9) as i64
    }

    /// Parse the `--constraint` mini-language into hard constraints.
    pub fn cmd_constraints(&self, sig: &InputSignature) -> EngineResult<Vec<BoolExpr>> {
        let Some(raw) = &self.constraint else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| parse_constraint(c, sig))
            .collect()
    }
}

const COMPARATORS: [&str; 6] = ["==", "!=", "<=", ">=", "<", ">"];

fn parse_constraint(text: &str, sig: &InputSignature) -> EngineResult<BoolExpr> {
    let (op, at) = COMPARATORS
        .iter()
        .filter_map(|op| text.find(op).map(|at| (*op, at)))
        .min_by_key(|&(_, at)| at)
        .ok_or_else(|| EngineError::BadConstraint(format!("no comparator in `{}`", text)))?;

    let lhs = resolve_arg(text[..at].trim(), sig)?;
    let rhs_text = text[at + op.len()..].trim();
    let rhs = match rhs_text.parse::<i64>() {
        Ok(value) => IntExpr::Const(value),
        Err(_) => resolve_arg(rhs_text, sig)?,
    };

    Ok(match op {
        "==" => lhs.eq_expr(rhs),
        "!=" => lhs.ne_expr(rhs),
        "<=" => lhs.le(rhs),
        ">=" => lhs.ge(rhs),
        "<" => lhs.lt(rhs),
        ">" => lhs.gt(rhs),
        _ => unreachable!(),
    })
}

/// `argN` by flat positional index (enums first). Only numeric parameters
/// can be constrained; the solver owns no enum variables.
fn resolve_arg(text: &str, sig: &InputSignature) -> EngineResult<IntExpr> {
    let idx: usize = text
        .strip_prefix("arg")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| EngineError::BadConstraint(format!("invalid argument name `{}`", text)))?;
    let name = sig
        .param_name_at(idx)
        .ok_or_else(|| EngineError::BadConstraint(format!("`{}` is out of range", text)))?;
    if idx < sig.num_enum_params() {
        return Err(EngineError::BadConstraint(format!(
            "`{}` names enum parameter `{}`; only numeric parameters can be constrained",
            text, name
        )));
    }
    Ok(IntExpr::var(name))
}
