//! Model of a SyGuS problem file and of the synthesizer's response.
//!
//! Only the fragment this fuzzer emits is modeled: `(set-logic LIA)`, one
//! `synth-fun` returning `Bool` over `Int` parameters with an explicit
//! grammar, and input-output `constraint` lines.

use std::fmt;

use waypoint_core::{Args, BoolExpr, EvalError, IntExpr};

/// One production rule of the grammar: a nonterminal and its alternatives.
/// Nonterminals inside alternatives are spelled as variables of the
/// expression types.
#[derive(Debug, Clone)]
pub struct ProductionRule {
    pub symbol: String,
    pub rhs: RuleRhs,
}

#[derive(Debug, Clone)]
pub enum RuleRhs {
    Int(Vec<IntExpr>),
    Bool(Vec<BoolExpr>),
}

impl ProductionRule {
    pub fn ints(symbol: impl Into<String>, rhs: Vec<IntExpr>) -> Self {
        Self {
            symbol: symbol.into(),
            rhs: RuleRhs::Int(rhs),
        }
    }

    pub fn bools(symbol: impl Into<String>, rhs: Vec<BoolExpr>) -> Self {
        Self {
            symbol: symbol.into(),
            rhs: RuleRhs::Bool(rhs),
        }
    }
}

impl fmt::Display for ProductionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (sort, alts) = match &self.rhs {
            RuleRhs::Int(alts) => (
                "Int",
                alts.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            ),
            RuleRhs::Bool(alts) => (
                "Bool",
                alts.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            ),
        };
        write!(
            f,
            "        ({} {} (\n            {}))",
            self.symbol,
            sort,
            alts.join(" ")
        )
    }
}

/// The `synth-fun` declaration: name, `Int` parameters, and grammar.
#[derive(Debug, Clone)]
pub struct FunSpec {
    pub name: String,
    pub params: Vec<String>,
    pub rules: Vec<ProductionRule>,
}

impl fmt::Display for FunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "(synth-fun {}", self.name)?;
        writeln!(f)?;
        writeln!(f, "    ;; Parameters and return type")?;
        let params: Vec<String> = self.params.iter().map(|p| format!("({} Int)", p)).collect();
        writeln!(f, "    ({}) Bool", params.join(" "))?;
        writeln!(f)?;
        writeln!(f, "    ;; Define the syntax")?;
        writeln!(f, "    (")?;
        for rule in &self.rules {
            writeln!(f, "{}", rule)?;
        }
        writeln!(f, "    )")?;
        write!(f, ")")
    }
}

/// One input-output example: `(constraint (= (f v1 .. vn) true|false))`.
/// Values are pre-ordered by the caller (declaration order of the relevant
/// parameter kind).
#[derive(Debug, Clone)]
pub struct IoConstraint {
    pub fname: String,
    pub values: Vec<i64>,
    pub result: bool,
}

impl fmt::Display for IoConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        write!(
            f,
            "(constraint (= ({} {}) {}))",
            self.fname,
            values.join(" "),
            self.result
        )
    }
}

/// A complete SyGuS problem.
#[derive(Debug, Clone)]
pub struct SygusFile {
    pub fun: FunSpec,
    pub constraints: Vec<IoConstraint>,
}

impl fmt::Display for SygusFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ";; Background theory")?;
        writeln!(f, "(set-logic LIA)")?;
        writeln!(f)?;
        writeln!(f, ";; Spec of the function to be synthesized")?;
        writeln!(f, "{}", self.fun)?;
        writeln!(f)?;
        writeln!(f, ";; Input-Output examples")?;
        for c in &self.constraints {
            writeln!(f, "{}", c)?;
        }
        writeln!(f)?;
        writeln!(f, "(check-synth)")
    }
}

/// A parsed `define-fun` response.
#[derive(Debug, Clone)]
pub struct SynthFun {
    pub name: String,
    pub params: Vec<String>,
    pub body: BoolExpr,
}

impl SynthFun {
    pub fn eval(&self, args: &Args) -> Result<bool, EvalError> {
        self.body.eval(args)
    }
}

impl fmt::Display for SynthFun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| format!("({} Int)", p)).collect();
        write!(
            f,
            "(define-fun {} ({}) Bool {})",
            self.name,
            params.join(" "),
            self.body
        )
    }
}
