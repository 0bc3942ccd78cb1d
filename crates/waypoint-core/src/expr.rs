//! Symbolic expression algebra over the fuzz target's parameters.
//!
//! Learned branch conditions, user constraints, and SyGuS grammars are all
//! built from the two mutually recursive types here. The `Display` impls
//! render SMT-LIB s-expressions (the exact form embedded in SyGuS files);
//! [`BoolExpr::pretty`] renders an infix form for logs.

use std::fmt;
use std::ops;

use crate::defs::Args;
use crate::error::EvalError;

/// Integer-valued expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntExpr {
    Const(i64),
    Var(String),
    Ite(Box<BoolExpr>, Box<IntExpr>, Box<IntExpr>),
    Add(Box<IntExpr>, Box<IntExpr>),
    Sub(Box<IntExpr>, Box<IntExpr>),
    Mul(Box<IntExpr>, Box<IntExpr>),
    Div(Box<IntExpr>, Box<IntExpr>),
    Mod(Box<IntExpr>, Box<IntExpr>),
}

/// Boolean-valued expression tree.
///
/// `Var` only ever names a grammar nonterminal in SyGuS production rules;
/// it cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolExpr {
    Var(String),
    Not(Box<BoolExpr>),
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
    Eq(Box<IntExpr>, Box<IntExpr>),
    Neq(Box<IntExpr>, Box<IntExpr>),
    Lt(Box<IntExpr>, Box<IntExpr>),
    Gt(Box<IntExpr>, Box<IntExpr>),
    Le(Box<IntExpr>, Box<IntExpr>),
    Ge(Box<IntExpr>, Box<IntExpr>),
}

impl IntExpr {
    pub fn var(name: impl Into<String>) -> Self {
        IntExpr::Var(name.into())
    }

    pub fn ite(cond: BoolExpr, then: IntExpr, other: IntExpr) -> Self {
        IntExpr::Ite(Box::new(cond), Box::new(then), Box::new(other))
    }

    /// Evaluate over a concrete argument map.
    pub fn eval(&self, args: &Args) -> Result<i64, EvalError> {
        match self {
            IntExpr::Const(v) => Ok(*v),
            IntExpr::Var(name) => args
                .get(name)
                .copied()
                .ok_or_else(|| EvalError::UnboundVar(name.clone())),
            IntExpr::Ite(c, l, r) => {
                if c.eval(args)? {
                    l.eval(args)
                } else {
                    r.eval(args)
                }
            }
            IntExpr::Add(l, r) => Ok(l.eval(args)?.wrapping_add(r.eval(args)?)),
            IntExpr::Sub(l, r) => Ok(l.eval(args)?.wrapping_sub(r.eval(args)?)),
            IntExpr::Mul(l, r) => Ok(l.eval(args)?.wrapping_mul(r.eval(args)?)),
            IntExpr::Div(l, r) => {
                let (l, r) = (l.eval(args)?, r.eval(args)?);
                if r == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(l / r)
            }
            IntExpr::Mod(l, r) => {
                let (l, r) = (l.eval(args)?, r.eval(args)?);
                if r == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(l % r)
            }
        }
    }

    /// Whether the given literal appears anywhere in the tree.
    pub fn has_literal(&self, literal: i64) -> bool {
        match self {
            IntExpr::Const(v) => *v == literal,
            IntExpr::Var(_) => false,
            IntExpr::Ite(c, l, r) => {
                c.has_literal(literal) || l.has_literal(literal) || r.has_literal(literal)
            }
            IntExpr::Add(l, r)
            | IntExpr::Sub(l, r)
            | IntExpr::Mul(l, r)
            | IntExpr::Div(l, r)
            | IntExpr::Mod(l, r) => l.has_literal(literal) || r.has_literal(literal),
        }
    }

    // Comparison constructors. These cannot be operator overloads in Rust
    // (comparison operators must return `bool`), so they get names.

    pub fn eq_expr(self, other: impl Into<IntExpr>) -> BoolExpr {
        BoolExpr::Eq(Box::new(self), Box::new(other.into()))
    }

    pub fn ne_expr(self, other: impl Into<IntExpr>) -> BoolExpr {
        BoolExpr::Neq(Box::new(self), Box::new(other.into()))
    }

    pub fn lt(self, other: impl Into<IntExpr>) -> BoolExpr {
        BoolExpr::Lt(Box::new(self), Box::new(other.into()))
    }

    pub fn gt(self, other: impl Into<IntExpr>) -> BoolExpr {
        BoolExpr::Gt(Box::new(self), Box::new(other.into()))
    }

    pub fn le(self, other: impl Into<IntExpr>) -> BoolExpr {
        BoolExpr::Le(Box::new(self), Box::new(other.into()))
    }

    pub fn ge(self, other: impl Into<IntExpr>) -> BoolExpr {
        BoolExpr::Ge(Box::new(self), Box::new(other.into()))
    }
}

impl From<i64> for IntExpr {
    fn from(v: i64) -> Self {
        IntExpr::Const(v)
    }
}

macro_rules! int_binop {
    ($trait:ident, $method:ident, $variant:ident, $fold:expr) => {
        impl ops::$trait for IntExpr {
            type Output = IntExpr;
            fn $method(self, rhs: IntExpr) -> IntExpr {
                // Fold literal operands so user-built constraints stay small.
                if let (IntExpr::Const(a), IntExpr::Const(b)) = (&self, &rhs) {
                    if let Some(v) = $fold(*a, *b) {
                        return IntExpr::Const(v);
                    }
                }
                IntExpr::$variant(Box::new(self), Box::new(rhs))
            }
        }

        impl ops::$trait<i64> for IntExpr {
            type Output = IntExpr;
            fn $method(self, rhs: i64) -> IntExpr {
                ops::$trait::$method(self, IntExpr::Const(rhs))
            }
        }
    };
}

int_binop!(Add, add, Add, |a: i64, b: i64| a.checked_add(b));
int_binop!(Sub, sub, Sub, |a: i64, b: i64| a.checked_sub(b));
int_binop!(Mul, mul, Mul, |a: i64, b: i64| a.checked_mul(b));
int_binop!(Div, div, Div, |a: i64, b: i64| if b != 0 {
    Some(a / b)
} else {
    None
});
int_binop!(Rem, rem, Mod, |a: i64, b: i64| if b != 0 {
    Some(a % b)
} else {
    None
});

impl BoolExpr {
    /// The canonical always-true expression, `1 = 1`.
    pub fn truth() -> Self {
        IntExpr::Const(1).eq_expr(1)
    }

    /// The canonical always-false expression, `1 ≠ 1`.
    pub fn falsity() -> Self {
        IntExpr::Const(1).ne_expr(1)
    }

    /// Conjunction with identity absorption: `and(TRUE, x) == x`.
    pub fn and(self, other: BoolExpr) -> Self {
        if self == Self::truth() {
            other
        } else if other == Self::truth() {
            self
        } else {
            BoolExpr::And(Box::new(self), Box::new(other))
        }
    }

    /// Disjunction with identity absorption: `or(FALSE, x) == x`.
    pub fn or(self, other: BoolExpr) -> Self {
        if self == Self::falsity() {
            other
        } else if other == Self::falsity() {
            self
        } else {
            BoolExpr::Or(Box::new(self), Box::new(other))
        }
    }

    /// Fold a sequence of expressions into one conjunction.
    pub fn conjoin(exprs: impl IntoIterator<Item = BoolExpr>) -> Self {
        exprs
            .into_iter()
            .fold(Self::truth(), |acc, e| acc.and(e))
    }

    /// Evaluate over a concrete argument map.
    pub fn eval(&self, args: &Args) -> Result<bool, EvalError> {
        match self {
            BoolExpr::Var(name) => Err(EvalError::UnboundVar(name.clone())),
            BoolExpr::Not(b) => Ok(!b.eval(args)?),
            BoolExpr::And(l, r) => Ok(l.eval(args)? && r.eval(args)?),
            BoolExpr::Or(l, r) => Ok(l.eval(args)? || r.eval(args)?),
            BoolExpr::Eq(l, r) => Ok(l.eval(args)? == r.eval(args)?),
            BoolExpr::Neq(l, r) => Ok(l.eval(args)? != r.eval(args)?),
            BoolExpr::Lt(l, r) => Ok(l.eval(args)? < r.eval(args)?),
            BoolExpr::Gt(l, r) => Ok(l.eval(args)? > r.eval(args)?),
            BoolExpr::Le(l, r) => Ok(l.eval(args)? <= r.eval(args)?),
            BoolExpr::Ge(l, r) => Ok(l.eval(args)? >= r.eval(args)?),
        }
    }

    pub fn has_literal(&self, literal: i64) -> bool {
        match self {
            BoolExpr::Var(_) => false,
            BoolExpr::Not(b) => b.has_literal(literal),
            BoolExpr::And(l, r) | BoolExpr::Or(l, r) => {
                l.has_literal(literal) || r.has_literal(literal)
            }
            BoolExpr::Eq(l, r)
            | BoolExpr::Neq(l, r)
            | BoolExpr::Lt(l, r)
            | BoolExpr::Gt(l, r)
            | BoolExpr::Le(l, r)
            | BoolExpr::Ge(l, r) => l.has_literal(literal) || r.has_literal(literal),
        }
    }

    /// Infix rendering for logs and tree dumps.
    pub fn pretty(&self) -> String {
        match self {
            BoolExpr::Var(name) => name.clone(),
            BoolExpr::Not(b) => format!("(\u{ac} {})", b.pretty()),
            BoolExpr::And(l, r) => format!("({} \u{2227} {})", l.pretty(), r.pretty()),
            BoolExpr::Or(l, r) => format!("({} \u{2228} {})", l.pretty(), r.pretty()),
            BoolExpr::Eq(l, r) => format!("({} = {})", l, r),
            BoolExpr::Neq(l, r) => format!("({} \u{2260} {})", l, r),
            BoolExpr::Lt(l, r) => format!("({} < {})", l, r),
            BoolExpr::Gt(l, r) => format!("({} > {})", l, r),
            BoolExpr::Le(l, r) => format!("({} \u{2264} {})", l, r),
            BoolExpr::Ge(l, r) => format!("({} \u{2265} {})", l, r),
        }
    }
}

impl ops::Not for BoolExpr {
    type Output = BoolExpr;

    /// Negation pushed through comparators: `!(a < b)` becomes `a >= b`,
    /// `!!x` becomes `x`.
    fn not(self) -> BoolExpr {
        match self {
            BoolExpr::Not(b) => *b,
            BoolExpr::Eq(l, r) => BoolExpr::Neq(l, r),
            BoolExpr::Neq(l, r) => BoolExpr::Eq(l, r),
            BoolExpr::Lt(l, r) => BoolExpr::Ge(l, r),
            BoolExpr::Gt(l, r) => BoolExpr::Le(l, r),
            BoolExpr::Le(l, r) => BoolExpr::Gt(l, r),
            BoolExpr::Ge(l, r) => BoolExpr::Lt(l, r),
            other => BoolExpr::Not(Box::new(other)),
        }
    }
}

impl ops::BitAnd for BoolExpr {
    type Output = BoolExpr;
    fn bitand(self, rhs: BoolExpr) -> BoolExpr {
        self.and(rhs)
    }
}

impl ops::BitOr for BoolExpr {
    type Output = BoolExpr;
    fn bitor(self, rhs: BoolExpr) -> BoolExpr {
        self.or(rhs)
    }
}

/// Remove one layer of top-level negation by flipping the comparator
/// underneath. Synthesizer output arrives at most `(not <cmp>)`-shaped, so
/// one layer is all that is needed.
pub fn simplify(e: BoolExpr) -> BoolExpr {
    match e {
        BoolExpr::Not(inner) => !*inner,
        other => other,
    }
}

/// Equality or inequality between two enum parameters of the same group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityKind {
    Equal,
    Inequal,
}

/// A variable-to-variable (in)equality extracted from a synthesized enum
/// condition, in the restricted shape the enum solver understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqualityCondition {
    pub kind: EqualityKind,
    pub left: String,
    pub right: String,
}

impl EqualityCondition {
    pub fn negate(&self) -> Self {
        let kind = match self.kind {
            EqualityKind::Equal => EqualityKind::Inequal,
            EqualityKind::Inequal => EqualityKind::Equal,
        };
        Self {
            kind,
            left: self.left.clone(),
            right: self.right.clone(),
        }
    }
}

impl BoolExpr {
    /// Extract `(EqualityKind, lhs, rhs)` from an expression of shape
    /// `Eq/Neq(Var, Var)`, possibly under `Not`. Anything else fails: the
    /// enum-equality grammar only produces these shapes, so a mismatch is a
    /// parser or grammar bug.
    pub fn to_equality_condition(&self) -> Result<EqualityCondition, EvalError> {
        match self {
            BoolExpr::Not(b) => Ok(b.to_equality_condition()?.negate()),
            BoolExpr::Eq(l, r) => equality_operands(l, r, EqualityKind::Equal),
            BoolExpr::Neq(l, r) => equality_operands(l, r, EqualityKind::Inequal),
            other => Err(EvalError::UnboundVar(other.pretty())),
        }
    }
}

fn equality_operands(
    l: &IntExpr,
    r: &IntExpr,
    kind: EqualityKind,
) -> Result<EqualityCondition, EvalError> {
    match (l, r) {
        (IntExpr::Var(left), IntExpr::Var(right)) => Ok(EqualityCondition {
            kind,
            left: left.clone(),
            right: right.clone(),
        }),
        _ => Err(EvalError::UnboundVar(format!("({} {})", l, r))),
    }
}

impl fmt::Display for IntExpr {
    /// SMT-LIB s-expression form, embedded verbatim in SyGuS files.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntExpr::Const(v) => write!(f, "{}", v),
            IntExpr::Var(name) => write!(f, "{}", name),
            IntExpr::Ite(c, l, r) => write!(f, "(ite {} {} {})", c, l, r),
            IntExpr::Add(l, r) => write!(f, "(+ {} {})", l, r),
            IntExpr::Sub(l, r) => write!(f, "(- {} {})", l, r),
            IntExpr::Mul(l, r) => write!(f, "(* {} {})", l, r),
            IntExpr::Div(l, r) => write!(f, "(/ {} {})", l, r),
            IntExpr::Mod(l, r) => write!(f, "(% {} {})", l, r),
        }
    }
}

impl fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolExpr::Var(name) => write!(f, "{}", name),
            BoolExpr::Not(b) => write!(f, "(not {})", b),
            BoolExpr::And(l, r) => write!(f, "(and {} {})", l, r),
            BoolExpr::Or(l, r) => write!(f, "(or {} {})", l, r),
            BoolExpr::Eq(l, r) => write!(f, "(= {} {})", l, r),
            BoolExpr::Neq(l, r) => write!(f, "(!= {} {})", l, r),
            BoolExpr::Lt(l, r) => write!(f, "(< {} {})", l, r),
            BoolExpr::Gt(l, r) => write!(f, "(> {} {})", l, r),
            BoolExpr::Le(l, r) => write!(f, "(<= {} {})", l, r),
            BoolExpr::Ge(l, r) => write!(f, "(>= {} {})", l, r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, i64)]) -> Args {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn arithmetic_eval() {
        let e = (IntExpr::var("a") + 2) * IntExpr::var("b");
        assert_eq!(e.eval(&args(&[("a", 3), ("b", 4)])), Ok(20));
    }

    #[test]
    fn constant_folding_on_literals() {
        assert_eq!(IntExpr::Const(2) + 3, IntExpr::Const(5));
        assert_eq!(IntExpr::Const(7) % 4, IntExpr::Const(3));
        // Folding by zero is left unfolded, not a panic.
        assert!(matches!(IntExpr::Const(7) / 0, IntExpr::Div(_, _)));
    }

    #[test]
    fn division_by_zero_is_a_typed_error() {
        let e = IntExpr::var("a") / IntExpr::var("b");
        assert_eq!(
            e.eval(&args(&[("a", 1), ("b", 0)])),
            Err(EvalError::DivisionByZero)
        );
        let m = IntExpr::var("a") % IntExpr::var("b");
        assert_eq!(
            m.eval(&args(&[("a", 1), ("b", 0)])),
            Err(EvalError::DivisionByZero)
        );
    }

    #[test]
    fn and_or_absorb_truth_literals() {
        let cmp = IntExpr::var("a").lt(5);
        assert_eq!(BoolExpr::truth().and(cmp.clone()), cmp);
        assert_eq!(cmp.clone().and(BoolExpr::truth()), cmp);
        assert_eq!(BoolExpr::falsity().or(cmp.clone()), cmp);
        assert_eq!(cmp.clone().or(BoolExpr::falsity()), cmp);
    }

    #[test]
    fn negation_flips_comparators() {
        let a = || IntExpr::var("a");
        let b = || IntExpr::var("b");
        assert_eq!(!a().lt(b()), a().ge(b()));
        assert_eq!(!a().gt(b()), a().le(b()));
        assert_eq!(!a().le(b()), a().gt(b()));
        assert_eq!(!a().ge(b()), a().lt(b()));
        assert_eq!(!a().eq_expr(b()), a().ne_expr(b()));
        assert_eq!(!a().ne_expr(b()), a().eq_expr(b()));
    }

    #[test]
    fn double_negation_cancels() {
        let e = IntExpr::var("a").lt(IntExpr::var("b"));
        assert_eq!(!!e.clone(), e);
        assert_eq!(simplify(BoolExpr::Not(Box::new(BoolExpr::Not(Box::new(
            e.clone()
        ))))), e);
    }

    #[test]
    fn equality_condition_extraction() {
        let e = IntExpr::var("x").eq_expr(IntExpr::var("y"));
        let eq = e.to_equality_condition().unwrap();
        assert_eq!(eq.kind, EqualityKind::Equal);
        assert_eq!((eq.left.as_str(), eq.right.as_str()), ("x", "y"));

        let n = BoolExpr::Not(Box::new(e));
        let neq = n.to_equality_condition().unwrap();
        assert_eq!(neq.kind, EqualityKind::Inequal);

        let bad = IntExpr::var("x").lt(IntExpr::var("y"));
        assert!(bad.to_equality_condition().is_err());
    }

    #[test]
    fn smtlib_rendering() {
        let e = (IntExpr::var("a") + IntExpr::var("b")).le(IntExpr::Const(3));
        assert_eq!(e.to_string(), "(<= (+ a b) 3)");
        assert_eq!((!e).to_string(), "(> (+ a b) 3)");
    }
}
