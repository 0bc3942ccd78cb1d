//! Recursive-descent parser for the synthesizer's `define-fun` response.

use waypoint_core::{BoolExpr, IntExpr};

use crate::ast::SynthFun;
use crate::error::{SynthError, SynthResult};

struct Cursor<'a> {
    text: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text: text.as_bytes(),
            pos: 0,
        }
    }

    fn err(&self, expected: impl Into<String>) -> SynthError {
        let rest: String = self.text[self.pos..]
            .iter()
            .take(24)
            .map(|&b| b as char)
            .collect();
        SynthError::Parse {
            at: self.pos,
            expected: expected.into(),
            found: rest,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\n' | b'\t' | b'\r' | b'\\')) {
            self.pos += 1;
        }
    }

    fn consume(&mut self, token: &str) -> SynthResult<()> {
        self.skip_ws();
        if self.text[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            self.skip_ws();
            Ok(())
        } else {
            Err(self.err(format!("`{}`", token)))
        }
    }

    fn try_consume(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.text[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            self.skip_ws();
            true
        } else {
            false
        }
    }

    fn parse_ident(&mut self) -> SynthResult<String> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {}
            _ => return Err(self.err("identifier")),
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        Ok(String::from_utf8_lossy(&self.text[start..self.pos]).into_owned())
    }

    fn parse_number(&mut self) -> SynthResult<i64> {
        self.skip_ws();
        let negative = self.try_consume("-");
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.err("digit"));
        }
        let digits = std::str::from_utf8(&self.text[start..self.pos]).unwrap();
        let value: i64 = digits.parse().map_err(|_| self.err("i64 literal"))?;
        Ok(if negative { -value } else { value })
    }

    fn parse_int_expr(&mut self) -> SynthResult<IntExpr> {
        self.skip_ws();
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == b'-' => Ok(IntExpr::Const(self.parse_number()?)),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                Ok(IntExpr::Var(self.parse_ident()?))
            }
            Some(b'(') => {
                self.consume("(")?;
                let expr = if self.try_consume("ite") {
                    let cond = self.parse_bool_expr()?;
                    let then = self.parse_int_expr()?;
                    let other = self.parse_int_expr()?;
                    IntExpr::ite(cond, then, other)
                } else {
                    let op = match self.peek() {
                        Some(op @ (b'+' | b'-' | b'*' | b'/' | b'%')) => op,
                        _ => return Err(self.err("integer operator")),
                    };
                    self.pos += 1;
                    let left = Box::new(self.parse_int_expr()?);
                    let right = Box::new(self.parse_int_expr()?);
                    match op {
                        b'+' => IntExpr::Add(left, right),
                        b'-' => IntExpr::Sub(left, right),
                        b'*' => IntExpr::Mul(left, right),
                        b'/' => IntExpr::Div(left, right),
                        _ => IntExpr::Mod(left, right),
                    }
                };
                self.consume(")")?;
                Ok(expr)
            }
            _ => Err(self.err("integer expression")),
        }
    }

    fn parse_bool_expr(&mut self) -> SynthResult<BoolExpr> {
        self.consume("(")?;
        // Two-character comparators before their one-character prefixes.
        let expr = if self.try_consume("and") {
            let l = self.parse_bool_expr()?;
            let r = self.parse_bool_expr()?;
            BoolExpr::And(Box::new(l), Box::new(r))
        } else if self.try_consume("or") {
            let l = self.parse_bool_expr()?;
            let r = self.parse_bool_expr()?;
            BoolExpr::Or(Box::new(l), Box::new(r))
        } else if self.try_consume("not") {
            BoolExpr::Not(Box::new(self.parse_bool_expr()?))
        } else if self.try_consume("<=") {
            let l = self.parse_int_expr()?;
            let r = self.parse_int_expr()?;
            BoolExpr::Le(Box::new(l), Box::new(r))
        } else if self.try_consume(">=") {
            let l = self.parse_int_expr()?;
            let r = self.parse_int_expr()?;
            BoolExpr::Ge(Box::new(l), Box::new(r))
        } else if self.try_consume("!=") {
            let l = self.parse_int_expr()?;
            let r = self.parse_int_expr()?;
            BoolExpr::Neq(Box::new(l), Box::new(r))
        } else if self.try_consume("=") {
            let l = self.parse_int_expr()?;
            let r = self.parse_int_expr()?;
            BoolExpr::Eq(Box::new(l), Box::new(r))
        } else if self.try_consume("<") {
            let l = self.parse_int_expr()?;
            let r = self.parse_int_expr()?;
            BoolExpr::Lt(Box::new(l), Box::new(r))
        } else if self.try_consume(">") {
            let l = self.parse_int_expr()?;
            let r = self.parse_int_expr()?;
            BoolExpr::Gt(Box::new(l), Box::new(r))
        } else {
            return Err(self.err("boolean operator"));
        };
        self.consume(")")?;
        Ok(expr)
    }
}

/// Parse a `(define-fun name ((p Int)...) Bool body)` response.
pub fn parse_define_fun(text: &str) -> SynthResult<SynthFun> {
    let mut cur = Cursor::new(text);
    cur.consume("(")?;
    cur.consume("define-fun")?;
    let name = cur.parse_ident()?;

    cur.consume("(")?;
    let mut params = Vec::new();
    loop {
        cur.skip_ws();
        if cur.peek() == Some(b')') {
            break;
        }
        cur.consume("(")?;
        params.push(cur.parse_ident()?);
        cur.consume("Int")?;
        cur.consume(")")?;
    }
    cur.consume(")")?;
    cur.consume("Bool")?;

    let body = cur.parse_bool_expr()?;
    Ok(SynthFun { name, params, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::Args;

    fn args(pairs: &[(&str, i64)]) -> Args {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn parses_flat_comparator() {
        let fun = parse_define_fun("(define-fun f ((a Int) (b Int)) Bool (<= a b))").unwrap();
        assert_eq!(fun.name, "f");
        assert_eq!(fun.params, vec!["a", "b"]);
        assert_eq!(fun.eval(&args(&[("a", 1), ("b", 2)])), Ok(true));
        assert_eq!(fun.eval(&args(&[("a", 3), ("b", 2)])), Ok(false));
    }

    #[test]
    fn parses_nested_arithmetic() {
        let fun =
            parse_define_fun("(define-fun f ((a Int)) Bool (= (% a 2) 0))").unwrap();
        assert_eq!(fun.eval(&args(&[("a", 4)])), Ok(true));
        assert_eq!(fun.eval(&args(&[("a", 5)])), Ok(false));
    }

    #[test]
    fn parses_negation_and_connectives() {
        let fun = parse_define_fun(
            "(define-fun f ((a Int) (b Int)) Bool (and (not (= a b)) (or (< a 0) (> b 3))))",
        )
        .unwrap();
        assert_eq!(fun.eval(&args(&[("a", -1), ("b", 0)])), Ok(true));
        assert_eq!(fun.eval(&args(&[("a", 0), ("b", 0)])), Ok(false));
    }

    #[test]
    fn parses_ite_and_negative_literals() {
        let fun =
            parse_define_fun("(define-fun f ((a Int)) Bool (= (ite (< a 0) (- 0 a) a) 7))")
                .unwrap();
        assert_eq!(fun.eval(&args(&[("a", -7)])), Ok(true));
        assert_eq!(fun.eval(&args(&[("a", 7)])), Ok(true));
        assert_eq!(fun.eval(&args(&[("a", 6)])), Ok(false));
    }

    #[test]
    fn multiline_response_is_accepted() {
        let fun = parse_define_fun(
            "(define-fun f ((x Int) (y Int)) Bool\n    (= x\n       y))",
        )
        .unwrap();
        assert_eq!(fun.params, vec!["x", "y"]);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_define_fun("unsat").is_err());
        assert!(parse_define_fun("(define-fun f ((a Int)) Bool (?? a 1))").is_err());
    }

    #[test]
    fn round_trips_through_display() {
        let text = "(define-fun f ((a Int) (b Int)) Bool (and (<= a b) (< 0 a)))";
        let fun = parse_define_fun(text).unwrap();
        assert_eq!(fun.to_string(), text);
    }
}
