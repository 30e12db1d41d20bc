// SPDX-License-Identifier: MIT

//! Parsed form of a router condition

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `path op literal`
    Compare {
        left: String,
        op: CompareOp,
        right: Literal,
    },
    /// Bare state path, true when present and not null/false/0/empty
    Truthy(String),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring for strings, membership for arrays
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Contains => "contains",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => f.write_str("null"),
        }
    }
}

/// Canonical rendering, fully parenthesized so precedence is explicit
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Compare { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expression::Truthy(path) => f.write_str(path),
            Expression::And(a, b) => write!(f, "({} and {})", a, b),
            Expression::Or(a, b) => write!(f, "({} or {})", a, b),
            Expression::Not(inner) => write!(f, "not {}", inner),
            Expression::True => f.write_str("true"),
            Expression::False => f.write_str("false"),
        }
    }
}

impl Expression {
    /// State paths this expression reads, in order of appearance
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Compare { left, .. } | Expression::Truthy(left) => out.push(left),
            Expression::And(a, b) | Expression::Or(a, b) => {
                a.collect_paths(out);
                b.collect_paths(out);
            }
            Expression::Not(inner) => inner.collect_paths(out),
            Expression::True | Expression::False => {}
        }
    }
}
