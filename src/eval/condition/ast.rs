// SPDX-License-Identifier: MIT

//! Abstract Syntax Tree for condition expressions

use std::fmt;
use std::time::Duration;

use super::parser::parse;
use crate::eval::error::ParseError;

/// A condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal value
    Literal(Literal),
    /// Bare property name, resolved through the registry
    Property(String),
    /// Function call: name(args...)
    Call { name: String, args: Vec<Expression> },
    /// Comparison expression: left op right
    Compare {
        left: Box<Expression>,
        op: CompareOp,
        right: Box<Expression>,
    },
    /// Logical AND
    And(Box<Expression>, Box<Expression>),
    /// Logical OR
    Or(Box<Expression>, Box<Expression>),
    /// Logical NOT
    Not(Box<Expression>),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// ==
    Eq,
    /// !=
    NotEq,
    /// >
    Gt,
    /// >=
    Gte,
    /// <
    Lt,
    /// <=
    Lte,
}

/// Literal values in expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Duration(Duration),
    Boolean(bool),
}

impl Expression {
    /// Distinct property names referenced, in order of first appearance
    pub fn properties(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_properties(&mut out);
        out
    }

    fn collect_properties<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Property(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expression::Call { args, .. } => {
                for arg in args {
                    arg.collect_properties(out);
                }
            }
            Expression::Compare { left, right, .. }
            | Expression::And(left, right)
            | Expression::Or(left, right) => {
                left.collect_properties(out);
                right.collect_properties(out);
            }
            Expression::Not(inner) => inner.collect_properties(out),
        }
    }
}

/// A parsed condition, immutable once built
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expression: Expression,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let expression = parse(source)?;
        Ok(Self {
            source: source.to_string(),
            expression,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::NotEq => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
