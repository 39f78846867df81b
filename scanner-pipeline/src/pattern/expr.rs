//! Column expressions and predicates.
//!
//! Patterns are data: an [`Expr`] tree computes a column from feature
//! columns, constants, lags and arithmetic; a [`Predicate`] compares
//! expressions and combines comparisons with `all` / `any`. Both serialize
//! to JSON so pattern sets can live in scan profiles.
//!
//! ```json
//! {"compare": {"lhs": {"col": "gap_atr"}, "op": ">=", "rhs": {"const": 0.5}}}
//! ```
//!
//! A missing operand makes an expression missing, and a comparison with a
//! missing side is false.

use std::collections::BTreeSet;
use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::features::FeaturePanel;
use crate::panel::{window, Column};

/// A column referenced by an expression that the feature panel lacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingColumn(pub String);

// ============================================================================
// Expressions
// ============================================================================

/// Column-valued expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Feature column by name
    Col(String),
    /// Constant broadcast to every row
    Const(f64),
    /// Value `periods` sessions earlier for the same symbol
    Lag { expr: Box<Expr>, periods: usize },
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

/// Feature column reference.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Col(name.into())
}

/// Constant.
pub fn lit(value: f64) -> Expr {
    Expr::Const(value)
}

impl Expr {
    /// This expression `periods` sessions earlier.
    pub fn lag(self, periods: usize) -> Self {
        Self::Lag {
            expr: Box::new(self),
            periods,
        }
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Predicate {
        Predicate::compare(self, CmpOp::Gt, rhs.into())
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Predicate {
        Predicate::compare(self, CmpOp::Ge, rhs.into())
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Predicate {
        Predicate::compare(self, CmpOp::Lt, rhs.into())
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Predicate {
        Predicate::compare(self, CmpOp::Le, rhs.into())
    }

    /// Collect every column name this expression reads.
    pub fn columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Col(name) => {
                out.insert(name.clone());
            }
            Self::Const(_) => {}
            Self::Lag { expr, .. } => expr.columns(out),
            Self::Add(a, b) | Self::Sub(a, b) | Self::Mul(a, b) | Self::Div(a, b) => {
                a.columns(out);
                b.columns(out);
            }
        }
    }

    /// Structural problems that make the expression unusable.
    fn check(&self) -> Result<(), String> {
        match self {
            Self::Col(name) if name.trim().is_empty() => Err("empty column name".to_string()),
            Self::Col(_) => Ok(()),
            Self::Const(v) if !v.is_finite() => Err(format!("non-finite constant {}", v)),
            Self::Const(_) => Ok(()),
            Self::Lag { expr, .. } => expr.check(),
            Self::Add(a, b) | Self::Sub(a, b) | Self::Mul(a, b) | Self::Div(a, b) => {
                a.check()?;
                b.check()
            }
        }
    }

    /// Evaluate over every row of the panel.
    pub fn eval(&self, fp: &FeaturePanel) -> Result<Column, MissingColumn> {
        let rows = fp.panel().len();
        Ok(match self {
            Self::Col(name) => fp
                .column(name)
                .cloned()
                .ok_or_else(|| MissingColumn(name.clone()))?,
            Self::Const(v) => vec![Some(*v); rows],
            Self::Lag { expr, periods } => {
                window::shift(fp.panel().groups(), &expr.eval(fp)?, *periods)
            }
            Self::Add(a, b) => window::zip_with(&a.eval(fp)?, &b.eval(fp)?, |x, y| Some(x + y)),
            Self::Sub(a, b) => window::zip_with(&a.eval(fp)?, &b.eval(fp)?, |x, y| Some(x - y)),
            Self::Mul(a, b) => window::zip_with(&a.eval(fp)?, &b.eval(fp)?, |x, y| Some(x * y)),
            Self::Div(a, b) => window::zip_with(&a.eval(fp)?, &b.eval(fp)?, |x, y| {
                (y != 0.0).then(|| x / y)
            }),
        })
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::Const(value)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

impl_binary_op!(Add, add, Add);
impl_binary_op!(Sub, sub, Sub);
impl_binary_op!(Mul, mul, Mul);
impl_binary_op!(Div, div, Div);

// ============================================================================
// Predicates
// ============================================================================

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl CmpOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
        }
    }
}

/// Boolean row condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Compare { lhs: Expr, op: CmpOp, rhs: Expr },
    /// Every inner predicate holds
    All(Vec<Predicate>),
    /// At least one inner predicate holds
    Any(Vec<Predicate>),
}

/// Conjunction.
pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::All(predicates.into_iter().collect())
}

/// Disjunction.
pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::Any(predicates.into_iter().collect())
}

impl Predicate {
    pub fn compare(lhs: Expr, op: CmpOp, rhs: Expr) -> Self {
        Self::Compare { lhs, op, rhs }
    }

    /// Collect every column name this predicate reads.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Compare { lhs, rhs, .. } => {
                lhs.columns(out);
                rhs.columns(out);
            }
            Self::All(inner) | Self::Any(inner) => {
                inner.iter().for_each(|p| p.collect_columns(out));
            }
        }
    }

    /// Structural check: no empty combinators, no empty names, finite constants.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Self::Compare { lhs, rhs, .. } => {
                lhs.check()?;
                rhs.check()
            }
            Self::All(inner) | Self::Any(inner) if inner.is_empty() => {
                Err("empty all/any combinator".to_string())
            }
            Self::All(inner) | Self::Any(inner) => inner.iter().try_for_each(Predicate::check),
        }
    }

    /// Evaluate to one flag per panel row. Missing values compare false.
    pub fn eval(&self, fp: &FeaturePanel) -> Result<Vec<bool>, MissingColumn> {
        match self {
            Self::Compare { lhs, op, rhs } => {
                let (l, r) = (lhs.eval(fp)?, rhs.eval(fp)?);
                Ok(l.iter()
                    .zip(&r)
                    .map(|(l, r)| matches!((l, r), (Some(l), Some(r)) if op.apply(*l, *r)))
                    .collect())
            }
            Self::All(inner) => {
                let mut mask = vec![true; fp.panel().len()];
                for p in inner {
                    for (m, v) in mask.iter_mut().zip(p.eval(fp)?) {
                        *m &= v;
                    }
                }
                Ok(mask)
            }
            Self::Any(inner) => {
                let mut mask = vec![false; fp.panel().len()];
                for p in inner {
                    for (m, v) in mask.iter_mut().zip(p.eval(fp)?) {
                        *m |= v;
                    }
                }
                Ok(mask)
            }
        }
    }
}
