//! Pattern definitions and matching.
//!
//! - [`expr`]: serializable column expressions and predicates
//! - [`matcher`]: named pattern sets and the matcher producing [`SignalMatch`]es
//! - [`builtin`]: the built-in pattern library parameterized by scan thresholds

pub mod builtin;
pub mod expr;
mod matcher;

pub use builtin::TriggerAnchor;
pub use expr::{all, any, col, lit, CmpOp, Expr, Predicate};
pub use matcher::{Pattern, PatternMatcher, PatternSet, SignalMatch};
