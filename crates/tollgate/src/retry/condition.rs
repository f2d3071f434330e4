// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};

use serde_json::{Number, Value};

use crate::utils::define_fn_wrapper;

define_fn_wrapper!(Predicate(Fn(value: &Value) -> bool));

/// Comparison applied by a path condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Comparison {
    /// The addressed value equals the operand.
    Eq,
    /// The addressed value differs from the operand, or is missing.
    Ne,
    /// The addressed value orders before the operand.
    Lt,
    /// The addressed value orders before or equal to the operand.
    Le,
    /// The addressed value orders after the operand.
    Gt,
    /// The addressed value orders after or equal to the operand.
    Ge,
    /// The path resolves to a non-null value. The operand is ignored.
    #[default]
    Exists,
}

impl Comparison {
    fn test(self, actual: Option<&Value>, operand: &Value) -> bool {
        let actual = actual.filter(|value| !value.is_null());

        match self {
            Self::Exists => actual.is_some(),
            Self::Eq => actual.is_some_and(|value| loose_eq(value, operand)),
            Self::Ne => !actual.is_some_and(|value| loose_eq(value, operand)),
            Self::Lt => order(actual, operand).is_some_and(Ordering::is_lt),
            Self::Le => order(actual, operand).is_some_and(Ordering::is_le),
            Self::Gt => order(actual, operand).is_some_and(Ordering::is_gt),
            Self::Ge => order(actual, operand).is_some_and(Ordering::is_ge),
        }
    }
}

// `1` and `1.0` are different JSON values but the same number.
fn loose_eq(actual: &Value, operand: &Value) -> bool {
    match (actual, operand) {
        (Value::Number(left), Value::Number(right)) => compare_numbers(left, right) == Some(Ordering::Equal),
        _ => actual == operand,
    }
}

fn order(actual: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (actual?, operand) {
        (Value::Number(left), Value::Number(right)) => compare_numbers(left, right),
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

/// Integers compare exactly over the whole `i64` and `u64` range. A float on either side
/// compares as `f64`.
fn compare_numbers(left: &Number, right: &Number) -> Option<Ordering> {
    if let (Some(left), Some(right)) = (left.as_i64(), right.as_i64()) {
        return Some(left.cmp(&right));
    }
    if let (Some(left), Some(right)) = (left.as_u64(), right.as_u64()) {
        return Some(left.cmp(&right));
    }
    // Only a negative integer against one above `i64::MAX` is left among integer pairs.
    if left.is_i64() && right.is_u64() {
        return Some(Ordering::Less);
    }
    if left.is_u64() && right.is_i64() {
        return Some(Ordering::Greater);
    }
    left.as_f64()?.partial_cmp(&right.as_f64()?)
}

#[derive(Clone)]
enum Kind {
    Always,
    Custom(Predicate),
    Path {
        pointer: String,
        comparison: Comparison,
        operand: Value,
    },
}

/// A predicate deciding whether an outcome is retried.
///
/// Result conditions see the returned value. Fault conditions see the fault's
/// [`properties`][crate::Fault::properties]: `name`, `class`, `message` and `detail`.
///
/// Paths are JSON pointers; the empty pointer `""` addresses the whole value.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tollgate::retry::Condition;
///
/// let negative = Condition::value().lt(json!(0));
/// assert!(negative.matches(&json!(-1)));
/// assert!(!negative.matches(&json!(5)));
///
/// let unavailable = Condition::at("/detail/status").eq(json!(503));
/// assert!(unavailable.matches(&json!({ "detail": { "status": 503 } })));
///
/// let empty = Condition::custom(|value| value.as_array().is_some_and(Vec::is_empty));
/// assert!(empty.matches(&json!([])));
/// ```
#[derive(Clone)]
pub struct Condition {
    kind: Kind,
}

impl Condition {
    /// Matches every outcome.
    #[must_use]
    pub fn always() -> Self {
        Self { kind: Kind::Always }
    }

    /// Matches when `predicate` returns `true`.
    #[must_use]
    pub fn custom(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            kind: Kind::Custom(Predicate::new(predicate)),
        }
    }

    /// Starts a condition on the value at `pointer`.
    #[must_use]
    pub fn at(pointer: impl Into<String>) -> PathCondition {
        PathCondition { pointer: pointer.into() }
    }

    /// Starts a condition on the whole value.
    #[must_use]
    pub fn value() -> PathCondition {
        Self::at("")
    }

    /// Builds a path condition from its parts.
    #[must_use]
    pub fn compare(pointer: impl Into<String>, comparison: Comparison, operand: Value) -> Self {
        Self {
            kind: Kind::Path {
                pointer: pointer.into(),
                comparison,
                operand,
            },
        }
    }

    /// Evaluates the condition against `value`.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match &self.kind {
            Kind::Always => true,
            Kind::Custom(predicate) => predicate.call(value),
            Kind::Path {
                pointer,
                comparison,
                operand,
            } => comparison.test(value.pointer(pointer), operand),
        }
    }
}

impl Debug for Condition {
    #[cfg_attr(test, mutants::skip)] // Diagnostic output only.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Always => f.write_str("Condition::Always"),
            Kind::Custom(predicate) => f.debug_tuple("Condition::Custom").field(predicate).finish(),
            Kind::Path {
                pointer,
                comparison,
                operand,
            } => f
                .debug_struct("Condition::Path")
                .field("pointer", pointer)
                .field("comparison", comparison)
                .field("operand", operand)
                .finish(),
        }
    }
}

/// A condition under construction, created by [`Condition::at`].
#[derive(Debug, Clone)]
pub struct PathCondition {
    pointer: String,
}

impl PathCondition {
    fn finish(self, comparison: Comparison, operand: Value) -> Condition {
        Condition::compare(self.pointer, comparison, operand)
    }

    /// Matches when the addressed value equals `operand`. Numbers compare by value.
    #[must_use]
    pub fn eq(self, operand: Value) -> Condition {
        self.finish(Comparison::Eq, operand)
    }

    /// Matches when the addressed value is missing or differs from `operand`.
    #[must_use]
    pub fn ne(self, operand: Value) -> Condition {
        self.finish(Comparison::Ne, operand)
    }

    /// Matches when the addressed value is less than `operand`.
    #[must_use]
    pub fn lt(self, operand: Value) -> Condition {
        self.finish(Comparison::Lt, operand)
    }

    /// Matches when the addressed value is less than or equal to `operand`.
    #[must_use]
    pub fn le(self, operand: Value) -> Condition {
        self.finish(Comparison::Le, operand)
    }

    /// Matches when the addressed value is greater than `operand`.
    #[must_use]
    pub fn gt(self, operand: Value) -> Condition {
        self.finish(Comparison::Gt, operand)
    }

    /// Matches when the addressed value is greater than or equal to `operand`.
    #[must_use]
    pub fn ge(self, operand: Value) -> Condition {
        self.finish(Comparison::Ge, operand)
    }

    /// Matches when the addressed value is present and not null.
    #[must_use]
    pub fn exists(self) -> Condition {
        self.finish(Comparison::Exists, Value::Null)
    }
}
