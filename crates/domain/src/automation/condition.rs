//! Condition — a predicate over an entity's fields and tags.
//!
//! A list of conditions is folded left to right: each condition's `logic`
//! joins it to the *next* one, and there is no operator precedence. Terms
//! whose result cannot change the fold are not evaluated.

use serde::{Deserialize, Serialize};

use crate::entity::{CrmEntity, FieldValue, resolve};

/// Comparison applied by a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    IsEmpty,
    IsNotEmpty,
    GreaterThan,
    LessThan,
    HasTag,
    NotHasTag,
}

impl Operator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::HasTag => "has_tag",
            Self::NotHasTag => "not_has_tag",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a condition combines with the one after it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[default]
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

/// A single predicate on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: FieldValue,
    #[serde(default)]
    pub logic: Logic,
}

/// Result of one evaluated condition, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionOutcome {
    pub field: String,
    pub operator: Operator,
    pub passed: bool,
}

impl Condition {
    #[must_use]
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            logic: Logic::And,
        }
    }

    /// Join this condition to the next one with OR instead of AND.
    #[must_use]
    pub fn or(mut self) -> Self {
        self.logic = Logic::Or;
        self
    }

    /// Evaluate this single condition against `entity`.
    #[must_use]
    pub fn is_satisfied_by(&self, entity: &CrmEntity) -> bool {
        let tag = || self.value.to_string();
        match (self.operator, resolve(entity, &self.field)) {
            (Operator::HasTag, _) => entity.has_tag(&tag()),
            (Operator::NotHasTag, _) => !entity.has_tag(&tag()),
            (Operator::IsEmpty, None) => true,
            (_, None) => false,
            (Operator::Equals, Some(actual)) => actual.loosely_equals(&self.value),
            (Operator::NotEquals, Some(actual)) => !actual.loosely_equals(&self.value),
            (Operator::Contains, Some(actual)) => actual.contains(&self.value).unwrap_or(false),
            (Operator::NotContains, Some(actual)) => {
                actual.contains(&self.value).is_some_and(|found| !found)
            }
            (Operator::IsEmpty, Some(actual)) => actual.is_empty(),
            (Operator::IsNotEmpty, Some(actual)) => !actual.is_empty(),
            (Operator::GreaterThan, Some(actual)) => compare(&actual, &self.value, |a, b| a > b),
            (Operator::LessThan, Some(actual)) => compare(&actual, &self.value, |a, b| a < b),
        }
    }
}

fn compare(actual: &FieldValue, expected: &FieldValue, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_number(), expected.as_number()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Evaluate a condition list. An empty list is satisfied.
#[must_use]
pub fn evaluate(conditions: &[Condition], entity: &CrmEntity) -> bool {
    fold(conditions, entity, |_, _| {})
}

/// Evaluate a condition list and report the outcome of every condition that
/// was actually evaluated.
#[must_use]
pub fn evaluate_traced(conditions: &[Condition], entity: &CrmEntity) -> (bool, Vec<ConditionOutcome>) {
    let mut outcomes = Vec::with_capacity(conditions.len());
    let passed = fold(conditions, entity, |condition, passed| {
        outcomes.push(ConditionOutcome {
            field: condition.field.clone(),
            operator: condition.operator,
            passed,
        });
    });
    (passed, outcomes)
}

fn fold(
    conditions: &[Condition],
    entity: &CrmEntity,
    mut observe: impl FnMut(&Condition, bool),
) -> bool {
    let Some((first, rest)) = conditions.split_first() else {
        return true;
    };

    let mut result = first.is_satisfied_by(entity);
    observe(first, result);
    let mut joiner = first.logic;

    for condition in rest {
        let decided = match joiner {
            Logic::And => !result,
            Logic::Or => result,
        };
        if !decided {
            result = condition.is_satisfied_by(entity);
            observe(condition, result);
        }
        joiner = condition.logic;
    }
    result
}
