//! Rule expressions and the evaluator capability used by the rule matcher.
use std::future::Future;

use derive_more::From;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{EvaluationError, Parameters, Placement, TriggerRule};

/// Evaluates a rule's predicate against a placement.
///
/// Evaluation may suspend (e.g., to consult device state) and may fail. A failure is never fatal:
/// the rule matcher logs it and moves on to the next rule.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        rule: &TriggerRule,
        placement: &Placement,
    ) -> impl Future<Output = Result<bool, EvaluationError>> + Send;
}

/// Parameter under which the placement name is visible to conditions.
pub const EVENT_NAME_ATTRIBUTE: &str = "$event_name";

/// The built-in evaluator. It understands structured [`Condition`]s only.
///
/// All conditions of a rule must hold; a rule without conditions matches everything. Rules that
/// carry a free-form `expression` are rejected with [`EvaluationError::UnsupportedExpression`] so a
/// grammar-aware evaluator can be plugged in instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    fn eval(rule: &TriggerRule, placement: &Placement) -> Result<bool, EvaluationError> {
        if let Some(expression) = &rule.expression {
            return Err(EvaluationError::UnsupportedExpression(expression.clone()));
        }

        // Augmenting parameters with the event name, so that it can be used in conditions.
        let augmented_parameters = {
            let mut p = placement.parameters().clone();
            p.entry(EVENT_NAME_ATTRIBUTE)
                .or_insert_with(|| JsonValue::String(placement.name().to_owned()));
            p
        };

        Ok(rule
            .conditions
            .iter()
            .all(|condition| condition.eval(&augmented_parameters)))
    }
}

impl ExpressionEvaluator for ConditionEvaluator {
    fn evaluate(
        &self,
        rule: &TriggerRule,
        placement: &Placement,
    ) -> impl Future<Output = Result<bool, EvaluationError>> + Send {
        std::future::ready(ConditionEvaluator::eval(rule, placement))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub operator: Operator,
    pub attribute: String,
    pub value: ConditionValue,
}

impl Condition {
    pub fn eval(&self, parameters: &Parameters) -> bool {
        self.operator
            .eval(parameters.get(&self.attribute), &self.value)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ConditionValue {
    Multiple(Vec<Literal>),
    Single(Literal),
}

impl<T: Into<Literal>> From<T> for ConditionValue {
    fn from(value: T) -> Self {
        Self::Single(value.into())
    }
}
impl<T: Into<Literal>> From<Vec<T>> for ConditionValue {
    fn from(value: Vec<T>) -> Self {
        Self::Multiple(value.into_iter().map(Into::into).collect())
    }
}

/// Scalar operand of a condition.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, From)]
#[serde(untagged)]
pub enum Literal {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Matches,
    NotMatches,
    Gte,
    Gt,
    Lte,
    Lt,
    OneOf,
    NotOneOf,
    IsNull,
}

impl Operator {
    /// Apply the operator to a parameter. Returns `false` if the operator cannot be applied or
    /// there's a misconfiguration.
    pub fn eval(&self, attribute: Option<&JsonValue>, condition_value: &ConditionValue) -> bool {
        self.try_eval(attribute, condition_value).unwrap_or(false)
    }

    fn try_eval(
        &self,
        attribute: Option<&JsonValue>,
        condition_value: &ConditionValue,
    ) -> Option<bool> {
        match self {
            Self::Matches | Self::NotMatches => {
                let s = attribute?.as_str()?;
                let regex = match condition_value {
                    ConditionValue::Single(Literal::String(s)) => Regex::new(s).ok()?,
                    _ => return None,
                };
                let matches = regex.is_match(s);
                Some(if *self == Self::Matches {
                    matches
                } else {
                    !matches
                })
            }

            Self::OneOf | Self::NotOneOf => {
                let s = match attribute? {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Number(n) => match n.as_i64() {
                        Some(i) => i.to_string(),
                        None => n.as_f64()?.to_string(),
                    },
                    JsonValue::Bool(b) => b.to_string(),
                    _ => return None,
                };
                let ConditionValue::Multiple(values) = condition_value else {
                    return None;
                };
                let is_one_of = values
                    .iter()
                    .any(|v| matches!(v, Literal::String(v) if *v == s));
                Some(if *self == Self::OneOf {
                    is_one_of
                } else {
                    !is_one_of
                })
            }

            Self::IsNull => {
                let is_null = matches!(attribute, None | Some(JsonValue::Null));
                match condition_value {
                    ConditionValue::Single(Literal::Boolean(true)) => Some(is_null),
                    ConditionValue::Single(Literal::Boolean(false)) => Some(!is_null),
                    _ => None,
                }
            }

            Self::Gte | Self::Gt | Self::Lte | Self::Lt => {
                let condition_version = match condition_value {
                    ConditionValue::Single(Literal::String(s)) => Version::parse(s).ok(),
                    _ => None,
                };

                if let Some(condition_version) = condition_version {
                    let attribute_version = Version::parse(attribute?.as_str()?).ok()?;
                    Some(self.compare(&attribute_version, &condition_version))
                } else {
                    let condition_value = match condition_value {
                        ConditionValue::Single(Literal::Number(n)) => *n,
                        ConditionValue::Single(Literal::String(s)) => s.parse().ok()?,
                        _ => return None,
                    };
                    let attribute_value = match attribute? {
                        JsonValue::Number(n) => n.as_f64()?,
                        JsonValue::String(s) => s.parse().ok()?,
                        _ => return None,
                    };
                    Some(self.compare(&attribute_value, &condition_value))
                }
            }
        }
    }

    fn compare<T: PartialOrd>(&self, attribute: &T, condition: &T) -> bool {
        match self {
            Self::Gt => attribute > condition,
            Self::Gte => attribute >= condition,
            Self::Lt => attribute < condition,
            Self::Lte => attribute <= condition,
            _ => false,
        }
    }
}
