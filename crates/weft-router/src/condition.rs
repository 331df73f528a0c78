//! Condition expressions.
//!
//! A routing rule's optional `condition` is a small boolean expression over
//! the event payload and context. Conditions compile once at rule creation
//! into a typed [`Condition`] tree — a closed set of comparison and
//! combinator nodes, never interpreted code.
//!
//! JSON shapes accepted by [`Condition::parse`]:
//!
//! ```json
//! {"field": "amount", "op": "gt", "value": 100}
//! {"field": "region", "op": "exists"}
//! {"all": [ ... ]}
//! {"any": [ ... ]}
//! {"not": { ... }}
//! ```

use serde_json::Value;

use weft_core::EventContext;

use crate::errors::ConditionError;
use crate::template::resolve_path;

/// Comparison operators in the closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    /// Values are equal.
    Eq,
    /// Values are not equal.
    Ne,
    /// Numeric greater-than.
    Gt,
    /// Numeric greater-or-equal.
    Gte,
    /// Numeric less-than.
    Lt,
    /// Numeric less-or-equal.
    Lte,
    /// String contains substring, array contains value, or object has key.
    Contains,
}

impl CompareOp {
    fn parse(op: &str) -> Result<Self, ConditionError> {
        match op {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "contains" => Ok(Self::Contains),
            other => Err(ConditionError::UnknownOp(other.to_string())),
        }
    }
}

/// A compiled boolean expression over payload and context.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// True when every child is true (true for an empty list).
    All(Vec<Condition>),
    /// True when at least one child is true.
    Any(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// Field comparison.
    Compare {
        /// Dotted path, `$ctx.`-prefixed for context fields.
        field: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand value.
        value: Value,
    },
    /// True when the field resolves to anything (including `null`).
    Exists {
        /// Dotted path, `$ctx.`-prefixed for context fields.
        field: String,
    },
}

impl Condition {
    /// Compile a condition from its JSON description.
    pub fn parse(value: &Value) -> Result<Self, ConditionError> {
        let Some(map) = value.as_object() else {
            return Err(ConditionError::InvalidShape(value.to_string()));
        };

        if let Some(children) = map.get("all") {
            return Self::parse_children(children).map(Condition::All);
        }
        if let Some(children) = map.get("any") {
            return Self::parse_children(children).map(Condition::Any);
        }
        if let Some(child) = map.get("not") {
            return Ok(Condition::Not(Box::new(Self::parse(child)?)));
        }

        let Some(field) = map.get("field").and_then(Value::as_str) else {
            return Err(ConditionError::InvalidShape(value.to_string()));
        };
        let Some(op) = map.get("op").and_then(Value::as_str) else {
            return Err(ConditionError::InvalidShape(value.to_string()));
        };

        if op == "exists" {
            return Ok(Condition::Exists {
                field: field.to_string(),
            });
        }

        let op = CompareOp::parse(op)?;
        let Some(rhs) = map.get("value") else {
            return Err(ConditionError::InvalidShape(value.to_string()));
        };
        Ok(Condition::Compare {
            field: field.to_string(),
            op,
            value: rhs.clone(),
        })
    }

    fn parse_children(children: &Value) -> Result<Vec<Condition>, ConditionError> {
        let Some(items) = children.as_array() else {
            return Err(ConditionError::InvalidShape(children.to_string()));
        };
        items.iter().map(Self::parse).collect()
    }

    /// Evaluate against a payload and context.
    #[must_use]
    pub fn evaluate(&self, payload: &Value, ctx: &EventContext) -> bool {
        let ctx_value = serde_json::to_value(ctx).unwrap_or(Value::Null);
        self.eval_inner(payload, &ctx_value)
    }

    fn eval_inner(&self, payload: &Value, ctx_value: &Value) -> bool {
        match self {
            Self::All(children) => children.iter().all(|c| c.eval_inner(payload, ctx_value)),
            Self::Any(children) => children.iter().any(|c| c.eval_inner(payload, ctx_value)),
            Self::Not(child) => !child.eval_inner(payload, ctx_value),
            Self::Exists { field } => resolve_path(payload, ctx_value, field).is_some(),
            Self::Compare { field, op, value } => {
                let Some(lhs) = resolve_path(payload, ctx_value, field) else {
                    // A missing field satisfies nothing except inequality.
                    return *op == CompareOp::Ne;
                };
                compare(lhs, *op, value)
            }
        }
    }
}

fn compare(lhs: &Value, op: CompareOp, rhs: &Value) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            let (Some(l), Some(r)) = (lhs.as_f64(), rhs.as_f64()) else {
                return false;
            };
            match op {
                CompareOp::Gt => l > r,
                CompareOp::Gte => l >= r,
                CompareOp::Lt => l < r,
                CompareOp::Lte => l <= r,
                _ => unreachable!(),
            }
        }
        CompareOp::Contains => match (lhs, rhs) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
            (Value::Array(items), needle) => items.contains(needle),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
