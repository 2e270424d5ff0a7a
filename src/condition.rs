//! Boolean row conditions.
//!
//! A [`Condition`] is an immutable tree of AND / OR / NOT nodes over field
//! comparisons. Field names are resolved against a schema once with
//! [`Condition::bind`]; the resulting [`BoundCondition`] evaluates rows by
//! position.

use regex::Regex;

use crate::error::{PipelineError, Result};
use crate::row::{Row, RowSchema};
use crate::value::Value;

/// Comparison applied by a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    IsNull,
    IsNotNull,
    Contains,
    StartsWith,
    EndsWith,
    /// Right operand is a list; true when the value equals any element.
    InList,
    /// Right operand is a regular expression matched against the text form.
    Matches,
}

/// Right-hand side of a leaf comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Field(String),
    Constant(Value),
    List(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Always true; the empty condition.
    True,
    Compare {
        field: String,
        op: Comparison,
        right: Operand,
    },
    Not(Box<Condition>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn compare(field: impl Into<String>, op: Comparison, right: Operand) -> Self {
        Condition::Compare {
            field: field.into(),
            op,
            right,
        }
    }

    /// `field <op> constant`
    pub fn constant(field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self::compare(field, op, Operand::Constant(value.into()))
    }

    /// `left <op> right`, both fields of the row.
    pub fn fields(left: impl Into<String>, op: Comparison, right: impl Into<String>) -> Self {
        Self::compare(left, op, Operand::Field(right.into()))
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::compare(field, Comparison::IsNull, Operand::None)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::compare(field, Comparison::IsNotNull, Operand::None)
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::compare(field, Comparison::InList, Operand::List(values))
    }

    pub fn matches(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(
            field,
            Comparison::Matches,
            Operand::Constant(Value::String(pattern.into())),
        )
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut parts) => {
                parts.push(other);
                Condition::And(parts)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut parts) => {
                parts.push(other);
                Condition::Or(parts)
            }
            first => Condition::Or(vec![first, other]),
        }
    }

    /// Every field name the condition reads, in tree order.
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::True => {}
            Condition::Compare { field, right, .. } => {
                out.push(field.as_str());
                if let Operand::Field(other) = right {
                    out.push(other.as_str());
                }
            }
            Condition::Not(inner) => inner.collect_fields(out),
            Condition::And(parts) | Condition::Or(parts) => {
                for part in parts {
                    part.collect_fields(out);
                }
            }
        }
    }

    /// Resolve field names to positions in `schema` and compile patterns.
    pub fn bind(&self, schema: &RowSchema) -> Result<BoundCondition> {
        let position = |name: &str| {
            schema.index_of(name).ok_or_else(|| {
                PipelineError::Schema(format!("condition field '{name}' not found in {schema}"))
            })
        };
        Ok(match self {
            Condition::True => BoundCondition::True,
            Condition::Compare { field, op, right } => {
                let left = position(field)?;
                let right = match (op, right) {
                    (Comparison::Matches, Operand::Constant(pattern)) => {
                        let text = pattern.as_text().unwrap_or_default();
                        let regex = Regex::new(&text).map_err(|e| {
                            PipelineError::Schema(format!("invalid pattern '{text}': {e}"))
                        })?;
                        BoundOperand::Pattern(regex)
                    }
                    (Comparison::Matches, _) => {
                        return Err(PipelineError::Schema(
                            "a pattern comparison needs a constant pattern".to_string(),
                        ));
                    }
                    (_, Operand::None) => BoundOperand::None,
                    (_, Operand::Field(name)) => BoundOperand::Field(position(name)?),
                    (_, Operand::Constant(value)) => BoundOperand::Constant(value.clone()),
                    (_, Operand::List(values)) => BoundOperand::List(values.clone()),
                };
                BoundCondition::Compare {
                    left,
                    op: *op,
                    right,
                }
            }
            Condition::Not(inner) => BoundCondition::Not(Box::new(inner.bind(schema)?)),
            Condition::And(parts) => BoundCondition::And(
                parts
                    .iter()
                    .map(|p| p.bind(schema))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Condition::Or(parts) => BoundCondition::Or(
                parts
                    .iter()
                    .map(|p| p.bind(schema))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }
}

#[derive(Debug, Clone)]
pub enum BoundOperand {
    None,
    Field(usize),
    Constant(Value),
    List(Vec<Value>),
    Pattern(Regex),
}

/// A condition with field positions resolved.
#[derive(Debug, Clone)]
pub enum BoundCondition {
    True,
    Compare {
        left: usize,
        op: Comparison,
        right: BoundOperand,
    },
    Not(Box<BoundCondition>),
    And(Vec<BoundCondition>),
    Or(Vec<BoundCondition>),
}

impl BoundCondition {
    pub fn evaluate(&self, row: &Row) -> bool {
        match self {
            BoundCondition::True => true,
            BoundCondition::Not(inner) => !inner.evaluate(row),
            BoundCondition::And(parts) => parts.iter().all(|p| p.evaluate(row)),
            BoundCondition::Or(parts) => parts.iter().any(|p| p.evaluate(row)),
            BoundCondition::Compare { left, op, right } => {
                let value = row.get(*left).unwrap_or(&Value::Null);
                compare(value, *op, right, row)
            }
        }
    }
}

fn compare(value: &Value, op: Comparison, right: &BoundOperand, row: &Row) -> bool {
    let other = match right {
        BoundOperand::Field(i) => row.get(*i).unwrap_or(&Value::Null),
        BoundOperand::Constant(v) => v,
        _ => &Value::Null,
    };
    match op {
        Comparison::IsNull => value.is_null(),
        Comparison::IsNotNull => !value.is_null(),
        Comparison::Equal => value.compare(other).is_eq(),
        Comparison::NotEqual => value.compare(other).is_ne(),
        // Null never satisfies an ordering comparison.
        Comparison::Less => !value.is_null() && !other.is_null() && value.compare(other).is_lt(),
        Comparison::LessOrEqual => {
            !value.is_null() && !other.is_null() && value.compare(other).is_le()
        }
        Comparison::Greater => {
            !value.is_null() && !other.is_null() && value.compare(other).is_gt()
        }
        Comparison::GreaterOrEqual => {
            !value.is_null() && !other.is_null() && value.compare(other).is_ge()
        }
        Comparison::Contains | Comparison::StartsWith | Comparison::EndsWith => {
            match (value.as_text(), other.as_text()) {
                (Some(text), Some(needle)) => match op {
                    Comparison::Contains => text.contains(&needle),
                    Comparison::StartsWith => text.starts_with(&needle),
                    _ => text.ends_with(&needle),
                },
                _ => false,
            }
        }
        Comparison::InList => match right {
            BoundOperand::List(values) => values.iter().any(|v| value.compare(v).is_eq()),
            _ => false,
        },
        Comparison::Matches => match (right, value.as_text()) {
            (BoundOperand::Pattern(regex), Some(text)) => regex.is_match(&text),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DataType;
    use std::sync::Arc;

    fn row(k: i64, name: &str, other: i64) -> Row {
        let schema = Arc::new(
            RowSchema::of(&[
                ("k", DataType::Integer),
                ("name", DataType::String),
                ("other", DataType::Integer),
            ])
            .unwrap(),
        );
        Row::new(
            schema,
            vec![Value::Integer(k), Value::from(name), Value::Integer(other)],
        )
        .unwrap()
    }

    fn eval(condition: &Condition, row: &Row) -> bool {
        condition.bind(row.schema()).unwrap().evaluate(row)
    }

    #[test]
    fn test_constant_comparisons() {
        let r = row(5, "alpha", 7);
        assert!(eval(&Condition::constant("k", Comparison::Equal, 5i64), &r));
        assert!(eval(&Condition::constant("k", Comparison::Less, 6.5), &r));
        assert!(!eval(&Condition::constant("k", Comparison::Greater, 5i64), &r));
        assert!(eval(&Condition::constant("name", Comparison::StartsWith, "al"), &r));
    }

    #[test]
    fn test_field_to_field() {
        let r = row(5, "alpha", 7);
        assert!(eval(&Condition::fields("k", Comparison::Less, "other"), &r));
        assert!(!eval(&Condition::fields("k", Comparison::Equal, "other"), &r));
    }

    #[test]
    fn test_and_or_not() {
        let r = row(5, "alpha", 7);
        let c = Condition::constant("k", Comparison::Equal, 5i64)
            .and(Condition::constant("name", Comparison::Equal, "beta"));
        assert!(!eval(&c, &r));
        let c = c.or(Condition::True);
        assert!(eval(&c, &r));
        assert!(!eval(&c.negate(), &r));
    }

    #[test]
    fn test_in_list_and_pattern() {
        let r = row(2, "alpha", 0);
        assert!(eval(
            &Condition::in_list("k", vec![Value::Integer(1), Value::Integer(2)]),
            &r
        ));
        assert!(eval(&Condition::matches("name", "^a.+a$"), &r));
        assert!(!eval(&Condition::matches("name", "^b"), &r));
    }

    #[test]
    fn test_null_handling() {
        let schema = Arc::new(RowSchema::of(&[("x", DataType::Integer)]).unwrap());
        let r = Row::new(schema, vec![Value::Null]).unwrap();
        assert!(eval(&Condition::is_null("x"), &r));
        assert!(!eval(&Condition::constant("x", Comparison::Less, 1i64), &r));
    }

    #[test]
    fn test_bind_unknown_field_fails() {
        let r = row(1, "a", 1);
        assert!(Condition::is_null("nope").bind(r.schema()).is_err());
        assert!(Condition::matches("name", "(").bind(r.schema()).is_err());
    }

    #[test]
    fn test_referenced_fields() {
        let c = Condition::fields("a", Comparison::Equal, "b").and(Condition::is_null("c").negate());
        assert_eq!(c.referenced_fields(), vec!["a", "b", "c"]);
    }
}
