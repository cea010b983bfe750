//! Rich-query descriptors evaluated against JSON state values.
//!
//! A descriptor is a JSON object with a required `selector` and an optional
//! `limit`:
//!
//! ```json
//! {"selector": {"owner": "DigiBank", "faceValue": {"$gte": 1000000}}, "limit": 10}
//! ```
//!
//! Selector keys are field names (dotted paths address nested fields) or the
//! combinators `$and`, `$or` and `$not`. A field's condition is either a
//! literal, meaning equality, or an object of operators: `$eq`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin` and `$exists`. Sibling keys
//! are combined with AND.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A parsed rich-query descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct RichQuery {
    selector: Selector,
    limit: Option<usize>,
}

impl RichQuery {
    /// Parses a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] if the descriptor is not valid JSON, has no
    /// `selector` object, uses an unknown operator, or has a `limit` that is
    /// not a non-negative integer.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(descriptor)
            .map_err(|e| Error::Query(format!("invalid query descriptor: {}", e)))?;
        let Value::Object(mut root) = value else {
            return Err(Error::Query("query descriptor must be an object".to_string()));
        };

        let selector = match root.remove("selector") {
            Some(Value::Object(fields)) => Selector::parse_object(&fields, &[])?,
            Some(_) => return Err(Error::Query("selector must be an object".to_string())),
            None => return Err(Error::Query("query descriptor has no selector".to_string())),
        };

        let limit = match root.remove("limit") {
            None => None,
            Some(limit) => Some(
                limit
                    .as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| {
                        Error::Query(format!("limit must be a non-negative integer: {}", limit))
                    })?,
            ),
        };

        if let Some(key) = root.keys().next() {
            tracing::debug!(key = %key, "ignoring unsupported query descriptor key");
        }

        Ok(Self { selector, limit })
    }

    /// Returns true if `document` satisfies the selector.
    pub fn matches(&self, document: &Value) -> bool {
        self.selector.matches(document)
    }

    /// Maximum number of results, if the descriptor sets one.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Selector {
    And(Vec<Selector>),
    Or(Vec<Selector>),
    Not(Box<Selector>),
    Field {
        path: Vec<String>,
        condition: Condition,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

impl Selector {
    /// Parses an object whose keys are fields or combinators, nested under
    /// `parent`.
    fn parse_object(fields: &Map<String, Value>, parent: &[String]) -> Result<Self> {
        let mut terms = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            match key.as_str() {
                "$and" => terms.push(Selector::And(Self::parse_list(key, value, parent)?)),
                "$or" => terms.push(Selector::Or(Self::parse_list(key, value, parent)?)),
                "$not" => {
                    let Value::Object(inner) = value else {
                        return Err(Error::Query("$not takes a selector object".to_string()));
                    };
                    terms.push(Selector::Not(Box::new(Self::parse_object(inner, parent)?)));
                }
                op if op.starts_with('$') => {
                    return Err(Error::Query(format!("unknown selector operator: {}", op)));
                }
                field => {
                    let mut path = parent.to_vec();
                    path.extend(field.split('.').map(str::to_string));
                    terms.push(Self::parse_field(path, value)?);
                }
            }
        }

        if terms.len() == 1 {
            Ok(terms.remove(0))
        } else {
            Ok(Selector::And(terms))
        }
    }

    fn parse_list(op: &str, value: &Value, parent: &[String]) -> Result<Vec<Selector>> {
        let Value::Array(items) = value else {
            return Err(Error::Query(format!("{} takes an array of selectors", op)));
        };
        items
            .iter()
            .map(|item| match item {
                Value::Object(fields) => Self::parse_object(fields, parent),
                _ => Err(Error::Query(format!("{} takes an array of selectors", op))),
            })
            .collect()
    }

    fn parse_field(path: Vec<String>, value: &Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Ok(Selector::Field {
                path,
                condition: Condition::Eq(value.clone()),
            });
        };

        let operators = fields.keys().filter(|k| k.starts_with('$')).count();
        if operators == 0 {
            // No operators: a nested selector, or equality with `{}`.
            if fields.is_empty() {
                return Ok(Selector::Field {
                    path,
                    condition: Condition::Eq(value.clone()),
                });
            }
            return Self::parse_object(fields, &path);
        }
        if operators != fields.len() {
            return Err(Error::Query(format!(
                "cannot mix operators and fields under {}",
                path.join(".")
            )));
        }

        let mut terms = Vec::with_capacity(fields.len());
        for (op, operand) in fields {
            if op == "$not" {
                let inner = Self::parse_field(path.clone(), operand)?;
                terms.push(Selector::Not(Box::new(inner)));
                continue;
            }
            terms.push(Selector::Field {
                path: path.clone(),
                condition: Condition::parse(op, operand)?,
            });
        }
        if terms.len() == 1 {
            Ok(terms.remove(0))
        } else {
            Ok(Selector::And(terms))
        }
    }

    fn matches(&self, document: &Value) -> bool {
        match self {
            Selector::And(terms) => terms.iter().all(|t| t.matches(document)),
            Selector::Or(terms) => terms.iter().any(|t| t.matches(document)),
            Selector::Not(inner) => !inner.matches(document),
            Selector::Field { path, condition } => condition.matches(lookup(document, path)),
        }
    }
}

impl Condition {
    fn parse(op: &str, operand: &Value) -> Result<Self> {
        let condition = match op {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" | "$nin" => {
                let Value::Array(values) = operand else {
                    return Err(Error::Query(format!("{} takes an array", op)));
                };
                if op == "$in" {
                    Condition::In(values.clone())
                } else {
                    Condition::Nin(values.clone())
                }
            }
            "$exists" => {
                let Value::Bool(exists) = operand else {
                    return Err(Error::Query("$exists takes a boolean".to_string()));
                };
                Condition::Exists(*exists)
            }
            other => return Err(Error::Query(format!("unknown field operator: {}", other))),
        };
        Ok(condition)
    }

    /// Evaluates against the field's value, `None` when the field is absent.
    ///
    /// Every operator except `$exists` is false on an absent field.
    fn matches(&self, field: Option<&Value>) -> bool {
        let Some(actual) = field else {
            return matches!(self, Condition::Exists(false));
        };
        match self {
            Condition::Exists(expected) => *expected,
            Condition::Eq(expected) => equals(actual, expected),
            Condition::Ne(expected) => !equals(actual, expected),
            Condition::Gt(bound) => compare(actual, bound) == Some(Ordering::Greater),
            Condition::Gte(bound) => matches!(
                compare(actual, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Condition::Lt(bound) => compare(actual, bound) == Some(Ordering::Less),
            Condition::Lte(bound) => {
                matches!(compare(actual, bound), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::In(values) => values.iter().any(|v| equals(actual, v)),
            Condition::Nin(values) => !values.iter().any(|v| equals(actual, v)),
        }
    }
}

fn lookup<'a>(document: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(document, |current, segment| current.as_object()?.get(segment))
}

fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Orders two numbers numerically or two strings lexicographically.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
