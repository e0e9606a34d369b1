//! Compound filter engine.
//!
//! A [`Query`] maps field names to [`FieldCondition`]s. Each condition is a
//! literal (the field equals it, or the field is an array containing it) or a
//! descriptor listing several candidates combined with AND or OR. Per-field
//! results are combined with AND, or with OR when the whole-query `match_any`
//! flag is set.
//!
//! Evaluation is pure: it never touches the store or any status tag, and the
//! output keeps the input order.

use crate::{error::Result, record::value_kind, Document, Error, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Condition on a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldCondition {
    /// `{"data": [...], "matchAny": bool}`
    Descriptor {
        data: Vec<Value>,
        #[serde(default, rename = "matchAny")]
        match_any: bool,
    },
    /// Any other value
    Literal(Value),
}

impl FieldCondition {
    fn matches(&self, field: Option<&Value>) -> bool {
        // Absent fields never match, whatever the condition.
        let Some(field) = field else {
            return false;
        };
        match self {
            FieldCondition::Literal(expected) => value_matches(field, expected),
            FieldCondition::Descriptor { data, match_any } => {
                if *match_any {
                    data.iter().any(|candidate| value_matches(field, candidate))
                } else {
                    data.iter().all(|candidate| value_matches(field, candidate))
                }
            }
        }
    }
}

impl From<Value> for FieldCondition {
    fn from(value: Value) -> Self {
        FieldCondition::Literal(value)
    }
}

/// A filter query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query {
    conditions: BTreeMap<String, FieldCondition>,
}

impl Query {
    /// Create an empty query, which matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON form `{"field": value | {"data": [...], "matchAny": bool}}`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_document(map)),
            other => Err(Error::InvalidQuery(format!(
                "expected an object, got {}",
                value_kind(&other)
            ))),
        }
    }

    /// Build a query from a document, reading descriptor objects the same way
    /// deserialization does.
    pub fn from_document(document: Document) -> Self {
        let conditions = document
            .into_iter()
            .map(|(field, value)| {
                let condition = serde_json::from_value(value.clone())
                    .unwrap_or(FieldCondition::Literal(value));
                (field, condition)
            })
            .collect();
        Self { conditions }
    }

    /// Require `field` to equal (or, for array fields, contain) `value`.
    pub fn field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .insert(field.into(), FieldCondition::Literal(value.into()));
        self
    }

    /// Require `field` to match at least one of `values`.
    pub fn any_of<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.insert(
            field.into(),
            FieldCondition::Descriptor {
                data: values.into_iter().map(Into::into).collect(),
                match_any: true,
            },
        );
        self
    }

    /// Require `field` to match every one of `values`.
    pub fn all_of<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.insert(
            field.into(),
            FieldCondition::Descriptor {
                data: values.into_iter().map(Into::into).collect(),
                match_any: false,
            },
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&str, &FieldCondition)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Evaluate the query against one record.
    ///
    /// An empty query matches every record regardless of `match_any`.
    pub fn matches(&self, record: &Record, match_any: bool) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let mut results = self
            .conditions
            .iter()
            .map(|(field, condition)| condition.matches(record.lookup(field)));
        if match_any {
            results.any(|matched| matched)
        } else {
            results.all(|matched| matched)
        }
    }
}

impl TryFrom<Value> for Query {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Query::from_value(value)
    }
}

/// Select the records matching `query`, in input order.
pub fn filter<'a, I>(records: I, query: &Query, match_any: bool) -> Vec<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    records
        .into_iter()
        .filter(|record| query.matches(record, match_any))
        .collect()
}

/// A field matches a candidate when it equals it, or when the field is an
/// array with an element equal to it.
fn value_matches(field: &Value, candidate: &Value) -> bool {
    if values_equal(field, candidate) {
        return true;
    }
    match field {
        Value::Array(items) => items.iter().any(|item| values_equal(item, candidate)),
        _ => false,
    }
}

/// Equality that treats `1` and `1.0` as the same number.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}
