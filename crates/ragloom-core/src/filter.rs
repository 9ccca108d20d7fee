//! Structured metadata filters.
//!
//! [`FilterBuilder`] assembles a predicate tree from leaf conditions
//! (`equals`, `range`, `one_of`) and `and`/`or` combinators, then
//! validates it once in [`FilterBuilder::build`]. The resulting
//! [`FilterPredicate`] is immutable; stores either evaluate it directly
//! against a chunk's flattened metadata ([`FilterPredicate::matches`]) or
//! translate it into their own query language.
//!
//! ```rust
//! use ragloom_core::filter::FilterBuilder;
//!
//! let filter = FilterBuilder::and(vec![
//!     FilterBuilder::equals("source_document", "thesis.tex"),
//!     FilterBuilder::one_of("type", vec!["equation", "citation"]),
//! ])
//! .unwrap()
//! .build()
//! .unwrap();
//! assert_eq!(filter.fields(), vec!["source_document", "type"]);
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A filter operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<FilterValue>),
}

impl FilterValue {
    pub fn is_scalar(&self) -> bool {
        !matches!(self, FilterValue::List(_))
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            FilterValue::Integer(i) => Some(*i as f64),
            FilterValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Compare two scalars of compatible type.
    fn compare(&self, other: &FilterValue) -> Option<Ordering> {
        match (self, other) {
            (FilterValue::String(a), FilterValue::String(b)) => Some(a.cmp(b)),
            (FilterValue::Bool(a), FilterValue::Bool(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }

    /// Convert a stored metadata value into a comparable operand.
    fn from_json(value: &Value) -> Option<FilterValue> {
        match value {
            Value::Bool(b) => Some(FilterValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(FilterValue::Integer)
                .or_else(|| n.as_f64().map(FilterValue::Float)),
            Value::String(s) => Some(FilterValue::String(s.clone())),
            _ => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::String(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::String(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Integer(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Integer(v as i64)
    }
}

impl From<u32> for FilterValue {
    fn from(v: u32) -> Self {
        FilterValue::Integer(v as i64)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Float(v)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(v: Vec<T>) -> Self {
        FilterValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Leaf operator.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Equals(FilterValue),
    /// Inclusive on both ends.
    Range { min: FilterValue, max: FilterValue },
    OneOf(Vec<FilterValue>),
}

/// Validated, immutable filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterPredicate {
    Condition { field: String, op: FilterOp },
    And(Vec<FilterPredicate>),
    Or(Vec<FilterPredicate>),
}

impl FilterPredicate {
    /// Metadata fields referenced by the tree, in first-appearance order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterPredicate::Condition { field, .. } => {
                if !out.contains(&field.as_str()) {
                    out.push(field);
                }
            }
            FilterPredicate::And(children) | FilterPredicate::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
        }
    }

    /// Evaluate against a chunk's flattened metadata. A missing field
    /// never matches.
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        match self {
            FilterPredicate::Condition { field, op } => {
                let Some(actual) = metadata.get(field).and_then(FilterValue::from_json) else {
                    return false;
                };
                match op {
                    FilterOp::Equals(expected) => {
                        actual.compare(expected) == Some(Ordering::Equal)
                    }
                    FilterOp::Range { min, max } => {
                        matches!(
                            actual.compare(min),
                            Some(Ordering::Greater | Ordering::Equal)
                        ) && matches!(actual.compare(max), Some(Ordering::Less | Ordering::Equal))
                    }
                    FilterOp::OneOf(values) => values
                        .iter()
                        .any(|v| actual.compare(v) == Some(Ordering::Equal)),
                }
            }
            FilterPredicate::And(children) => children.iter().all(|c| c.matches(metadata)),
            FilterPredicate::Or(children) => children.iter().any(|c| c.matches(metadata)),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            FilterPredicate::Condition { field, op } => {
                if field.trim().is_empty() {
                    return Err(Error::Configuration(
                        "filter field name must not be empty".to_string(),
                    ));
                }
                match op {
                    FilterOp::Equals(value) => require_scalar(field, value),
                    FilterOp::Range { min, max } => {
                        require_scalar(field, min)?;
                        require_scalar(field, max)?;
                        for bound in [min, max] {
                            if matches!(bound, FilterValue::Float(f) if f.is_nan()) {
                                return Err(Error::Configuration(format!(
                                    "range bound for '{}' is NaN",
                                    field
                                )));
                            }
                        }
                        match min.compare(max) {
                            Some(Ordering::Greater) => Err(Error::Configuration(format!(
                                "range for '{}' has min greater than max",
                                field
                            ))),
                            Some(_) => Ok(()),
                            None => Err(Error::Configuration(format!(
                                "range bounds for '{}' are not comparable",
                                field
                            ))),
                        }
                    }
                    FilterOp::OneOf(values) => {
                        if values.is_empty() {
                            return Err(Error::Configuration(format!(
                                "one_of for '{}' needs at least one value",
                                field
                            )));
                        }
                        values.iter().try_for_each(|v| require_scalar(field, v))
                    }
                }
            }
            FilterPredicate::And(children) | FilterPredicate::Or(children) => {
                if children.is_empty() {
                    return Err(Error::Configuration(
                        "empty boolean filter group".to_string(),
                    ));
                }
                children.iter().try_for_each(FilterPredicate::validate)
            }
        }
    }
}

fn require_scalar(field: &str, value: &FilterValue) -> Result<()> {
    if value.is_scalar() {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "filter value for '{}' must be a scalar",
            field
        )))
    }
}

/// Fluent constructor for [`FilterPredicate`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterBuilder {
    draft: FilterPredicate,
}

impl FilterBuilder {
    fn leaf(field: impl Into<String>, op: FilterOp) -> Self {
        Self {
            draft: FilterPredicate::Condition {
                field: field.into(),
                op,
            },
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::leaf(field, FilterOp::Equals(value.into()))
    }

    /// Inclusive range. Numbers compare numerically, strings (e.g. ISO
    /// dates) lexicographically.
    pub fn range(
        field: impl Into<String>,
        min: impl Into<FilterValue>,
        max: impl Into<FilterValue>,
    ) -> Self {
        Self::leaf(
            field,
            FilterOp::Range {
                min: min.into(),
                max: max.into(),
            },
        )
    }

    pub fn one_of<V: Into<FilterValue>>(field: impl Into<String>, values: Vec<V>) -> Self {
        Self::leaf(
            field,
            FilterOp::OneOf(values.into_iter().map(Into::into).collect()),
        )
    }

    /// All of `predicates` must match. Fails with
    /// [`Error::InvalidArgument`] when given none.
    pub fn and(predicates: Vec<FilterBuilder>) -> Result<Self> {
        Self::group(predicates, "and").map(|children| Self {
            draft: FilterPredicate::And(children),
        })
    }

    /// Any of `predicates` must match. Fails with
    /// [`Error::InvalidArgument`] when given none.
    pub fn or(predicates: Vec<FilterBuilder>) -> Result<Self> {
        Self::group(predicates, "or").map(|children| Self {
            draft: FilterPredicate::Or(children),
        })
    }

    fn group(predicates: Vec<FilterBuilder>, name: &str) -> Result<Vec<FilterPredicate>> {
        if predicates.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{}() needs at least one predicate",
                name
            )));
        }
        Ok(predicates.into_iter().map(|b| b.draft).collect())
    }

    /// Validate field names and operand types.
    ///
    /// Fails with [`Error::Configuration`] on an empty field name, a list
    /// where a scalar is required, an empty or nested `one_of` list, or a
    /// range whose bounds are NaN, incomparable or reversed.
    pub fn build(self) -> Result<FilterPredicate> {
        self.draft.validate()?;
        Ok(self.draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_equals_and_one_of() {
        let m = meta(json!({"type": "equation", "page_number": 4}));
        let f = FilterBuilder::equals("type", "equation").build().unwrap();
        assert!(f.matches(&m));
        let f = FilterBuilder::one_of("type", vec!["citation", "code"])
            .build()
            .unwrap();
        assert!(!f.matches(&m));
        let f = FilterBuilder::equals("page_number", 4.0).build().unwrap();
        assert!(f.matches(&m));
    }

    #[test]
    fn test_range_numeric_and_dates() {
        let m = meta(json!({"page_number": 7, "created_at": "2024-05-02"}));
        assert!(FilterBuilder::range("page_number", 1, 7)
            .build()
            .unwrap()
            .matches(&m));
        assert!(!FilterBuilder::range("page_number", 8, 9)
            .build()
            .unwrap()
            .matches(&m));
        assert!(FilterBuilder::range("created_at", "2024-01-01", "2024-12-31")
            .build()
            .unwrap()
            .matches(&m));
    }

    #[test]
    fn test_boolean_combinators() {
        let m = meta(json!({"type": "email_body", "email_folder": "inbox"}));
        let f = FilterBuilder::or(vec![
            FilterBuilder::equals("type", "email_signature"),
            FilterBuilder::and(vec![
                FilterBuilder::equals("type", "email_body"),
                FilterBuilder::equals("email_folder", "inbox"),
            ])
            .unwrap(),
        ])
        .unwrap()
        .build()
        .unwrap();
        assert!(f.matches(&m));
        assert_eq!(f.fields(), vec!["type", "email_folder"]);
    }

    #[test]
    fn test_missing_field_never_matches() {
        let f = FilterBuilder::equals("author", "knuth").build().unwrap();
        assert!(!f.matches(&Map::new()));
    }

    #[test]
    fn test_empty_group_is_invalid_argument() {
        assert!(matches!(
            FilterBuilder::and(vec![]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            FilterBuilder::or(vec![]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_build_rejects_bad_operands() {
        let cases = vec![
            FilterBuilder::equals("", "x"),
            FilterBuilder::equals("type", vec!["a", "b"]),
            FilterBuilder::one_of::<&str>("type", vec![]),
            FilterBuilder::one_of("type", vec![FilterValue::from(vec!["nested"])]),
            FilterBuilder::range("page_number", 9, 1),
            FilterBuilder::range("page_number", f64::NAN, 1.0),
            FilterBuilder::range("page_number", "a", 3),
        ];
        for case in cases {
            let result = case.clone().build();
            assert!(
                matches!(result, Err(Error::Configuration(_))),
                "accepted {:?}",
                case
            );
        }
    }
}
