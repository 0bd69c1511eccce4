//! Client-supplied rule trees.
//!
//! A rule tree arrives as JSON: either a group
//! `{"logical_operator": "AND"|"OR", "rules": [...]}` or a leaf
//! `{"field", "operator", "value", "type"?}`. Operator strings carry an
//! optional `not_` negation prefix; the parsed form is a tagged enum so a
//! new operator is a compile-time-checked addition.

use serde::Deserialize;
use serde_json::Value;

use super::dates::DateSpan;
use super::FilterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum LogicalOperator {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleNode {
    Group {
        logical_operator: LogicalOperator,
        #[serde(default)]
        rules: Vec<RuleNode>,
    },
    Leaf {
        #[serde(default)]
        field: String,
        #[serde(default = "default_operator")]
        operator: String,
        #[serde(default)]
        value: Value,
        #[serde(rename = "type")]
        type_hint: Option<String>,
    },
}

fn default_operator() -> String {
    "in".to_string()
}

/// Leaf value type, inferred from the schema for direct fields and taken
/// from the client hint for indirections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Character,
    Numeric,
    Temporal,
}

impl ValueType {
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some("123") => ValueType::Numeric,
            Some("date") => ValueType::Temporal,
            _ => ValueType::Character,
        }
    }
}

/// Parsed leaf operator.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOp {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    In,
    IsNull,
    Gt,
    Gte,
    Lt,
    Lte,
    Range,
    /// Named relative period (today, last_7_days, ...)
    Period(String),
    /// Age expression: exact, gte, lte or range on birthdates
    Age(String),
}

impl RuleOp {
    /// Parses an operator string, splitting off a leading `not_` prefix.
    pub fn parse(raw: &str) -> Result<(RuleOp, bool), FilterError> {
        let negate = raw.starts_with("not_");
        let base = raw.strip_prefix("not_").unwrap_or(raw);

        let op = match base {
            "exact" => RuleOp::Exact,
            "iexact" => RuleOp::IExact,
            "contains" => RuleOp::Contains,
            "icontains" => RuleOp::IContains,
            "startswith" => RuleOp::StartsWith,
            "istartswith" => RuleOp::IStartsWith,
            "endswith" => RuleOp::EndsWith,
            "iendswith" => RuleOp::IEndsWith,
            "in" => RuleOp::In,
            "isnull" => RuleOp::IsNull,
            "gt" => RuleOp::Gt,
            "gte" => RuleOp::Gte,
            "lt" => RuleOp::Lt,
            "lte" => RuleOp::Lte,
            "range" => RuleOp::Range,
            other if DateSpan::is_period(other) => RuleOp::Period(other.to_string()),
            other => match other.strip_prefix("age_") {
                Some(kind @ ("exact" | "gte" | "lte" | "range")) => {
                    RuleOp::Age(kind.to_string())
                }
                _ => return Err(FilterError::UnsupportedOperator(raw.to_string())),
            },
        };
        Ok((op, negate))
    }
}

/// Truthiness of a leaf `value`: boolean true, the strings "true"/"1",
/// or a nonzero number.
pub fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true" || s == "1",
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}
