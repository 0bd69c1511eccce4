pub mod compiler;
pub mod dates;
pub mod predicate;
pub mod rule;

pub use compiler::FilterCompiler;
pub use predicate::{CmpOp, DatePart, Predicate, SortDirection};
pub use rule::{LogicalOperator, RuleNode, RuleOp, ValueType};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid filter JSON: {0}")]
    InvalidJson(String),

    #[error(transparent)]
    Schema(#[from] crate::schema::SchemaError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// Parses the `filter` query parameter. `Ok(None)` means the client sent an
/// empty tree (null, `{}`, `[]`), which matches nothing when filtering was
/// explicitly requested. Bare arrays are treated as an OR group, matching
/// the tree's default top-level operator.
pub fn parse_rule_tree(raw: &str) -> Result<Option<RuleNode>, FilterError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| FilterError::InvalidJson(e.to_string()))?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(ref map) if map.is_empty() => Ok(None),
        serde_json::Value::Array(items) => {
            if items.is_empty() {
                return Ok(None);
            }
            let rules = items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<RuleNode>, _>>()
                .map_err(|e| FilterError::InvalidJson(e.to_string()))?;
            Ok(Some(RuleNode::Group {
                logical_operator: LogicalOperator::Or,
                rules,
            }))
        }
        other => serde_json::from_value(other)
            .map(Some)
            .map_err(|e| FilterError::InvalidJson(e.to_string())),
    }
}
