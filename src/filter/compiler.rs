//! Rule-tree compilation.
//!
//! Walks a client rule tree and produces a [`Predicate`]. Leaves go through
//! value normalization first (Blank/Null markers, relative periods, age
//! expressions, absolute date widening), then route to one of three
//! translations: custom-attribute indirection (an identifier subquery over
//! the key/value store), the generated period encoding, or a direct column
//! comparison. Leaves that carry no usable condition are dropped, never
//! errored.

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::schema::{ModelSchema, RelationKind, SchemaRegistry};
use crate::store::{AttrMatch, AttributeStore, TagStore};

use super::dates::{DateSpan, Window};
use super::predicate::{CmpOp, DatePart, Predicate};
use super::rule::{value_is_truthy, LogicalOperator, RuleNode, RuleOp, ValueType};
use super::FilterError;

const ATTR_PREFIX: &str = "custom_attributes__";
const PERIOD_FIELD: &str = "generated_creation_date";

pub struct FilterCompiler<'a> {
    registry: &'a SchemaRegistry,
    model: &'a ModelSchema,
    attrs: &'a dyn AttributeStore,
    tags: &'a dyn TagStore,
    span: DateSpan,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(
        registry: &'a SchemaRegistry,
        model: &'a ModelSchema,
        attrs: &'a dyn AttributeStore,
        tags: &'a dyn TagStore,
        tz: FixedOffset,
    ) -> Self {
        Self {
            registry,
            model,
            attrs,
            tags,
            span: DateSpan::new(tz),
        }
    }

    /// Same, anchored at a fixed instant. Used by tests.
    pub fn anchored(
        registry: &'a SchemaRegistry,
        model: &'a ModelSchema,
        attrs: &'a dyn AttributeStore,
        tags: &'a dyn TagStore,
        span: DateSpan,
    ) -> Self {
        Self {
            registry,
            model,
            attrs,
            tags,
            span,
        }
    }

    /// Compiles a rule tree. `Ok(None)` means every rule was dropped, in
    /// which case the tree places no restriction at all.
    pub async fn compile(&self, node: &RuleNode) -> Result<Option<Predicate>, FilterError> {
        self.compile_node(node).await
    }

    fn compile_node<'b>(
        &'b self,
        node: &'b RuleNode,
    ) -> BoxFuture<'b, Result<Option<Predicate>, FilterError>> {
        async move {
            match node {
                RuleNode::Group {
                    logical_operator,
                    rules,
                } => {
                    let mut parts = Vec::with_capacity(rules.len());
                    for rule in rules {
                        if let Some(pred) = self.compile_node(rule).await? {
                            parts.push(pred);
                        }
                    }
                    if parts.is_empty() {
                        return Ok(None);
                    }
                    Ok(Some(match logical_operator {
                        LogicalOperator::And => Predicate::and(parts),
                        LogicalOperator::Or => Predicate::or(parts),
                    }))
                }
                RuleNode::Leaf {
                    field,
                    operator,
                    value,
                    type_hint,
                } => {
                    self.compile_leaf(field, operator, value, type_hint.as_deref())
                        .await
                }
            }
        }
        .boxed()
    }

    async fn compile_leaf(
        &self,
        field: &str,
        operator: &str,
        raw_value: &Value,
        type_hint: Option<&str>,
    ) -> Result<Option<Predicate>, FilterError> {
        if field.is_empty() {
            return Ok(None);
        }

        let (mut op, mut negate) = RuleOp::parse(operator)?;
        let mut value = if raw_value.is_null() {
            json!(0)
        } else {
            raw_value.clone()
        };

        let attr_name = field.strip_prefix(ATTR_PREFIX);
        let is_period_field = field.ends_with(PERIOD_FIELD);

        let vtype = if attr_name.is_some() {
            ValueType::from_hint(type_hint)
        } else if is_period_field {
            ValueType::Temporal
        } else {
            let def = self.registry.resolve_path(self.model, field)?;
            if def.kind.is_character() {
                ValueType::Character
            } else if def.kind.is_temporal() {
                ValueType::Temporal
            } else {
                ValueType::Numeric
            }
        };

        // A membership test over nothing is vacuous
        if matches!(op, RuleOp::In) && is_falsy(&value) {
            return Ok(None);
        }

        // Plain isnull keeps blank-coalescing semantics; the one synthesized
        // from a "Null" marker below does not
        let coalesce = operator == "isnull";

        if value == json!("Blank") {
            negate = operator == "not_exact";
            op = RuleOp::Exact;
            value = json!("");
        } else if value == json!("Null") {
            value = json!(operator == "exact");
            op = RuleOp::IsNull;
            negate = false;
        }

        // Birthdates compare by calendar position, not by year
        if field == "birthdate" {
            if let Some(pred) = self.birthdate_leaf(&op, &value)? {
                return Ok(Some(apply_negate(pred, negate)));
            }
        }

        // Rewrite temporal values: named periods become windows, age
        // expressions become birthdate bounds, date-only absolutes widen to
        // cover the whole day
        let mut window: Option<Window> = None;
        if vtype == ValueType::Temporal && !coalesce {
            match &op {
                RuleOp::Period(name) => {
                    window = self.span.period(name);
                    op = RuleOp::Range;
                }
                RuleOp::Age(kind) => {
                    let (d1, d2) = self.span.age(&value, kind)?;
                    match kind.as_str() {
                        "gte" => {
                            op = RuleOp::Gte;
                            value = json!(format_date(d1));
                        }
                        "lte" => {
                            op = RuleOp::Lte;
                            value = json!(format_date(d2));
                        }
                        _ => {
                            op = RuleOp::Range;
                            value = json!([format_date(d1), format_date(d2)]);
                        }
                    }
                }
                RuleOp::Gt | RuleOp::Gte | RuleOp::Lt | RuleOp::Lte | RuleOp::Exact => {
                    if let Some(days) = value_as_days(&value) {
                        // A bare integer N means "N days before now"
                        value = json!(format_datetime(self.span.now() - Duration::days(days)));
                    } else if let Some(text) = value.as_str() {
                        if text.len() <= 10 {
                            if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                                let next = format_date(date + Duration::days(1));
                                match op {
                                    RuleOp::Gt => {
                                        op = RuleOp::Gte;
                                        value = json!(next);
                                    }
                                    RuleOp::Lte => {
                                        op = RuleOp::Lt;
                                        value = json!(next);
                                    }
                                    RuleOp::Exact => {
                                        window = Some((
                                            date.and_hms_opt(0, 0, 0).unwrap(),
                                            (date + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap(),
                                        ));
                                        op = RuleOp::Range;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(name) = attr_name {
            let pred = self.attribute_leaf(name, &op, value, vtype, window).await?;
            return Ok(pred.map(|p| apply_negate(p, negate)));
        }

        if is_period_field {
            let prefix = &field[..field.len() - PERIOD_FIELD.len()];
            let pred = period_leaf(prefix, &op, &value, window)?;
            return Ok(pred.map(|p| apply_negate(p, negate)));
        }

        let column = self.column_for(field);

        if vtype == ValueType::Numeric {
            value = coerce_numeric(value);
        }

        if matches!(op, RuleOp::IsNull) {
            let pred = Predicate::IsNull {
                column,
                blank_as_null: coalesce && vtype == ValueType::Character,
            };
            // The value carries the polarity; the blank-coalescing form
            // ignores a not_ prefix
            let pred = if value_is_truthy(&value) {
                pred
            } else {
                pred.negate()
            };
            return Ok(Some(if coalesce {
                pred
            } else {
                apply_negate(pred, negate)
            }));
        }

        let pred = match op {
            RuleOp::Exact => cmp(column, CmpOp::Eq, value),
            RuleOp::IExact => cmp(column, CmpOp::IEq, value),
            RuleOp::Contains => cmp(column, CmpOp::Contains, value),
            RuleOp::IContains => cmp(column, CmpOp::IContains, value),
            RuleOp::StartsWith => cmp(column, CmpOp::StartsWith, value),
            RuleOp::IStartsWith => cmp(column, CmpOp::IStartsWith, value),
            RuleOp::EndsWith => cmp(column, CmpOp::EndsWith, value),
            RuleOp::IEndsWith => cmp(column, CmpOp::IEndsWith, value),
            RuleOp::Gt => cmp(column, CmpOp::Gt, value),
            RuleOp::Gte => cmp(column, CmpOp::Gte, value),
            RuleOp::Lt => cmp(column, CmpOp::Lt, value),
            RuleOp::Lte => cmp(column, CmpOp::Lte, value),
            RuleOp::In => Predicate::InList {
                column,
                values: value_as_list(value),
            },
            RuleOp::Range => match window {
                Some((start, end)) => Predicate::and(vec![
                    cmp(column.clone(), CmpOp::Gte, json!(format_datetime(start))),
                    cmp(column, CmpOp::Lt, json!(format_datetime(end))),
                ]),
                None => {
                    let (low, high) = pair(&value)?;
                    Predicate::Between { column, low, high }
                }
            },
            RuleOp::Period(name) | RuleOp::Age(name) => {
                return Err(FilterError::InvalidRule(format!(
                    "operator {} needs a date field, got {}",
                    name, field
                )));
            }
            RuleOp::IsNull => unreachable!(),
        };
        Ok(Some(apply_negate(pred, negate)))
    }

    fn birthdate_leaf(&self, op: &RuleOp, value: &Value) -> Result<Option<Predicate>, FilterError> {
        let column = "birthdate".to_string();
        match op {
            RuleOp::Period(name) if name == "today" => {
                let today = self.span.now().date();
                Ok(Some(Predicate::and(vec![
                    Predicate::PartCmp {
                        column: column.clone(),
                        part: DatePart::Month,
                        value: today.month(),
                    },
                    Predicate::PartCmp {
                        column,
                        part: DatePart::Day,
                        value: today.day(),
                    },
                ])))
            }
            RuleOp::Period(name) if name == "this_month" => Ok(Some(Predicate::PartCmp {
                column,
                part: DatePart::Month,
                value: self.span.now().month(),
            })),
            RuleOp::Period(name) => {
                let (start, end) = self
                    .span
                    .period(name)
                    .ok_or_else(|| FilterError::UnsupportedOperator(name.clone()))?;
                let last = (end - Duration::seconds(1)).date();
                Ok(Some(Predicate::and(vec![
                    Predicate::PartRange {
                        column: column.clone(),
                        part: DatePart::Month,
                        low: start.month(),
                        high: last.month(),
                    },
                    Predicate::PartRange {
                        column,
                        part: DatePart::Day,
                        low: start.day(),
                        high: last.day(),
                    },
                ])))
            }
            RuleOp::Age(kind) => {
                let (d1, d2) = self.span.age(value, kind)?;
                Ok(Some(match kind.as_str() {
                    "gte" => cmp(column, CmpOp::Gte, json!(format_date(d1))),
                    "lte" => cmp(column, CmpOp::Lte, json!(format_date(d2))),
                    _ => Predicate::Between {
                        column,
                        low: json!(format_date(d1)),
                        high: json!(format_date(d2)),
                    },
                }))
            }
            _ => Ok(None),
        }
    }

    async fn attribute_leaf(
        &self,
        name: &str,
        op: &RuleOp,
        mut value: Value,
        vtype: ValueType,
        window: Option<Window>,
    ) -> Result<Option<Predicate>, FilterError> {
        let model = self.model.name;

        // Stored attribute values are text; booleans normalize to their
        // lowercase spelling
        if let Value::Bool(b) = value {
            value = json!(b.to_string());
        }

        if self.attrs.is_checkbox(model, name).await? && value == json!("false") {
            // Unchecked and never-stored are the same answer
            let mut ids = self.attrs.ids_without_attribute(model, name).await?;
            ids.extend(
                self.attrs
                    .ids_matching(
                        model,
                        name,
                        &AttrMatch::Cmp {
                            op: CmpOp::Eq,
                            value: json!("false"),
                            cast_decimal: false,
                        },
                    )
                    .await?,
            );
            return Ok(Some(in_pk(ids)));
        }

        if matches!(op, RuleOp::IsNull) {
            let ids = if value == json!("true") || value_is_truthy(&value) {
                let mut ids = self.attrs.ids_without_attribute(model, name).await?;
                ids.extend(self.attrs.ids_with_blank_value(model, name).await?);
                ids
            } else {
                let blank = self.attrs.ids_with_blank_value(model, name).await?;
                let mut ids = self.attrs.ids_with_attribute(model, name).await?;
                ids.retain(|id| !blank.contains(id));
                ids
            };
            return Ok(Some(in_pk(ids)));
        }

        // Stored datetimes truncate to second precision
        if vtype == ValueType::Temporal {
            if let Some(text) = value.as_str() {
                value = json!(truncate19(text));
            }
        }

        let test = match op {
            RuleOp::Range => match window {
                Some((start, end)) => AttrMatch::Range {
                    low: json!(format_datetime(start)),
                    high: json!(format_datetime(end)),
                },
                None => {
                    let (low, high) = pair(&value)?;
                    AttrMatch::Range {
                        low: truncate_value(low, vtype),
                        high: truncate_value(high, vtype),
                    }
                }
            },
            RuleOp::In => AttrMatch::In {
                values: value_as_list(value),
            },
            RuleOp::Gt | RuleOp::Gte | RuleOp::Lt | RuleOp::Lte => AttrMatch::Cmp {
                op: attr_cmp_op(op),
                value,
                cast_decimal: matches!(op, RuleOp::Gte | RuleOp::Lte),
            },
            RuleOp::Exact => AttrMatch::Cmp {
                op: CmpOp::Eq,
                value,
                cast_decimal: false,
            },
            other => AttrMatch::Cmp {
                op: attr_cmp_op(other),
                value,
                cast_decimal: false,
            },
        };

        let blank = self.attrs.ids_with_blank_value(model, name).await?;
        let mut ids = self.attrs.ids_matching(model, name, &test).await?;
        ids.retain(|id| !blank.contains(id));
        Ok(Some(in_pk(ids)))
    }

    /// FK columns filter on the stored id column.
    fn column_for(&self, field: &str) -> String {
        if field.contains("__") || field.ends_with("_id") {
            return field.to_string();
        }
        match self.registry.resolve_path(self.model, field) {
            Ok(def)
                if def
                    .relation
                    .as_ref()
                    .map(|r| r.kind == RelationKind::ManyToOne)
                    .unwrap_or(false) =>
            {
                format!("{}_id", field)
            }
            _ => field.to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Simple filtering params (the non-tree query string surface)

    /// Compiles `field__op=value` query parameters. Keys outside the
    /// resource's filter whitelist are ignored.
    pub fn compile_params(
        &self,
        params: &[(String, String)],
        filter_fields: &[String],
    ) -> Result<Predicate, FilterError> {
        let mut parts = Vec::new();
        for (key, raw) in params {
            let (base, suffix) = split_suffix(key);
            if !filter_fields.iter().any(|f| f == base) {
                continue;
            }
            let column = self.column_for(base);
            let value = coerce_param(raw);
            let pred = match suffix {
                None => cmp(column, CmpOp::Eq, value),
                Some("isnull") => {
                    let pred = Predicate::IsNull {
                        column,
                        blank_as_null: false,
                    };
                    if value_is_truthy(&value) {
                        pred
                    } else {
                        pred.negate()
                    }
                }
                Some("gte") => cmp(column, CmpOp::Gte, value),
                Some("lte") => cmp(column, CmpOp::Lte, value),
                Some("gt") => cmp(column, CmpOp::Gt, value),
                Some("lt") => cmp(column, CmpOp::Lt, value),
                Some("startswith") => cmp(column, CmpOp::StartsWith, value),
                Some(other) => {
                    return Err(FilterError::UnsupportedOperator(other.to_string()));
                }
            };
            parts.push(pred);
        }
        Ok(Predicate::and(parts))
    }

    /// Case-insensitive containment over the search whitelist; a numeric
    /// term also matches the identifier exactly.
    pub fn search(&self, term: &str, search_fields: &[String]) -> Predicate {
        let mut parts: Vec<Predicate> = search_fields
            .iter()
            .map(|f| cmp(self.column_for(f), CmpOp::IContains, json!(term)))
            .collect();
        if let Ok(id) = term.trim().parse::<i64>() {
            parts.push(cmp("id".to_string(), CmpOp::Eq, json!(id)));
        }
        Predicate::or(parts)
    }

    /// Tag membership. OR matches entities carrying any of the tags, AND
    /// only those carrying all of them.
    pub async fn tags_filter(
        &self,
        tag_ids: &[i64],
        require_all: bool,
    ) -> Result<Predicate, FilterError> {
        if tag_ids.is_empty() {
            return Ok(Predicate::True);
        }
        let model = self.model.name;
        if !require_all {
            return Ok(in_pk(self.tags.ids_with_tags(model, tag_ids).await?));
        }
        let mut common: Option<Vec<i64>> = None;
        for tag in tag_ids {
            let ids = self.tags.ids_with_tags(model, &[*tag]).await?;
            common = Some(match common {
                None => ids,
                Some(prev) => prev.into_iter().filter(|id| ids.contains(id)).collect(),
            });
        }
        Ok(in_pk(common.unwrap_or_default()))
    }
}

// ---------------------------------------------------------------------------
// helpers

fn cmp(column: String, op: CmpOp, value: Value) -> Predicate {
    Predicate::Cmp { column, op, value }
}

fn in_pk(mut ids: Vec<i64>) -> Predicate {
    ids.sort_unstable();
    ids.dedup();
    Predicate::InPk(ids)
}

fn apply_negate(pred: Predicate, negate: bool) -> Predicate {
    if negate {
        pred.negate()
    } else {
        pred
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Object(o) => o.is_empty(),
    }
}

fn value_as_days(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn pair(value: &Value) -> Result<(Value, Value), FilterError> {
    let items = value
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| FilterError::InvalidRule("range needs a [low, high] pair".to_string()))?;
    Ok((items[0].clone(), items[1].clone()))
}

fn attr_cmp_op(op: &RuleOp) -> CmpOp {
    match op {
        RuleOp::IExact => CmpOp::IEq,
        RuleOp::Contains => CmpOp::Contains,
        RuleOp::IContains => CmpOp::IContains,
        RuleOp::StartsWith => CmpOp::StartsWith,
        RuleOp::IStartsWith => CmpOp::IStartsWith,
        RuleOp::EndsWith => CmpOp::EndsWith,
        RuleOp::IEndsWith => CmpOp::IEndsWith,
        RuleOp::Gt => CmpOp::Gt,
        RuleOp::Gte => CmpOp::Gte,
        RuleOp::Lt => CmpOp::Lt,
        RuleOp::Lte => CmpOp::Lte,
        _ => CmpOp::Eq,
    }
}

fn truncate19(text: &str) -> &str {
    text.get(..19).unwrap_or(text)
}

fn truncate_value(value: Value, vtype: ValueType) -> Value {
    if vtype != ValueType::Temporal {
        return value;
    }
    match value {
        Value::String(s) => json!(truncate19(&s)),
        other => other,
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn format_datetime(dt: NaiveDateTime) -> String {
    // Space separator matches how the server prints timestamps, so text
    // comparisons in the fixture backend stay consistent with SQL
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Numeric columns take typed bind values; clients often send them quoted.
fn coerce_numeric(value: Value) -> Value {
    match value {
        Value::String(s) => {
            if let Ok(n) = s.parse::<i64>() {
                json!(n)
            } else if let Ok(f) = s.parse::<f64>() {
                json!(f)
            } else {
                json!(s)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(coerce_numeric).collect()),
        other => other,
    }
}

/// Period encoding stamp: `yyyymm * 10000 + day * 100 + hour`.
pub fn period_stamp(dt: NaiveDateTime) -> i64 {
    let ym = dt.year() as i64 * 100 + dt.month() as i64;
    ym * 10_000 + dt.day() as i64 * 100 + dt.hour() as i64
}

fn parse_stamp(value: &Value) -> Option<i64> {
    if let Some(text) = value.as_str() {
        let head = truncate19(text);
        if let Ok(dt) = NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S") {
            return Some(period_stamp(dt));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S") {
            return Some(period_stamp(dt));
        }
        if let Ok(date) = NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d") {
            return Some(period_stamp(date.and_hms_opt(0, 0, 0)?));
        }
    }
    None
}

fn period_leaf(
    prefix: &str,
    op: &RuleOp,
    value: &Value,
    window: Option<Window>,
) -> Result<Option<Predicate>, FilterError> {
    if let Some((start, end)) = window {
        return Ok(Some(Predicate::and(vec![
            Predicate::PeriodCmp {
                prefix: prefix.to_string(),
                op: CmpOp::Gte,
                stamp: period_stamp(start),
            },
            Predicate::PeriodCmp {
                prefix: prefix.to_string(),
                op: CmpOp::Lt,
                stamp: period_stamp(end),
            },
        ])));
    }
    let Some(stamp) = parse_stamp(value) else {
        return Ok(None);
    };
    let cmp_op = match op {
        RuleOp::Gt => CmpOp::Gt,
        RuleOp::Gte => CmpOp::Gte,
        RuleOp::Lt => CmpOp::Lt,
        RuleOp::Lte => CmpOp::Lte,
        _ => CmpOp::Eq,
    };
    Ok(Some(Predicate::PeriodCmp {
        prefix: prefix.to_string(),
        op: cmp_op,
        stamp,
    }))
}

const PARAM_SUFFIXES: [&str; 6] = ["isnull", "gte", "lte", "lt", "gt", "startswith"];

fn split_suffix(key: &str) -> (&str, Option<&str>) {
    if let Some((base, tail)) = key.rsplit_once("__") {
        if PARAM_SUFFIXES.contains(&tail) {
            return (base, Some(tail));
        }
    }
    (key, None)
}

fn coerce_param(raw: &str) -> Value {
    match raw {
        "true" => json!(true),
        "false" => json!(false),
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                json!(n)
            } else {
                json!(raw)
            }
        }
    }
}
