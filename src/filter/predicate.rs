//! Backend-native boolean expression tree.
//!
//! A [`Predicate`] is what the rule-tree compiler produces. It renders to
//! parameterized SQL for the relational backend and can also be evaluated
//! directly against a JSON row, which is how the fixture backend and the
//! compiler tests check truth values without a live database.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    IEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
}

impl CmpOp {
    pub fn is_ordering(&self) -> bool {
        matches!(self, CmpOp::Gt | CmpOp::Gte | CmpOp::Lt | CmpOp::Lte)
    }
}

/// Date part extracted for month/day comparisons (birthday semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Month,
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row
    True,
    /// Matches no row
    Nothing,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Cmp {
        column: String,
        op: CmpOp,
        value: Value,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    InList {
        column: String,
        values: Vec<Value>,
    },
    /// NULL test; character columns also treat the empty string as null
    IsNull {
        column: String,
        blank_as_null: bool,
    },
    /// Identifier membership produced by custom-attribute indirection
    InPk(Vec<i64>),
    /// Month/day comparison on a date column
    PartCmp {
        column: String,
        part: DatePart,
        value: u32,
    },
    PartRange {
        column: String,
        part: DatePart,
        low: u32,
        high: u32,
    },
    /// Comparison on the concatenated period encoding
    /// (`period_ym || period_d || period_h` as an integer stamp)
    PeriodCmp {
        prefix: String,
        op: CmpOp,
        stamp: i64,
    },
}

impl Predicate {
    /// Conjunction; flattens, drops `True`, short-circuits on `Nothing`.
    pub fn and(parts: Vec<Predicate>) -> Predicate {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Predicate::True => {}
                Predicate::Nothing => return Predicate::Nothing,
                Predicate::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::True,
            1 => out.into_iter().next().unwrap(),
            _ => Predicate::And(out),
        }
    }

    /// Disjunction; flattens, drops `Nothing`, short-circuits on `True`.
    pub fn or(parts: Vec<Predicate>) -> Predicate {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Predicate::Nothing => {}
                Predicate::True => return Predicate::True,
                Predicate::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::Nothing,
            1 => out.into_iter().next().unwrap(),
            _ => Predicate::Or(out),
        }
    }

    /// Relation names referenced through `rel__field` columns; the backend
    /// joins or embeds these before evaluating.
    pub fn relation_prefixes(&self, out: &mut std::collections::BTreeSet<String>) {
        fn column(col: &str, out: &mut std::collections::BTreeSet<String>) {
            if let Some((rel, _)) = col.split_once("__") {
                out.insert(rel.to_string());
            }
        }
        match self {
            Predicate::And(parts) | Predicate::Or(parts) => {
                for p in parts {
                    p.relation_prefixes(out);
                }
            }
            Predicate::Not(inner) => inner.relation_prefixes(out),
            Predicate::Cmp { column: col, .. }
            | Predicate::Between { column: col, .. }
            | Predicate::InList { column: col, .. }
            | Predicate::IsNull { column: col, .. }
            | Predicate::PartCmp { column: col, .. }
            | Predicate::PartRange { column: col, .. } => column(col, out),
            Predicate::PeriodCmp { prefix, .. } => {
                if let Some(rel) = prefix.strip_suffix("__") {
                    out.insert(rel.to_string());
                }
            }
            Predicate::True | Predicate::Nothing | Predicate::InPk(_) => {}
        }
    }

    pub fn negate(self) -> Predicate {
        match self {
            Predicate::True => Predicate::Nothing,
            Predicate::Nothing => Predicate::True,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// SQL rendering

fn quote_column(path: &str) -> String {
    // The base table is always aliased "t"; joined relations are aliased
    // by their field name
    match path.split_once("__") {
        Some((rel, field)) => format!("\"{}\".\"{}\"", rel, field),
        None => format!("\"t\".\"{}\"", path),
    }
}

/// Temporal string parameters need an explicit cast; sqlx sends them typed
/// as text and the server will not coerce that against a timestamp column.
fn param_cast(value: &Value) -> &'static str {
    match value {
        Value::String(s) if parse_temporal(s).is_some() => "::timestamp",
        _ => "",
    }
}

impl Predicate {
    /// Renders parameterized SQL, pushing bind values into `params`.
    /// Placeholders continue from the current length of `params`.
    pub fn to_sql(&self, params: &mut Vec<Value>) -> String {
        let mut param = |value: Value| -> String {
            params.push(value);
            format!("${}", params.len())
        };

        match self {
            Predicate::True => "1=1".to_string(),
            Predicate::Nothing => "1=0".to_string(),
            Predicate::And(parts) => {
                let rendered: Vec<String> =
                    parts.iter().map(|p| format!("({})", p.to_sql(params))).collect();
                rendered.join(" AND ")
            }
            Predicate::Or(parts) => {
                let rendered: Vec<String> =
                    parts.iter().map(|p| format!("({})", p.to_sql(params))).collect();
                rendered.join(" OR ")
            }
            Predicate::Not(inner) => format!("NOT ({})", inner.to_sql(params)),
            Predicate::Cmp { column, op, value } => {
                let col = quote_column(column);
                let cast = param_cast(value);
                match op {
                    CmpOp::Eq => format!("{} = {}{}", col, param(value.clone()), cast),
                    CmpOp::IEq => format!("LOWER({}) = LOWER({})", col, param(value.clone())),
                    CmpOp::Gt => format!("{} > {}{}", col, param(value.clone()), cast),
                    CmpOp::Gte => format!("{} >= {}{}", col, param(value.clone()), cast),
                    CmpOp::Lt => format!("{} < {}{}", col, param(value.clone()), cast),
                    CmpOp::Lte => format!("{} <= {}{}", col, param(value.clone()), cast),
                    CmpOp::Contains => {
                        format!("{} LIKE {}", col, param(like_pattern(value, "%", "%")))
                    }
                    CmpOp::IContains => {
                        format!("{} ILIKE {}", col, param(like_pattern(value, "%", "%")))
                    }
                    CmpOp::StartsWith => {
                        format!("{} LIKE {}", col, param(like_pattern(value, "", "%")))
                    }
                    CmpOp::IStartsWith => {
                        format!("{} ILIKE {}", col, param(like_pattern(value, "", "%")))
                    }
                    CmpOp::EndsWith => {
                        format!("{} LIKE {}", col, param(like_pattern(value, "%", "")))
                    }
                    CmpOp::IEndsWith => {
                        format!("{} ILIKE {}", col, param(like_pattern(value, "%", "")))
                    }
                }
            }
            Predicate::Between { column, low, high } => {
                let col = quote_column(column);
                let cast = param_cast(low);
                format!(
                    "{} BETWEEN {}{} AND {}{}",
                    col,
                    param(low.clone()),
                    cast,
                    param(high.clone()),
                    cast
                )
            }
            Predicate::InList { column, values } => {
                if values.is_empty() {
                    return "1=0".to_string();
                }
                let col = quote_column(column);
                let rendered: Vec<String> = values.iter().map(|v| param(v.clone())).collect();
                format!("{} IN ({})", col, rendered.join(", "))
            }
            Predicate::IsNull {
                column,
                blank_as_null,
            } => {
                let col = quote_column(column);
                if *blank_as_null {
                    format!("({} IS NULL OR {} = '')", col, col)
                } else {
                    format!("{} IS NULL", col)
                }
            }
            Predicate::InPk(ids) => {
                if ids.is_empty() {
                    return "1=0".to_string();
                }
                let rendered: Vec<String> =
                    ids.iter().map(|id| param(Value::from(*id))).collect();
                format!("\"t\".\"id\" IN ({})", rendered.join(", "))
            }
            Predicate::PartCmp {
                column,
                part,
                value,
            } => {
                format!(
                    "EXTRACT({} FROM {})::int = {}",
                    part_sql(*part),
                    quote_column(column),
                    param(Value::from(*value))
                )
            }
            Predicate::PartRange {
                column,
                part,
                low,
                high,
            } => {
                format!(
                    "EXTRACT({} FROM {})::int BETWEEN {} AND {}",
                    part_sql(*part),
                    quote_column(column),
                    param(Value::from(*low)),
                    param(Value::from(*high))
                )
            }
            Predicate::PeriodCmp { prefix, op, stamp } => {
                let expr = format!(
                    "({ym}::text || LPAD({d}::text, 2, '0') || LPAD({h}::text, 2, '0'))::bigint",
                    ym = quote_column(&format!("{}period_ym", prefix)),
                    d = quote_column(&format!("{}period_d", prefix)),
                    h = quote_column(&format!("{}period_h", prefix)),
                );
                let sign = match op {
                    CmpOp::Gte => ">=",
                    CmpOp::Lte => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Lt => "<",
                    _ => "=",
                };
                format!("{} {} {}", expr, sign, param(Value::from(*stamp)))
            }
        }
    }
}

fn part_sql(part: DatePart) -> &'static str {
    match part {
        DatePart::Month => "MONTH",
        DatePart::Day => "DAY",
    }
}

fn like_pattern(value: &Value, prefix: &str, suffix: &str) -> Value {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Value::String(format!("{}{}{}", prefix, raw, suffix))
}

// ---------------------------------------------------------------------------
// In-memory evaluation

type Row = serde_json::Map<String, Value>;

/// Reads a possibly relation-qualified column from a row. Relation values
/// are nested objects in fixture rows.
fn read_column<'a>(row: &'a Row, path: &str) -> Option<&'a Value> {
    match path.split_once("__") {
        None => row.get(path),
        Some((rel, field)) => row
            .get(rel)
            .and_then(|v| v.as_object())
            .and_then(|obj| obj.get(field)),
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_temporal(text: &str) -> Option<chrono::NaiveDateTime> {
    let head = text.get(..19).unwrap_or(text);
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    chrono::NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap())
}

/// Type-aware ordering used by comparison operators: numbers numerically,
/// temporal strings as timestamps (a bare date is midnight), everything
/// else as text.
fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return a.partial_cmp(&b);
    }
    let a = as_text(lhs)?;
    let b = as_text(rhs)?;
    if let (Some(da), Some(db)) = (parse_temporal(&a), parse_temporal(&b)) {
        return Some(da.cmp(&db));
    }
    Some(a.cmp(&b))
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs == rhs {
        return true;
    }
    // Numeric-looking strings and numbers compare equal, the way the
    // database coerces bound parameters
    if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
        return a == b;
    }
    match (as_text(lhs), as_text(rhs)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn date_part(value: &Value, part: DatePart) -> Option<u32> {
    let text = value.as_str()?;
    let date = chrono::NaiveDate::parse_from_str(text.get(..10)?, "%Y-%m-%d").ok()?;
    use chrono::Datelike;
    Some(match part {
        DatePart::Month => date.month(),
        DatePart::Day => date.day(),
    })
}

impl Predicate {
    /// Evaluates the predicate against one row. Missing columns behave as
    /// SQL NULL: comparisons are false, IS NULL is true.
    pub fn eval(&self, row: &Row) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Nothing => false,
            Predicate::And(parts) => parts.iter().all(|p| p.eval(row)),
            Predicate::Or(parts) => parts.iter().any(|p| p.eval(row)),
            Predicate::Not(inner) => !inner.eval(row),
            Predicate::Cmp { column, op, value } => {
                let Some(actual) = read_column(row, column) else {
                    return false;
                };
                if actual.is_null() {
                    return false;
                }
                match op {
                    CmpOp::Eq => values_equal(actual, value),
                    CmpOp::IEq => match (as_text(actual), as_text(value)) {
                        (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
                        _ => false,
                    },
                    CmpOp::Gt => compare(actual, value) == Some(std::cmp::Ordering::Greater),
                    CmpOp::Gte => matches!(
                        compare(actual, value),
                        Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                    ),
                    CmpOp::Lt => compare(actual, value) == Some(std::cmp::Ordering::Less),
                    CmpOp::Lte => matches!(
                        compare(actual, value),
                        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                    ),
                    CmpOp::Contains => text_match(actual, value, false, |a, b| a.contains(b)),
                    CmpOp::IContains => text_match(actual, value, true, |a, b| a.contains(b)),
                    CmpOp::StartsWith => {
                        text_match(actual, value, false, |a, b| a.starts_with(b))
                    }
                    CmpOp::IStartsWith => {
                        text_match(actual, value, true, |a, b| a.starts_with(b))
                    }
                    CmpOp::EndsWith => text_match(actual, value, false, |a, b| a.ends_with(b)),
                    CmpOp::IEndsWith => text_match(actual, value, true, |a, b| a.ends_with(b)),
                }
            }
            Predicate::Between { column, low, high } => {
                let Some(actual) = read_column(row, column) else {
                    return false;
                };
                if actual.is_null() {
                    return false;
                }
                matches!(
                    compare(actual, low),
                    Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                ) && matches!(
                    compare(actual, high),
                    Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                )
            }
            Predicate::InList { column, values } => {
                let Some(actual) = read_column(row, column) else {
                    return false;
                };
                values.iter().any(|v| values_equal(actual, v))
            }
            Predicate::IsNull {
                column,
                blank_as_null,
            } => match read_column(row, column) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) if *blank_as_null => s.is_empty(),
                _ => false,
            },
            Predicate::InPk(ids) => row
                .get("id")
                .and_then(|v| v.as_i64())
                .map(|id| ids.contains(&id))
                .unwrap_or(false),
            Predicate::PartCmp {
                column,
                part,
                value,
            } => read_column(row, column)
                .and_then(|v| date_part(v, *part))
                .map(|p| p == *value)
                .unwrap_or(false),
            Predicate::PartRange {
                column,
                part,
                low,
                high,
            } => read_column(row, column)
                .and_then(|v| date_part(v, *part))
                .map(|p| p >= *low && p <= *high)
                .unwrap_or(false),
            Predicate::PeriodCmp { prefix, op, stamp } => {
                let read = |suffix: &str| {
                    read_column(row, &format!("{}period_{}", prefix, suffix))
                        .and_then(|v| v.as_i64())
                };
                let (Some(ym), Some(d), Some(h)) = (read("ym"), read("d"), read("h")) else {
                    return false;
                };
                let actual = ym * 10_000 + d * 100 + h;
                match op {
                    CmpOp::Gte => actual >= *stamp,
                    CmpOp::Lte => actual <= *stamp,
                    CmpOp::Gt => actual > *stamp,
                    CmpOp::Lt => actual < *stamp,
                    _ => actual == *stamp,
                }
            }
        }
    }
}

fn text_match(
    actual: &Value,
    expected: &Value,
    case_insensitive: bool,
    test: fn(&str, &str) -> bool,
) -> bool {
    let (Some(mut a), Some(mut b)) = (as_text(actual), as_text(expected)) else {
        return false;
    };
    if case_insensitive {
        a = a.to_lowercase();
        b = b.to_lowercase();
    }
    test(&a, &b)
}
