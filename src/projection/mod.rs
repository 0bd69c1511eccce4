//! Write validation and read projection.
//!
//! Writes pass through the resource's field whitelist, schema-driven
//! required-field validation, FK normalization and identity stamping before
//! they reach the backend. Reads project stored rows into the resource's
//! exposed shape: FK scalars wrap as `{"id": value}`, declared relations
//! embed a field subset, everything else is stripped.

pub mod tags;

use serde_json::{json, Map, Value};

use crate::error::ApiError;
use crate::resource::ResourceDef;
use crate::schema::ModelSchema;
use crate::store::Row;

/// Rejects submitted keys outside the whitelist. The error names every
/// offending key so the client can fix its payload in one pass.
pub fn check_write_whitelist(
    body: &Row,
    whitelist: &[String],
    creating: bool,
) -> Result<(), ApiError> {
    if creating && whitelist.is_empty() {
        return Err(ApiError::internal("Create fields not defined"));
    }
    let offending: Vec<&str> = body
        .keys()
        .filter(|key| !whitelist.iter().any(|f| f == *key))
        .map(|k| k.as_str())
        .collect();
    if offending.is_empty() {
        return Ok(());
    }
    let action = if creating { "Creation" } else { "Changes" };
    Err(ApiError::Forbidden(format!(
        "{} on field(s): {} is not allowed",
        action,
        offending.join(", ")
    )))
}

/// Schema-driven required-field validation for creates. Defaulted and
/// primary-key fields are exempt; blank and null violations are collected
/// into a single message.
pub fn validate_required(body: &Row, schema: &ModelSchema) -> Result<(), ApiError> {
    let mut blank = Vec::new();
    let mut null = Vec::new();
    for def in schema.defs() {
        if def.primary_key || def.has_default {
            continue;
        }
        if def
            .relation
            .as_ref()
            .map(|r| r.kind == crate::schema::RelationKind::ManyToMany)
            .unwrap_or(false)
        {
            continue;
        }
        let key = if def.relation.is_some() {
            format!("{}_id", def.name)
        } else {
            def.name.to_string()
        };
        let value = body.get(&key).or_else(|| body.get(def.name));
        match value {
            None | Some(Value::Null) => {
                if !def.nullable {
                    null.push(def.name);
                }
            }
            Some(Value::String(s)) if s.is_empty() => {
                if !def.blankable {
                    blank.push(def.name);
                }
            }
            _ => {}
        }
    }
    if blank.is_empty() && null.is_empty() {
        return Ok(());
    }
    let mut parts = Vec::new();
    if !blank.is_empty() {
        parts.push(format!("Field(s): {} can't be blank.", blank.join(", ")));
    }
    if !null.is_empty() {
        parts.push(format!("Field(s): {} can't be null.", null.join(", ")));
    }
    Err(ApiError::Forbidden(parts.join(" ")))
}

/// Rewrites FK submissions onto their stored columns: `owner: 5` and
/// `owner: {"id": 5}` both become `owner_id: 5`, coerced to an integer.
pub fn normalize_fks(body: Row, schema: &ModelSchema) -> Result<Row, ApiError> {
    let mut out = Map::new();
    for (key, value) in body {
        let base = match key.strip_suffix("_id") {
            Some(b) if schema.is_fk(b) => b.to_string(),
            _ if schema.is_fk(&key) => key.clone(),
            _ => {
                out.insert(key, value);
                continue;
            }
        };
        let column = format!("{}_id", base);
        let pk = match &value {
            Value::Null => Value::Null,
            Value::Number(n) => json!(n
                .as_i64()
                .ok_or_else(|| ApiError::bad_request("Invalid related id"))?),
            Value::String(s) => json!(s
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request("Invalid related id"))?),
            Value::Object(obj) => match obj.get("id").and_then(|v| v.as_i64()) {
                Some(id) => json!(id),
                None => return Err(ApiError::bad_request("Invalid related id")),
            },
            _ => return Err(ApiError::bad_request("Invalid related id")),
        };
        out.insert(column, pk);
    }
    Ok(out)
}

/// Fills audit identity fields declared by the schema. `created_by` and
/// `owner` only on create, `updated_by` on every write.
pub fn stamp_identity(body: &mut Row, schema: &ModelSchema, user_id: i64, creating: bool) {
    let stamp = |body: &mut Row, name: &str, schema: &ModelSchema| {
        if schema.has_field(name) {
            let column = if schema.is_fk(name) {
                format!("{}_id", name)
            } else {
                name.to_string()
            };
            body.insert(column, json!(user_id));
        }
    };
    if creating {
        stamp(body, "created_by", schema);
        if !body.contains_key("owner_id") && !body.contains_key("owner") {
            stamp(body, "owner", schema);
        }
    }
    stamp(body, "updated_by", schema);
}

/// Projects one stored row into the resource's exposed shape.
///
/// `fields_override` comes from the `fields` query parameter and suppresses
/// related expansion entirely.
pub fn project_row(
    row: &Row,
    resource: &ResourceDef,
    schema: &ModelSchema,
    fields_override: Option<&[String]>,
) -> Value {
    let whitelist: &[String] = fields_override.unwrap_or(&resource.list_fields);
    let expanding = fields_override.is_none();
    let mut out = Map::new();

    for field in whitelist {
        if let Some(base) = field.strip_suffix("_id") {
            if schema.is_fk(base) {
                if expanding && resource.related_fields.contains_key(base) {
                    // Handled below as an embed
                    continue;
                }
                let wrapped = match row.get(field) {
                    Some(Value::Null) | None => Value::Null,
                    Some(value) => json!({ "id": value }),
                };
                out.insert(base.to_string(), wrapped);
                continue;
            }
        }
        out.insert(
            field.clone(),
            row.get(field).cloned().unwrap_or(Value::Null),
        );
    }

    if expanding {
        for (relation, subset) in &resource.related_fields {
            let embedded = match row.get(relation) {
                Some(Value::Object(obj)) => {
                    let mut projected = Map::new();
                    for field in subset {
                        projected.insert(
                            field.clone(),
                            obj.get(field).cloned().unwrap_or(Value::Null),
                        );
                    }
                    Value::Object(projected)
                }
                // Nothing to expand resolves to an explicit null
                _ => Value::Null,
            };
            out.insert(relation.clone(), embedded);
        }
    }

    Value::Object(out)
}

/// Field-level diff recorded on updates: `{field: {old, new}}` for every
/// submitted value that actually changed.
pub fn diff_changes(old: &Row, new: &Row) -> Map<String, Value> {
    let mut diff = Map::new();
    for (key, value) in new {
        let previous = old.get(key).cloned().unwrap_or(Value::Null);
        if &previous != value {
            diff.insert(key.clone(), json!({ "old": previous, "new": value }));
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldKind};

    fn schema() -> ModelSchema {
        ModelSchema::new(
            "thing",
            "things",
            vec![
                FieldDef::pk("id"),
                FieldDef::new("name", FieldKind::Char),
                FieldDef::new("note", FieldKind::Char).nullable().blankable(),
                FieldDef::new("created_at", FieldKind::DateTime).with_default(),
                FieldDef::fk("owner", "user"),
                FieldDef::fk("created_by", "user"),
                FieldDef::fk("updated_by", "user"),
            ],
        )
    }

    fn body(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn whitelist_names_offending_keys() {
        let err = check_write_whitelist(
            &body(json!({"name": "x", "secret": "y", "rank": 3})),
            &["name".to_string()],
            false,
        )
        .unwrap_err();
        assert_eq!(err.status_code(), 403);
        let detail = err.detail();
        assert!(detail.contains("secret"));
        assert!(detail.contains("rank"));
        assert!(detail.starts_with("Changes on field(s):"));

        assert!(check_write_whitelist(
            &body(json!({"name": "x"})),
            &["name".to_string()],
            false
        )
        .is_ok());
    }

    #[test]
    fn empty_create_whitelist_is_a_config_error() {
        let err = check_write_whitelist(&body(json!({"name": "x"})), &[], true).unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn required_fields_collect_blank_and_null() {
        let schema = schema();
        let err = validate_required(
            &body(json!({"name": "", "note": null})),
            &schema,
        )
        .unwrap_err();
        let detail = err.detail();
        assert!(detail.contains("name can't be blank"));
        // Nullable fields never appear
        assert!(!detail.contains("note"));
        // Missing FKs count as null
        assert!(detail.contains("owner"));
    }

    #[test]
    fn fk_values_normalize_to_stored_column() {
        let schema = schema();
        let normalized = normalize_fks(
            body(json!({"name": "x", "owner": {"id": 7}, "created_by_id": "3"})),
            &schema,
        )
        .unwrap();
        assert_eq!(normalized.get("owner_id"), Some(&json!(7)));
        assert_eq!(normalized.get("created_by_id"), Some(&json!(3)));
        assert!(normalized.get("owner").is_none());

        assert!(normalize_fks(body(json!({"owner": "abc"})), &schema).is_err());
    }

    #[test]
    fn identity_stamps_on_create() {
        let schema = schema();
        let mut row = body(json!({"name": "x"}));
        stamp_identity(&mut row, &schema, 42, true);
        assert_eq!(row.get("created_by_id"), Some(&json!(42)));
        assert_eq!(row.get("updated_by_id"), Some(&json!(42)));
        assert_eq!(row.get("owner_id"), Some(&json!(42)));

        // A submitted owner survives stamping
        let mut row = body(json!({"name": "x", "owner_id": 7}));
        stamp_identity(&mut row, &schema, 42, true);
        assert_eq!(row.get("owner_id"), Some(&json!(7)));
    }

    #[test]
    fn projection_wraps_fk_and_strips_rest() {
        let schema = schema();
        let resource = crate::resource::ResourceDef::new("things", &schema)
            .list_fields(&["id", "name", "owner_id"]);
        let projected = project_row(
            &body(json!({"id": 1, "name": "x", "owner_id": 7, "internal": "z"})),
            &resource,
            &schema,
            None,
        );
        assert_eq!(projected["owner"], json!({"id": 7}));
        assert_eq!(projected["name"], json!("x"));
        assert!(projected.get("internal").is_none());
        assert!(projected.get("owner_id").is_none());
    }

    #[test]
    fn declared_relations_embed_subset_or_null() {
        let schema = schema();
        let resource = crate::resource::ResourceDef::new("things", &schema)
            .list_fields(&["id", "owner_id"])
            .related("owner", &["id", "email"]);

        let expanded = project_row(
            &body(json!({"id": 1, "owner_id": 7, "owner": {"id": 7, "email": "x@y.z", "password": "no"}})),
            &resource,
            &schema,
            None,
        );
        assert_eq!(expanded["owner"], json!({"id": 7, "email": "x@y.z"}));

        let missing = project_row(&body(json!({"id": 2, "owner_id": null})), &resource, &schema, None);
        assert_eq!(missing["owner"], Value::Null);

        // A fields override suppresses expansion and falls back to wrapping
        let overridden = project_row(
            &body(json!({"id": 1, "owner_id": 7})),
            &resource,
            &schema,
            Some(&["id".to_string(), "owner_id".to_string()]),
        );
        assert_eq!(overridden["owner"], json!({"id": 7}));
    }

    #[test]
    fn diff_records_only_changes() {
        let old = body(json!({"name": "a", "rank": 1}));
        let new = body(json!({"name": "b", "rank": 1}));
        let diff = diff_changes(&old, &new);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["name"], json!({"old": "a", "new": "b"}));
    }
}
