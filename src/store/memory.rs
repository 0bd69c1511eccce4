//! In-memory fixture backend.
//!
//! Holds one table set per tenant database and evaluates predicates row by
//! row. Used by the test suite and useful for local development without a
//! live database. Tenancy follows the current binding, the same way the
//! relational backend picks its pool.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::filter::{CmpOp, SortDirection};
use crate::filter::Predicate;
use crate::tenant;

use super::{
    AttrMatch, AttributeStore, Backend, KvStore, MasterStore, Row, SelectQuery, StoreError,
    TagStore, TenantRecord,
};

#[derive(Default)]
struct TagState {
    // (id, context, name)
    tags: Vec<(i64, i64, String)>,
    // model -> (entity, tag)
    links: HashMap<String, Vec<(i64, i64)>>,
    next_id: i64,
}

#[derive(Default)]
struct DbState {
    tables: HashMap<String, Vec<Row>>,
    next_id: HashMap<String, i64>,
    // (model, attribute) -> checkbox flag
    attr_defs: HashMap<(String, String), bool>,
    // (model, attribute) -> (entity, stored text)
    attr_values: HashMap<(String, String), Vec<(i64, String)>>,
    // model -> backing table, for attribute universe scans
    model_tables: HashMap<String, String>,
    tags: TagState,
}

#[derive(Default)]
struct Shared {
    databases: RwLock<HashMap<String, DbState>>,
    // (table, field) -> related table
    relations: std::sync::RwLock<HashMap<(String, String), String>>,
}

pub struct MemoryBackend {
    shared: std::sync::Arc<Shared>,
    attrs: MemoryAttrs,
    tag_store: MemoryTags,
}

#[derive(Clone)]
pub struct MemoryAttrs {
    shared: std::sync::Arc<Shared>,
}

#[derive(Clone)]
pub struct MemoryTags {
    shared: std::sync::Arc<Shared>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let shared = std::sync::Arc::new(Shared::default());
        Self {
            attrs: MemoryAttrs {
                shared: shared.clone(),
            },
            tag_store: MemoryTags {
                shared: shared.clone(),
            },
            shared,
        }
    }

    fn db_name() -> String {
        tenant::current().database.clone()
    }

    /// Declares a many-to-one edge so `rel__field` columns and related
    /// expansion can embed the target row.
    pub fn register_relation(&self, table: &str, field: &str, target_table: &str) {
        if let Ok(mut relations) = self.shared.relations.write() {
            relations.insert(
                (table.to_string(), field.to_string()),
                target_table.to_string(),
            );
        }
    }

    /// Seeds rows into a table of the named tenant database.
    pub async fn seed(&self, database: &str, table: &str, rows: Vec<Value>) {
        let mut dbs = self.shared.databases.write().await;
        let db = dbs.entry(database.to_string()).or_default();
        let stored = db.tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Value::Object(map) = row {
                stored.push(map);
            }
        }
        let max = stored
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_i64()))
            .max()
            .unwrap_or(0);
        db.next_id.insert(table.to_string(), max + 1);
    }

    /// Declares a custom attribute for a model and its backing table.
    pub async fn seed_attribute(
        &self,
        database: &str,
        model: &str,
        table: &str,
        name: &str,
        checkbox: bool,
        values: Vec<(i64, &str)>,
    ) {
        let mut dbs = self.shared.databases.write().await;
        let db = dbs.entry(database.to_string()).or_default();
        db.model_tables
            .insert(model.to_string(), table.to_string());
        db.attr_defs
            .insert((model.to_string(), name.to_string()), checkbox);
        db.attr_values
            .entry((model.to_string(), name.to_string()))
            .or_default()
            .extend(values.into_iter().map(|(id, v)| (id, v.to_string())));
    }

    pub async fn register_model(&self, database: &str, model: &str, table: &str) {
        let mut dbs = self.shared.databases.write().await;
        let db = dbs.entry(database.to_string()).or_default();
        db.model_tables
            .insert(model.to_string(), table.to_string());
    }

    fn embed_relations(&self, db: &DbState, table: &str, rows: &mut [Row], fields: &[String]) {
        let relations = match self.shared.relations.read() {
            Ok(r) => r,
            Err(_) => return,
        };
        for field in fields {
            let Some(target) = relations.get(&(table.to_string(), field.clone())) else {
                continue;
            };
            let Some(target_rows) = db.tables.get(target) else {
                continue;
            };
            for row in rows.iter_mut() {
                let fk = row
                    .get(&format!("{}_id", field))
                    .and_then(|v| v.as_i64());
                let embedded = fk
                    .and_then(|id| {
                        target_rows
                            .iter()
                            .find(|r| r.get("id").and_then(|v| v.as_i64()) == Some(id))
                    })
                    .map(|r| Value::Object(r.clone()))
                    .unwrap_or(Value::Null);
                row.insert(field.clone(), embedded);
            }
        }
    }
}

fn order_key(row: &Row, column: &str) -> Value {
    match column.split_once("__") {
        None => row.get(column).cloned().unwrap_or(Value::Null),
        Some((rel, field)) => row
            .get(rel)
            .and_then(|v| v.as_object())
            .and_then(|o| o.get(field))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

fn value_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => {
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            } else {
                a.to_string().cmp(&b.to_string())
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, table: &str, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        let dbs = self.shared.databases.read().await;
        let Some(db) = dbs.get(&Self::db_name()) else {
            return Ok(vec![]);
        };
        let mut rows: Vec<Row> = db.tables.get(table).cloned().unwrap_or_default();

        // Relations referenced by the predicate or the ordering must be
        // embedded before evaluation
        let mut needed = std::collections::BTreeSet::new();
        if let Some(pred) = &query.predicate {
            pred.relation_prefixes(&mut needed);
        }
        for (column, _) in &query.order {
            if let Some((rel, _)) = column.split_once("__") {
                needed.insert(rel.to_string());
            }
        }
        for field in &query.expand {
            needed.insert(field.clone());
        }
        let needed: Vec<String> = needed.into_iter().collect();
        self.embed_relations(db, table, &mut rows, &needed);

        if let Some(pred) = &query.predicate {
            rows.retain(|row| pred.eval(row));
        }

        for (column, direction) in query.order.iter().rev() {
            rows.sort_by(|a, b| {
                let ord = value_cmp(&order_key(a, column), &order_key(b, column));
                match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let mut rows: Vec<Row> = rows.into_iter().skip(offset).collect();
        if let Some(limit) = query.limit {
            rows.truncate(limit.max(0) as usize);
        }

        // Drop embeds that were only needed for evaluation
        for row in rows.iter_mut() {
            let keep: Vec<String> = query.expand.clone();
            let extra: Vec<String> = needed
                .iter()
                .filter(|f| !keep.contains(f))
                .cloned()
                .collect();
            for field in extra {
                row.remove(&field);
            }
        }
        Ok(rows)
    }

    async fn select_by_pk(
        &self,
        table: &str,
        pk: i64,
        expand: &[String],
    ) -> Result<Option<Row>, StoreError> {
        let dbs = self.shared.databases.read().await;
        let Some(db) = dbs.get(&Self::db_name()) else {
            return Ok(None);
        };
        let Some(row) = db
            .tables
            .get(table)
            .and_then(|rows| {
                rows.iter()
                    .find(|r| r.get("id").and_then(|v| v.as_i64()) == Some(pk))
            })
            .cloned()
        else {
            return Ok(None);
        };
        let mut rows = vec![row];
        self.embed_relations(db, table, &mut rows, expand);
        Ok(rows.pop())
    }

    async fn count_distinct_pk(
        &self,
        table: &str,
        predicate: &Predicate,
    ) -> Result<i64, StoreError> {
        let query = SelectQuery {
            predicate: Some(predicate.clone()),
            ..Default::default()
        };
        let rows = self.select(table, &query).await?;
        let mut ids: Vec<i64> = rows
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_i64()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids.len() as i64)
    }

    async fn insert(&self, table: &str, values: &Row) -> Result<i64, StoreError> {
        let mut dbs = self.shared.databases.write().await;
        let db = dbs.entry(Self::db_name()).or_default();
        let next = db.next_id.entry(table.to_string()).or_insert(1);
        let id = *next;
        *next += 1;
        let mut row = values.clone();
        row.insert("id".to_string(), json!(id));
        db.tables.entry(table.to_string()).or_default().push(row);
        Ok(id)
    }

    async fn update_by_pk(&self, table: &str, pk: i64, values: &Row) -> Result<(), StoreError> {
        let mut dbs = self.shared.databases.write().await;
        let db = dbs.entry(Self::db_name()).or_default();
        let rows = db
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::NotFound("Not found".to_string()))?;
        let row = rows
            .iter_mut()
            .find(|r| r.get("id").and_then(|v| v.as_i64()) == Some(pk))
            .ok_or_else(|| StoreError::NotFound("Not found".to_string()))?;
        for (key, value) in values {
            row.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete_by_pk(&self, table: &str, pk: i64) -> Result<u64, StoreError> {
        let mut dbs = self.shared.databases.write().await;
        let db = dbs.entry(Self::db_name()).or_default();
        let Some(rows) = db.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| r.get("id").and_then(|v| v.as_i64()) != Some(pk));
        Ok((before - rows.len()) as u64)
    }

    fn attributes(&self) -> &dyn AttributeStore {
        &self.attrs
    }

    fn tags(&self) -> &dyn TagStore {
        &self.tag_store
    }
}

impl MemoryAttrs {
    fn universe(&self, db: &DbState, model: &str) -> Vec<i64> {
        db.model_tables
            .get(model)
            .and_then(|table| db.tables.get(table))
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r.get("id").and_then(|v| v.as_i64()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn attr_text_matches(text: &str, test: &AttrMatch) -> bool {
    let as_str = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match test {
        AttrMatch::Cmp {
            op,
            value,
            cast_decimal,
        } => {
            let expected = as_str(value);
            if *cast_decimal {
                let lhs: Option<rust_decimal::Decimal> = text.parse().ok();
                let rhs: Option<rust_decimal::Decimal> = expected.parse().ok();
                if let (Some(l), Some(r)) = (lhs, rhs) {
                    return match op {
                        CmpOp::Gte => l >= r,
                        CmpOp::Lte => l <= r,
                        CmpOp::Gt => l > r,
                        CmpOp::Lt => l < r,
                        _ => l == r,
                    };
                }
                return false;
            }
            match op {
                CmpOp::Eq => text == expected,
                CmpOp::IEq => text.eq_ignore_ascii_case(&expected),
                CmpOp::Contains => text.contains(&expected),
                CmpOp::IContains => text.to_lowercase().contains(&expected.to_lowercase()),
                CmpOp::StartsWith => text.starts_with(&expected),
                CmpOp::IStartsWith => {
                    text.to_lowercase().starts_with(&expected.to_lowercase())
                }
                CmpOp::EndsWith => text.ends_with(&expected),
                CmpOp::IEndsWith => text.to_lowercase().ends_with(&expected.to_lowercase()),
                CmpOp::Gt => text > expected.as_str(),
                CmpOp::Gte => text >= expected.as_str(),
                CmpOp::Lt => text < expected.as_str(),
                CmpOp::Lte => text <= expected.as_str(),
            }
        }
        AttrMatch::Range { low, high } => {
            let lo = as_str(low);
            let hi = as_str(high);
            text >= lo.as_str() && text <= hi.as_str()
        }
        AttrMatch::In { values } => values.iter().any(|v| as_str(v) == text),
    }
}

#[async_trait]
impl AttributeStore for MemoryAttrs {
    async fn ids_with_attribute(&self, model: &str, name: &str) -> Result<Vec<i64>, StoreError> {
        let dbs = self.shared.databases.read().await;
        let Some(db) = dbs.get(&MemoryBackend::db_name()) else {
            return Ok(vec![]);
        };
        Ok(db
            .attr_values
            .get(&(model.to_string(), name.to_string()))
            .map(|vals| vals.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default())
    }

    async fn ids_without_attribute(
        &self,
        model: &str,
        name: &str,
    ) -> Result<Vec<i64>, StoreError> {
        let dbs = self.shared.databases.read().await;
        let Some(db) = dbs.get(&MemoryBackend::db_name()) else {
            return Ok(vec![]);
        };
        let with: Vec<i64> = db
            .attr_values
            .get(&(model.to_string(), name.to_string()))
            .map(|vals| vals.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default();
        Ok(self
            .universe(db, model)
            .into_iter()
            .filter(|id| !with.contains(id))
            .collect())
    }

    async fn ids_with_blank_value(
        &self,
        model: &str,
        name: &str,
    ) -> Result<Vec<i64>, StoreError> {
        let dbs = self.shared.databases.read().await;
        let Some(db) = dbs.get(&MemoryBackend::db_name()) else {
            return Ok(vec![]);
        };
        Ok(db
            .attr_values
            .get(&(model.to_string(), name.to_string()))
            .map(|vals| {
                vals.iter()
                    .filter(|(_, text)| text.is_empty())
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ids_matching(
        &self,
        model: &str,
        name: &str,
        test: &AttrMatch,
    ) -> Result<Vec<i64>, StoreError> {
        let dbs = self.shared.databases.read().await;
        let Some(db) = dbs.get(&MemoryBackend::db_name()) else {
            return Ok(vec![]);
        };
        Ok(db
            .attr_values
            .get(&(model.to_string(), name.to_string()))
            .map(|vals| {
                vals.iter()
                    .filter(|(_, text)| attr_text_matches(text, test))
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_checkbox(&self, model: &str, name: &str) -> Result<bool, StoreError> {
        let dbs = self.shared.databases.read().await;
        Ok(dbs
            .get(&MemoryBackend::db_name())
            .and_then(|db| db.attr_defs.get(&(model.to_string(), name.to_string())))
            .copied()
            .unwrap_or(false))
    }
}

#[async_trait]
impl TagStore for MemoryTags {
    async fn get_or_create(&self, context: i64, name: &str) -> Result<i64, StoreError> {
        let mut dbs = self.shared.databases.write().await;
        let db = dbs.entry(MemoryBackend::db_name()).or_default();
        if let Some((id, _, _)) = db
            .tags
            .tags
            .iter()
            .find(|(_, c, n)| *c == context && n == name)
        {
            return Ok(*id);
        }
        db.tags.next_id += 1;
        let id = db.tags.next_id;
        db.tags.tags.push((id, context, name.to_string()));
        Ok(id)
    }

    async fn tag_ids_for(&self, model: &str, entity: i64) -> Result<Vec<i64>, StoreError> {
        let dbs = self.shared.databases.read().await;
        Ok(dbs
            .get(&MemoryBackend::db_name())
            .and_then(|db| db.tags.links.get(model))
            .map(|links| {
                links
                    .iter()
                    .filter(|(e, _)| *e == entity)
                    .map(|(_, t)| *t)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn tag_names_for(&self, model: &str, entity: i64) -> Result<Vec<String>, StoreError> {
        let dbs = self.shared.databases.read().await;
        let Some(db) = dbs.get(&MemoryBackend::db_name()) else {
            return Ok(vec![]);
        };
        let ids: Vec<i64> = db
            .tags
            .links
            .get(model)
            .map(|links| {
                links
                    .iter()
                    .filter(|(e, _)| *e == entity)
                    .map(|(_, t)| *t)
                    .collect()
            })
            .unwrap_or_default();
        Ok(db
            .tags
            .tags
            .iter()
            .filter(|(id, _, _)| ids.contains(id))
            .map(|(_, _, name)| name.clone())
            .collect())
    }

    async fn link(&self, model: &str, entity: i64, tag_ids: &[i64]) -> Result<(), StoreError> {
        let mut dbs = self.shared.databases.write().await;
        let db = dbs.entry(MemoryBackend::db_name()).or_default();
        let links = db.tags.links.entry(model.to_string()).or_default();
        for tag in tag_ids {
            if !links.contains(&(entity, *tag)) {
                links.push((entity, *tag));
            }
        }
        Ok(())
    }

    async fn unlink(&self, model: &str, entity: i64, tag_ids: &[i64]) -> Result<(), StoreError> {
        let mut dbs = self.shared.databases.write().await;
        let db = dbs.entry(MemoryBackend::db_name()).or_default();
        if let Some(links) = db.tags.links.get_mut(model) {
            links.retain(|(e, t)| *e != entity || !tag_ids.contains(t));
        }
        Ok(())
    }

    async fn ids_with_tags(&self, model: &str, tag_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let dbs = self.shared.databases.read().await;
        let mut out: Vec<i64> = dbs
            .get(&MemoryBackend::db_name())
            .and_then(|db| db.tags.links.get(model))
            .map(|links| {
                links
                    .iter()
                    .filter(|(_, t)| tag_ids.contains(t))
                    .map(|(e, _)| *e)
                    .collect()
            })
            .unwrap_or_default();
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }
}

// ---------------------------------------------------------------------------

/// Key/value store over a process-local map. A zero TTL never expires.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|(value, expiry)| {
            match expiry {
                Some(at) if *at <= Instant::now() => None,
                _ => Some(value.clone()),
            }
        }))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let expiry = if ttl_secs == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(ttl_secs))
        };
        self.entries
            .write()
            .await
            .insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Tenant system-of-record over a fixed list.
pub struct MemoryMasterStore {
    records: Vec<TenantRecord>,
}

impl MemoryMasterStore {
    pub fn new(records: Vec<TenantRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl MasterStore for MemoryMasterStore {
    async fn fetch_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .find(|r| r.id == tenant_id && r.active)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{with_binding, ConnectionDescriptor};
    use std::sync::Arc;

    fn binding(db: &str) -> Arc<ConnectionDescriptor> {
        ConnectionDescriptor::fixed(db)
    }

    #[tokio::test]
    async fn databases_do_not_leak_across_bindings() {
        let backend = MemoryBackend::new();
        backend
            .seed("tenant_a", "things", vec![json!({"id": 1, "name": "a"})])
            .await;
        backend
            .seed("tenant_b", "things", vec![json!({"id": 1, "name": "b"})])
            .await;

        let query = SelectQuery::default();
        let from_a = with_binding(binding("tenant_a"), backend.select("things", &query)).await;
        let from_b = with_binding(binding("tenant_b"), backend.select("things", &query)).await;
        assert_eq!(from_a.unwrap()[0].get("name"), Some(&json!("a")));
        assert_eq!(from_b.unwrap()[0].get("name"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn insert_allocates_past_seeded_ids() {
        let backend = MemoryBackend::new();
        backend
            .seed("t", "things", vec![json!({"id": 5, "name": "seeded"})])
            .await;
        let mut row = Row::new();
        row.insert("name".to_string(), json!("fresh"));
        let id = with_binding(binding("t"), backend.insert("things", &row))
            .await
            .unwrap();
        assert_eq!(id, 6);
    }

    #[tokio::test]
    async fn select_orders_filters_and_pages() {
        let backend = MemoryBackend::new();
        backend
            .seed(
                "t",
                "things",
                (1..=10)
                    .map(|i| json!({"id": i, "rank": 10 - i}))
                    .collect(),
            )
            .await;
        let query = SelectQuery {
            predicate: Some(Predicate::Cmp {
                column: "rank".to_string(),
                op: CmpOp::Gte,
                value: json!(3),
            }),
            order: vec![("rank".to_string(), SortDirection::Asc)],
            limit: Some(2),
            offset: Some(1),
            expand: vec![],
        };
        let rows = with_binding(binding("t"), backend.select("things", &query))
            .await
            .unwrap();
        let ranks: Vec<i64> = rows
            .iter()
            .map(|r| r.get("rank").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(ranks, vec![4, 5]);
    }

    #[tokio::test]
    async fn relation_embeds_follow_fk() {
        let backend = MemoryBackend::new();
        backend.register_relation("things", "owner", "users");
        backend
            .seed("t", "users", vec![json!({"id": 9, "email": "x@y.z"})])
            .await;
        backend
            .seed("t", "things", vec![json!({"id": 1, "owner_id": 9})])
            .await;

        let row = with_binding(
            binding("t"),
            backend.select_by_pk("things", 1, &["owner".to_string()]),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(
            row.get("owner").and_then(|o| o.get("email")),
            Some(&json!("x@y.z"))
        );

        // A rel__field predicate embeds transparently but the embed is
        // stripped from the result when not requested
        let query = SelectQuery {
            predicate: Some(Predicate::Cmp {
                column: "owner__email".to_string(),
                op: CmpOp::Eq,
                value: json!("x@y.z"),
            }),
            ..Default::default()
        };
        let rows = with_binding(binding("t"), backend.select("things", &query))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].get("owner").is_none());
    }

    #[tokio::test]
    async fn kv_ttl_zero_never_expires() {
        let kv = MemoryKv::new();
        kv.set_ex("k", "v", 0).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));
        kv.del("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn tag_identity_is_context_scoped() {
        let backend = MemoryBackend::new();
        let (a, b, again) = with_binding(binding("t"), async {
            let tags = backend.tags();
            let a = tags.get_or_create(1, "hot").await.unwrap();
            let b = tags.get_or_create(2, "hot").await.unwrap();
            let again = tags.get_or_create(1, "hot").await.unwrap();
            (a, b, again)
        })
        .await;
        assert_ne!(a, b);
        assert_eq!(a, again);
    }
}
