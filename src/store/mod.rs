//! Backend and collaborator seams.
//!
//! The relational engine, the session/cache service and the tenant
//! system-of-record are external collaborators; these traits are the only
//! surface the pipeline and the filter compiler touch. `PgBackend` is the
//! sqlx implementation, `MemoryBackend`/`MemoryKv` back the test fixtures.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::filter::{CmpOp, Predicate, SortDirection};

pub use memory::{MemoryBackend, MemoryKv, MemoryMasterStore};
pub use postgres::{PgBackend, PgMasterStore};

/// Rows cross the seam as JSON objects; relation expansions arrive as
/// nested objects under the relation's field name.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Query error: {0}")]
    Query(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// One backend read: predicate plus ordering and slicing.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub predicate: Option<Predicate>,
    pub order: Vec<(String, SortDirection)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Relation paths to expand into nested objects
    pub expand: Vec<String>,
}

/// Custom-attribute value test resolved into an identifier set.
#[derive(Debug, Clone)]
pub enum AttrMatch {
    Cmp {
        op: CmpOp,
        value: Value,
        /// Stored text is cast to a decimal before ordering comparisons
        cast_decimal: bool,
    },
    Range {
        low: Value,
        high: Value,
    },
    In {
        values: Vec<Value>,
    },
}

/// Identifier-set resolution over the indirect key/value attribute table.
#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Entities holding any stored value for the attribute.
    async fn ids_with_attribute(&self, model: &str, name: &str) -> Result<Vec<i64>, StoreError>;

    /// Entities with no stored row for the attribute at all.
    async fn ids_without_attribute(&self, model: &str, name: &str)
        -> Result<Vec<i64>, StoreError>;

    /// Entities whose stored value is the empty string.
    async fn ids_with_blank_value(&self, model: &str, name: &str)
        -> Result<Vec<i64>, StoreError>;

    /// Entities whose stored value satisfies the test.
    async fn ids_matching(
        &self,
        model: &str,
        name: &str,
        test: &AttrMatch,
    ) -> Result<Vec<i64>, StoreError>;

    /// Whether the attribute is presented as a checkbox (boolean semantics).
    async fn is_checkbox(&self, model: &str, name: &str) -> Result<bool, StoreError>;
}

/// Context-scoped tag identity and entity associations.
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn get_or_create(&self, context: i64, name: &str) -> Result<i64, StoreError>;
    async fn tag_ids_for(&self, model: &str, entity: i64) -> Result<Vec<i64>, StoreError>;
    async fn tag_names_for(&self, model: &str, entity: i64) -> Result<Vec<String>, StoreError>;
    async fn link(&self, model: &str, entity: i64, tag_ids: &[i64]) -> Result<(), StoreError>;
    async fn unlink(&self, model: &str, entity: i64, tag_ids: &[i64]) -> Result<(), StoreError>;
    /// Entities associated with any of the given tags.
    async fn ids_with_tags(&self, model: &str, tag_ids: &[i64]) -> Result<Vec<i64>, StoreError>;
}

/// The relational backend. Queries run against the connection bound to the
/// current unit of work (see `tenant::current`).
#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, table: &str, query: &SelectQuery) -> Result<Vec<Row>, StoreError>;

    async fn select_by_pk(
        &self,
        table: &str,
        pk: i64,
        expand: &[String],
    ) -> Result<Option<Row>, StoreError>;

    /// Count of distinct primary keys over the same predicate as the row
    /// query; never built by rewriting query text.
    async fn count_distinct_pk(
        &self,
        table: &str,
        predicate: &Predicate,
    ) -> Result<i64, StoreError>;

    /// Inserts one row, returning the new primary key.
    async fn insert(&self, table: &str, values: &Row) -> Result<i64, StoreError>;

    async fn update_by_pk(&self, table: &str, pk: i64, values: &Row) -> Result<(), StoreError>;

    async fn delete_by_pk(&self, table: &str, pk: i64) -> Result<u64, StoreError>;

    fn attributes(&self) -> &dyn AttributeStore;

    fn tags(&self) -> &dyn TagStore;
}

/// Opaque key/value service holding sessions and cached responses.
/// Eventually-present, not transactionally consistent with the backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
}

/// Connection attributes fetched from the tenant system-of-record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TenantRecord {
    pub id: String,
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub active: bool,
}

/// System-of-record lookup, always against the fixed master binding.
#[async_trait]
pub trait MasterStore: Send + Sync {
    async fn fetch_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>, StoreError>;
}
