//! Static per-entity resource definitions.
//!
//! A [`ResourceDef`] is the declarative surface of one exposed entity type:
//! which fields may be read, written, filtered, searched and ordered on,
//! which methods are allowed, and how responses cache. Definitions are
//! built once at startup from the model schema and registered by path
//! segment.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use serde_json::Value;

use crate::config::config;
use crate::error::ApiError;
use crate::schema::ModelSchema;

/// Response caching policy for GET handlers.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Scope the cache key to the session so payloads never cross users
    pub session_scoped: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: config().api.cache_ttl_secs,
            session_scoped: true,
        }
    }
}

/// A path-bound handler taking over from the generic verb handlers.
#[async_trait]
pub trait CustomHandler: Send + Sync {
    async fn handle(
        &self,
        resource: &ResourceDef,
        params: &[(String, String)],
        body: Value,
    ) -> Result<Value, ApiError>;
}

pub struct ResourceDef {
    /// URL path segment
    pub name: &'static str,
    /// Schema model this resource exposes
    pub model: &'static str,
    pub table: &'static str,
    pub authenticated: bool,
    pub allowed_methods: Vec<Method>,
    pub list_fields: Vec<String>,
    pub create_fields: Vec<String>,
    pub update_fields: Vec<String>,
    pub filter_fields: Vec<String>,
    pub search_fields: Vec<String>,
    pub order_fields: Vec<String>,
    /// Relation field -> subset of its fields to embed on reads
    pub related_fields: HashMap<String, Vec<String>>,
    pub default_order: String,
    pub default_limit: Option<i64>,
    pub cache: CachePolicy,
    pub has_tags: bool,
    /// Sub-path handlers checked before the generic detail route
    pub custom_routes: HashMap<String, Arc<dyn CustomHandler>>,
}

impl ResourceDef {
    /// Defaults derived from the schema: everything readable, every local
    /// non-pk field writable, filtering and ordering over stored columns.
    pub fn new(name: &'static str, schema: &ModelSchema) -> Self {
        let writable: Vec<String> = schema
            .defs()
            .iter()
            .filter(|d| !d.primary_key)
            .map(|d| d.name.to_string())
            .collect();
        Self {
            name,
            model: schema.name,
            table: schema.table,
            authenticated: true,
            allowed_methods: vec![Method::GET, Method::POST, Method::PATCH, Method::DELETE],
            list_fields: schema.fields.clone(),
            create_fields: writable.clone(),
            update_fields: writable,
            filter_fields: schema.fields.clone(),
            search_fields: Vec::new(),
            order_fields: schema.fields.clone(),
            related_fields: HashMap::new(),
            default_order: "id".to_string(),
            default_limit: None,
            cache: CachePolicy::default(),
            has_tags: false,
            custom_routes: HashMap::new(),
        }
    }

    pub fn open(mut self) -> Self {
        self.authenticated = false;
        self
    }

    pub fn methods(mut self, methods: Vec<Method>) -> Self {
        self.allowed_methods = methods;
        self
    }

    pub fn list_fields(mut self, fields: &[&str]) -> Self {
        self.list_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn create_fields(mut self, fields: &[&str]) -> Self {
        self.create_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn update_fields(mut self, fields: &[&str]) -> Self {
        self.update_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn filter_fields(mut self, fields: &[&str]) -> Self {
        self.filter_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn search_fields(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn order_fields(mut self, fields: &[&str]) -> Self {
        self.order_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn related(mut self, field: &str, subset: &[&str]) -> Self {
        self.related_fields.insert(
            field.to_string(),
            subset.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    pub fn order_default(mut self, order: &str) -> Self {
        self.default_order = order.to_string();
        self
    }

    pub fn limit_default(mut self, limit: i64) -> Self {
        self.default_limit = Some(limit);
        self
    }

    pub fn cached(mut self, ttl_secs: u64, session_scoped: bool) -> Self {
        self.cache = CachePolicy {
            enabled: true,
            ttl_secs,
            session_scoped,
        };
        self
    }

    pub fn tagged(mut self) -> Self {
        self.has_tags = true;
        self
    }

    pub fn route(mut self, path: &str, handler: Arc<dyn CustomHandler>) -> Self {
        self.custom_routes.insert(path.to_string(), handler);
        self
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    /// Requested order accepted only when the base name (leading `-`
    /// stripped) is declared orderable; otherwise the default holds.
    pub fn accept_order(&self, requested: Option<&str>) -> String {
        if let Some(raw) = requested {
            let base = raw.strip_prefix('-').unwrap_or(raw);
            if !base.is_empty() && self.order_fields.iter().any(|f| f == base) {
                return raw.to_string();
            }
        }
        self.default_order.clone()
    }

    pub fn limit(&self) -> i64 {
        self.default_limit.unwrap_or(config().api.default_limit)
    }
}

#[derive(Default)]
pub struct ResourceRegistry {
    resources: HashMap<&'static str, ResourceDef>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: ResourceDef) {
        if self.resources.insert(resource.name, resource).is_some() {
            panic!("duplicate resource registration");
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResourceDef> {
        self.resources.get(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.resources.keys().copied().collect()
    }
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
                FieldDef::new("rank", FieldKind::Int),
                FieldDef::fk("owner", "user"),
            ],
        )
    }

    #[test]
    fn defaults_follow_schema() {
        let schema = schema();
        let resource = ResourceDef::new("things", &schema);
        assert!(resource.list_fields.contains(&"owner_id".to_string()));
        assert!(resource.create_fields.contains(&"owner".to_string()));
        assert!(!resource.create_fields.contains(&"id".to_string()));
        assert_eq!(resource.default_order, "id");
    }

    #[test]
    fn order_acceptance_strips_descending_prefix() {
        let schema = schema();
        let resource = ResourceDef::new("things", &schema).order_fields(&["rank"]);
        assert_eq!(resource.accept_order(Some("-rank")), "-rank");
        assert_eq!(resource.accept_order(Some("rank")), "rank");
        // Unlisted fields fall back silently
        assert_eq!(resource.accept_order(Some("-name")), "id");
        assert_eq!(resource.accept_order(None), "id");
    }

    #[test]
    #[should_panic(expected = "duplicate resource")]
    fn duplicate_registration_is_fatal() {
        let schema = schema();
        let mut registry = ResourceRegistry::new();
        registry.register(ResourceDef::new("things", &schema));
        registry.register(ResourceDef::new("things", &schema));
    }
}
