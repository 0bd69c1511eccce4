//! Request dispatch.
//!
//! Every request runs one strictly ordered pipeline: resolve the session,
//! bind the tenant for the duration of the task, authorize the method,
//! consult the response cache, parse the body, compile filters, paginate,
//! order, invoke the verb handler, project and serialize, then write the
//! cache. Any stage can short-circuit to an error envelope.

pub mod paginate;

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::config;
use crate::error::ApiError;
use crate::filter::dates::parse_tz;
use crate::filter::{parse_rule_tree, FilterCompiler, Predicate, SortDirection};
use crate::projection::{
    check_write_whitelist, diff_changes, normalize_fks, project_row, stamp_identity,
    validate_required,
};
use crate::projection::tags::sync_tags;
use crate::resource::{ResourceDef, ResourceRegistry};
use crate::schema::{ModelSchema, SchemaRegistry};
use crate::store::{Backend, KvStore, Row, SelectQuery};
use crate::tenant::{self, TenantRouter};

/// Query parameters consumed by the pipeline itself; everything else is a
/// candidate `field__operator` filter pair.
const RESERVED_PARAMS: [&str; 9] = [
    "page",
    "limit",
    "order_by",
    "search",
    "tags",
    "tags_operator",
    "fields",
    "count",
    "filter",
];

const TENANT_HEADER: &str = "x-tenant";
const SESSION_COOKIE: &str = "sid";

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub user: SessionUser,
    pub account: SessionAccount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    #[serde(default)]
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionAccount {
    pub id: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub resources: Arc<ResourceRegistry>,
    pub schemas: Arc<SchemaRegistry>,
    pub router: Arc<TenantRouter>,
    pub backend: Arc<dyn Backend>,
    pub kv: Arc<dyn KvStore>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/:resource",
            get(collection).post(collection),
        )
        .route(
            "/:resource/:id",
            get(member).post(member).patch(member).delete(member),
        )
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"success": true, "status": "healthy"}))
}

async fn collection(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    req: Request,
) -> Response {
    run(state, resource, None, req).await
}

async fn member(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    req: Request,
) -> Response {
    run(state, resource, Some(id), req).await
}

async fn run(state: AppState, resource: String, id: Option<String>, req: Request) -> Response {
    match dispatch(&state, &resource, id.as_deref(), req).await {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn dispatch(
    state: &AppState,
    resource_name: &str,
    id: Option<&str>,
    req: Request,
) -> Result<Value, ApiError> {
    let resource = state
        .resources
        .get(resource_name)
        .ok_or_else(|| ApiError::not_found("Unknown resource"))?;
    let schema = state.schemas.model(resource.model)?;

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let params: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    let headers = req.headers().clone();

    // resolve-session
    let sid = cookie(&headers, SESSION_COOKIE);
    let session = match &sid {
        Some(sid) => load_session(state.kv.as_ref(), sid).await?,
        None => None,
    };
    if resource.authenticated && session.is_none() {
        return Err(ApiError::unauthorized("Invalid session"));
    }

    // resolve-identity/tenant: the binding scopes the rest of the pipeline
    let tenant_id = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let binding = state.router.resolve(tenant_id.as_deref()).await?;

    // authorize(method)
    if !resource.allows(&method) {
        return Err(ApiError::method_not_allowed("Method not allowed"));
    }
    let numeric_id = match id {
        Some(raw) => match raw.parse::<i64>() {
            Ok(pk) => Some(pk),
            Err(_) => {
                // Non-numeric member segments dispatch to custom routes
                return custom_route(state, resource, raw, &params, binding, req).await;
            }
        },
        None => None,
    };
    if method == Method::POST && numeric_id.is_some() {
        return Err(ApiError::forbidden("Path not allowed"));
    }

    tenant::with_binding(binding, async {
        // check-cache (GET only)
        let cache_key = cache_key(resource, sid.as_deref(), &path, &query);
        if method == Method::GET && resource.cache.enabled {
            if let Some(hit) = state.kv.get(&cache_key).await.ok().flatten() {
                if let Ok(value) = serde_json::from_str(&hit) {
                    debug!(path = %path, "cache hit");
                    return Ok(value);
                }
            }
        }

        // parse-body: unparsable input degrades to an empty object
        let body = if method == Method::POST || method == Method::PATCH {
            read_body(req).await
        } else {
            Map::new()
        };

        let ctx = RequestContext {
            state,
            resource,
            schema,
            session: session.as_ref(),
            path: &path,
            params: &params,
        };
        let result = match (method.as_str(), numeric_id) {
            ("GET", None) => ctx.list().await?,
            ("GET", Some(pk)) => ctx.detail(pk).await?,
            ("POST", None) => ctx.create(body).await?,
            ("PATCH", Some(pk)) => ctx.update(pk, body).await?,
            ("DELETE", Some(pk)) => ctx.delete(pk).await?,
            _ => return Err(ApiError::method_not_allowed("Method not allowed")),
        };

        // write-cache
        if method == Method::GET && resource.cache.enabled {
            if let Ok(serialized) = serde_json::to_string(&result) {
                if let Err(err) = state
                    .kv
                    .set_ex(&cache_key, &serialized, resource.cache.ttl_secs)
                    .await
                {
                    warn!(error = %err, "cache write failed");
                }
            }
        }
        Ok(result)
    })
    .await
}

async fn custom_route(
    state: &AppState,
    resource: &ResourceDef,
    segment: &str,
    params: &[(String, String)],
    binding: Arc<crate::tenant::ConnectionDescriptor>,
    req: Request,
) -> Result<Value, ApiError> {
    let handler = resource
        .custom_routes
        .get(segment)
        .ok_or_else(|| ApiError::not_found("Not found"))?
        .clone();
    let body = if req.method() == Method::POST || req.method() == Method::PATCH {
        Value::Object(read_body(req).await)
    } else {
        Value::Null
    };
    tenant::with_binding(binding, handler.handle(resource, params, body)).await
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

async fn load_session(kv: &dyn KvStore, sid: &str) -> Result<Option<Session>, ApiError> {
    let key = format!("{}:sessions:{}", config().kv.prefix, sid);
    let Some(raw) = kv.get(&key).await.map_err(ApiError::from)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(session) => Ok(Some(session)),
        Err(err) => {
            warn!(error = %err, "malformed session payload");
            Ok(None)
        }
    }
}

fn cache_key(resource: &ResourceDef, sid: Option<&str>, path: &str, query: &str) -> String {
    let prefix = &config().kv.prefix;
    match (resource.cache.session_scoped, sid) {
        (true, Some(sid)) => format!("{}:cache:{}:{}?{}", prefix, sid, path, query),
        _ => format!("{}:cache:{}?{}", prefix, path, query),
    }
}

async fn read_body(req: Request) -> Row {
    match axum::body::to_bytes(req.into_body(), 1024 * 1024).await {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        Err(_) => Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Verb handlers

struct RequestContext<'a> {
    state: &'a AppState,
    resource: &'a ResourceDef,
    schema: &'a ModelSchema,
    session: Option<&'a Session>,
    path: &'a str,
    params: &'a [(String, String)],
}

impl<'a> RequestContext<'a> {
    fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn user_id(&self) -> i64 {
        self.session.map(|s| s.user.id).unwrap_or(0)
    }

    fn tag_context(&self) -> i64 {
        self.session.map(|s| s.account.id).unwrap_or(0)
    }

    fn compiler(&self) -> FilterCompiler<'_> {
        let tz = parse_tz(
            self.session
                .map(|s| s.user.timezone.as_str())
                .unwrap_or(""),
        );
        FilterCompiler::new(
            self.state.schemas.as_ref(),
            self.schema,
            self.state.backend.attributes(),
            self.state.backend.tags(),
            tz,
        )
    }

    /// Field projection override from the `fields` parameter, restricted to
    /// the resource's exposed set.
    fn fields_override(&self) -> Option<Vec<String>> {
        let raw = self.param("fields")?;
        let requested: Vec<String> = raw
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| self.resource.list_fields.contains(f))
            .collect();
        if requested.is_empty() {
            None
        } else {
            Some(requested)
        }
    }

    fn order(&self) -> (String, SortDirection) {
        let accepted = self.resource.accept_order(self.param("order_by"));
        match accepted.strip_prefix('-') {
            Some(base) => (base.to_string(), SortDirection::Desc),
            None => (accepted, SortDirection::Asc),
        }
    }

    /// build-filters: explicit rule tree, simple pairs, search and tags,
    /// all conjoined.
    async fn build_predicate(&self) -> Result<Predicate, ApiError> {
        let compiler = self.compiler();
        let mut parts = Vec::new();

        if let Some(raw) = self.param("filter") {
            match parse_rule_tree(raw)? {
                // Filtering was requested but the tree is empty: match nothing
                None => parts.push(Predicate::Nothing),
                Some(node) => {
                    if let Some(pred) = compiler.compile(&node).await? {
                        parts.push(pred);
                    }
                }
            }
        }

        let simple: Vec<(String, String)> = self
            .params
            .iter()
            .filter(|(key, _)| !RESERVED_PARAMS.contains(&key.as_str()))
            .cloned()
            .collect();
        if !simple.is_empty() {
            parts.push(compiler.compile_params(&simple, &self.resource.filter_fields)?);
        }

        if let Some(term) = self.param("search").filter(|t| !t.is_empty()) {
            parts.push(compiler.search(term, &self.resource.search_fields));
        }

        if let Some(raw) = self.param("tags").filter(|t| !t.is_empty()) {
            let ids: Vec<i64> = raw.split(',').filter_map(|t| t.trim().parse().ok()).collect();
            let require_all = self
                .param("tags_operator")
                .map(|op| op.eq_ignore_ascii_case("and"))
                .unwrap_or(false);
            parts.push(compiler.tags_filter(&ids, require_all).await?);
        }

        Ok(Predicate::and(parts))
    }

    async fn list(&self) -> Result<Value, ApiError> {
        let predicate = self.build_predicate().await?;

        if self.param("count").is_some() {
            let count = self
                .state
                .backend
                .count_distinct_pk(self.resource.table, &predicate)
                .await?;
            return Ok(json!({ "count": count }));
        }

        let page = paginate::page_params(self.params, self.resource.limit());
        let fields_override = self.fields_override();
        let expand: Vec<String> = if fields_override.is_none() {
            self.resource.related_fields.keys().cloned().collect()
        } else {
            Vec::new()
        };

        let query = SelectQuery {
            predicate: Some(predicate),
            order: vec![self.order()],
            limit: Some(page.limit),
            offset: Some(page.offset()),
            expand,
        };
        let rows = self.state.backend.select(self.resource.table, &query).await?;
        let objects: Vec<Value> = rows
            .iter()
            .map(|row| project_row(row, self.resource, self.schema, fields_override.as_deref()))
            .collect();

        Ok(json!({
            "meta": paginate::meta(self.path, self.params, page),
            "objects": objects,
        }))
    }

    async fn detail(&self, pk: i64) -> Result<Value, ApiError> {
        let expand: Vec<String> = self.resource.related_fields.keys().cloned().collect();
        let row = self
            .state
            .backend
            .select_by_pk(self.resource.table, pk, &expand)
            .await?
            .ok_or_else(|| ApiError::not_found("Not found"))?;
        self.project_entity(&row, pk).await
    }

    async fn create(&self, mut body: Row) -> Result<Value, ApiError> {
        let tags = self.take_tags(&mut body);

        check_write_whitelist(&body, &self.resource.create_fields, true)?;
        let mut row = normalize_fks(body, self.schema)?;
        stamp_identity(&mut row, self.schema, self.user_id(), true);
        validate_required(&row, self.schema)?;

        let pk = self.state.backend.insert(self.resource.table, &row).await?;
        info!(resource = self.resource.name, id = pk, "created");

        if let Some(tags) = tags {
            sync_tags(
                self.state.backend.tags(),
                self.resource.model,
                pk,
                self.tag_context(),
                &tags,
            )
            .await
            .map_err(ApiError::from)?;
        }
        self.detail(pk).await
    }

    async fn update(&self, pk: i64, mut body: Row) -> Result<Value, ApiError> {
        let old = self
            .state
            .backend
            .select_by_pk(self.resource.table, pk, &[])
            .await?
            .ok_or_else(|| ApiError::not_found("Not found"))?;

        let tags = self.take_tags(&mut body);
        check_write_whitelist(&body, &self.resource.update_fields, false)?;
        let mut row = normalize_fks(body, self.schema)?;
        stamp_identity(&mut row, self.schema, self.user_id(), false);

        let changes = diff_changes(&old, &row);
        if !changes.is_empty() {
            self.state
                .backend
                .update_by_pk(self.resource.table, pk, &row)
                .await?;
            info!(
                resource = self.resource.name,
                id = pk,
                changes = %serde_json::Value::Object(changes),
                "updated"
            );
        }

        if let Some(tags) = tags {
            sync_tags(
                self.state.backend.tags(),
                self.resource.model,
                pk,
                self.tag_context(),
                &tags,
            )
            .await
            .map_err(ApiError::from)?;
        }
        self.detail(pk).await
    }

    async fn delete(&self, pk: i64) -> Result<Value, ApiError> {
        let deleted = self
            .state
            .backend
            .delete_by_pk(self.resource.table, pk)
            .await?;
        if deleted == 0 {
            return Err(ApiError::not_found("Not found"));
        }
        info!(resource = self.resource.name, id = pk, "deleted");
        Ok(json!({ "success": true, "id": pk, "message": "Deleted" }))
    }

    /// Detail projection plus the tag list for tagged resources.
    async fn project_entity(&self, row: &Row, pk: i64) -> Result<Value, ApiError> {
        let mut projected = project_row(row, self.resource, self.schema, None);
        if self.resource.has_tags {
            let names = self
                .state
                .backend
                .tags()
                .tag_names_for(self.resource.model, pk)
                .await
                .map_err(ApiError::from)?;
            if let Value::Object(map) = &mut projected {
                map.insert("tags".to_string(), json!(names));
            }
        }
        Ok(projected)
    }

    /// Pops a submitted tag list off the body before whitelist checks; only
    /// tagged resources accept one.
    fn take_tags(&self, body: &mut Row) -> Option<Vec<String>> {
        if !self.resource.has_tags {
            return None;
        }
        let raw = body.remove("tags")?;
        let names = raw
            .as_array()?
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect();
        Some(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_parsing_tolerates_spacing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; sid=abc123;other=x"),
        );
        assert_eq!(cookie(&headers, "sid"), Some("abc123".to_string()));
        assert_eq!(cookie(&headers, "missing"), None);
    }

    #[test]
    fn cache_keys_scope_to_session_when_asked() {
        let schema = ModelSchema::new(
            "thing",
            "things",
            vec![crate::schema::FieldDef::pk("id")],
        );
        let scoped = ResourceDef::new("things", &schema).cached(60, true);
        let shared = ResourceDef::new("things", &schema).cached(60, false);
        let with_session = cache_key(&scoped, Some("s1"), "/things", "page=2");
        let without = cache_key(&shared, Some("s1"), "/things", "page=2");
        assert!(with_session.contains(":s1:"));
        assert!(!without.contains(":s1:"));
        assert_ne!(with_session, without);
    }
}
