#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use restbase::config::config;
use restbase::error::ApiError;
use restbase::pipeline::{self, AppState};
use restbase::resource::{CustomHandler, ResourceDef, ResourceRegistry};
use restbase::schema::{FieldDef, FieldKind, ModelSchema, SchemaRegistry};
use restbase::store::{
    KvStore, MemoryBackend, MemoryKv, MemoryMasterStore, TenantRecord,
};
use restbase::tenant::TenantRouter;

pub const SID: &str = "it-session";

pub struct TestApp {
    pub router: Router,
    pub backend: Arc<MemoryBackend>,
    pub kv: Arc<MemoryKv>,
}

fn thing_schema() -> ModelSchema {
    ModelSchema::new(
        "thing",
        "things",
        vec![
            FieldDef::pk("id"),
            FieldDef::new("name", FieldKind::Char),
            FieldDef::new("status", FieldKind::Char).blankable(),
            FieldDef::new("rank", FieldKind::Int).nullable(),
            FieldDef::new("created_at", FieldKind::DateTime).with_default(),
            FieldDef::fk("owner", "user").nullable(),
        ],
    )
}

fn user_schema() -> ModelSchema {
    ModelSchema::new(
        "user",
        "users",
        vec![FieldDef::pk("id"), FieldDef::new("email", FieldKind::Char)],
    )
}

fn user_rows() -> Vec<Value> {
    vec![
        json!({"id": 1, "email": "ada@example.com"}),
        json!({"id": 2, "email": "lin@example.com"}),
    ]
}

/// 25 rows, ids 1..=25. Odd ids are active, even archived; rank mirrors the
/// id; the first dozen belong to user 1.
fn thing_rows(prefix: &str) -> Vec<Value> {
    (1..=25)
        .map(|i| {
            json!({
                "id": i,
                "name": format!("{}-{:02}", prefix, i),
                "status": if i % 2 == 1 { "active" } else { "archived" },
                "rank": i,
                "created_at": format!("2024-01-{:02} 08:00:00", i),
                "owner_id": if i <= 12 { 1 } else { 2 },
            })
        })
        .collect()
}

struct SummaryRoute;

#[async_trait::async_trait]
impl CustomHandler for SummaryRoute {
    async fn handle(
        &self,
        resource: &ResourceDef,
        params: &[(String, String)],
        _body: Value,
    ) -> Result<Value, ApiError> {
        Ok(json!({"resource": resource.name, "params": params.len()}))
    }
}

fn tenant_record(id: &str) -> TenantRecord {
    TenantRecord {
        id: id.to_string(),
        host: Some("localhost".to_string()),
        user: Some("app".to_string()),
        password: Some("app".to_string()),
        port: None,
        active: true,
    }
}

pub async fn build_app() -> TestApp {
    let backend = Arc::new(MemoryBackend::new());
    let kv = Arc::new(MemoryKv::new());

    backend.register_relation("things", "owner", "users");
    backend.register_model("default", "thing", "things").await;
    backend.seed("default", "users", user_rows()).await;
    backend.seed("default", "things", thing_rows("thing")).await;

    // Distinct datasets for the tenant databases the router derives
    for tenant in ["alfa", "bravo"] {
        let db = format!("tenant_{}", tenant);
        backend.register_model(&db, "thing", "things").await;
        backend.seed(&db, "users", user_rows()).await;
        backend
            .seed(&db, "things", thing_rows(&format!("{}-thing", tenant)))
            .await;
    }

    let session = json!({
        "user": {"id": 1, "timezone": "+00:00"},
        "account": {"id": 1},
    });
    kv.set_ex(
        &format!("{}:sessions:{}", config().kv.prefix, SID),
        &session.to_string(),
        0,
    )
    .await
    .unwrap();

    let mut schemas = SchemaRegistry::new();
    schemas.register(thing_schema());
    schemas.register(user_schema());

    let mut resources = ResourceRegistry::default();
    resources.register(
        ResourceDef::new("things", &thing_schema())
            .search_fields(&["name"])
            .related("owner", &["id", "email"])
            .tagged()
            .route("summary", Arc::new(SummaryRoute)),
    );
    // Same model exposed read-only behind a response cache
    resources.register(
        ResourceDef::new("reports", &thing_schema())
            .methods(vec![Method::GET])
            .cached(60, true),
    );

    let master = Arc::new(MemoryMasterStore::new(vec![
        tenant_record("alfa"),
        tenant_record("bravo"),
    ]));
    let router = Arc::new(TenantRouter::new(master, kv.clone()));

    let state = AppState {
        resources: Arc::new(resources),
        schemas: Arc::new(schemas),
        router,
        backend: backend.clone(),
        kv: kv.clone(),
    };

    TestApp {
        router: pipeline::router(state),
        backend,
        kv,
    }
}

pub async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    body: Option<Value>,
    with_session: bool,
    tenant: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if with_session {
        builder = builder.header(header::COOKIE, format!("sid={}", SID));
    }
    if let Some(tenant) = tenant {
        builder = builder.header("x-tenant", tenant);
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let parsed = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, parsed)
}

pub async fn get(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None, true, None).await
}

pub async fn get_anon(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None, false, None).await
}

pub async fn patch(app: &TestApp, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::PATCH, uri, Some(body), true, None).await
}

pub async fn post(app: &TestApp, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body), true, None).await
}

pub async fn delete(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    send(app, Method::DELETE, uri, None, true, None).await
}

/// Ids of the rows in a list envelope, in response order.
pub fn object_ids(body: &Value) -> Vec<i64> {
    body["objects"]
        .as_array()
        .map(|rows| rows.iter().filter_map(|r| r["id"].as_i64()).collect())
        .unwrap_or_default()
}

/// Builds `/things?filter=<tree>` with proper encoding.
pub fn filter_uri(resource: &str, tree: &Value) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("filter", &tree.to_string())
        .finish();
    format!("/{}?{}", resource, query)
}
