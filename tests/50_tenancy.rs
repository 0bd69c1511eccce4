mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

async fn get_as(app: &common::TestApp, uri: &str, tenant: Option<&str>) -> serde_json::Value {
    let (status, body) = common::send(app, Method::GET, uri, None, true, tenant).await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn tenant_header_routes_to_its_own_database() {
    let app = common::build_app().await;

    let body = get_as(&app, "/things/1", Some("alfa")).await;
    assert_eq!(body["name"], json!("alfa-thing-01"));

    let body = get_as(&app, "/things/1", Some("bravo")).await;
    assert_eq!(body["name"], json!("bravo-thing-01"));

    // No header means the shared default
    let body = get_as(&app, "/things/1", None).await;
    assert_eq!(body["name"], json!("thing-01"));
}

#[tokio::test]
async fn writes_stay_inside_the_bound_tenant() {
    let app = common::build_app().await;

    let (status, body) = common::send(
        &app,
        Method::PATCH,
        "/things/1",
        Some(json!({"name": "alfa-renamed"})),
        true,
        Some("alfa"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("alfa-renamed"));

    let body = get_as(&app, "/things/1", Some("bravo")).await;
    assert_eq!(body["name"], json!("bravo-thing-01"));
    let body = get_as(&app, "/things/1", None).await;
    assert_eq!(body["name"], json!("thing-01"));
}

#[tokio::test]
async fn concurrent_requests_keep_their_bindings() {
    let app = common::build_app().await;

    let rounds = (0..10).map(|i| {
        let app = &app;
        async move {
            let (tenant, prefix) = if i % 2 == 0 {
                (Some("alfa"), "alfa-thing")
            } else {
                (Some("bravo"), "bravo-thing")
            };
            let body = get_as(app, "/things?limit=3", tenant).await;
            for row in body["objects"].as_array().unwrap() {
                let name = row["name"].as_str().unwrap();
                assert!(
                    name.starts_with(prefix),
                    "tenant {:?} saw row {}",
                    tenant,
                    name
                );
            }
        }
    });
    futures::future::join_all(rounds).await;
}
