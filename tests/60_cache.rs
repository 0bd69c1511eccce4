mod common;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn cached_reads_are_served_verbatim_until_expiry() {
    let app = common::build_app().await;

    let (status, first) = common::get(&app, "/reports/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["name"], json!("thing-01"));

    // Mutate through the uncached surface
    let (status, _) = common::patch(&app, "/things/1", json!({"name": "renamed"})).await;
    assert_eq!(status, StatusCode::OK);

    // The cached surface still serves the stored response
    let (_, second) = common::get(&app, "/reports/1").await;
    assert_eq!(second, first);

    // The uncached surface sees the write immediately
    let (_, live) = common::get(&app, "/things/1").await;
    assert_eq!(live["name"], json!("renamed"));
}

#[tokio::test]
async fn cache_keys_include_the_query_string() {
    let app = common::build_app().await;

    let (_, one) = common::get(&app, "/reports?limit=1").await;
    let (_, two) = common::get(&app, "/reports?limit=2").await;
    assert_eq!(common::object_ids(&one).len(), 1);
    assert_eq!(common::object_ids(&two).len(), 2);
}

#[tokio::test]
async fn writes_are_never_cached() {
    let app = common::build_app().await;

    common::patch(&app, "/things/2", json!({"name": "first"})).await;
    let (_, body) = common::patch(&app, "/things/2", json!({"name": "second"})).await;
    assert_eq!(body["name"], json!("second"));
}
