mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn middle_page_returns_the_middle_rows() {
    let app = common::build_app().await;
    let (status, body) = common::get(&app, "/things?page=2&limit=10").await;
    assert_eq!(status, StatusCode::OK);

    let ids = common::object_ids(&body);
    assert_eq!(ids, (11..=20).collect::<Vec<i64>>());

    let meta = &body["meta"];
    assert_eq!(meta["page"], json!(2));
    assert_eq!(meta["limit"], json!(10));
    let next = meta["next"].as_str().unwrap();
    assert!(next.contains("page=3"), "next link: {}", next);
    assert!(next.contains("limit=10"), "next link: {}", next);
    let previous = meta["previous"].as_str().unwrap();
    assert!(previous.contains("page=1"), "previous link: {}", previous);
}

#[tokio::test]
async fn first_page_has_no_previous_and_always_a_next() {
    let app = common::build_app().await;
    let (_, body) = common::get(&app, "/things?page=1&limit=10").await;
    assert_eq!(body["meta"]["previous"], Value::Null);
    assert!(body["meta"]["next"].is_string());

    // Past the end: empty page, next still advances
    let (_, body) = common::get(&app, "/things?page=4&limit=10").await;
    assert!(common::object_ids(&body).is_empty());
    assert!(body["meta"]["next"].as_str().unwrap().contains("page=5"));
}

#[tokio::test]
async fn junk_paging_params_fall_back_to_defaults() {
    let app = common::build_app().await;
    let (status, body) = common::get(&app, "/things?page=abc&limit=-5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["page"], json!(1));
    assert_eq!(body["meta"]["limit"], json!(25));
    assert_eq!(common::object_ids(&body).len(), 25);
}

#[tokio::test]
async fn limit_is_capped() {
    let app = common::build_app().await;
    let (_, body) = common::get(&app, "/things?limit=99999").await;
    assert_eq!(body["meta"]["limit"], json!(1000));
}

#[tokio::test]
async fn count_param_short_circuits_to_a_count() {
    let app = common::build_app().await;
    let (status, body) = common::get(&app, "/things?count=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"count": 25}));

    let (_, body) = common::get(&app, "/things?count=true&status=active").await;
    assert_eq!(body, json!({"count": 13}));
}

#[tokio::test]
async fn ordering_accepts_declared_fields_only() {
    let app = common::build_app().await;
    let (_, body) = common::get(&app, "/things?order_by=-rank&limit=3").await;
    assert_eq!(common::object_ids(&body), vec![25, 24, 23]);

    // Unknown field falls back to the default order
    let (_, body) = common::get(&app, "/things?order_by=-bogus&limit=3").await;
    assert_eq!(common::object_ids(&body), vec![1, 2, 3]);
}

#[tokio::test]
async fn fields_param_narrows_the_projection() {
    let app = common::build_app().await;
    let (_, body) = common::get(&app, "/things?fields=id,name&limit=1").await;
    let row = body["objects"][0].as_object().unwrap();
    let mut keys: Vec<&str> = row.keys().map(|k| k.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["id", "name"]);

    // Unknown names are dropped from the override
    let (_, body) = common::get(&app, "/things?fields=id,password&limit=1").await;
    let row = body["objects"][0].as_object().unwrap();
    assert_eq!(row.len(), 1);
    assert!(row.contains_key("id"));
}

#[tokio::test]
async fn list_rows_embed_declared_relations() {
    let app = common::build_app().await;
    let (_, body) = common::get(&app, "/things?limit=1").await;
    let row = &body["objects"][0];
    assert_eq!(row["owner"], json!({"id": 1, "email": "ada@example.com"}));
    // The raw stored column never leaks
    assert!(row.get("owner_id").is_none());
}
