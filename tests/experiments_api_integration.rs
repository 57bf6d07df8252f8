//! Integration tests for the A/B test endpoints

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use linkscope::clock::ManualClock;
use linkscope::config::Config;
use linkscope::storage::{EventStore, SqliteStore};
use linkscope::App;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tower::ServiceExt;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
}

async fn create_test_app() -> (App, Arc<ManualClock>) {
    let store = SqliteStore::new("sqlite::memory:", 1).await.unwrap();
    store.init().await.unwrap();
    let clock = Arc::new(ManualClock::new(t0()));
    let app = App::new(Config::default(), Arc::new(store), clock.clone());
    (app, clock)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn test_definition(name: &str, start_immediately: bool) -> Value {
    json!({
        "name": name,
        "variants": [
            { "name": "control", "short_code": format!("{name}-a"), "is_control": true },
            { "name": "bold-cta", "short_code": format!("{name}-b") },
        ],
        "start_immediately": start_immediately,
    })
}

async fn create(router: &Router, name: &str, start_immediately: bool) -> Value {
    let (status, test) = send(router, "POST", "/ab-test", Some(test_definition(name, start_immediately))).await;
    assert_eq!(status, StatusCode::CREATED, "{test}");
    test
}

#[tokio::test]
async fn test_create_assign_convert_and_analyse() {
    let (app, _) = create_test_app().await;
    let router = app.router();

    let test = create(&router, "checkout", true).await;
    assert_eq!(test["state"], "active");
    assert_eq!(test["variants"][0]["traffic_split"], 0.5);
    let id = test["id"].as_i64().unwrap();

    let uri = format!("/ab-test/{id}/assign");
    let (status, first) = send(&router, "POST", &uri, Some(json!({ "session_id": "visitor-1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["exposure_recorded"], true);

    let (_, again) = send(&router, "POST", &uri, Some(json!({ "session_id": "visitor-1" }))).await;
    assert_eq!(again["exposure_recorded"], false);
    assert_eq!(again["variant_id"], first["variant_id"]);

    let uri = format!("/ab-test/{id}/convert");
    let (_, converted) = send(&router, "POST", &uri, Some(json!({ "session_id": "visitor-1" }))).await;
    assert_eq!(converted["counted"], true);
    assert_eq!(converted["variant_id"], first["variant_id"]);

    let (_, twice) = send(&router, "POST", &uri, Some(json!({ "session_id": "visitor-1" }))).await;
    assert_eq!(twice["counted"], false);

    let (_, stranger) = send(&router, "POST", &uri, Some(json!({ "session_id": "never-assigned" }))).await;
    assert_eq!(stranger["counted"], false);

    // One session is far too few for either analysis
    let (status, significance) = send(&router, "GET", &format!("/ab-test/{id}/significance"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(significance["comparisons"][0]["status"], "insufficient_data");
    assert_eq!(significance["comparisons"][0]["confidence_level"], 95);

    let (status, sequential) = send(&router, "GET", &format!("/ab-test/{id}/sequential"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sequential["comparisons"][0]["status"], "insufficient_data");

    let (status, overview) = send(&router, "GET", &format!("/ab-test/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["test"]["id"], id);
    let variants = overview["variants"].as_array().unwrap();
    assert_eq!(variants.len(), 2);
    let sessions: u64 = variants.iter().map(|v| v["sessions"].as_u64().unwrap()).sum();
    let conversions: u64 = variants.iter().map(|v| v["conversions"].as_u64().unwrap()).sum();
    assert_eq!((sessions, conversions), (1, 1));
}

async fn variant_counters(router: &Router, id: i64) -> (u64, u64) {
    let (status, overview) = send(router, "GET", &format!("/ab-test/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let variants = overview["variants"].as_array().unwrap();
    let sessions = variants.iter().map(|v| v["sessions"].as_u64().unwrap()).sum();
    let conversions = variants.iter().map(|v| v["conversions"].as_u64().unwrap()).sum();
    (sessions, conversions)
}

#[tokio::test]
async fn test_ingested_events_feed_variant_counters() {
    let (app, _) = create_test_app().await;
    let router = app.router();

    let test = create(&router, "landing", true).await;
    let id = test["id"].as_i64().unwrap();

    // Assigned through the API, then arrives through the redirect edge
    let (_, assignment) = send(
        &router,
        "POST",
        &format!("/ab-test/{id}/assign"),
        Some(json!({ "session_id": "v1" })),
    )
    .await;
    let assigned_code = assignment["short_code"].as_str().unwrap().to_string();
    let (status, _) = send(
        &router,
        "POST",
        "/events/click",
        Some(json!({ "session_id": "v1", "short_code": assigned_code })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(variant_counters(&router, id).await, (1, 0));

    let (status, _) = send(
        &router,
        "POST",
        "/attribution/conversion",
        Some(json!({
            "session_id": "v1",
            "short_code": assigned_code,
            "conversion_type": "signup",
            "value": 10.0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(variant_counters(&router, id).await, (1, 1));

    // Never assigned: only the click on its hashed variant counts
    for code in ["landing-a", "landing-b"] {
        send(
            &router,
            "POST",
            "/events/click",
            Some(json!({ "session_id": "v2", "short_code": code })),
        )
        .await;
    }
    assert_eq!(variant_counters(&router, id).await, (2, 1));

    // Conversions from sessions without an exposure are not counted
    for session in ["v2", "v3", "v2"] {
        send(
            &router,
            "POST",
            "/attribution/conversion",
            Some(json!({
                "session_id": session,
                "short_code": "landing-a",
                "conversion_type": "signup",
            })),
        )
        .await;
    }
    assert_eq!(variant_counters(&router, id).await, (2, 2));
}

#[tokio::test]
async fn test_deterministic_split_is_uniform() {
    let (app, _) = create_test_app().await;
    let router = app.router();
    let test = create(&router, "landing", true).await;
    let id = test["id"].as_i64().unwrap();

    for i in 0..2000 {
        app.state
            .experiments
            .assign(id, &format!("session-{i}"))
            .await
            .unwrap();
    }

    let (_, overview) = send(&router, "GET", &format!("/ab-test/{id}"), None).await;
    for variant in overview["variants"].as_array().unwrap() {
        let sessions = variant["sessions"].as_i64().unwrap();
        assert!((sessions - 1000).abs() <= 50, "unbalanced split: {sessions}");
    }
}

#[tokio::test]
async fn test_draft_lifecycle_and_stop_rules() {
    let (app, _) = create_test_app().await;
    let router = app.router();
    let test = create(&router, "pricing", false).await;
    assert_eq!(test["state"], "draft");
    let id = test["id"].as_i64().unwrap();
    let challenger = test["variants"][1]["id"].as_i64().unwrap();

    // Drafts resolve variants without counting exposures
    let (_, assignment) = send(
        &router,
        "POST",
        &format!("/ab-test/{id}/assign"),
        Some(json!({ "session_id": "early" })),
    )
    .await;
    assert_eq!(assignment["exposure_recorded"], false);

    let stop_uri = format!("/ab-test/{id}/stop");
    let (status, body) = send(&router, "POST", &stop_uri, Some(json!({ "reason": "too early" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_state_transition");

    let (status, started) = send(&router, "POST", &format!("/ab-test/{id}/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["state"], "active");

    let (status, body) = send(&router, "POST", &stop_uri, Some(json!({ "reason": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = send(
        &router,
        "POST",
        &stop_uri,
        Some(json!({ "reason": "clear winner", "winner_variant_id": 9999 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, stopped) = send(
        &router,
        "POST",
        &stop_uri,
        Some(json!({ "reason": "clear winner", "winner_variant_id": challenger })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["state"], "stopped");
    assert_eq!(stopped["stop_reason"], "clear winner");
    assert_eq!(stopped["winner_variant_id"], challenger);

    let (status, body) = send(&router, "POST", &stop_uri, Some(json!({ "reason": "again" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_state_transition");
}

#[tokio::test]
async fn test_end_date_completes_test() {
    let (app, clock) = create_test_app().await;
    let router = app.router();

    let mut definition = test_definition("seasonal", true);
    definition["end_date"] = json!((t0() + Duration::days(7)).to_rfc3339());
    let (status, test) = send(&router, "POST", "/ab-test", Some(definition)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = test["id"].as_i64().unwrap();

    clock.advance(Duration::days(8));
    let (_, overview) = send(&router, "GET", &format!("/ab-test/{id}"), None).await;
    assert_eq!(overview["test"]["state"], "completed");

    let (_, assignment) = send(
        &router,
        "POST",
        &format!("/ab-test/{id}/assign"),
        Some(json!({ "session_id": "late-visitor" })),
    )
    .await;
    assert_eq!(assignment["exposure_recorded"], false);
}

#[tokio::test]
async fn test_create_validation() {
    let (app, _) = create_test_app().await;
    let router = app.router();

    let (status, body) = send(
        &router,
        "POST",
        "/ab-test",
        Some(json!({
            "name": "lopsided",
            "variants": [
                { "name": "a", "short_code": "lop-a", "traffic_split": 0.7 },
                { "name": "b", "short_code": "lop-b", "traffic_split": 0.7 },
            ],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_traffic_split");

    let (status, body) = send(
        &router,
        "POST",
        "/ab-test",
        Some(json!({
            "name": "lonely",
            "variants": [{ "name": "a", "short_code": "lonely-a" }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_variants");

    let (status, body) = send(&router, "POST", "/ab-test", Some(json!({ "name": "no variants" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_lookup_errors() {
    let (app, _) = create_test_app().await;
    let router = app.router();
    let test = create(&router, "errors", true).await;
    let id = test["id"].as_i64().unwrap();

    let (status, body) = send(&router, "GET", "/ab-test/4242", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = send(&router, "GET", "/ab-test/not-a-number", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = send(&router, "GET", &format!("/ab-test/{id}/significance?confidence=80"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_confidence_parameter");

    let (status, body) = send(&router, "GET", &format!("/ab-test/{id}/significance?variant_id=4242"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_cursor_pagination() {
    let (app, clock) = create_test_app().await;
    let router = app.router();
    for name in ["first", "second", "third"] {
        create(&router, name, false).await;
        clock.advance(Duration::minutes(1));
    }

    let (status, page) = send(&router, "GET", "/ab-tests?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = page["tests"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["third", "second"]);
    let cursor = page["next_cursor"].as_str().unwrap().to_string();

    let (status, rest) = send(&router, "GET", &format!("/ab-tests?limit=2&cursor={cursor}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rest["tests"][0]["name"], "first");
    assert!(rest["next_cursor"].is_null());

    let mut seen = HashSet::new();
    for test in page["tests"].as_array().unwrap().iter().chain(rest["tests"].as_array().unwrap()) {
        assert!(seen.insert(test["id"].as_i64().unwrap()));
    }
    assert_eq!(seen.len(), 3);

    let (status, body) = send(&router, "GET", "/ab-tests?cursor=forged", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) = send(&router, "GET", "/ab-tests?limit=ten", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}
