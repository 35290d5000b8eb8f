use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

mod support;
use support::{request, test_app, ADMIN_TOKEN};

#[tokio::test]
async fn healthz_needs_no_token() {
    let app = test_app();
    let (status, body) = request(&app.router, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn version_reports_schema_presence() {
    let app = test_app();
    let (status, body) = request(&app.router, "GET", "/api/version", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "campusd");
    assert!(body["schemaTables"].as_i64().unwrap() > 10);
}

#[tokio::test]
async fn unknown_routes_use_the_error_contract() {
    let app = test_app();
    let (status, body) = request(&app.router, "GET", "/api/nothing-here", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "resource not found");
}

#[tokio::test]
async fn malformed_json_bodies_are_400_with_message() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/classes")
                .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_content_type_is_rejected_on_contract() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/classes")
                .header("authorization", format!("Bearer {ADMIN_TOKEN}"))
                .body(Body::from(json!({ "name": "1A" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header")
        .to_str()
        .unwrap();
    assert!(!request_id.is_empty());
}

#[tokio::test]
async fn missing_query_parameters_are_400() {
    let app = test_app();
    // day sheet requires classId and date
    let (status, body) = request(
        &app.router,
        "GET",
        "/api/attendance?classId=only",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
}
