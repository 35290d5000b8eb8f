//! Shared plumbing for the endpoint tests: an in-process router over a
//! temporary data directory, plus JSON request helpers.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use campusd::config::ServerConfig;
use campusd::db::open_db;
use campusd::http::{build_router, AppState};

/// Bootstrap admin token wired into every test app's configuration.
pub const ADMIN_TOKEN: &str = "test-admin-token";

pub struct TestApp {
    pub router: Router,
    data_dir: tempfile::TempDir,
}

impl TestApp {
    pub fn data_dir(&self) -> &std::path::Path {
        self.data_dir.path()
    }
}

pub fn test_app() -> TestApp {
    let data_dir = tempfile::tempdir().expect("create temp data dir");
    let config = ServerConfig {
        data_dir: data_dir.path().to_path_buf(),
        admin_token: Some(ADMIN_TOKEN.to_string()),
        ..ServerConfig::default()
    };
    let conn = open_db(&config.data_dir).expect("open database");
    let state = AppState::new(config, conn);
    TestApp {
        router: build_router(state),
        data_dir,
    }
}

/// Run one request against the router and decode the JSON body. An empty
/// body comes back as `Value::Null`.
pub async fn request(
    router: &Router,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .expect("build request"),
        None => builder.body(Body::empty()).expect("build request"),
    };

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("route request");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read response body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse response json")
    };
    (status, value)
}

/// Issue a token of the given role through the API; returns the plaintext.
pub async fn issue_token(router: &Router, role: &str, student_id: Option<&str>) -> String {
    let mut body = json!({ "role": role, "label": format!("{role} test token") });
    if let Some(student_id) = student_id {
        body["studentId"] = json!(student_id);
    }
    let (status, value) = request(router, "POST", "/api/tokens", Some(ADMIN_TOKEN), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "issue {role} token: {value}");
    value["token"].as_str().expect("token field").to_string()
}

pub async fn create_class(router: &Router, name: &str, section: Option<&str>) -> String {
    let mut body = json!({ "name": name });
    if let Some(section) = section {
        body["section"] = json!(section);
    }
    let (status, value) = request(router, "POST", "/api/classes", Some(ADMIN_TOKEN), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "create class: {value}");
    value["id"].as_str().expect("class id").to_string()
}

pub async fn create_student(
    router: &Router,
    class_id: &str,
    admission_no: &str,
    roll_no: i64,
    first_name: &str,
    last_name: &str,
) -> String {
    let (status, value) = request(
        router,
        "POST",
        "/api/students",
        Some(ADMIN_TOKEN),
        Some(json!({
            "admissionNo": admission_no,
            "classId": class_id,
            "rollNo": roll_no,
            "firstName": first_name,
            "lastName": last_name,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create student: {value}");
    value["id"].as_str().expect("student id").to_string()
}
