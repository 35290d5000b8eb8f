use axum::http::StatusCode;
use serde_json::json;

mod support;
use support::{issue_token, request, test_app, ADMIN_TOKEN};

#[tokio::test]
async fn saved_blocks_are_public_immediately() {
    let app = test_app();

    let (status, body) = request(
        &app.router,
        "PUT",
        "/api/cms/content/welcome-banner",
        Some(ADMIN_TOKEN),
        Some(json!({
            "title": "Welcome",
            "body": "Admissions open for 2026-2027.",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["key"], "welcome-banner");

    // the public site reads it with no token at all
    let (status, body) = request(&app.router, "GET", "/api/cms/content/welcome-banner", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"], "Admissions open for 2026-2027.");

    // replacing the block is visible on the very next fetch
    let (status, _) = request(
        &app.router,
        "PUT",
        "/api/cms/content/welcome-banner",
        Some(ADMIN_TOKEN),
        Some(json!({ "body": "Admissions closed." })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = request(&app.router, "GET", "/api/cms/content/welcome-banner", None, None).await;
    assert_eq!(body["body"], "Admissions closed.");
    assert!(body["title"].is_null());

    let (status, body) = request(&app.router, "GET", "/api/cms/content", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blocks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn block_keys_are_slugs() {
    let app = test_app();
    let (status, body) = request(
        &app.router,
        "PUT",
        "/api/cms/content/Not-A-Slug",
        Some(ADMIN_TOKEN),
        Some(json!({ "body": "text" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "key must be 1-64 lowercase letters, digits, or hyphens"
    );

    let (status, body) = request(&app.router, "GET", "/api/cms/content/absent-block", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "content block not found");
}

#[tokio::test]
async fn editing_blocks_needs_admin() {
    let app = test_app();
    let teacher = issue_token(&app.router, "teacher", None).await;
    let (status, _) = request(
        &app.router,
        "PUT",
        "/api/cms/content/about-us",
        Some(&teacher),
        Some(json!({ "body": "text" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &app.router,
        "PUT",
        "/api/cms/content/about-us",
        None,
        Some(json!({ "body": "text" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn case_variants_cannot_double_subscribe() {
    let app = test_app();

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/newsletter/subscribe",
        None,
        Some(json!({ "email": "Parent@Example.COM" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["email"], "parent@example.com");

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/newsletter/subscribe",
        None,
        Some(json!({ "email": "  parent@example.com " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email already subscribed");

    let (status, body) = request(
        &app.router,
        "GET",
        "/api/newsletter/subscribers",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let subscribers = body["subscribers"].as_array().unwrap();
    assert_eq!(subscribers.len(), 1);
    assert_eq!(subscribers[0]["email"], "parent@example.com");
}

#[tokio::test]
async fn implausible_emails_are_refused() {
    let app = test_app();
    for bad in ["plain", "@example.com", "user@", "user@nodot", "two words@a.b"] {
        let (status, body) = request(
            &app.router,
            "POST",
            "/api/newsletter/subscribe",
            None,
            Some(json!({ "email": bad })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}");
        assert_eq!(body["message"], "email is not valid");
    }
}

#[tokio::test]
async fn the_subscriber_list_is_admin_only() {
    let app = test_app();
    request(
        &app.router,
        "POST",
        "/api/newsletter/subscribe",
        None,
        Some(json!({ "email": "one@example.com" })),
    )
    .await;

    let (status, _) = request(&app.router, "GET", "/api/newsletter/subscribers", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let teacher = issue_token(&app.router, "teacher", None).await;
    let (status, _) = request(
        &app.router,
        "GET",
        "/api/newsletter/subscribers",
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
