use axum::http::StatusCode;
use serde_json::json;

mod support;
use support::{create_class, create_student, issue_token, request, test_app, ADMIN_TOKEN};

#[tokio::test]
async fn summary_counts_the_seeded_world() {
    let app = test_app();
    let class_id = create_class(&app.router, "5", None).await;
    let s1 = create_student(&app.router, &class_id, "DB-1", 1, "Active", "Kid").await;
    let s2 = create_student(&app.router, &class_id, "DB-2", 2, "Former", "Kid").await;
    request(
        &app.router,
        "PUT",
        &format!("/api/students/{s2}"),
        Some(ADMIN_TOKEN),
        Some(json!({ "active": false })),
    )
    .await;

    request(
        &app.router,
        "POST",
        "/api/subjects",
        Some(ADMIN_TOKEN),
        Some(json!({ "name": "Mathematics", "code": "MAT" })),
    )
    .await;
    request(
        &app.router,
        "POST",
        "/api/notices",
        Some(ADMIN_TOKEN),
        Some(json!({ "title": "Note", "body": "text", "audience": "all" })),
    )
    .await;
    request(
        &app.router,
        "POST",
        "/api/newsletter/subscribe",
        None,
        Some(json!({ "email": "parent@example.com" })),
    )
    .await;

    let (_, book) = request(
        &app.router,
        "POST",
        "/api/library/books",
        Some(ADMIN_TOKEN),
        Some(json!({ "title": "Counted", "author": "Anon", "copies": 1 })),
    )
    .await;
    request(
        &app.router,
        "POST",
        "/api/library/loans",
        Some(ADMIN_TOKEN),
        Some(json!({
            "bookId": book["id"], "studentId": s1, "dueDate": "2030-01-01",
        })),
    )
    .await;

    let (_, fee) = request(
        &app.router,
        "POST",
        "/api/fees",
        Some(ADMIN_TOKEN),
        Some(json!({
            "studentId": s1, "title": "Term 1",
            "amountDue": 300_00, "dueDate": "2026-04-01",
        })),
    )
    .await;
    request(
        &app.router,
        "POST",
        &format!("/api/fees/{}/payments", fee["id"].as_str().unwrap()),
        Some(ADMIN_TOKEN),
        Some(json!({ "amount": 100_00 })),
    )
    .await;

    let (status, body) = request(&app.router, "GET", "/api/dashboard", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["activeStudents"], 1);
    assert_eq!(body["activeStaff"], 0);
    assert_eq!(body["classes"], 1);
    assert_eq!(body["subjects"], 1);
    assert_eq!(body["exams"], 0);
    assert_eq!(body["notices"], 1);
    assert_eq!(body["subscribers"], 1);
    assert_eq!(body["openLoans"], 1);
    assert_eq!(body["openFees"], 1);
    assert_eq!(body["outstandingBalance"], 200_00);
}

#[tokio::test]
async fn the_dashboard_is_admin_territory() {
    let app = test_app();
    let teacher = issue_token(&app.router, "teacher", None).await;
    let (status, _) = request(&app.router, "GET", "/api/dashboard", Some(&teacher), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(&app.router, "GET", "/api/dashboard", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn backup_writes_a_bundle_into_the_data_dir() {
    let app = test_app();
    let class_id = create_class(&app.router, "5", None).await;
    create_student(&app.router, &class_id, "BK-1", 1, "Saved", "Forever").await;

    let (status, body) = request(&app.router, "POST", "/api/backup", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let file = body["file"].as_str().unwrap();
    assert!(file.starts_with("campus-backup-"), "{file}");
    assert!(file.ends_with(".zip"), "{file}");
    assert!(body["sizeBytes"].as_i64().unwrap() > 0);
    let digest = body["databaseSha256"].as_str().unwrap();
    assert_eq!(digest.len(), 64);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));

    let on_disk = app.data_dir().join("backups").join(file);
    assert!(on_disk.is_file(), "missing {}", on_disk.display());

    let (status, _) = request(&app.router, "POST", "/api/backup", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let teacher = issue_token(&app.router, "teacher", None).await;
    let (status, _) = request(&app.router, "POST", "/api/backup", Some(&teacher), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
