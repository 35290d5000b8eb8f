use axum::http::StatusCode;
use axum::Router;
use serde_json::json;

mod support;
use support::{create_class, create_student, issue_token, request, test_app, ADMIN_TOKEN};

async fn create_fee(router: &Router, student_id: &str, title: &str, amount_due: i64) -> String {
    let (status, body) = request(
        router,
        "POST",
        "/api/fees",
        Some(ADMIN_TOKEN),
        Some(json!({
            "studentId": student_id,
            "title": title,
            "amountDue": amount_due,
            "dueDate": "2026-04-10",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create fee: {body}");
    body["id"].as_str().unwrap().to_string()
}

async fn pay(router: &Router, fee_id: &str, amount: i64) -> (StatusCode, serde_json::Value) {
    request(
        router,
        "POST",
        &format!("/api/fees/{fee_id}/payments"),
        Some(ADMIN_TOKEN),
        Some(json!({ "amount": amount, "method": "cash" })),
    )
    .await
}

#[tokio::test]
async fn fees_walk_pending_partial_paid() {
    let app = test_app();
    let class_id = create_class(&app.router, "5", None).await;
    let student = create_student(&app.router, &class_id, "F-1", 1, "Payer", "One").await;
    let fee = create_fee(&app.router, &student, "Term 1 tuition", 500_00).await;

    let (_, body) = request(
        &app.router,
        "GET",
        &format!("/api/fees/{fee}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["balance"], 500_00);
    assert_eq!(body["payments"], json!([]));

    let (status, body) = pay(&app.router, &fee, 200_00).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "partial");
    assert_eq!(body["amountPaid"], 200_00);
    assert_eq!(body["balance"], 300_00);
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);
    assert_eq!(body["payments"][0]["method"], "cash");

    let (status, body) = pay(&app.router, &fee, 300_00).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paid");
    assert_eq!(body["balance"], 0);
    assert_eq!(body["payments"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn overpayment_is_refused_not_clamped() {
    let app = test_app();
    let class_id = create_class(&app.router, "5", Some("A")).await;
    let student = create_student(&app.router, &class_id, "F-2", 1, "Payer", "Two").await;
    let fee = create_fee(&app.router, &student, "Lab fee", 100_00).await;

    pay(&app.router, &fee, 80_00).await;
    let (status, body) = pay(&app.router, &fee, 30_00).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "payment exceeds outstanding balance");

    // the refused payment must not have moved anything
    let (_, body) = request(
        &app.router,
        "GET",
        &format!("/api/fees/{fee}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(body["amountPaid"], 80_00);
    assert_eq!(body["status"], "partial");
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);

    let (status, body) = pay(&app.router, &fee, 0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "amount must be positive");
}

#[tokio::test]
async fn creation_is_validated() {
    let app = test_app();
    let class_id = create_class(&app.router, "5", Some("B")).await;
    let student = create_student(&app.router, &class_id, "F-3", 1, "Payer", "Three").await;

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/fees",
        Some(ADMIN_TOKEN),
        Some(json!({
            "studentId": student,
            "title": "Bad amount",
            "amountDue": 0,
            "dueDate": "2026-04-10",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "amountDue must be positive");

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/fees",
        Some(ADMIN_TOKEN),
        Some(json!({
            "studentId": "ghost",
            "title": "No student",
            "amountDue": 100,
            "dueDate": "2026-04-10",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "student not found");
}

#[tokio::test]
async fn listing_filters_by_student_and_status() {
    let app = test_app();
    let class_id = create_class(&app.router, "6", None).await;
    let other_class = create_class(&app.router, "7", None).await;
    let s1 = create_student(&app.router, &class_id, "F-4", 1, "Four", "Kid").await;
    let s2 = create_student(&app.router, &class_id, "F-5", 2, "Five", "Kid").await;
    let s3 = create_student(&app.router, &other_class, "F-6", 1, "Other", "Kid").await;
    let paid_fee = create_fee(&app.router, &s1, "Admission", 50_00).await;
    create_fee(&app.router, &s1, "Transport", 75_00).await;
    create_fee(&app.router, &s2, "Admission", 50_00).await;
    create_fee(&app.router, &s3, "Admission", 50_00).await;
    pay(&app.router, &paid_fee, 50_00).await;

    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/fees?studentId={s1}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fees"].as_array().unwrap().len(), 2);

    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/fees?classId={class_id}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fees"].as_array().unwrap().len(), 3);

    let (status, body) = request(
        &app.router,
        "GET",
        "/api/fees?status=pending",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fees"].as_array().unwrap().len(), 3);

    let (status, body) = request(
        &app.router,
        "GET",
        "/api/fees?status=overdue",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "status must be one of pending, partial, paid");
}

#[tokio::test]
async fn student_statement_totals_the_ledger() {
    let app = test_app();
    let class_id = create_class(&app.router, "7", None).await;
    let student = create_student(&app.router, &class_id, "F-6", 1, "State", "Ment").await;
    let f1 = create_fee(&app.router, &student, "Term 1", 400_00).await;
    create_fee(&app.router, &student, "Term 2", 400_00).await;
    pay(&app.router, &f1, 250_00).await;

    let token = issue_token(&app.router, "student", Some(&student)).await;
    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/students/{student}/fees"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["fees"].as_array().unwrap().len(), 2);
    assert_eq!(body["totalDue"], 800_00);
    assert_eq!(body["totalPaid"], 250_00);
    assert_eq!(body["totalOutstanding"], 550_00);

    // another student's statement is out of reach
    let other = create_student(&app.router, &class_id, "F-7", 2, "Other", "Kid").await;
    let (status, _) = request(
        &app.router,
        "GET",
        &format!("/api/students/{other}/fees"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn paid_against_fees_cannot_be_deleted() {
    let app = test_app();
    let class_id = create_class(&app.router, "8", None).await;
    let student = create_student(&app.router, &class_id, "F-8", 1, "Del", "Ete").await;
    let clean = create_fee(&app.router, &student, "Mistake", 10_00).await;
    let dirty = create_fee(&app.router, &student, "Real", 10_00).await;
    pay(&app.router, &dirty, 5_00).await;

    let (status, body) = request(
        &app.router,
        "DELETE",
        &format!("/api/fees/{dirty}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "fee has recorded payments and cannot be deleted");

    let (status, body) = request(
        &app.router,
        "DELETE",
        &format!("/api/fees/{clean}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn billing_is_admin_only() {
    let app = test_app();
    let class_id = create_class(&app.router, "9", None).await;
    let student = create_student(&app.router, &class_id, "F-9", 1, "Role", "Check").await;
    let teacher = issue_token(&app.router, "teacher", None).await;

    let (status, _) = request(
        &app.router,
        "POST",
        "/api/fees",
        Some(&teacher),
        Some(json!({
            "studentId": student,
            "title": "Not allowed",
            "amountDue": 100,
            "dueDate": "2026-04-10",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // teachers can still read and record payments
    let fee = create_fee(&app.router, &student, "Allowed", 100_00).await;
    let (status, _) = request(
        &app.router,
        "GET",
        "/api/fees",
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(
        &app.router,
        "POST",
        &format!("/api/fees/{fee}/payments"),
        Some(&teacher),
        Some(json!({ "amount": 100_00 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
