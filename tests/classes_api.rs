use axum::http::StatusCode;
use serde_json::json;

mod support;
use support::{create_class, create_student, request, test_app, ADMIN_TOKEN};

async fn create_staff(router: &axum::Router, employee_no: &str) -> String {
    let (status, body) = request(
        router,
        "POST",
        "/api/staff",
        Some(ADMIN_TOKEN),
        Some(json!({
            "employeeNo": employee_no,
            "firstName": "Lata",
            "lastName": "Menon",
            "designation": "Teacher",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create staff: {body}");
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn sections_distinguish_classes_with_the_same_name() {
    let app = test_app();
    create_class(&app.router, "5", Some("A")).await;
    create_class(&app.router, "5", Some("B")).await;

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/classes",
        Some(ADMIN_TOKEN),
        Some(json!({ "name": "5", "section": "A" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "class 5 already exists");
}

#[tokio::test]
async fn sectionless_duplicates_are_caught_too() {
    let app = test_app();
    create_class(&app.router, "Nursery", None).await;
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/classes",
        Some(ADMIN_TOKEN),
        Some(json!({ "name": "Nursery" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "class Nursery already exists");
}

#[tokio::test]
async fn lead_staff_must_exist() {
    let app = test_app();
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/classes",
        Some(ADMIN_TOKEN),
        Some(json!({ "name": "6", "leadStaffId": "no-such-staff" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "staff member not found");

    let staff_id = create_staff(&app.router, "EMP-7").await;
    let (status, body) = request(
        &app.router,
        "POST",
        "/api/classes",
        Some(ADMIN_TOKEN),
        Some(json!({ "name": "6", "leadStaffId": staff_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["leadStaffId"].as_str().unwrap(), staff_id);
}

#[tokio::test]
async fn listings_carry_live_student_counts() {
    let app = test_app();
    let class_id = create_class(&app.router, "3", Some("A")).await;
    create_student(&app.router, &class_id, "R-1", 1, "One", "Kid").await;
    create_student(&app.router, &class_id, "R-2", 2, "Two", "Kid").await;

    let (status, body) = request(&app.router, "GET", "/api/classes", Some(ADMIN_TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    let classes = body["classes"].as_array().unwrap();
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0]["studentCount"], 2);

    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/classes/{class_id}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["studentCount"], 2);
}

#[tokio::test]
async fn rename_refuses_to_collide() {
    let app = test_app();
    create_class(&app.router, "5", Some("A")).await;
    let other = create_class(&app.router, "5", Some("B")).await;

    let (status, body) = request(
        &app.router,
        "PUT",
        &format!("/api/classes/{other}"),
        Some(ADMIN_TOKEN),
        Some(json!({ "section": "A" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "class 5 already exists");
}

#[tokio::test]
async fn delete_is_blocked_while_students_remain() {
    let app = test_app();
    let class_id = create_class(&app.router, "2", None).await;
    let student = create_student(&app.router, &class_id, "S-1", 1, "Held", "Back").await;

    let (status, body) = request(
        &app.router,
        "DELETE",
        &format!("/api/classes/{class_id}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "class still has students; move or delete them first"
    );

    let (status, _) = request(
        &app.router,
        "DELETE",
        &format!("/api/students/{student}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(
        &app.router,
        "DELETE",
        &format!("/api/classes/{class_id}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}
