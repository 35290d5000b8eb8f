use axum::http::StatusCode;
use axum::Router;
use serde_json::json;

mod support;
use support::{create_class, create_student, issue_token, request, test_app, ADMIN_TOKEN};

async fn create_route(router: &Router, name: &str, capacity: i64) -> String {
    let (status, body) = request(
        router,
        "POST",
        "/api/transport/routes",
        Some(ADMIN_TOKEN),
        Some(json!({
            "name": name,
            "vehicleNo": "KA-01-F-2345",
            "driverName": "S Kumar",
            "capacity": capacity,
            "monthlyFee": 900_00,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create route: {body}");
    body["id"].as_str().unwrap().to_string()
}

async fn assign(
    router: &Router,
    student_id: &str,
    route_id: &str,
    pickup: &str,
) -> (StatusCode, serde_json::Value) {
    request(
        router,
        "PUT",
        "/api/transport/assignments",
        Some(ADMIN_TOKEN),
        Some(json!({
            "studentId": student_id,
            "routeId": route_id,
            "pickupPoint": pickup,
        })),
    )
    .await
}

#[tokio::test]
async fn route_names_are_unique_and_fields_validated() {
    let app = test_app();
    create_route(&app.router, "North Loop", 40).await;

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/transport/routes",
        Some(ADMIN_TOKEN),
        Some(json!({ "name": "North Loop", "vehicleNo": "KA-02", "capacity": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "route North Loop already exists");

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/transport/routes",
        Some(ADMIN_TOKEN),
        Some(json!({ "name": "Empty Bus", "vehicleNo": "KA-03", "capacity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "capacity must be at least 1");

    let (status, body) = request(
        &app.router,
        "POST",
        "/api/transport/routes",
        Some(ADMIN_TOKEN),
        Some(json!({
            "name": "Free Bus", "vehicleNo": "KA-04", "capacity": 10, "monthlyFee": -5,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "monthlyFee must not be negative");
}

#[tokio::test]
async fn a_full_route_refuses_new_riders() {
    let app = test_app();
    let class_id = create_class(&app.router, "3", None).await;
    let s1 = create_student(&app.router, &class_id, "T-1", 1, "Bus", "RiderOne").await;
    let s2 = create_student(&app.router, &class_id, "T-2", 2, "Bus", "RiderTwo").await;
    let s3 = create_student(&app.router, &class_id, "T-3", 3, "Bus", "RiderThree").await;
    let route = create_route(&app.router, "South Loop", 2).await;

    let (status, body) = assign(&app.router, &s1, &route, "Market Gate").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["routeName"], "South Loop");
    assert_eq!(body["pickupPoint"], "Market Gate");
    let (status, _) = assign(&app.router, &s2, &route, "Temple Stop").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = assign(&app.router, &s3, &route, "Old Bridge").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "route is full");

    // a rider already on the bus can still change pickup point
    let (status, body) = assign(&app.router, &s1, &route, "New Market Gate").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["pickupPoint"], "New Market Gate");
}

#[tokio::test]
async fn moving_routes_frees_the_old_seat() {
    let app = test_app();
    let class_id = create_class(&app.router, "4", None).await;
    let s1 = create_student(&app.router, &class_id, "T-4", 1, "Moves", "Around").await;
    let s2 = create_student(&app.router, &class_id, "T-5", 2, "Takes", "Over").await;
    let small = create_route(&app.router, "Small Route", 1).await;
    let other = create_route(&app.router, "Other Route", 1).await;

    assign(&app.router, &s1, &small, "Stop A").await;

    // the seat on the small route is taken
    let (status, _) = assign(&app.router, &s2, &small, "Stop B").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // moving s1 out frees it
    let (status, _) = assign(&app.router, &s1, &other, "Stop C").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = assign(&app.router, &s2, &small, "Stop B").await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request(
        &app.router,
        "GET",
        "/api/transport/routes",
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    let routes = body["routes"].as_array().unwrap();
    for route in routes {
        assert_eq!(route["assignedStudents"], 1, "{route}");
    }
}

#[tokio::test]
async fn capacity_cannot_shrink_under_the_riders() {
    let app = test_app();
    let class_id = create_class(&app.router, "5", None).await;
    let s1 = create_student(&app.router, &class_id, "T-6", 1, "Seat", "One").await;
    let s2 = create_student(&app.router, &class_id, "T-7", 2, "Seat", "Two").await;
    let route = create_route(&app.router, "Shrinking", 10).await;
    assign(&app.router, &s1, &route, "Stop A").await;
    assign(&app.router, &s2, &route, "Stop B").await;

    let (status, body) = request(
        &app.router,
        "PUT",
        &format!("/api/transport/routes/{route}"),
        Some(ADMIN_TOKEN),
        Some(json!({ "capacity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "capacity cannot drop below the number of assigned students"
    );

    let (status, body) = request(
        &app.router,
        "PUT",
        &format!("/api/transport/routes/{route}"),
        Some(ADMIN_TOKEN),
        Some(json!({ "capacity": 2, "driverName": "New Driver" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["capacity"], 2);
    assert_eq!(body["driverName"], "New Driver");
}

#[tokio::test]
async fn roster_lists_riders_by_name() {
    let app = test_app();
    let class_id = create_class(&app.router, "6", Some("A")).await;
    let s1 = create_student(&app.router, &class_id, "T-8", 1, "Zoya", "Ahmed").await;
    let s2 = create_student(&app.router, &class_id, "T-9", 2, "Arun", "Zutshi").await;
    let route = create_route(&app.router, "Roster Route", 10).await;
    assign(&app.router, &s1, &route, "First Stop").await;
    assign(&app.router, &s2, &route, "Second Stop").await;

    let (status, body) = request(
        &app.router,
        "GET",
        &format!("/api/transport/routes/{route}/students"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["route"]["assignedStudents"], 2);
    let students = body["students"].as_array().unwrap();
    assert_eq!(students.len(), 2);
    // ordered by last name
    assert_eq!(students[0]["lastName"], "Ahmed");
    assert_eq!(students[1]["lastName"], "Zutshi");
    assert_eq!(students[0]["className"], "6");
    assert_eq!(students[0]["pickupPoint"], "First Stop");
}

#[tokio::test]
async fn unassign_and_route_delete_guard() {
    let app = test_app();
    let class_id = create_class(&app.router, "7", None).await;
    let student = create_student(&app.router, &class_id, "T-10", 1, "Off", "Bus").await;
    let route = create_route(&app.router, "Doomed Route", 5).await;
    assign(&app.router, &student, &route, "Stop").await;

    let (status, body) = request(
        &app.router,
        "DELETE",
        &format!("/api/transport/routes/{route}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "route has assigned students; move them first");

    let (status, body) = request(
        &app.router,
        "DELETE",
        &format!("/api/transport/assignments/{student}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = request(
        &app.router,
        "DELETE",
        &format!("/api/transport/assignments/{student}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "assignment not found");

    let (status, _) = request(
        &app.router,
        "DELETE",
        &format!("/api/transport/routes/{route}"),
        Some(ADMIN_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn assignment_changes_are_admin_only() {
    let app = test_app();
    let class_id = create_class(&app.router, "8", None).await;
    let student = create_student(&app.router, &class_id, "T-11", 1, "Read", "Only").await;
    let route = create_route(&app.router, "Locked Route", 5).await;
    let teacher = issue_token(&app.router, "teacher", None).await;

    let (status, _) = request(
        &app.router,
        "PUT",
        "/api/transport/assignments",
        Some(&teacher),
        Some(json!({
            "studentId": student,
            "routeId": route,
            "pickupPoint": "Anywhere",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // teachers still see routes and rosters
    let (status, _) = request(
        &app.router,
        "GET",
        "/api/transport/routes",
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(
        &app.router,
        "GET",
        &format!("/api/transport/routes/{route}/students"),
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
