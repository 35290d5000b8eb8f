use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, CurrentAdmin, CurrentStaff, CurrentUser};
use crate::http::helpers::{now, optional_trimmed, require_trimmed};
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/routes", get(list_routes).post(create_route))
        .route("/routes/:id", put(update_route).delete(remove_route))
        .route("/routes/:id/students", get(roster))
        .route("/assignments", put(assign))
        .route("/assignments/:student_id", delete(unassign))
}

const ROUTE_SELECT: &str = "SELECT r.id, r.name, r.vehicle_no, r.driver_name, r.driver_phone,
    r.capacity, r.monthly_fee,
    (SELECT COUNT(*) FROM transport_assignments a WHERE a.route_id = r.id) AS riders
    FROM transport_routes r";

fn route_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "vehicleNo": row.get::<_, String>(2)?,
        "driverName": row.get::<_, Option<String>>(3)?,
        "driverPhone": row.get::<_, Option<String>>(4)?,
        "capacity": row.get::<_, i64>(5)?,
        "monthlyFee": row.get::<_, Option<i64>>(6)?,
        "assignedStudents": row.get::<_, i64>(7)?,
    }))
}

fn fetch_route(conn: &Connection, id: &str) -> Result<Value, ApiError> {
    let sql = format!("{ROUTE_SELECT} WHERE r.id = ?");
    conn.query_row(&sql, [id], route_json)
        .optional()
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("route"))
}

fn rider_count(conn: &Connection, route_id: &str) -> Result<i64, ApiError> {
    conn.query_row(
        "SELECT COUNT(*) FROM transport_assignments WHERE route_id = ?",
        [route_id],
        |r| r.get(0),
    )
    .map_err(ApiError::db)
}

fn name_taken(conn: &Connection, name: &str, exclude_id: &str) -> Result<bool, ApiError> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM transport_routes WHERE name = ? AND id <> ?",
            [name, exclude_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    Ok(hit.is_some())
}

/// GET /api/transport/routes: rider counts ride along like the class list.
async fn list_routes(
    CurrentUser(_): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let sql = format!("{ROUTE_SELECT} ORDER BY r.name");
    let mut stmt = conn.prepare(&sql).map_err(ApiError::db)?;
    let routes = stmt
        .query_map([], route_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "routes": routes })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRouteBody {
    name: String,
    vehicle_no: String,
    driver_name: Option<String>,
    driver_phone: Option<String>,
    capacity: i64,
    monthly_fee: Option<i64>,
}

/// POST /api/transport/routes.
async fn create_route(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateRouteBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = require_trimmed(&body.name, "name")?;
    let vehicle_no = require_trimmed(&body.vehicle_no, "vehicleNo")?;
    if body.capacity < 1 {
        return Err(ApiError::bad_request("capacity must be at least 1"));
    }
    if matches!(body.monthly_fee, Some(fee) if fee < 0) {
        return Err(ApiError::bad_request("monthlyFee must not be negative"));
    }

    let conn = state.db();
    if name_taken(&conn, &name, "")? {
        return Err(ApiError::bad_request(format!(
            "route {name} already exists"
        )));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO transport_routes(id, name, vehicle_no, driver_name, driver_phone,
                                      capacity, monthly_fee)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &vehicle_no,
            optional_trimmed(body.driver_name.as_deref()),
            optional_trimmed(body.driver_phone.as_deref()),
            body.capacity,
            body.monthly_fee,
        ),
    )
    .map_err(ApiError::db)?;

    tracing::info!(route_id = %id, name = %name, "transport route created");
    let route = fetch_route(&conn, &id)?;
    Ok((StatusCode::CREATED, Json(route)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRouteBody {
    name: Option<String>,
    vehicle_no: Option<String>,
    driver_name: Option<String>,
    driver_phone: Option<String>,
    capacity: Option<i64>,
    monthly_fee: Option<i64>,
}

/// PUT /api/transport/routes/{id}. Capacity can only shrink as far as the
/// seats already taken.
async fn update_route(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateRouteBody>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let current: Option<(String, String, Option<String>, Option<String>, i64, Option<i64>)> = conn
        .query_row(
            "SELECT name, vehicle_no, driver_name, driver_phone, capacity, monthly_fee
             FROM transport_routes WHERE id = ?",
            [&id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(ApiError::db)?;
    let (mut name, mut vehicle_no, mut driver_name, mut driver_phone, mut capacity, mut monthly_fee) =
        current.ok_or_else(|| ApiError::not_found("route"))?;

    if let Some(new_name) = body.name.as_deref() {
        name = require_trimmed(new_name, "name")?;
    }
    if let Some(new_vehicle) = body.vehicle_no.as_deref() {
        vehicle_no = require_trimmed(new_vehicle, "vehicleNo")?;
    }
    if let Some(new_driver) = body.driver_name.as_deref() {
        driver_name = optional_trimmed(Some(new_driver));
    }
    if let Some(new_phone) = body.driver_phone.as_deref() {
        driver_phone = optional_trimmed(Some(new_phone));
    }
    if let Some(new_capacity) = body.capacity {
        if new_capacity < 1 {
            return Err(ApiError::bad_request("capacity must be at least 1"));
        }
        let riders = rider_count(&conn, &id)?;
        if new_capacity < riders {
            return Err(ApiError::bad_request(
                "capacity cannot drop below the number of assigned students",
            ));
        }
        capacity = new_capacity;
    }
    if let Some(new_fee) = body.monthly_fee {
        if new_fee < 0 {
            return Err(ApiError::bad_request("monthlyFee must not be negative"));
        }
        monthly_fee = Some(new_fee);
    }
    if name_taken(&conn, &name, &id)? {
        return Err(ApiError::bad_request(format!(
            "route {name} already exists"
        )));
    }

    conn.execute(
        "UPDATE transport_routes
         SET name = ?, vehicle_no = ?, driver_name = ?, driver_phone = ?,
             capacity = ?, monthly_fee = ?
         WHERE id = ?",
        (
            &name,
            &vehicle_no,
            &driver_name,
            &driver_phone,
            capacity,
            monthly_fee,
            &id,
        ),
    )
    .map_err(ApiError::db)?;

    let route = fetch_route(&conn, &id)?;
    Ok(Json(route))
}

/// DELETE /api/transport/routes/{id}.
async fn remove_route(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    fetch_route(&conn, &id)?;
    if rider_count(&conn, &id)? > 0 {
        return Err(ApiError::bad_request(
            "route has assigned students; move them first",
        ));
    }
    conn.execute("DELETE FROM transport_routes WHERE id = ?", [&id])
        .map_err(ApiError::db)?;
    tracing::info!(route_id = %id, "transport route deleted");
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/transport/routes/{id}/students: the roster, by student name.
async fn roster(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let route = fetch_route(&conn, &id)?;
    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, s.first_name, s.last_name, c.name, c.section,
                    a.pickup_point, a.assigned_at
             FROM transport_assignments a
             JOIN students s ON s.id = a.student_id
             JOIN classes c ON c.id = s.class_id
             WHERE a.route_id = ?
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(ApiError::db)?;
    let students = stmt
        .query_map([&id], |row| {
            Ok(json!({
                "studentId": row.get::<_, String>(0)?,
                "firstName": row.get::<_, String>(1)?,
                "lastName": row.get::<_, String>(2)?,
                "className": row.get::<_, String>(3)?,
                "classSection": row.get::<_, Option<String>>(4)?,
                "pickupPoint": row.get::<_, String>(5)?,
                "assignedAt": row.get::<_, String>(6)?,
            }))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "route": route, "students": students })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignBody {
    student_id: String,
    route_id: String,
    pickup_point: String,
}

/// PUT /api/transport/assignments: one route per student, keyed by the
/// student. Moving routes needs a free seat on the target; changing only
/// the pickup point on the same route does not.
async fn assign(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<AssignBody>,
) -> Result<Json<Value>, ApiError> {
    let pickup_point = require_trimmed(&body.pickup_point, "pickupPoint")?;

    let conn = state.db();
    let student_known: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ?",
            [&body.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    if student_known.is_none() {
        return Err(ApiError::not_found("student"));
    }
    let capacity: Option<i64> = conn
        .query_row(
            "SELECT capacity FROM transport_routes WHERE id = ?",
            [&body.route_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    let capacity = capacity.ok_or_else(|| ApiError::not_found("route"))?;

    let current_route: Option<String> = conn
        .query_row(
            "SELECT route_id FROM transport_assignments WHERE student_id = ?",
            [&body.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    if current_route.as_deref() != Some(body.route_id.as_str())
        && rider_count(&conn, &body.route_id)? >= capacity
    {
        return Err(ApiError::bad_request("route is full"));
    }

    conn.execute(
        "INSERT INTO transport_assignments(student_id, route_id, pickup_point, assigned_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id)
         DO UPDATE SET route_id = excluded.route_id,
                       pickup_point = excluded.pickup_point,
                       assigned_at = excluded.assigned_at",
        (&body.student_id, &body.route_id, &pickup_point, now()),
    )
    .map_err(ApiError::db)?;

    tracing::info!(student_id = %body.student_id, route_id = %body.route_id, "transport assignment saved");
    let assignment = conn
        .query_row(
            "SELECT a.student_id, a.route_id, r.name, a.pickup_point, a.assigned_at
             FROM transport_assignments a
             JOIN transport_routes r ON r.id = a.route_id
             WHERE a.student_id = ?",
            [&body.student_id],
            |row| {
                Ok(json!({
                    "studentId": row.get::<_, String>(0)?,
                    "routeId": row.get::<_, String>(1)?,
                    "routeName": row.get::<_, String>(2)?,
                    "pickupPoint": row.get::<_, String>(3)?,
                    "assignedAt": row.get::<_, String>(4)?,
                }))
            },
        )
        .map_err(ApiError::db)?;
    Ok(Json(assignment))
}

/// DELETE /api/transport/assignments/{studentId}.
async fn unassign(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let removed = conn
        .execute(
            "DELETE FROM transport_assignments WHERE student_id = ?",
            [&student_id],
        )
        .map_err(ApiError::db)?;
    if removed == 0 {
        return Err(ApiError::not_found("assignment"));
    }
    tracing::info!(student_id = %student_id, "transport assignment removed");
    Ok(Json(json!({ "ok": true })))
}
