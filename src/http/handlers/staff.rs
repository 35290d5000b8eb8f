use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, AppQuery, CurrentAdmin, CurrentStaff};
use crate::http::helpers::{like_prefix, now, optional_trimmed, require_trimmed};
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(remove))
}

fn staff_json(row: &rusqlite::Row) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "employeeNo": row.get::<_, String>(1)?,
        "firstName": row.get::<_, String>(2)?,
        "lastName": row.get::<_, String>(3)?,
        "designation": row.get::<_, String>(4)?,
        "department": row.get::<_, Option<String>>(5)?,
        "email": row.get::<_, Option<String>>(6)?,
        "phone": row.get::<_, Option<String>>(7)?,
        "active": row.get::<_, i64>(8)? != 0,
        "createdAt": row.get::<_, String>(9)?,
        "updatedAt": row.get::<_, String>(10)?,
    }))
}

const STAFF_COLUMNS: &str = "id, employee_no, first_name, last_name, designation, department,
     email, phone, active, created_at, updated_at";

fn fetch_staff(conn: &Connection, id: &str) -> Result<Option<Value>, ApiError> {
    conn.query_row(
        &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = ?"),
        [id],
        staff_json,
    )
    .optional()
    .map_err(ApiError::db)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    q: Option<String>,
    active: Option<bool>,
}

async fn list(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let mut sql = format!("SELECT {STAFF_COLUMNS} FROM staff");
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(active) = query.active {
        clauses.push("active = ?");
        params.push(SqlValue::Integer(active as i64));
    }
    if let Some(q) = optional_trimmed(query.q) {
        clauses.push(
            "(lower(first_name) LIKE ? ESCAPE '\\'
              OR lower(last_name) LIKE ? ESCAPE '\\'
              OR lower(employee_no) LIKE ? ESCAPE '\\')",
        );
        let like = like_prefix(&q);
        params.push(SqlValue::Text(like.clone()));
        params.push(SqlValue::Text(like.clone()));
        params.push(SqlValue::Text(like));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY last_name, first_name");

    let mut stmt = conn.prepare(&sql).map_err(ApiError::db)?;
    let members = stmt
        .query_map(params_from_iter(params), staff_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "staff": members })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody {
    employee_no: String,
    first_name: String,
    last_name: String,
    designation: String,
    department: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

async fn create(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let employee_no = require_trimmed(&body.employee_no, "employeeNo")?;
    let first_name = require_trimmed(&body.first_name, "firstName")?;
    let last_name = require_trimmed(&body.last_name, "lastName")?;
    let designation = require_trimmed(&body.designation, "designation")?;

    let conn = state.db();
    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM staff WHERE employee_no = ?",
            [&employee_no],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    if taken.is_some() {
        return Err(ApiError::bad_request(format!(
            "employee number {employee_no} already in use"
        )));
    }

    let id = Uuid::new_v4().to_string();
    let stamp = now();
    conn.execute(
        "INSERT INTO staff(id, employee_no, first_name, last_name, designation, department,
                           email, phone, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &id,
            &employee_no,
            &first_name,
            &last_name,
            &designation,
            optional_trimmed(body.department),
            optional_trimmed(body.email),
            optional_trimmed(body.phone),
            &stamp,
            &stamp,
        ),
    )
    .map_err(ApiError::db)?;

    tracing::info!(staff_id = %id, "created staff member");
    let member = fetch_staff(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn get_one(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let member = fetch_staff(&conn, &id)?.ok_or_else(|| ApiError::not_found("staff member"))?;
    Ok(Json(member))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody {
    first_name: Option<String>,
    last_name: Option<String>,
    designation: Option<String>,
    department: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    active: Option<bool>,
}

async fn update(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateBody>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    if fetch_staff(&conn, &id)?.is_none() {
        return Err(ApiError::not_found("staff member"));
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    if let Some(raw) = body.first_name {
        sets.push("first_name = ?");
        params.push(SqlValue::Text(require_trimmed(&raw, "firstName")?));
    }
    if let Some(raw) = body.last_name {
        sets.push("last_name = ?");
        params.push(SqlValue::Text(require_trimmed(&raw, "lastName")?));
    }
    if let Some(raw) = body.designation {
        sets.push("designation = ?");
        params.push(SqlValue::Text(require_trimmed(&raw, "designation")?));
    }
    if let Some(raw) = body.department {
        sets.push("department = ?");
        match optional_trimmed(Some(raw)) {
            Some(v) => params.push(SqlValue::Text(v)),
            None => params.push(SqlValue::Null),
        }
    }
    if let Some(raw) = body.email {
        sets.push("email = ?");
        match optional_trimmed(Some(raw)) {
            Some(v) => params.push(SqlValue::Text(v)),
            None => params.push(SqlValue::Null),
        }
    }
    if let Some(raw) = body.phone {
        sets.push("phone = ?");
        match optional_trimmed(Some(raw)) {
            Some(v) => params.push(SqlValue::Text(v)),
            None => params.push(SqlValue::Null),
        }
    }
    if let Some(active) = body.active {
        sets.push("active = ?");
        params.push(SqlValue::Integer(active as i64));
    }
    if sets.is_empty() {
        return Err(ApiError::bad_request("no fields to update"));
    }

    sets.push("updated_at = ?");
    params.push(SqlValue::Text(now()));
    params.push(SqlValue::Text(id.clone()));
    conn.execute(
        &format!("UPDATE staff SET {} WHERE id = ?", sets.join(", ")),
        params_from_iter(params),
    )
    .map_err(ApiError::db)?;

    let member = fetch_staff(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok(Json(member))
}

async fn remove(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    if fetch_staff(&conn, &id)?.is_none() {
        return Err(ApiError::not_found("staff member"));
    }

    let leads: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM classes WHERE lead_staff_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(ApiError::db)?;
    if leads > 0 {
        return Err(ApiError::bad_request(
            "staff member leads a class; reassign the class first",
        ));
    }

    conn.execute("DELETE FROM staff WHERE id = ?", [&id])
        .map_err(ApiError::db)?;
    tracing::info!(staff_id = %id, "deleted staff member");
    Ok(Json(json!({ "ok": true })))
}
