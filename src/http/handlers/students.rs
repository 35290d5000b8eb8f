use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, AppQuery, CurrentAdmin, CurrentStaff, CurrentUser};
use crate::http::helpers::{like_prefix, now, optional_trimmed, parse_date, require_trimmed};
use crate::http::AppState;

use super::{attendance, fees, library, results};

const BULK_CREATE_MAX_ROWS: usize = 500;

const STUDENT_COLUMNS: &str = "s.id, s.admission_no, s.first_name, s.last_name, s.class_id,
     c.name, c.section, s.roll_no, s.birth_date, s.guardian_name, s.guardian_phone,
     s.active, s.created_at, s.updated_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/bulk", post(bulk_create))
        .route("/:id", get(get_one).put(update).delete(remove))
        .route("/:id/attendance", get(attendance::student_month))
        .route("/:id/results", get(results::student_results))
        .route("/:id/fees", get(fees::student_fees))
        .route("/:id/loans", get(library::student_loans))
}

fn student_json(row: &rusqlite::Row) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "admissionNo": row.get::<_, String>(1)?,
        "firstName": row.get::<_, String>(2)?,
        "lastName": row.get::<_, String>(3)?,
        "classId": row.get::<_, String>(4)?,
        "className": row.get::<_, String>(5)?,
        "classSection": row.get::<_, Option<String>>(6)?,
        "rollNo": row.get::<_, i64>(7)?,
        "birthDate": row.get::<_, Option<String>>(8)?,
        "guardianName": row.get::<_, Option<String>>(9)?,
        "guardianPhone": row.get::<_, Option<String>>(10)?,
        "active": row.get::<_, i64>(11)? != 0,
        "createdAt": row.get::<_, String>(12)?,
        "updatedAt": row.get::<_, String>(13)?,
    }))
}

fn fetch_student(conn: &Connection, id: &str) -> Result<Option<Value>, ApiError> {
    conn.query_row(
        &format!(
            "SELECT {STUDENT_COLUMNS} FROM students s
             JOIN classes c ON c.id = s.class_id WHERE s.id = ?"
        ),
        [id],
        student_json,
    )
    .optional()
    .map_err(ApiError::db)
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, ApiError> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(ApiError::db)?;
    Ok(hit.is_some())
}

fn admission_no_taken(
    conn: &Connection,
    admission_no: &str,
    exclude_id: Option<&str>,
) -> Result<bool, ApiError> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE admission_no = ? AND id <> ?",
            [admission_no, exclude_id.unwrap_or("")],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    Ok(hit.is_some())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    class_id: Option<String>,
    q: Option<String>,
    active: Option<bool>,
    limit: Option<i64>,
}

async fn list(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let mut sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM students s JOIN classes c ON c.id = s.class_id"
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(class_id) = optional_trimmed(query.class_id) {
        clauses.push("s.class_id = ?");
        params.push(SqlValue::Text(class_id));
    }
    if let Some(active) = query.active {
        clauses.push("s.active = ?");
        params.push(SqlValue::Integer(active as i64));
    }
    if let Some(q) = optional_trimmed(query.q) {
        clauses.push(
            "(lower(s.first_name) LIKE ? ESCAPE '\\'
              OR lower(s.last_name) LIKE ? ESCAPE '\\'
              OR lower(s.admission_no) LIKE ? ESCAPE '\\')",
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
    sql.push_str(" ORDER BY c.name, s.roll_no, s.last_name");
    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(limit.clamp(1, 500)));
    }

    let mut stmt = conn.prepare(&sql).map_err(ApiError::db)?;
    let students = stmt
        .query_map(params_from_iter(params), student_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "students": students })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody {
    admission_no: String,
    first_name: String,
    last_name: String,
    class_id: String,
    roll_no: i64,
    birth_date: Option<String>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
}

struct NewStudent {
    admission_no: String,
    first_name: String,
    last_name: String,
    class_id: String,
    roll_no: i64,
    birth_date: Option<String>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
}

fn validate_new_student(conn: &Connection, body: CreateBody) -> Result<NewStudent, ApiError> {
    let admission_no = require_trimmed(&body.admission_no, "admissionNo")?;
    let first_name = require_trimmed(&body.first_name, "firstName")?;
    let last_name = require_trimmed(&body.last_name, "lastName")?;
    let class_id = require_trimmed(&body.class_id, "classId")?;
    if body.roll_no < 1 {
        return Err(ApiError::bad_request("rollNo must be positive"));
    }
    if !class_exists(conn, &class_id)? {
        return Err(ApiError::not_found("class"));
    }
    if admission_no_taken(conn, &admission_no, None)? {
        return Err(ApiError::bad_request(format!(
            "admission number {admission_no} already in use"
        )));
    }
    let birth_date = match optional_trimmed(body.birth_date) {
        Some(raw) => Some(parse_date(&raw, "birthDate")?),
        None => None,
    };
    Ok(NewStudent {
        admission_no,
        first_name,
        last_name,
        class_id,
        roll_no: body.roll_no,
        birth_date,
        guardian_name: optional_trimmed(body.guardian_name),
        guardian_phone: optional_trimmed(body.guardian_phone),
    })
}

fn insert_student(conn: &Connection, new: &NewStudent) -> Result<String, ApiError> {
    let id = Uuid::new_v4().to_string();
    let stamp = now();
    conn.execute(
        "INSERT INTO students(id, admission_no, class_id, roll_no, first_name, last_name,
                              birth_date, guardian_name, guardian_phone, active,
                              created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        (
            &id,
            &new.admission_no,
            &new.class_id,
            new.roll_no,
            &new.first_name,
            &new.last_name,
            &new.birth_date,
            &new.guardian_name,
            &new.guardian_phone,
            &stamp,
            &stamp,
        ),
    )
    .map_err(ApiError::db)?;
    Ok(id)
}

async fn create(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let conn = state.db();
    let new = validate_new_student(&conn, body)?;
    let id = insert_student(&conn, &new)?;
    tracing::info!(student_id = %id, class_id = %new.class_id, "created student");
    let student = fetch_student(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok((StatusCode::CREATED, Json(student)))
}

#[derive(Debug, Deserialize)]
struct BulkCreateBody {
    students: Vec<CreateBody>,
}

async fn bulk_create(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<BulkCreateBody>,
) -> Result<Json<Value>, ApiError> {
    if body.students.is_empty() {
        return Err(ApiError::bad_request("students must not be empty"));
    }
    if body.students.len() > BULK_CREATE_MAX_ROWS {
        return Err(ApiError::bad_request(format!(
            "too many rows (max {BULK_CREATE_MAX_ROWS})"
        )));
    }

    let conn = state.db();
    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;

    let mut created = 0usize;
    let mut errors: Vec<Value> = Vec::new();
    for (index, row) in body.students.into_iter().enumerate() {
        // Row failures skip the row, not the batch; valid rows still land.
        match validate_new_student(&tx, row).and_then(|new| insert_student(&tx, &new)) {
            Ok(_) => created += 1,
            Err(ApiError::BadRequest(message)) | Err(ApiError::NotFound(message)) => {
                errors.push(json!({ "index": index, "message": message }));
            }
            Err(other) => return Err(other),
        }
    }

    tx.commit().map_err(ApiError::db)?;
    tracing::info!(created, rejected = errors.len(), "bulk student create");
    Ok(Json(json!({
        "created": created,
        "rejected": errors.len(),
        "errors": errors,
    })))
}

async fn get_one(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !user.may_view_student(&id) {
        return Err(ApiError::Forbidden);
    }
    let conn = state.db();
    let student = fetch_student(&conn, &id)?.ok_or_else(|| ApiError::not_found("student"))?;
    Ok(Json(student))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody {
    admission_no: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    class_id: Option<String>,
    roll_no: Option<i64>,
    birth_date: Option<String>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    active: Option<bool>,
}

async fn update(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateBody>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    if fetch_student(&conn, &id)?.is_none() {
        return Err(ApiError::not_found("student"));
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(raw) = body.admission_no {
        let admission_no = require_trimmed(&raw, "admissionNo")?;
        if admission_no_taken(&conn, &admission_no, Some(&id))? {
            return Err(ApiError::bad_request(format!(
                "admission number {admission_no} already in use"
            )));
        }
        sets.push("admission_no = ?");
        params.push(SqlValue::Text(admission_no));
    }
    if let Some(raw) = body.first_name {
        sets.push("first_name = ?");
        params.push(SqlValue::Text(require_trimmed(&raw, "firstName")?));
    }
    if let Some(raw) = body.last_name {
        sets.push("last_name = ?");
        params.push(SqlValue::Text(require_trimmed(&raw, "lastName")?));
    }
    if let Some(raw) = body.class_id {
        let class_id = require_trimmed(&raw, "classId")?;
        if !class_exists(&conn, &class_id)? {
            return Err(ApiError::not_found("class"));
        }
        sets.push("class_id = ?");
        params.push(SqlValue::Text(class_id));
    }
    if let Some(roll_no) = body.roll_no {
        if roll_no < 1 {
            return Err(ApiError::bad_request("rollNo must be positive"));
        }
        sets.push("roll_no = ?");
        params.push(SqlValue::Integer(roll_no));
    }
    if let Some(raw) = body.birth_date {
        sets.push("birth_date = ?");
        match optional_trimmed(Some(raw)) {
            Some(v) => params.push(SqlValue::Text(parse_date(&v, "birthDate")?)),
            None => params.push(SqlValue::Null),
        }
    }
    if let Some(raw) = body.guardian_name {
        sets.push("guardian_name = ?");
        match optional_trimmed(Some(raw)) {
            Some(v) => params.push(SqlValue::Text(v)),
            None => params.push(SqlValue::Null),
        }
    }
    if let Some(raw) = body.guardian_phone {
        sets.push("guardian_phone = ?");
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
    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, params_from_iter(params))
        .map_err(ApiError::db)?;

    let student = fetch_student(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok(Json(student))
}

async fn remove(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    if fetch_student(&conn, &id)?.is_none() {
        return Err(ApiError::not_found("student"));
    }

    // Open loans hold decremented book availability; deleting through them
    // would leave the counters wrong.
    let open_loans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM book_loans WHERE student_id = ? AND returned_at IS NULL",
            [&id],
            |r| r.get(0),
        )
        .map_err(ApiError::db)?;
    if open_loans > 0 {
        return Err(ApiError::bad_request(
            "student has open library loans; return them first",
        ));
    }

    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    // Dependency order; the schema has no ON DELETE CASCADE.
    tx.execute(
        "DELETE FROM result_subjects
         WHERE result_id IN (SELECT id FROM results WHERE student_id = ?)",
        [&id],
    )
    .map_err(ApiError::db)?;
    tx.execute("DELETE FROM results WHERE student_id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.execute("DELETE FROM attendance WHERE student_id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.execute(
        "DELETE FROM fee_payments
         WHERE fee_id IN (SELECT id FROM fees WHERE student_id = ?)",
        [&id],
    )
    .map_err(ApiError::db)?;
    tx.execute("DELETE FROM fees WHERE student_id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.execute("DELETE FROM book_loans WHERE student_id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.execute(
        "DELETE FROM transport_assignments WHERE student_id = ?",
        [&id],
    )
    .map_err(ApiError::db)?;
    tx.execute("DELETE FROM api_tokens WHERE student_id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.execute("DELETE FROM students WHERE id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(student_id = %id, "deleted student");
    Ok(Json(json!({ "ok": true })))
}
