use axum::extract::{Path, State};
use axum::routing::{post, put};
use axum::{Json, Router};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, AppQuery, CurrentStaff, CurrentUser};
use crate::http::helpers::{days_in_month, now, parse_date, parse_month};
use crate::http::AppState;

const BULK_MARK_MAX_ENTRIES: usize = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", put(mark_day).get(day_sheet))
        .route("/bulk", post(bulk_mark))
}

const STATUSES: &[&str] = &["present", "absent", "late", "excused"];

fn parse_status(raw: &str) -> Result<String, ApiError> {
    let status = raw.trim().to_lowercase();
    if STATUSES.contains(&status.as_str()) {
        Ok(status)
    } else {
        Err(ApiError::bad_request(
            "status must be one of present, absent, late, excused",
        ))
    }
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

/// 404 when the student is unknown, 400 when enrolled elsewhere.
fn check_enrollment(conn: &Connection, student_id: &str, class_id: &str) -> Result<(), ApiError> {
    let enrolled: Option<String> = conn
        .query_row(
            "SELECT class_id FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    match enrolled {
        None => Err(ApiError::not_found("student")),
        Some(actual) if actual != class_id => Err(ApiError::bad_request(
            "student is not enrolled in this class",
        )),
        Some(_) => Ok(()),
    }
}

fn upsert_day(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    date: &str,
    status: &str,
) -> Result<(), ApiError> {
    conn.execute(
        "INSERT INTO attendance(class_id, student_id, date, status, recorded_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_id, student_id, date)
         DO UPDATE SET status = excluded.status, recorded_at = excluded.recorded_at",
        (class_id, student_id, date, status, now()),
    )
    .map_err(ApiError::db)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkBody {
    class_id: String,
    student_id: String,
    date: String,
    status: String,
}

async fn mark_day(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    AppJson(body): AppJson<MarkBody>,
) -> Result<Json<Value>, ApiError> {
    let date = parse_date(&body.date, "date")?;
    let status = parse_status(&body.status)?;

    let conn = state.db();
    if !class_exists(&conn, &body.class_id)? {
        return Err(ApiError::not_found("class"));
    }
    check_enrollment(&conn, &body.student_id, &body.class_id)?;
    upsert_day(&conn, &body.class_id, &body.student_id, &date, &status)?;

    Ok(Json(json!({
        "classId": body.class_id,
        "studentId": body.student_id,
        "date": date,
        "status": status,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkEntry {
    student_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkBody {
    class_id: String,
    date: String,
    entries: Vec<BulkEntry>,
}

async fn bulk_mark(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    AppJson(body): AppJson<BulkBody>,
) -> Result<Json<Value>, ApiError> {
    let date = parse_date(&body.date, "date")?;
    if body.entries.is_empty() {
        return Err(ApiError::bad_request("entries must not be empty"));
    }
    if body.entries.len() > BULK_MARK_MAX_ENTRIES {
        return Err(ApiError::bad_request(format!(
            "too many entries (max {BULK_MARK_MAX_ENTRIES})"
        )));
    }

    let conn = state.db();
    if !class_exists(&conn, &body.class_id)? {
        return Err(ApiError::not_found("class"));
    }

    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    let mut updated = 0usize;
    let mut errors: Vec<Value> = Vec::new();
    for (index, entry) in body.entries.iter().enumerate() {
        let outcome = parse_status(&entry.status).and_then(|status| {
            check_enrollment(&tx, &entry.student_id, &body.class_id)?;
            upsert_day(&tx, &body.class_id, &entry.student_id, &date, &status)
        });
        match outcome {
            Ok(()) => updated += 1,
            Err(ApiError::BadRequest(message)) | Err(ApiError::NotFound(message)) => {
                errors.push(json!({
                    "index": index,
                    "studentId": entry.student_id,
                    "message": message,
                }));
            }
            Err(other) => return Err(other),
        }
    }
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(
        class_id = %body.class_id,
        date = %date,
        updated,
        rejected = errors.len(),
        "bulk attendance mark"
    );
    Ok(Json(json!({
        "updated": updated,
        "rejected": errors.len(),
        "errors": errors,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetQuery {
    class_id: String,
    date: String,
}

async fn day_sheet(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<SheetQuery>,
) -> Result<Json<Value>, ApiError> {
    let date = parse_date(&query.date, "date")?;
    let conn = state.db();
    if !class_exists(&conn, &query.class_id)? {
        return Err(ApiError::not_found("class"));
    }

    // Every active student appears; unmarked days come back as null.
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.first_name, s.last_name, s.roll_no, a.status
             FROM students s
             LEFT JOIN attendance a
               ON a.student_id = s.id AND a.class_id = s.class_id AND a.date = ?
             WHERE s.class_id = ? AND s.active = 1
             ORDER BY s.roll_no, s.last_name",
        )
        .map_err(ApiError::db)?;
    let entries = stmt
        .query_map([&date, &query.class_id], |row| {
            Ok(json!({
                "studentId": row.get::<_, String>(0)?,
                "firstName": row.get::<_, String>(1)?,
                "lastName": row.get::<_, String>(2)?,
                "rollNo": row.get::<_, i64>(3)?,
                "status": row.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;

    Ok(Json(json!({
        "classId": query.class_id,
        "date": date,
        "entries": entries,
    })))
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    month: String,
}

/// Month view for one student, mounted under /api/students/{id}/attendance.
pub async fn student_month(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppQuery(query): AppQuery<MonthQuery>,
) -> Result<Json<Value>, ApiError> {
    if !user.may_view_student(&id) {
        return Err(ApiError::Forbidden);
    }
    let (year, month) = parse_month(&query.month)?;

    let conn = state.db();
    let known: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&id], |r| r.get(0))
        .optional()
        .map_err(ApiError::db)?;
    if known.is_none() {
        return Err(ApiError::not_found("student"));
    }

    let first = format!("{year:04}-{month:02}-01");
    let last = format!("{year:04}-{month:02}-{:02}", days_in_month(year, month));
    let mut stmt = conn
        .prepare(
            "SELECT date, status FROM attendance
             WHERE student_id = ? AND date >= ? AND date <= ?
             ORDER BY date",
        )
        .map_err(ApiError::db)?;
    let rows = stmt
        .query_map([&id, &first, &last], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;

    let mut counts = std::collections::HashMap::new();
    let days: Vec<Value> = rows
        .iter()
        .map(|(date, status)| {
            *counts.entry(status.clone()).or_insert(0i64) += 1;
            json!({ "date": date, "status": status })
        })
        .collect();

    Ok(Json(json!({
        "studentId": id,
        "month": format!("{year:04}-{month:02}"),
        "days": days,
        "counts": {
            "present": counts.get("present").copied().unwrap_or(0),
            "absent": counts.get("absent").copied().unwrap_or(0),
            "late": counts.get("late").copied().unwrap_or(0),
            "excused": counts.get("excused").copied().unwrap_or(0),
        },
        "recordedDays": rows.len(),
    })))
}
