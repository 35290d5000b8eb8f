use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, CurrentAdmin, CurrentUser};
use crate::http::helpers::{now, parse_date, require_trimmed};
use crate::http::AppState;

use super::results;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(remove))
        .route("/:id/marks", post(results::submit_marks))
        .route("/:id/marks/bulk", post(results::bulk_subject_marks))
        .route("/:id/results", get(results::exam_results))
}

fn exam_json(row: &rusqlite::Row, class_ids: Vec<String>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "academicYear": row.get::<_, String>(2)?,
        "term": row.get::<_, i64>(3)?,
        "startDate": row.get::<_, String>(4)?,
        "endDate": row.get::<_, String>(5)?,
        "createdAt": row.get::<_, String>(6)?,
        "classIds": class_ids,
    }))
}

const EXAM_COLUMNS: &str = "id, name, academic_year, term, start_date, end_date, created_at";

fn exam_class_ids(conn: &Connection, exam_id: &str) -> Result<Vec<String>, ApiError> {
    let mut stmt = conn
        .prepare("SELECT class_id FROM exam_classes WHERE exam_id = ? ORDER BY class_id")
        .map_err(ApiError::db)?;
    stmt.query_map([exam_id], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)
}

pub(crate) fn fetch_exam(conn: &Connection, id: &str) -> Result<Option<Value>, ApiError> {
    let row = conn
        .query_row(
            &format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = ?"),
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()
        .map_err(ApiError::db)?;
    let Some((id, name, year, term, start, end, created)) = row else {
        return Ok(None);
    };
    let class_ids = exam_class_ids(conn, &id)?;
    Ok(Some(json!({
        "id": id,
        "name": name,
        "academicYear": year,
        "term": term,
        "startDate": start,
        "endDate": end,
        "createdAt": created,
        "classIds": class_ids,
    })))
}

async fn list(
    CurrentUser(_): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();

    let mut class_map: HashMap<String, Vec<String>> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT exam_id, class_id FROM exam_classes ORDER BY class_id")
        .map_err(ApiError::db)?;
    let pairs = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    for (exam_id, class_id) in pairs {
        class_map.entry(exam_id).or_default().push(class_id);
    }

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EXAM_COLUMNS} FROM exams ORDER BY start_date DESC, created_at DESC"
        ))
        .map_err(ApiError::db)?;
    let exams = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let class_ids = class_map.get(&id).cloned().unwrap_or_default();
            exam_json(row, class_ids)
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "exams": exams })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody {
    name: String,
    academic_year: String,
    term: i64,
    start_date: String,
    end_date: String,
    class_ids: Vec<String>,
}

fn check_classes(conn: &Connection, class_ids: &[String]) -> Result<(), ApiError> {
    for class_id in class_ids {
        let hit: Option<i64> = conn
            .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
                r.get(0)
            })
            .optional()
            .map_err(ApiError::db)?;
        if hit.is_none() {
            return Err(ApiError::NotFound(format!("class {class_id} not found")));
        }
    }
    Ok(())
}

async fn create(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = require_trimmed(&body.name, "name")?;
    let academic_year = require_trimmed(&body.academic_year, "academicYear")?;
    if body.term < 1 {
        return Err(ApiError::bad_request("term must be positive"));
    }
    let start_date = parse_date(&body.start_date, "startDate")?;
    let end_date = parse_date(&body.end_date, "endDate")?;
    if end_date < start_date {
        return Err(ApiError::bad_request("endDate must not precede startDate"));
    }
    if body.class_ids.is_empty() {
        return Err(ApiError::bad_request("classIds must not be empty"));
    }

    let conn = state.db();
    check_classes(&conn, &body.class_ids)?;

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    tx.execute(
        "INSERT INTO exams(id, name, academic_year, term, start_date, end_date, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &academic_year,
            body.term,
            &start_date,
            &end_date,
            now(),
        ),
    )
    .map_err(ApiError::db)?;
    for class_id in &body.class_ids {
        tx.execute(
            "INSERT OR IGNORE INTO exam_classes(exam_id, class_id) VALUES(?, ?)",
            (&id, class_id),
        )
        .map_err(ApiError::db)?;
    }
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(exam_id = %id, name = %name, "created exam");
    let exam = fetch_exam(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok((StatusCode::CREATED, Json(exam)))
}

async fn get_one(
    CurrentUser(_): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let exam = fetch_exam(&conn, &id)?.ok_or_else(|| ApiError::not_found("exam"))?;
    Ok(Json(exam))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody {
    name: Option<String>,
    academic_year: Option<String>,
    term: Option<i64>,
    start_date: Option<String>,
    end_date: Option<String>,
    class_ids: Option<Vec<String>>,
}

async fn update(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateBody>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let current = conn
        .query_row(
            "SELECT name, academic_year, term, start_date, end_date FROM exams WHERE id = ?",
            [&id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .map_err(ApiError::db)?;
    let Some((cur_name, cur_year, cur_term, cur_start, cur_end)) = current else {
        return Err(ApiError::not_found("exam"));
    };

    let name = match body.name {
        Some(raw) => require_trimmed(&raw, "name")?,
        None => cur_name,
    };
    let academic_year = match body.academic_year {
        Some(raw) => require_trimmed(&raw, "academicYear")?,
        None => cur_year,
    };
    let term = match body.term {
        Some(t) if t < 1 => return Err(ApiError::bad_request("term must be positive")),
        Some(t) => t,
        None => cur_term,
    };
    let start_date = match body.start_date {
        Some(raw) => parse_date(&raw, "startDate")?,
        None => cur_start,
    };
    let end_date = match body.end_date {
        Some(raw) => parse_date(&raw, "endDate")?,
        None => cur_end,
    };
    if end_date < start_date {
        return Err(ApiError::bad_request("endDate must not precede startDate"));
    }
    if let Some(class_ids) = body.class_ids.as_deref() {
        if class_ids.is_empty() {
            return Err(ApiError::bad_request("classIds must not be empty"));
        }
        check_classes(&conn, class_ids)?;
    }

    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    tx.execute(
        "UPDATE exams SET name = ?, academic_year = ?, term = ?, start_date = ?, end_date = ?
         WHERE id = ?",
        (&name, &academic_year, term, &start_date, &end_date, &id),
    )
    .map_err(ApiError::db)?;
    if let Some(class_ids) = body.class_ids {
        // Replacing the set leaves recorded results alone; participation
        // only gates new mark submissions.
        tx.execute("DELETE FROM exam_classes WHERE exam_id = ?", [&id])
            .map_err(ApiError::db)?;
        for class_id in &class_ids {
            tx.execute(
                "INSERT OR IGNORE INTO exam_classes(exam_id, class_id) VALUES(?, ?)",
                (&id, class_id),
            )
            .map_err(ApiError::db)?;
        }
    }
    tx.commit().map_err(ApiError::db)?;

    let exam = fetch_exam(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok(Json(exam))
}

async fn remove(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let known: Option<i64> = conn
        .query_row("SELECT 1 FROM exams WHERE id = ?", [&id], |r| r.get(0))
        .optional()
        .map_err(ApiError::db)?;
    if known.is_none() {
        return Err(ApiError::not_found("exam"));
    }

    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    tx.execute(
        "DELETE FROM result_subjects
         WHERE result_id IN (SELECT id FROM results WHERE exam_id = ?)",
        [&id],
    )
    .map_err(ApiError::db)?;
    tx.execute("DELETE FROM results WHERE exam_id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.execute("DELETE FROM exam_classes WHERE exam_id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.execute("DELETE FROM exams WHERE id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(exam_id = %id, "deleted exam");
    Ok(Json(json!({ "ok": true })))
}
