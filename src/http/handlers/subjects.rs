use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, CurrentAdmin, CurrentUser};
use crate::http::helpers::require_trimmed;
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", put(update).delete(remove))
}

fn subject_json(row: &rusqlite::Row) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "code": row.get::<_, String>(2)?,
    }))
}

fn fetch_subject(conn: &Connection, id: &str) -> Result<Option<Value>, ApiError> {
    conn.query_row(
        "SELECT id, name, code FROM subjects WHERE id = ?",
        [id],
        subject_json,
    )
    .optional()
    .map_err(ApiError::db)
}

fn code_taken(conn: &Connection, code: &str, exclude_id: Option<&str>) -> Result<bool, ApiError> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subjects WHERE code = ? AND id <> ?",
            [code, exclude_id.unwrap_or("")],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    Ok(hit.is_some())
}

async fn list(
    CurrentUser(_): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let mut stmt = conn
        .prepare("SELECT id, name, code FROM subjects ORDER BY code")
        .map_err(ApiError::db)?;
    let subjects = stmt
        .query_map([], subject_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "subjects": subjects })))
}

#[derive(Debug, Deserialize)]
struct CreateBody {
    name: String,
    code: String,
}

async fn create(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = require_trimmed(&body.name, "name")?;
    let code = require_trimmed(&body.code, "code")?.to_uppercase();

    let conn = state.db();
    if code_taken(&conn, &code, None)? {
        return Err(ApiError::bad_request(format!(
            "subject code {code} already in use"
        )));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&id, &name, &code),
    )
    .map_err(ApiError::db)?;

    tracing::info!(subject_id = %id, code = %code, "created subject");
    let subject = fetch_subject(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok((StatusCode::CREATED, Json(subject)))
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    name: Option<String>,
    code: Option<String>,
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
            "SELECT name, code FROM subjects WHERE id = ?",
            [&id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(ApiError::db)?;
    let Some((current_name, current_code)) = current else {
        return Err(ApiError::not_found("subject"));
    };

    let name = match body.name {
        Some(raw) => require_trimmed(&raw, "name")?,
        None => current_name,
    };
    let code = match body.code {
        Some(raw) => require_trimmed(&raw, "code")?.to_uppercase(),
        None => current_code,
    };
    if code_taken(&conn, &code, Some(&id))? {
        return Err(ApiError::bad_request(format!(
            "subject code {code} already in use"
        )));
    }
    conn.execute(
        "UPDATE subjects SET name = ?, code = ? WHERE id = ?",
        (&name, &code, &id),
    )
    .map_err(ApiError::db)?;

    let subject = fetch_subject(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok(Json(subject))
}

async fn remove(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    if fetch_subject(&conn, &id)?.is_none() {
        return Err(ApiError::not_found("subject"));
    }

    let referenced: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM result_subjects WHERE subject_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(ApiError::db)?;
    if referenced > 0 {
        return Err(ApiError::bad_request(
            "subject has recorded marks and cannot be deleted",
        ));
    }

    conn.execute("DELETE FROM subjects WHERE id = ?", [&id])
        .map_err(ApiError::db)?;
    tracing::info!(subject_id = %id, "deleted subject");
    Ok(Json(json!({ "ok": true })))
}
