use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::Role;
use crate::http::error::ApiError;
use crate::http::extract::{AppJson, CurrentAdmin, CurrentUser};
use crate::http::helpers::{now, require_trimmed};
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", put(update).delete(remove))
}

const AUDIENCES: [&str; 3] = ["all", "teachers", "students"];

fn parse_audience(raw: &str) -> Result<String, ApiError> {
    let audience = raw.trim().to_lowercase();
    if !AUDIENCES.contains(&audience.as_str()) {
        return Err(ApiError::bad_request(
            "audience must be one of all, teachers, students",
        ));
    }
    Ok(audience)
}

fn notice_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "title": row.get::<_, String>(1)?,
        "body": row.get::<_, String>(2)?,
        "audience": row.get::<_, String>(3)?,
        "publishedAt": row.get::<_, String>(4)?,
        "createdAt": row.get::<_, String>(5)?,
    }))
}

fn fetch_notice(conn: &Connection, id: &str) -> Result<Value, ApiError> {
    conn.query_row(
        "SELECT id, title, body, audience, published_at, created_at
         FROM notices WHERE id = ?",
        [id],
        notice_json,
    )
    .optional()
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("notice"))
}

/// GET /api/notices, newest first. Teachers and students each see their
/// own audience plus "all"; admin sees the whole board.
async fn list(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let mut sql = String::from(
        "SELECT id, title, body, audience, published_at, created_at FROM notices",
    );
    let mut params: Vec<String> = Vec::new();
    match user.role {
        Role::Admin => {}
        Role::Teacher => {
            sql.push_str(" WHERE audience IN (?, ?)");
            params.push("all".into());
            params.push("teachers".into());
        }
        Role::Student => {
            sql.push_str(" WHERE audience IN (?, ?)");
            params.push("all".into());
            params.push("students".into());
        }
    }
    sql.push_str(" ORDER BY published_at DESC, created_at DESC");

    let conn = state.db();
    let mut stmt = conn.prepare(&sql).map_err(ApiError::db)?;
    let notices = stmt
        .query_map(rusqlite::params_from_iter(params), notice_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "notices": notices })))
}

#[derive(Debug, Deserialize)]
struct CreateBody {
    title: String,
    body: String,
    audience: String,
}

/// POST /api/notices. Publication time is the creation time.
async fn create(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let title = require_trimmed(&body.title, "title")?;
    let text = require_trimmed(&body.body, "body")?;
    let audience = parse_audience(&body.audience)?;

    let conn = state.db();
    let id = Uuid::new_v4().to_string();
    let stamp = now();
    conn.execute(
        "INSERT INTO notices(id, title, body, audience, published_at, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &title, &text, &audience, &stamp, &stamp),
    )
    .map_err(ApiError::db)?;

    tracing::info!(notice_id = %id, audience = %audience, "notice published");
    let notice = fetch_notice(&conn, &id)?;
    Ok((StatusCode::CREATED, Json(notice)))
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    title: Option<String>,
    body: Option<String>,
    audience: Option<String>,
}

/// PUT /api/notices/{id}.
async fn update(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateBody>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let current: Option<(String, String, String)> = conn
        .query_row(
            "SELECT title, body, audience FROM notices WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(ApiError::db)?;
    let (mut title, mut text, mut audience) =
        current.ok_or_else(|| ApiError::not_found("notice"))?;

    if let Some(new_title) = body.title.as_deref() {
        title = require_trimmed(new_title, "title")?;
    }
    if let Some(new_body) = body.body.as_deref() {
        text = require_trimmed(new_body, "body")?;
    }
    if let Some(new_audience) = body.audience.as_deref() {
        audience = parse_audience(new_audience)?;
    }

    conn.execute(
        "UPDATE notices SET title = ?, body = ?, audience = ? WHERE id = ?",
        (&title, &text, &audience, &id),
    )
    .map_err(ApiError::db)?;

    let notice = fetch_notice(&conn, &id)?;
    Ok(Json(notice))
}

/// DELETE /api/notices/{id}.
async fn remove(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    fetch_notice(&conn, &id)?;
    conn.execute("DELETE FROM notices WHERE id = ?", [&id])
        .map_err(ApiError::db)?;
    tracing::info!(notice_id = %id, "notice deleted");
    Ok(Json(json!({ "ok": true })))
}
