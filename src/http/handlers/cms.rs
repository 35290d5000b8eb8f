use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, CurrentAdmin};
use crate::http::helpers::{now, optional_trimmed, require_trimmed};
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/content", get(list))
        .route("/content/:key", get(get_one).put(upsert))
}

/// Block keys are slugs baked into the public site's templates.
fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 64
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn block_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "key": row.get::<_, String>(0)?,
        "title": row.get::<_, Option<String>>(1)?,
        "body": row.get::<_, String>(2)?,
        "updatedAt": row.get::<_, String>(3)?,
    }))
}

fn fetch_block(conn: &Connection, key: &str) -> Result<Value, ApiError> {
    conn.query_row(
        "SELECT key, title, body, updated_at FROM cms_blocks WHERE key = ?",
        [key],
        block_json,
    )
    .optional()
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("content block"))
}

/// GET /api/cms/content: everything the public site renders. No auth;
/// this is the landing-page payload.
async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let mut stmt = conn
        .prepare("SELECT key, title, body, updated_at FROM cms_blocks ORDER BY key")
        .map_err(ApiError::db)?;
    let blocks = stmt
        .query_map([], block_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "blocks": blocks })))
}

/// GET /api/cms/content/{key}.
async fn get_one(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let block = fetch_block(&conn, &key)?;
    Ok(Json(block))
}

#[derive(Debug, Deserialize)]
struct UpsertBody {
    title: Option<String>,
    body: String,
}

/// PUT /api/cms/content/{key}: create or replace the block. The public
/// fetch sees the new body as soon as this returns.
async fn upsert(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(key): Path<String>,
    AppJson(body): AppJson<UpsertBody>,
) -> Result<Json<Value>, ApiError> {
    if !valid_key(&key) {
        return Err(ApiError::bad_request(
            "key must be 1-64 lowercase letters, digits, or hyphens",
        ));
    }
    let text = require_trimmed(&body.body, "body")?;

    let conn = state.db();
    conn.execute(
        "INSERT INTO cms_blocks(key, title, body, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(key)
         DO UPDATE SET title = excluded.title,
                       body = excluded.body,
                       updated_at = excluded.updated_at",
        (
            &key,
            optional_trimmed(body.title.as_deref()),
            &text,
            now(),
        ),
    )
    .map_err(ApiError::db)?;

    tracing::info!(key = %key, "content block saved");
    let block = fetch_block(&conn, &key)?;
    Ok(Json(block))
}
