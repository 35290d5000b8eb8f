use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{self, Role};
use crate::http::error::ApiError;
use crate::http::extract::{AppJson, CurrentAdmin};
use crate::http::helpers::require_trimmed;
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(issue))
        .route("/:id", delete(revoke))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueBody {
    role: String,
    label: String,
    student_id: Option<String>,
}

async fn issue(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<IssueBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let role = Role::parse(body.role.trim())
        .ok_or_else(|| ApiError::bad_request("role must be admin, teacher, or student"))?;
    let label = require_trimmed(&body.label, "label")?;

    let conn = state.db();
    let student_id = match role {
        Role::Student => {
            let student_id = body
                .student_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ApiError::bad_request("student tokens require studentId"))?;
            let exists: Option<i64> = conn
                .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                    r.get(0)
                })
                .optional()
                .map_err(ApiError::db)?;
            if exists.is_none() {
                return Err(ApiError::not_found("student"));
            }
            Some(student_id.to_string())
        }
        _ => {
            if body.student_id.is_some() {
                return Err(ApiError::bad_request(
                    "studentId is only valid for student tokens",
                ));
            }
            None
        }
    };

    let issued = auth::issue_token(&conn, role, &label, student_id.as_deref())
        .map_err(|e| ApiError::internal(e, "token issue failed"))?;
    tracing::info!(token_id = %issued.id, role = role.as_str(), "issued api token");
    let payload = serde_json::to_value(issued)
        .map_err(|e| ApiError::internal(e, "token serialization failed"))?;
    Ok((StatusCode::CREATED, Json(payload)))
}

async fn list(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let mut stmt = conn
        .prepare(
            "SELECT id, role, label, student_id, created_at, revoked_at
             FROM api_tokens ORDER BY created_at",
        )
        .map_err(ApiError::db)?;
    let tokens = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "role": row.get::<_, String>(1)?,
                "label": row.get::<_, String>(2)?,
                "studentId": row.get::<_, Option<String>>(3)?,
                "createdAt": row.get::<_, String>(4)?,
                "revokedAt": row.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "tokens": tokens })))
}

async fn revoke(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let revoked = auth::revoke_token(&conn, &id)
        .map_err(|e| ApiError::internal(e, "token revoke failed"))?;
    if !revoked {
        return Err(ApiError::not_found("token"));
    }
    tracing::info!(token_id = %id, "revoked api token");
    Ok(Json(json!({ "ok": true })))
}
