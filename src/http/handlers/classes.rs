use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, CurrentAdmin, CurrentStaff};
use crate::http::helpers::{optional_trimmed, require_trimmed};
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(remove))
}

fn class_json(row: &rusqlite::Row) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "name": row.get::<_, String>(1)?,
        "section": row.get::<_, Option<String>>(2)?,
        "leadStaffId": row.get::<_, Option<String>>(3)?,
        "studentCount": row.get::<_, i64>(4)?,
    }))
}

const CLASS_SELECT: &str = "SELECT
       c.id,
       c.name,
       c.section,
       c.lead_staff_id,
       (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
     FROM classes c";

fn fetch_class(conn: &Connection, id: &str) -> Result<Option<Value>, ApiError> {
    conn.query_row(&format!("{CLASS_SELECT} WHERE c.id = ?"), [id], class_json)
        .optional()
        .map_err(ApiError::db)
}

fn name_taken(
    conn: &Connection,
    name: &str,
    section: Option<&str>,
    exclude_id: Option<&str>,
) -> Result<bool, ApiError> {
    // SQLite unique indexes treat NULLs as distinct, so the section-less
    // duplicate check has to happen here.
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classes
             WHERE name = ? AND COALESCE(section, '') = COALESCE(?, '') AND id <> ?",
            (name, section, exclude_id.unwrap_or("")),
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    Ok(hit.is_some())
}

fn staff_exists(conn: &Connection, staff_id: &str) -> Result<bool, ApiError> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM staff WHERE id = ?", [staff_id], |r| r.get(0))
        .optional()
        .map_err(ApiError::db)?;
    Ok(hit.is_some())
}

async fn list(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    // Counts ride along so the dashboard list needs no second round trip.
    let mut stmt = conn
        .prepare(&format!("{CLASS_SELECT} ORDER BY c.name, c.section"))
        .map_err(ApiError::db)?;
    let classes = stmt
        .query_map([], class_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "classes": classes })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody {
    name: String,
    section: Option<String>,
    lead_staff_id: Option<String>,
}

async fn create(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = require_trimmed(&body.name, "name")?;
    let section = optional_trimmed(body.section);
    let lead_staff_id = optional_trimmed(body.lead_staff_id);

    let conn = state.db();
    if name_taken(&conn, &name, section.as_deref(), None)? {
        return Err(ApiError::bad_request(format!(
            "class {name} already exists"
        )));
    }
    if let Some(staff_id) = lead_staff_id.as_deref() {
        if !staff_exists(&conn, staff_id)? {
            return Err(ApiError::not_found("staff member"));
        }
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, section, lead_staff_id) VALUES(?, ?, ?, ?)",
        (&id, &name, &section, &lead_staff_id),
    )
    .map_err(ApiError::db)?;

    tracing::info!(class_id = %id, name = %name, "created class");
    let class = fetch_class(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok((StatusCode::CREATED, Json(class)))
}

async fn get_one(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let class = fetch_class(&conn, &id)?.ok_or_else(|| ApiError::not_found("class"))?;
    Ok(Json(class))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBody {
    name: Option<String>,
    section: Option<String>,
    lead_staff_id: Option<String>,
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
            "SELECT name, section FROM classes WHERE id = ?",
            [&id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                ))
            },
        )
        .optional()
        .map_err(ApiError::db)?;
    let Some((current_name, current_section)) = current else {
        return Err(ApiError::not_found("class"));
    };

    let name = match body.name {
        Some(raw) => require_trimmed(&raw, "name")?,
        None => current_name,
    };
    let section = match body.section {
        Some(raw) => optional_trimmed(Some(raw)),
        None => current_section,
    };
    if name_taken(&conn, &name, section.as_deref(), Some(&id))? {
        return Err(ApiError::bad_request(format!(
            "class {name} already exists"
        )));
    }

    let lead_staff_id = match body.lead_staff_id {
        Some(raw) => {
            let trimmed = optional_trimmed(Some(raw));
            if let Some(staff_id) = trimmed.as_deref() {
                if !staff_exists(&conn, staff_id)? {
                    return Err(ApiError::not_found("staff member"));
                }
            }
            Some(trimmed)
        }
        None => None,
    };

    match lead_staff_id {
        Some(lead) => conn
            .execute(
                "UPDATE classes SET name = ?, section = ?, lead_staff_id = ? WHERE id = ?",
                (&name, &section, &lead, &id),
            )
            .map_err(ApiError::db)?,
        None => conn
            .execute(
                "UPDATE classes SET name = ?, section = ? WHERE id = ?",
                (&name, &section, &id),
            )
            .map_err(ApiError::db)?,
    };

    let class = fetch_class(&conn, &id)?.ok_or(ApiError::Internal)?;
    Ok(Json(class))
}

async fn remove(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    if fetch_class(&conn, &id)?.is_none() {
        return Err(ApiError::not_found("class"));
    }

    let enrolled: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE class_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(ApiError::db)?;
    if enrolled > 0 {
        return Err(ApiError::bad_request(
            "class still has students; move or delete them first",
        ));
    }

    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    tx.execute("DELETE FROM exam_classes WHERE class_id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(class_id = %id, "deleted class");
    Ok(Json(json!({ "ok": true })))
}
