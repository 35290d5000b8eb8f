use axum::extract::State;
use axum::Json;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::http::extract::CurrentAdmin;
use crate::http::AppState;

fn scalar(conn: &Connection, sql: &str) -> Result<i64, ApiError> {
    conn.query_row(sql, [], |r| r.get(0)).map_err(ApiError::db)
}

/// GET /api/dashboard: the admin landing numbers in one round trip.
pub async fn summary(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let active_students = scalar(&conn, "SELECT COUNT(*) FROM students WHERE active = 1")?;
    let active_staff = scalar(&conn, "SELECT COUNT(*) FROM staff WHERE active = 1")?;
    let classes = scalar(&conn, "SELECT COUNT(*) FROM classes")?;
    let subjects = scalar(&conn, "SELECT COUNT(*) FROM subjects")?;
    let exams = scalar(&conn, "SELECT COUNT(*) FROM exams")?;
    let notices = scalar(&conn, "SELECT COUNT(*) FROM notices")?;
    let subscribers = scalar(&conn, "SELECT COUNT(*) FROM subscribers")?;
    let open_loans = scalar(
        &conn,
        "SELECT COUNT(*) FROM book_loans WHERE returned_at IS NULL",
    )?;
    let fees_open = scalar(&conn, "SELECT COUNT(*) FROM fees WHERE status <> 'paid'")?;
    let fees_outstanding = scalar(
        &conn,
        "SELECT COALESCE(SUM(amount_due - amount_paid), 0) FROM fees WHERE status <> 'paid'",
    )?;

    Ok(Json(json!({
        "activeStudents": active_students,
        "activeStaff": active_staff,
        "classes": classes,
        "subjects": subjects,
        "exams": exams,
        "notices": notices,
        "subscribers": subscribers,
        "openLoans": open_loans,
        "openFees": fees_open,
        "outstandingBalance": fees_outstanding,
    })))
}
