use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, AppQuery, CurrentAdmin, CurrentStaff, CurrentUser};
use crate::http::helpers::{now, parse_date, require_trimmed};
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).delete(remove))
        .route("/:id/payments", post(record_payment))
}

const STATUSES: [&str; 3] = ["pending", "partial", "paid"];

const FEE_COLUMNS: &str = "f.id, f.student_id, s.first_name, s.last_name, f.title, f.term,
    f.amount_due, f.amount_paid, f.status, f.due_date, f.created_at";

fn fee_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let amount_due: i64 = row.get(6)?;
    let amount_paid: i64 = row.get(7)?;
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentId": row.get::<_, String>(1)?,
        "studentName": format!("{} {}", row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        "title": row.get::<_, String>(4)?,
        "term": row.get::<_, Option<String>>(5)?,
        "amountDue": amount_due,
        "amountPaid": amount_paid,
        "balance": amount_due - amount_paid,
        "status": row.get::<_, String>(8)?,
        "dueDate": row.get::<_, String>(9)?,
        "createdAt": row.get::<_, String>(10)?,
    }))
}

fn fetch_fee(conn: &Connection, id: &str) -> Result<Value, ApiError> {
    let sql = format!(
        "SELECT {FEE_COLUMNS} FROM fees f JOIN students s ON s.id = f.student_id WHERE f.id = ?"
    );
    conn.query_row(&sql, [id], fee_json)
        .optional()
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("fee"))
}

fn payment_rows(conn: &Connection, fee_id: &str) -> Result<Vec<Value>, ApiError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, amount, method, reference, paid_at
             FROM fee_payments WHERE fee_id = ? ORDER BY paid_at, id",
        )
        .map_err(ApiError::db)?;
    stmt.query_map([fee_id], |row| {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "amount": row.get::<_, i64>(1)?,
            "method": row.get::<_, Option<String>>(2)?,
            "reference": row.get::<_, Option<String>>(3)?,
            "paidAt": row.get::<_, String>(4)?,
        }))
    })
    .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
    .map_err(ApiError::db)
}

fn status_for(amount_due: i64, amount_paid: i64) -> &'static str {
    if amount_paid >= amount_due {
        "paid"
    } else if amount_paid > 0 {
        "partial"
    } else {
        "pending"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    student_id: Option<String>,
    class_id: Option<String>,
    status: Option<String>,
}

/// GET /api/fees: staff view across students, filterable by student,
/// class, and status.
async fn list(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut sql = format!(
        "SELECT {FEE_COLUMNS} FROM fees f JOIN students s ON s.id = f.student_id WHERE 1=1"
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(student_id) = query.student_id {
        sql.push_str(" AND f.student_id = ?");
        params.push(student_id);
    }
    if let Some(class_id) = query.class_id {
        sql.push_str(" AND s.class_id = ?");
        params.push(class_id);
    }
    if let Some(status) = query.status {
        if !STATUSES.contains(&status.as_str()) {
            return Err(ApiError::bad_request(
                "status must be one of pending, partial, paid",
            ));
        }
        sql.push_str(" AND f.status = ?");
        params.push(status);
    }
    sql.push_str(" ORDER BY f.due_date, f.created_at");

    let conn = state.db();
    let mut stmt = conn.prepare(&sql).map_err(ApiError::db)?;
    let fees = stmt
        .query_map(rusqlite::params_from_iter(params), fee_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "fees": fees })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody {
    student_id: String,
    title: String,
    term: Option<String>,
    amount_due: i64,
    due_date: String,
}

/// POST /api/fees: bill a student. Amounts are integer minor units; the
/// fee starts out pending with nothing paid.
async fn create(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let title = require_trimmed(&body.title, "title")?;
    if body.amount_due <= 0 {
        return Err(ApiError::bad_request("amountDue must be positive"));
    }
    let due_date = parse_date(&body.due_date, "dueDate")?;

    let conn = state.db();
    let known: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ?",
            [&body.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    if known.is_none() {
        return Err(ApiError::not_found("student"));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fees(id, student_id, title, term, amount_due, amount_paid,
                          status, due_date, created_at)
         VALUES(?, ?, ?, ?, ?, 0, 'pending', ?, ?)",
        (
            &id,
            &body.student_id,
            &title,
            &body.term,
            body.amount_due,
            &due_date,
            now(),
        ),
    )
    .map_err(ApiError::db)?;

    tracing::info!(fee_id = %id, student_id = %body.student_id, amount_due = body.amount_due, "fee created");
    let fee = fetch_fee(&conn, &id)?;
    Ok((StatusCode::CREATED, Json(fee)))
}

/// GET /api/fees/{id}: the fee with its payment history.
async fn get_one(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let mut fee = fetch_fee(&conn, &id)?;
    let payments = payment_rows(&conn, &id)?;
    fee["payments"] = Value::Array(payments);
    Ok(Json(fee))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentBody {
    amount: i64,
    method: Option<String>,
    reference: Option<String>,
}

/// POST /api/fees/{id}/payments. Overpayment is refused rather than
/// clamped; the row and the running amount_paid move in one transaction.
async fn record_payment(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<PaymentBody>,
) -> Result<Json<Value>, ApiError> {
    if body.amount <= 0 {
        return Err(ApiError::bad_request("amount must be positive"));
    }
    let conn = state.db();
    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT amount_due, amount_paid FROM fees WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(ApiError::db)?;
    let (amount_due, amount_paid) = row.ok_or_else(|| ApiError::not_found("fee"))?;
    if body.amount > amount_due - amount_paid {
        return Err(ApiError::bad_request("payment exceeds outstanding balance"));
    }

    let new_paid = amount_paid + body.amount;
    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    tx.execute(
        "INSERT INTO fee_payments(id, fee_id, amount, method, reference, paid_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &id,
            body.amount,
            &body.method,
            &body.reference,
            now(),
        ),
    )
    .map_err(ApiError::db)?;
    tx.execute(
        "UPDATE fees SET amount_paid = ?, status = ? WHERE id = ?",
        (new_paid, status_for(amount_due, new_paid), &id),
    )
    .map_err(ApiError::db)?;
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(fee_id = %id, amount = body.amount, "payment recorded");
    let mut fee = fetch_fee(&conn, &id)?;
    fee["payments"] = Value::Array(payment_rows(&conn, &id)?);
    Ok(Json(fee))
}

/// DELETE /api/fees/{id}. Paid-against fees are part of the money trail
/// and stay.
async fn remove(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    fetch_fee(&conn, &id)?;
    let payments: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM fee_payments WHERE fee_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(ApiError::db)?;
    if payments > 0 {
        return Err(ApiError::bad_request(
            "fee has recorded payments and cannot be deleted",
        ));
    }
    conn.execute("DELETE FROM fees WHERE id = ?", [&id])
        .map_err(ApiError::db)?;
    tracing::info!(fee_id = %id, "fee deleted");
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/students/{id}/fees: the student-facing statement with running
/// totals. Students reach only their own.
pub async fn student_fees(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !user.may_view_student(&id) {
        return Err(ApiError::Forbidden);
    }
    let conn = state.db();
    let known: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&id], |r| r.get(0))
        .optional()
        .map_err(ApiError::db)?;
    if known.is_none() {
        return Err(ApiError::not_found("student"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, title, term, amount_due, amount_paid, status, due_date, created_at
             FROM fees WHERE student_id = ? ORDER BY due_date, created_at",
        )
        .map_err(ApiError::db)?;
    let rows = stmt
        .query_map([&id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;

    let mut total_due = 0i64;
    let mut total_paid = 0i64;
    let fees: Vec<Value> = rows
        .into_iter()
        .map(|(fee_id, title, term, due, paid, status, due_date, created_at)| {
            total_due += due;
            total_paid += paid;
            json!({
                "id": fee_id,
                "title": title,
                "term": term,
                "amountDue": due,
                "amountPaid": paid,
                "balance": due - paid,
                "status": status,
                "dueDate": due_date,
                "createdAt": created_at,
            })
        })
        .collect();

    Ok(Json(json!({
        "studentId": id,
        "fees": fees,
        "totalDue": total_due,
        "totalPaid": total_paid,
        "totalOutstanding": total_due - total_paid,
    })))
}
