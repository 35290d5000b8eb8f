use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::extract::{AppJson, AppQuery, CurrentAdmin, CurrentStaff, CurrentUser};
use crate::http::helpers::{like_prefix, now, optional_trimmed, parse_date, require_trimmed};
use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/books", get(list_books).post(create_book))
        .route("/books/:id", put(update_book).delete(remove_book))
        .route("/loans", get(list_loans).post(borrow))
        .route("/loans/:id/return", post(return_loan))
}

const BOOK_COLUMNS: &str = "id, title, author, isbn, copies_total, copies_available, created_at";

fn book_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "title": row.get::<_, String>(1)?,
        "author": row.get::<_, String>(2)?,
        "isbn": row.get::<_, Option<String>>(3)?,
        "copiesTotal": row.get::<_, i64>(4)?,
        "copiesAvailable": row.get::<_, i64>(5)?,
        "createdAt": row.get::<_, String>(6)?,
    }))
}

fn fetch_book(conn: &Connection, id: &str) -> Result<Value, ApiError> {
    let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?");
    conn.query_row(&sql, [id], book_json)
        .optional()
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("book"))
}

fn open_loan_count(conn: &Connection, book_id: &str) -> Result<i64, ApiError> {
    conn.query_row(
        "SELECT COUNT(*) FROM book_loans WHERE book_id = ? AND returned_at IS NULL",
        [book_id],
        |r| r.get(0),
    )
    .map_err(ApiError::db)
}

#[derive(Debug, Deserialize)]
struct BookListQuery {
    q: Option<String>,
    available: Option<bool>,
}

/// GET /api/library/books: the catalog, open to any authenticated user.
async fn list_books(
    CurrentUser(_): CurrentUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<BookListQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE 1=1");
    let mut params: Vec<String> = Vec::new();
    if let Some(q) = query.q.as_deref() {
        let q = q.trim();
        if !q.is_empty() {
            sql.push_str(
                " AND (LOWER(title) LIKE ? ESCAPE '\\' OR LOWER(author) LIKE ? ESCAPE '\\')",
            );
            let pattern = like_prefix(q);
            params.push(pattern.clone());
            params.push(pattern);
        }
    }
    if query.available == Some(true) {
        sql.push_str(" AND copies_available > 0");
    }
    sql.push_str(" ORDER BY title, author");

    let conn = state.db();
    let mut stmt = conn.prepare(&sql).map_err(ApiError::db)?;
    let books = stmt
        .query_map(rusqlite::params_from_iter(params), book_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "books": books })))
}

#[derive(Debug, Deserialize)]
struct CreateBookBody {
    title: String,
    author: String,
    isbn: Option<String>,
    copies: i64,
}

/// POST /api/library/books. All copies start on the shelf.
async fn create_book(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateBookBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let title = require_trimmed(&body.title, "title")?;
    let author = require_trimmed(&body.author, "author")?;
    if body.copies < 1 {
        return Err(ApiError::bad_request("copies must be at least 1"));
    }

    let conn = state.db();
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO books(id, title, author, isbn, copies_total, copies_available, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &title,
            &author,
            optional_trimmed(body.isbn.as_deref()),
            body.copies,
            body.copies,
            now(),
        ),
    )
    .map_err(ApiError::db)?;

    tracing::info!(book_id = %id, copies = body.copies, "book added");
    let book = fetch_book(&conn, &id)?;
    Ok((StatusCode::CREATED, Json(book)))
}

#[derive(Debug, Deserialize)]
struct UpdateBookBody {
    title: Option<String>,
    author: Option<String>,
    isbn: Option<String>,
    copies: Option<i64>,
}

/// PATCH /api/library/books/{id}. Growing or shrinking the holding moves
/// the shelf count by the same delta; copies out on loan put a floor
/// under the shrink.
async fn update_book(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(body): AppJson<UpdateBookBody>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let current: Option<(i64, i64)> = conn
        .query_row(
            "SELECT copies_total, copies_available FROM books WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(ApiError::db)?;
    let (copies_total, copies_available) = current.ok_or_else(|| ApiError::not_found("book"))?;

    let mut sets: Vec<&str> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();
    if let Some(title) = body.title.as_deref() {
        sets.push("title = ?");
        params.push(SqlValue::Text(require_trimmed(title, "title")?));
    }
    if let Some(author) = body.author.as_deref() {
        sets.push("author = ?");
        params.push(SqlValue::Text(require_trimmed(author, "author")?));
    }
    if let Some(isbn) = body.isbn.as_deref() {
        sets.push("isbn = ?");
        params.push(match optional_trimmed(Some(isbn)) {
            Some(s) => SqlValue::Text(s),
            None => SqlValue::Null,
        });
    }
    if let Some(copies) = body.copies {
        if copies < 1 {
            return Err(ApiError::bad_request("copies must be at least 1"));
        }
        let new_available = copies_available + (copies - copies_total);
        if new_available < 0 {
            return Err(ApiError::bad_request(
                "cannot reduce copies below the number currently on loan",
            ));
        }
        sets.push("copies_total = ?");
        params.push(SqlValue::Integer(copies));
        sets.push("copies_available = ?");
        params.push(SqlValue::Integer(new_available));
    }
    if sets.is_empty() {
        return Err(ApiError::bad_request("no fields to update"));
    }
    params.push(SqlValue::Text(id.clone()));
    let sql = format!("UPDATE books SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(params))
        .map_err(ApiError::db)?;

    let book = fetch_book(&conn, &id)?;
    Ok(Json(book))
}

/// DELETE /api/library/books/{id}. Open loans pin the record.
async fn remove_book(
    CurrentAdmin(_): CurrentAdmin,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    fetch_book(&conn, &id)?;
    if open_loan_count(&conn, &id)? > 0 {
        return Err(ApiError::bad_request(
            "book has open loans and cannot be deleted",
        ));
    }
    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    tx.execute("DELETE FROM book_loans WHERE book_id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.execute("DELETE FROM books WHERE id = ?", [&id])
        .map_err(ApiError::db)?;
    tx.commit().map_err(ApiError::db)?;
    tracing::info!(book_id = %id, "book removed");
    Ok(Json(json!({ "ok": true })))
}

const LOAN_COLUMNS: &str = "l.id, l.book_id, b.title, l.student_id, s.first_name, s.last_name,
    l.loaned_at, l.due_date, l.returned_at";

fn loan_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "bookId": row.get::<_, String>(1)?,
        "bookTitle": row.get::<_, String>(2)?,
        "studentId": row.get::<_, String>(3)?,
        "studentName": format!("{} {}", row.get::<_, String>(4)?, row.get::<_, String>(5)?),
        "loanedAt": row.get::<_, String>(6)?,
        "dueDate": row.get::<_, String>(7)?,
        "returnedAt": row.get::<_, Option<String>>(8)?,
    }))
}

fn fetch_loan(conn: &Connection, id: &str) -> Result<Value, ApiError> {
    let sql = format!(
        "SELECT {LOAN_COLUMNS} FROM book_loans l
         JOIN books b ON b.id = l.book_id
         JOIN students s ON s.id = l.student_id
         WHERE l.id = ?"
    );
    conn.query_row(&sql, [id], loan_json)
        .optional()
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("loan"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoanListQuery {
    student_id: Option<String>,
    book_id: Option<String>,
    open: Option<bool>,
}

/// GET /api/library/loans: circulation desk view, newest first.
async fn list_loans(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<LoanListQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut sql = format!(
        "SELECT {LOAN_COLUMNS} FROM book_loans l
         JOIN books b ON b.id = l.book_id
         JOIN students s ON s.id = l.student_id
         WHERE 1=1"
    );
    let mut params: Vec<String> = Vec::new();
    if let Some(student_id) = query.student_id {
        sql.push_str(" AND l.student_id = ?");
        params.push(student_id);
    }
    if let Some(book_id) = query.book_id {
        sql.push_str(" AND l.book_id = ?");
        params.push(book_id);
    }
    if query.open == Some(true) {
        sql.push_str(" AND l.returned_at IS NULL");
    }
    sql.push_str(" ORDER BY l.loaned_at DESC, l.id");

    let conn = state.db();
    let mut stmt = conn.prepare(&sql).map_err(ApiError::db)?;
    let loans = stmt
        .query_map(rusqlite::params_from_iter(params), loan_json)
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    Ok(Json(json!({ "loans": loans })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BorrowBody {
    book_id: String,
    student_id: String,
    due_date: String,
}

/// POST /api/library/loans. The loan row and the shelf decrement land in
/// one transaction so the available count never drifts.
async fn borrow(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    AppJson(body): AppJson<BorrowBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let due_date = parse_date(&body.due_date, "dueDate")?;

    let conn = state.db();
    let available: Option<i64> = conn
        .query_row(
            "SELECT copies_available FROM books WHERE id = ?",
            [&body.book_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    let available = available.ok_or_else(|| ApiError::not_found("book"))?;
    let student_known: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ?",
            [&body.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    if student_known.is_none() {
        return Err(ApiError::not_found("student"));
    }
    let duplicate: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM book_loans
             WHERE book_id = ? AND student_id = ? AND returned_at IS NULL",
            [&body.book_id, &body.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    if duplicate.is_some() {
        return Err(ApiError::bad_request(
            "student already has this book on loan",
        ));
    }
    if available < 1 {
        return Err(ApiError::bad_request("no copies available"));
    }

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    tx.execute(
        "INSERT INTO book_loans(id, book_id, student_id, loaned_at, due_date)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &body.book_id, &body.student_id, now(), &due_date),
    )
    .map_err(ApiError::db)?;
    tx.execute(
        "UPDATE books SET copies_available = copies_available - 1 WHERE id = ?",
        [&body.book_id],
    )
    .map_err(ApiError::db)?;
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(loan_id = %id, book_id = %body.book_id, student_id = %body.student_id, "book loaned");
    let loan = fetch_loan(&conn, &id)?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// POST /api/library/loans/{id}/return.
async fn return_loan(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT book_id, returned_at FROM book_loans WHERE id = ?",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(ApiError::db)?;
    let (book_id, returned_at) = row.ok_or_else(|| ApiError::not_found("loan"))?;
    if returned_at.is_some() {
        return Err(ApiError::bad_request("loan is already returned"));
    }

    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    tx.execute(
        "UPDATE book_loans SET returned_at = ? WHERE id = ?",
        (now(), &id),
    )
    .map_err(ApiError::db)?;
    tx.execute(
        "UPDATE books SET copies_available = copies_available + 1 WHERE id = ?",
        [&book_id],
    )
    .map_err(ApiError::db)?;
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(loan_id = %id, book_id = %book_id, "book returned");
    let loan = fetch_loan(&conn, &id)?;
    Ok(Json(loan))
}

/// GET /api/students/{id}/loans: the student's own borrowing history,
/// open loans first. An open loan past its due date is flagged overdue.
pub async fn student_loans(
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

    let today = chrono::Utc::now().date_naive().to_string();
    let mut stmt = conn
        .prepare(
            "SELECT l.id, l.book_id, b.title, b.author, l.loaned_at, l.due_date, l.returned_at
             FROM book_loans l
             JOIN books b ON b.id = l.book_id
             WHERE l.student_id = ?
             ORDER BY l.returned_at IS NOT NULL, l.loaned_at DESC",
        )
        .map_err(ApiError::db)?;
    let loans = stmt
        .query_map([&id], |row| {
            let due_date: String = row.get(5)?;
            let returned_at: Option<String> = row.get(6)?;
            let overdue = returned_at.is_none() && due_date < today;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "bookId": row.get::<_, String>(1)?,
                "bookTitle": row.get::<_, String>(2)?,
                "bookAuthor": row.get::<_, String>(3)?,
                "loanedAt": row.get::<_, String>(4)?,
                "dueDate": due_date,
                "returnedAt": returned_at,
                "overdue": overdue,
            }))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;

    Ok(Json(json!({ "studentId": id, "loans": loans })))
}
