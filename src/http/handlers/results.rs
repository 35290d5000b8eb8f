use std::collections::{HashMap, HashSet};

use axum::extract::{Path, State};
use axum::Json;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::grading;
use crate::http::error::ApiError;
use crate::http::extract::{AppJson, AppQuery, CurrentStaff, CurrentUser};
use crate::http::helpers::now;
use crate::http::AppState;

// Handlers here mount under /api/exams and /api/students; the routers in
// exams.rs and students.rs reference them directly.
const BULK_MARKS_MAX_ENTRIES: usize = 500;

fn exam_exists(conn: &Connection, exam_id: &str) -> Result<bool, ApiError> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM exams WHERE id = ?", [exam_id], |r| r.get(0))
        .optional()
        .map_err(ApiError::db)?;
    Ok(hit.is_some())
}

fn student_class(conn: &Connection, student_id: &str) -> Result<Option<String>, ApiError> {
    conn.query_row(
        "SELECT class_id FROM students WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(ApiError::db)
}

fn subject_exists(conn: &Connection, subject_id: &str) -> Result<bool, ApiError> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(ApiError::db)?;
    Ok(hit.is_some())
}

fn class_participates(conn: &Connection, exam_id: &str, class_id: &str) -> Result<bool, ApiError> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM exam_classes WHERE exam_id = ? AND class_id = ?",
            [exam_id, class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    Ok(hit.is_some())
}

fn validate_marks(marks_obtained: f64, total_marks: f64) -> Result<(), ApiError> {
    if total_marks <= 0.0 {
        return Err(ApiError::bad_request("totalMarks must be positive"));
    }
    if marks_obtained < 0.0 {
        return Err(ApiError::bad_request("marksObtained must not be negative"));
    }
    if marks_obtained > total_marks {
        return Err(ApiError::bad_request(
            "marksObtained must not exceed totalMarks",
        ));
    }
    Ok(())
}

/// One Result row per (student, exam); created lazily on first submission.
fn ensure_result(conn: &Connection, student_id: &str, exam_id: &str) -> Result<String, ApiError> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM results WHERE student_id = ? AND exam_id = ?",
            [student_id, exam_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO results(id, student_id, exam_id, total_obtained, total_max,
                             percentage, grade, updated_at)
         VALUES(?, ?, ?, 0, 0, 0, ?, ?)",
        (&id, student_id, exam_id, grading::GRADE_FAIL, now()),
    )
    .map_err(ApiError::db)?;
    Ok(id)
}

/// Replace-or-insert the subject entry. New subjects append to the end of
/// the result's entry order; resubmission keeps the original position.
fn upsert_subject_entry(
    conn: &Connection,
    result_id: &str,
    subject_id: &str,
    marks_obtained: f64,
    total_marks: f64,
) -> Result<(), ApiError> {
    conn.execute(
        "INSERT INTO result_subjects(id, result_id, subject_id, marks_obtained, total_marks, position)
         VALUES(?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(position) + 1, 0) FROM result_subjects WHERE result_id = ?))
         ON CONFLICT(result_id, subject_id)
         DO UPDATE SET marks_obtained = excluded.marks_obtained,
                       total_marks = excluded.total_marks",
        (
            Uuid::new_v4().to_string(),
            result_id,
            subject_id,
            marks_obtained,
            total_marks,
            result_id,
        ),
    )
    .map_err(ApiError::db)?;
    Ok(())
}

fn subject_rows(conn: &Connection, result_id: &str) -> Result<Vec<Value>, ApiError> {
    let mut stmt = conn
        .prepare(
            "SELECT rs.subject_id, sub.name, sub.code, rs.marks_obtained, rs.total_marks
             FROM result_subjects rs
             JOIN subjects sub ON sub.id = rs.subject_id
             WHERE rs.result_id = ?
             ORDER BY rs.position",
        )
        .map_err(ApiError::db)?;
    stmt.query_map([result_id], |row| {
        Ok(json!({
            "subjectId": row.get::<_, String>(0)?,
            "subjectName": row.get::<_, String>(1)?,
            "subjectCode": row.get::<_, String>(2)?,
            "marksObtained": row.get::<_, f64>(3)?,
            "totalMarks": row.get::<_, f64>(4)?,
        }))
    })
    .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
    .map_err(ApiError::db)
}

fn result_payload(conn: &Connection, result_id: &str) -> Result<Value, ApiError> {
    let row = conn
        .query_row(
            "SELECT student_id, exam_id, total_obtained, total_max, percentage, grade, updated_at
             FROM results WHERE id = ?",
            [result_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()
        .map_err(ApiError::db)?
        .ok_or(ApiError::Internal)?;
    let subjects = subject_rows(conn, result_id)?;
    Ok(json!({
        "id": result_id,
        "studentId": row.0,
        "examId": row.1,
        "totalObtained": row.2,
        "totalMax": row.3,
        "percentage": row.4,
        "grade": row.5,
        "updatedAt": row.6,
        "subjects": subjects,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    student_id: String,
    subject_id: String,
    marks_obtained: f64,
    total_marks: f64,
}

/// POST /api/exams/{id}/marks: one subject's marks for one student. The
/// result aggregate is recomputed in the same transaction, so a follow-up
/// fetch always sees totals matching the entries.
pub async fn submit_marks(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    AppJson(body): AppJson<SubmitBody>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    if !exam_exists(&conn, &exam_id)? {
        return Err(ApiError::not_found("exam"));
    }
    let class_id = student_class(&conn, &body.student_id)?
        .ok_or_else(|| ApiError::not_found("student"))?;
    if !subject_exists(&conn, &body.subject_id)? {
        return Err(ApiError::not_found("subject"));
    }
    if !class_participates(&conn, &exam_id, &class_id)? {
        return Err(ApiError::bad_request(
            "student's class is not part of this exam",
        ));
    }
    validate_marks(body.marks_obtained, body.total_marks)?;

    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    let result_id = ensure_result(&tx, &body.student_id, &exam_id)?;
    upsert_subject_entry(
        &tx,
        &result_id,
        &body.subject_id,
        body.marks_obtained,
        body.total_marks,
    )?;
    let totals = grading::recompute_result(&tx, &result_id, &now())
        .map_err(|e| ApiError::internal(e, "result recompute failed"))?;
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(
        exam_id = %exam_id,
        student_id = %body.student_id,
        subject_id = %body.subject_id,
        percentage = totals.percentage,
        grade = %totals.grade,
        "recorded marks"
    );
    let payload = result_payload(&conn, &result_id)?;
    Ok(Json(payload))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkMarkEntry {
    student_id: String,
    marks_obtained: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkMarksBody {
    subject_id: String,
    total_marks: f64,
    entries: Vec<BulkMarkEntry>,
}

/// POST /api/exams/{id}/marks/bulk: one subject keyed for many students,
/// the shape a teacher enters marks in. Rows fail independently; touched
/// results are recomputed once at the end of the batch.
pub async fn bulk_subject_marks(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    AppJson(body): AppJson<BulkMarksBody>,
) -> Result<Json<Value>, ApiError> {
    if body.entries.is_empty() {
        return Err(ApiError::bad_request("entries must not be empty"));
    }
    if body.entries.len() > BULK_MARKS_MAX_ENTRIES {
        return Err(ApiError::bad_request(format!(
            "too many entries (max {BULK_MARKS_MAX_ENTRIES})"
        )));
    }
    if body.total_marks <= 0.0 {
        return Err(ApiError::bad_request("totalMarks must be positive"));
    }

    let conn = state.db();
    if !exam_exists(&conn, &exam_id)? {
        return Err(ApiError::not_found("exam"));
    }
    if !subject_exists(&conn, &body.subject_id)? {
        return Err(ApiError::not_found("subject"));
    }

    let tx = conn.unchecked_transaction().map_err(ApiError::db)?;
    let mut updated = 0usize;
    let mut errors: Vec<Value> = Vec::new();
    let mut touched: HashSet<String> = HashSet::new();
    for (index, entry) in body.entries.iter().enumerate() {
        let outcome = (|| -> Result<String, ApiError> {
            let class_id = student_class(&tx, &entry.student_id)?
                .ok_or_else(|| ApiError::not_found("student"))?;
            if !class_participates(&tx, &exam_id, &class_id)? {
                return Err(ApiError::bad_request(
                    "student's class is not part of this exam",
                ));
            }
            validate_marks(entry.marks_obtained, body.total_marks)?;
            let result_id = ensure_result(&tx, &entry.student_id, &exam_id)?;
            upsert_subject_entry(
                &tx,
                &result_id,
                &body.subject_id,
                entry.marks_obtained,
                body.total_marks,
            )?;
            Ok(result_id)
        })();
        match outcome {
            Ok(result_id) => {
                updated += 1;
                touched.insert(result_id);
            }
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
    let stamp = now();
    for result_id in &touched {
        grading::recompute_result(&tx, result_id, &stamp)
            .map_err(|e| ApiError::internal(e, "result recompute failed"))?;
    }
    tx.commit().map_err(ApiError::db)?;

    tracing::info!(
        exam_id = %exam_id,
        subject_id = %body.subject_id,
        updated,
        rejected = errors.len(),
        "bulk mark entry"
    );
    Ok(Json(json!({
        "updated": updated,
        "rejected": errors.len(),
        "errors": errors,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetQuery {
    class_id: String,
}

/// GET /api/exams/{id}/results?classId=: the class result sheet. Students
/// with no submissions yet appear with a null result.
pub async fn exam_results(
    CurrentStaff(_): CurrentStaff,
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    AppQuery(query): AppQuery<SheetQuery>,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db();
    if !exam_exists(&conn, &exam_id)? {
        return Err(ApiError::not_found("exam"));
    }
    let class_known: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM classes WHERE id = ?",
            [&query.class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(ApiError::db)?;
    if class_known.is_none() {
        return Err(ApiError::not_found("class"));
    }

    let mut subject_map: HashMap<String, Vec<Value>> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT rs.result_id, rs.subject_id, sub.name, sub.code,
                    rs.marks_obtained, rs.total_marks
             FROM result_subjects rs
             JOIN subjects sub ON sub.id = rs.subject_id
             JOIN results r ON r.id = rs.result_id
             JOIN students s ON s.id = r.student_id
             WHERE r.exam_id = ? AND s.class_id = ?
             ORDER BY rs.position",
        )
        .map_err(ApiError::db)?;
    let entries = stmt
        .query_map([&exam_id, &query.class_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                json!({
                    "subjectId": row.get::<_, String>(1)?,
                    "subjectName": row.get::<_, String>(2)?,
                    "subjectCode": row.get::<_, String>(3)?,
                    "marksObtained": row.get::<_, f64>(4)?,
                    "totalMarks": row.get::<_, f64>(5)?,
                }),
            ))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    for (result_id, entry) in entries {
        subject_map.entry(result_id).or_default().push(entry);
    }

    let mut result_map: HashMap<String, Value> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.student_id, r.total_obtained, r.total_max, r.percentage,
                    r.grade, r.updated_at
             FROM results r
             JOIN students s ON s.id = r.student_id
             WHERE r.exam_id = ? AND s.class_id = ?",
        )
        .map_err(ApiError::db)?;
    let result_rows = stmt
        .query_map([&exam_id, &query.class_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;
    for (id, student_id, obtained, max, pct, grade, updated_at) in result_rows {
        let subjects = subject_map.remove(&id).unwrap_or_default();
        result_map.insert(
            student_id,
            json!({
                "id": id,
                "totalObtained": obtained,
                "totalMax": max,
                "percentage": pct,
                "grade": grade,
                "updatedAt": updated_at,
                "subjects": subjects,
            }),
        );
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, first_name, last_name, roll_no FROM students
             WHERE class_id = ? ORDER BY roll_no, last_name",
        )
        .map_err(ApiError::db)?;
    let students = stmt
        .query_map([&query.class_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;

    let sheet: Vec<Value> = students
        .into_iter()
        .map(|(id, first, last, roll)| {
            let result = result_map.remove(&id).unwrap_or(Value::Null);
            json!({
                "studentId": id,
                "firstName": first,
                "lastName": last,
                "rollNo": roll,
                "result": result,
            })
        })
        .collect();

    Ok(Json(json!({
        "examId": exam_id,
        "classId": query.class_id,
        "students": sheet,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResultsQuery {
    exam_id: Option<String>,
}

/// GET /api/students/{id}/results: the student's report view, newest exam
/// first. Students reach only their own.
pub async fn student_results(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppQuery(query): AppQuery<StudentResultsQuery>,
) -> Result<Json<Value>, ApiError> {
    if !user.may_view_student(&id) {
        return Err(ApiError::Forbidden);
    }
    let conn = state.db();
    if student_class(&conn, &id)?.is_none() {
        return Err(ApiError::not_found("student"));
    }
    if let Some(exam_id) = query.exam_id.as_deref() {
        if !exam_exists(&conn, exam_id)? {
            return Err(ApiError::not_found("exam"));
        }
    }

    let mut sql = String::from(
        "SELECT r.id, r.exam_id, e.name, e.academic_year, e.term,
                r.total_obtained, r.total_max, r.percentage, r.grade, r.updated_at
         FROM results r
         JOIN exams e ON e.id = r.exam_id
         WHERE r.student_id = ?",
    );
    let mut params: Vec<String> = vec![id.clone()];
    if let Some(exam_id) = query.exam_id {
        sql.push_str(" AND r.exam_id = ?");
        params.push(exam_id);
    }
    sql.push_str(" ORDER BY e.start_date DESC, e.created_at DESC");

    let mut stmt = conn.prepare(&sql).map_err(ApiError::db)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, f64>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(ApiError::db)?;

    let mut results: Vec<Value> = Vec::with_capacity(rows.len());
    for (result_id, exam_id, exam_name, year, term, obtained, max, pct, grade, updated_at) in rows
    {
        let subjects = subject_rows(&conn, &result_id)?;
        results.push(json!({
            "id": result_id,
            "examId": exam_id,
            "examName": exam_name,
            "academicYear": year,
            "term": term,
            "totalObtained": obtained,
            "totalMax": max,
            "percentage": pct,
            "grade": grade,
            "updatedAt": updated_at,
            "subjects": subjects,
        }));
    }

    Ok(Json(json!({ "studentId": id, "results": results })))
}
