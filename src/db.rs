use rusqlite::Connection;
use std::path::Path;

pub fn open_db(data_dir: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("campus.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            employee_no TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            designation TEXT NOT NULL,
            department TEXT,
            email TEXT,
            phone TEXT,
            active INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            section TEXT,
            lead_staff_id TEXT,
            FOREIGN KEY(lead_staff_id) REFERENCES staff(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            admission_no TEXT NOT NULL UNIQUE,
            class_id TEXT NOT NULL,
            roll_no INTEGER NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            birth_date TEXT,
            guardian_name TEXT,
            guardian_phone TEXT,
            active INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_roll ON students(class_id, roll_no)",
        [],
    )?;

    // Existing databases may predate the guardian contact column.
    ensure_students_guardian_phone(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS api_tokens(
            id TEXT PRIMARY KEY,
            token_hash TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            label TEXT NOT NULL,
            student_id TEXT,
            created_at TEXT NOT NULL,
            revoked_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_api_tokens_student ON api_tokens(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY(class_id, student_id, date),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance(class_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            term INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_classes(
            exam_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            PRIMARY KEY(exam_id, class_id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_classes_class ON exam_classes(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            exam_id TEXT NOT NULL,
            total_obtained REAL NOT NULL,
            total_max REAL NOT NULL,
            percentage REAL NOT NULL,
            grade TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            UNIQUE(student_id, exam_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_exam ON results(exam_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_student ON results(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_subjects(
            id TEXT PRIMARY KEY,
            result_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            total_marks REAL NOT NULL,
            position INTEGER NOT NULL,
            FOREIGN KEY(result_id) REFERENCES results(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(result_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_subjects_result ON result_subjects(result_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_subjects_subject ON result_subjects(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            title TEXT NOT NULL,
            term TEXT,
            amount_due INTEGER NOT NULL,
            amount_paid INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            due_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_student ON fees(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_status ON fees(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_payments(
            id TEXT PRIMARY KEY,
            fee_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            method TEXT,
            reference TEXT,
            paid_at TEXT NOT NULL,
            FOREIGN KEY(fee_id) REFERENCES fees(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_payments_fee ON fee_payments(fee_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS books(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            author TEXT NOT NULL,
            isbn TEXT,
            copies_total INTEGER NOT NULL,
            copies_available INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS book_loans(
            id TEXT PRIMARY KEY,
            book_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            loaned_at TEXT NOT NULL,
            due_date TEXT NOT NULL,
            returned_at TEXT,
            FOREIGN KEY(book_id) REFERENCES books(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_book_loans_book ON book_loans(book_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_book_loans_student ON book_loans(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transport_routes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            vehicle_no TEXT NOT NULL,
            driver_name TEXT,
            driver_phone TEXT,
            capacity INTEGER NOT NULL,
            monthly_fee INTEGER
        )",
        [],
    )?;
    ensure_routes_monthly_fee(&conn)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transport_assignments(
            student_id TEXT PRIMARY KEY,
            route_id TEXT NOT NULL,
            pickup_point TEXT NOT NULL,
            assigned_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(route_id) REFERENCES transport_routes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transport_assignments_route ON transport_assignments(route_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notices(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            audience TEXT NOT NULL,
            published_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notices_audience ON notices(audience)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cms_blocks(
            key TEXT PRIMARY KEY,
            title TEXT,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscribers(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            subscribed_at TEXT NOT NULL
        )",
        [],
    )?;

    // Databases written before payments were tracked row-by-row carry
    // amount_paid but a stale status. Re-derive once at open.
    migrate_fee_statuses(&conn)?;

    Ok(conn)
}

fn ensure_students_guardian_phone(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "guardian_phone")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN guardian_phone TEXT", [])?;
    Ok(())
}

fn ensure_routes_monthly_fee(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "transport_routes", "monthly_fee")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE transport_routes ADD COLUMN monthly_fee INTEGER",
        [],
    )?;
    Ok(())
}

fn migrate_fee_statuses(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE fees SET status = 'paid' WHERE amount_paid >= amount_due AND status <> 'paid'",
        [],
    )?;
    conn.execute(
        "UPDATE fees SET status = 'partial'
         WHERE amount_paid > 0 AND amount_paid < amount_due AND status <> 'partial'",
        [],
    )?;
    conn.execute(
        "UPDATE fees SET status = 'pending' WHERE amount_paid = 0 AND status <> 'pending'",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
