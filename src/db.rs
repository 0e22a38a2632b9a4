use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rollcall.sqlite3");
    let conn = Connection::open(db_path)?;

    // No FK constraints: deletes never cascade and orphaned references are
    // allowed (a deleted classroom leaves its attendance rows behind).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            address TEXT,
            phone TEXT,
            email TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS genders(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS prefixes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL,
            firstname TEXT NOT NULL,
            lastname TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            gender_id INTEGER,
            prefix_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_school ON teachers(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL,
            student_no TEXT NOT NULL,
            firstname TEXT NOT NULL,
            lastname TEXT NOT NULL,
            phone TEXT,
            gender_id INTEGER,
            prefix_id INTEGER,
            grade_level TEXT,
            class_section TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(school_id, student_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_placement
         ON students(school_id, grade_level, class_section)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            school_id INTEGER NOT NULL,
            teacher_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            grade_level TEXT,
            class_section TEXT,
            subject TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_school ON classrooms(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classrooms_teacher ON classrooms(teacher_id)",
        [],
    )?;

    // No UNIQUE over (classroom_id, student_id, attendance_date): the recording
    // workflow owns the one-record-per-day upsert.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            classroom_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            attendance_date TEXT NOT NULL,
            status TEXT NOT NULL,
            check_in_time TEXT,
            notes TEXT,
            recorded_by INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_classroom ON attendance(classroom_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_classroom_date
         ON attendance(classroom_id, attendance_date)",
        [],
    )?;

    seed_reference_data(&conn)?;

    Ok(conn)
}

fn seed_reference_data(conn: &Connection) -> anyhow::Result<()> {
    let gender_count: i64 = conn.query_row("SELECT COUNT(*) FROM genders", [], |r| r.get(0))?;
    if gender_count == 0 {
        for name in ["male", "female"] {
            conn.execute("INSERT INTO genders(name) VALUES(?)", [name])?;
        }
    }

    let prefix_count: i64 = conn.query_row("SELECT COUNT(*) FROM prefixes", [], |r| r.get(0))?;
    if prefix_count == 0 {
        for name in ["Mr.", "Mrs.", "Ms.", "Master", "Miss"] {
            conn.execute("INSERT INTO prefixes(name) VALUES(?)", [name])?;
        }
    }

    Ok(())
}
