use crate::ipc::error::{bad_params, db_query, not_found, HandlerErr};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params(format!("missing {}", key)))
}

pub fn optional_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Validates a calendar date and returns it unchanged. Range filters rely on
/// yyyy-mm-dd ordering lexicographically, so anything else is rejected here.
pub fn required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = required_str(params, key)?;
    if NaiveDate::parse_from_str(&raw, "%Y-%m-%d").is_err() {
        return Err(bad_params(format!("{} must be YYYY-MM-DD", key)));
    }
    Ok(raw)
}

pub fn optional_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = optional_str(params, key) else {
        return Ok(None);
    };
    if NaiveDate::parse_from_str(&raw, "%Y-%m-%d").is_err() {
        return Err(bad_params(format!("{} must be YYYY-MM-DD", key)));
    }
    Ok(Some(raw))
}

/// Date-only portion of a stored attendance_date (tolerates a time suffix).
pub fn date_only(s: &str) -> &str {
    s.split('T').next().unwrap_or(s)
}

/// Absent key keeps the stored value; an explicit null clears it.
pub fn patch_text(
    params: &serde_json::Value,
    key: &str,
    existing: Option<String>,
) -> Option<String> {
    match params.get(key) {
        None => existing,
        Some(v) if v.is_null() => None,
        Some(v) => v.as_str().map(|s| s.to_string()).or(existing),
    }
}

pub struct TeacherCtx {
    pub id: i64,
    pub school_id: i64,
}

/// Resolves the active teacher or fails with no_teacher. Ownership filtering
/// hangs off this: "my students" are the teacher's school, "my classrooms"
/// carry the teacher's id.
pub fn active_teacher(conn: &Connection, teacher_id: Option<i64>) -> Result<TeacherCtx, HandlerErr> {
    let Some(id) = teacher_id else {
        return Err(HandlerErr::new(
            "no_teacher",
            "register or select a teacher first",
        ));
    };
    conn.query_row(
        "SELECT id, school_id FROM teachers WHERE id = ?",
        [id],
        |r| {
            Ok(TeacherCtx {
                id: r.get(0)?,
                school_id: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(db_query)?
    .ok_or_else(|| not_found("teacher not found"))
}

#[derive(Debug, Clone)]
pub struct ClassroomRow {
    pub id: i64,
    pub school_id: i64,
    pub teacher_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub grade_level: Option<String>,
    pub class_section: Option<String>,
    pub subject: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub fn classroom_json(c: &ClassroomRow) -> serde_json::Value {
    json!({
        "id": c.id,
        "schoolId": c.school_id,
        "teacherId": c.teacher_id,
        "name": c.name,
        "description": c.description,
        "gradeLevel": c.grade_level,
        "classSection": c.class_section,
        "subject": c.subject,
        "createdAt": c.created_at,
        "updatedAt": c.updated_at
    })
}

pub fn get_classroom(conn: &Connection, classroom_id: i64) -> Result<ClassroomRow, HandlerErr> {
    conn.query_row(
        "SELECT id, school_id, teacher_id, name, description, grade_level, class_section,
                subject, created_at, updated_at
         FROM classrooms WHERE id = ?",
        [classroom_id],
        |r| {
            Ok(ClassroomRow {
                id: r.get(0)?,
                school_id: r.get(1)?,
                teacher_id: r.get(2)?,
                name: r.get(3)?,
                description: r.get(4)?,
                grade_level: r.get(5)?,
                class_section: r.get(6)?,
                subject: r.get(7)?,
                created_at: r.get(8)?,
                updated_at: r.get(9)?,
            })
        },
    )
    .optional()
    .map_err(db_query)?
    .ok_or_else(|| not_found("classroom not found"))
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: i64,
    pub school_id: i64,
    pub student_no: String,
    pub firstname: String,
    pub lastname: String,
    pub phone: Option<String>,
    pub gender_id: Option<i64>,
    pub prefix_id: Option<i64>,
    pub grade_level: Option<String>,
    pub class_section: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "schoolId": s.school_id,
        "studentNo": s.student_no,
        "firstname": s.firstname,
        "lastname": s.lastname,
        "phone": s.phone,
        "genderId": s.gender_id,
        "prefixId": s.prefix_id,
        "gradeLevel": s.grade_level,
        "classSection": s.class_section,
        "createdAt": s.created_at,
        "updatedAt": s.updated_at
    })
}

const STUDENT_COLS: &str = "id, school_id, student_no, firstname, lastname, phone, gender_id,
                            prefix_id, grade_level, class_section, created_at, updated_at";

fn map_student(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        school_id: r.get(1)?,
        student_no: r.get(2)?,
        firstname: r.get(3)?,
        lastname: r.get(4)?,
        phone: r.get(5)?,
        gender_id: r.get(6)?,
        prefix_id: r.get(7)?,
        grade_level: r.get(8)?,
        class_section: r.get(9)?,
        created_at: r.get(10)?,
        updated_at: r.get(11)?,
    })
}

pub fn get_student(conn: &Connection, student_id: i64) -> Result<StudentRow, HandlerErr> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLS);
    conn.query_row(&sql, [student_id], |r| map_student(r))
        .optional()
        .map_err(db_query)?
        .ok_or_else(|| not_found("student not found"))
}

/// Derived membership: students of the classroom's school whose grade/section
/// pair equals the classroom's. IS-comparison so an unset pair only matches
/// students with an unset pair, mirroring the placement-equality model.
pub fn classroom_member_students(
    conn: &Connection,
    classroom: &ClassroomRow,
) -> Result<Vec<StudentRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM students
         WHERE school_id = ? AND grade_level IS ? AND class_section IS ?
         ORDER BY id",
        STUDENT_COLS
    );
    let mut stmt = conn.prepare(&sql).map_err(db_query)?;
    stmt.query_map(
        rusqlite::params![
            classroom.school_id,
            classroom.grade_level,
            classroom.class_section
        ],
        |r| map_student(r),
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query)
}

/// All students of a school keyed by id, for joining display data onto
/// attendance records.
pub fn db_student_map(
    conn: &Connection,
    school_id: i64,
) -> Result<std::collections::HashMap<i64, StudentRow>, HandlerErr> {
    let sql = format!("SELECT {} FROM students WHERE school_id = ?", STUDENT_COLS);
    let mut stmt = conn.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map([school_id], |r| map_student(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(rows.into_iter().map(|s| (s.id, s)).collect())
}

pub fn teacher_student_ids(conn: &Connection, school_id: i64) -> Result<HashSet<i64>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE school_id = ?")
        .map_err(db_query)?;
    stmt.query_map([school_id], |r| r.get::<_, i64>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(db_query)
}

#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub id: i64,
    pub classroom_id: i64,
    pub student_id: i64,
    pub attendance_date: String,
    pub status: String,
    pub check_in_time: Option<String>,
    pub notes: Option<String>,
    pub recorded_by: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub fn attendance_json(a: &AttendanceRow) -> serde_json::Value {
    json!({
        "id": a.id,
        "classroomId": a.classroom_id,
        "studentId": a.student_id,
        "attendanceDate": a.attendance_date,
        "status": a.status,
        "checkInTime": a.check_in_time,
        "notes": a.notes,
        "recordedBy": a.recorded_by,
        "createdAt": a.created_at,
        "updatedAt": a.updated_at
    })
}

const ATTENDANCE_COLS: &str = "id, classroom_id, student_id, attendance_date, status,
                               check_in_time, notes, recorded_by, created_at, updated_at";

fn map_attendance(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        id: r.get(0)?,
        classroom_id: r.get(1)?,
        student_id: r.get(2)?,
        attendance_date: r.get(3)?,
        status: r.get(4)?,
        check_in_time: r.get(5)?,
        notes: r.get(6)?,
        recorded_by: r.get(7)?,
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

/// Attendance for one classroom, optionally clamped to an inclusive date
/// range (lexicographic on yyyy-mm-dd, which is chronological).
pub fn list_classroom_attendance(
    conn: &Connection,
    classroom_id: i64,
    date_from: Option<&str>,
    date_to: Option<&str>,
) -> Result<Vec<AttendanceRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM attendance
         WHERE classroom_id = ?1
           AND (?2 IS NULL OR attendance_date >= ?2)
           AND (?3 IS NULL OR attendance_date <= ?3)
         ORDER BY id",
        ATTENDANCE_COLS
    );
    let mut stmt = conn.prepare(&sql).map_err(db_query)?;
    stmt.query_map(rusqlite::params![classroom_id, date_from, date_to], |r| {
        map_attendance(r)
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query)
}

/// All attendance owned by the teacher (records of classrooms they teach)
/// within an inclusive date range.
pub fn teacher_attendance_in_range(
    conn: &Connection,
    teacher_id: i64,
    date_from: &str,
    date_to: &str,
) -> Result<Vec<AttendanceRow>, HandlerErr> {
    let cols: String = ATTENDANCE_COLS
        .split(',')
        .map(|c| format!("a.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM attendance a
         JOIN classrooms c ON c.id = a.classroom_id
         WHERE c.teacher_id = ? AND a.attendance_date >= ? AND a.attendance_date <= ?
         ORDER BY a.id",
        cols
    );
    let mut stmt = conn.prepare(&sql).map_err(db_query)?;
    stmt.query_map(
        rusqlite::params![teacher_id, date_from, date_to],
        |r| map_attendance(r),
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query)
}

pub fn status_pairs(records: &[AttendanceRow]) -> Vec<(i64, crate::stats::AttendanceStatus)> {
    records
        .iter()
        .filter_map(|a| crate::stats::AttendanceStatus::parse(&a.status).map(|s| (a.student_id, s)))
        .collect()
}
