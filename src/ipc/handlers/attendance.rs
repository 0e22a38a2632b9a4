use super::shared::{
    active_teacher, attendance_json, classroom_member_students, date_only, get_classroom,
    list_classroom_attendance, optional_date, optional_str, required_date, required_i64,
    teacher_student_ids, AttendanceRow,
};
use crate::db;
use crate::ipc::error::{bad_params, db_query, err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::stats::{AttendanceStatus, DraftStatus};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

/// Existing records for one classroom and calendar date, keyed by student.
/// The date match ignores any time suffix a stored value may carry. First
/// record per student wins; that record is the upsert target.
fn existing_by_student(
    conn: &Connection,
    classroom_id: i64,
    date: &str,
) -> Result<HashMap<i64, AttendanceRow>, HandlerErr> {
    let all = list_classroom_attendance(conn, classroom_id, None, None)?;
    let mut by_student = HashMap::new();
    for record in all {
        if date_only(&record.attendance_date) == date {
            by_student.entry(record.student_id).or_insert(record);
        }
    }
    Ok(by_student)
}

/// Load the roster for a classroom/date: derived members intersected with the
/// teacher's own student set, each merged with any existing record for the
/// date, or left pending. Members outside the teacher's student set are
/// dropped silently.
fn roster_open(
    conn: &Connection,
    teacher_id: Option<i64>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = active_teacher(conn, teacher_id)?;
    let classroom_id = required_i64(params, "classroomId")?;
    let date = required_date(params, "date")?;

    let classroom = get_classroom(conn, classroom_id)?;
    let members = classroom_member_students(conn, &classroom)?;
    let my_students = teacher_student_ids(conn, teacher.school_id)?;
    let existing = existing_by_student(conn, classroom_id, &date)?;

    let rows: Vec<serde_json::Value> = members
        .iter()
        .filter(|s| my_students.contains(&s.id))
        .map(|s| match existing.get(&s.id) {
            Some(record) => json!({
                "studentId": s.id,
                "studentNo": s.student_no,
                "firstname": s.firstname,
                "lastname": s.lastname,
                "status": record.status,
                "notes": record.notes.clone().unwrap_or_default(),
                "checkInTime": record.check_in_time,
                "attendanceId": record.id
            }),
            None => json!({
                "studentId": s.id,
                "studentNo": s.student_no,
                "firstname": s.firstname,
                "lastname": s.lastname,
                "status": "pending",
                "notes": "",
                "checkInTime": null,
                "attendanceId": null
            }),
        })
        .collect();

    Ok(json!({
        "classroomId": classroom_id,
        "date": date,
        "rows": rows
    }))
}

struct SaveEntry {
    student_id: i64,
    status: DraftStatus,
    notes: Option<String>,
    check_in_time: Option<String>,
}

fn parse_entries(params: &serde_json::Value) -> Result<Vec<SaveEntry>, HandlerErr> {
    let Some(raw) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(bad_params("missing entries"));
    };
    let mut entries = Vec::with_capacity(raw.len());
    for item in raw {
        let student_id = item
            .get("studentId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| bad_params("entry missing studentId"))?;
        let status_raw = item
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| bad_params("entry missing status"))?;
        let status = DraftStatus::parse(status_raw).ok_or_else(|| {
            bad_params("status must be one of: pending, present, absent, late, excused")
        })?;
        entries.push(SaveEntry {
            student_id,
            status,
            notes: optional_str(item, "notes"),
            check_in_time: optional_str(item, "checkInTime"),
        });
    }
    Ok(entries)
}

fn write_decision(
    conn: &Connection,
    classroom_id: i64,
    date: &str,
    recorded_by: i64,
    existing: &mut HashMap<i64, AttendanceRow>,
    entry: &SaveEntry,
    status: AttendanceStatus,
) -> Result<&'static str, HandlerErr> {
    let check_in = entry
        .check_in_time
        .clone()
        .unwrap_or_else(db::now_ts);
    let now = db::now_ts();

    if let Some(record) = existing.get(&entry.student_id) {
        conn.execute(
            "UPDATE attendance
             SET status = ?, check_in_time = ?, notes = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![status.as_str(), check_in, entry.notes, now, record.id],
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "attendance" })),
        })?;
        return Ok("updated");
    }

    let student_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ?",
            [entry.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_query)?;
    if student_exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    conn.execute(
        "INSERT INTO attendance(classroom_id, student_id, attendance_date, status,
                                check_in_time, notes, recorded_by, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            classroom_id,
            entry.student_id,
            date,
            status.as_str(),
            check_in,
            entry.notes,
            recorded_by,
            now,
            now
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;

    // Register the new row so a later entry for the same student in this
    // batch takes the update path instead of inserting a duplicate.
    existing.insert(
        entry.student_id,
        AttendanceRow {
            id: conn.last_insert_rowid(),
            classroom_id,
            student_id: entry.student_id,
            attendance_date: date.to_string(),
            status: status.as_str().to_string(),
            check_in_time: Some(check_in),
            notes: entry.notes.clone(),
            recorded_by,
            created_at: now.clone(),
            updated_at: now,
        },
    );
    Ok("created")
}

/// Persist one decision per non-pending draft. Sequential and
/// non-transactional: each student is written on its own, a failure is
/// recorded in that student's outcome and the loop moves on. Callers reload
/// the roster afterwards to see the actual persisted state.
fn save(
    conn: &Connection,
    teacher_id: Option<i64>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = active_teacher(conn, teacher_id)?;
    let classroom_id = required_i64(params, "classroomId")?;
    let date = required_date(params, "date")?;
    let entries = parse_entries(params)?;

    get_classroom(conn, classroom_id)?;
    let mut existing = existing_by_student(conn, classroom_id, &date)?;

    let mut created = 0usize;
    let mut updated = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    let mut outcomes = Vec::with_capacity(entries.len());

    for entry in &entries {
        match entry.status {
            DraftStatus::Pending => {
                skipped += 1;
                outcomes.push(json!({ "studentId": entry.student_id, "action": "skipped" }));
            }
            DraftStatus::Decided(status) => {
                match write_decision(
                    conn,
                    classroom_id,
                    &date,
                    teacher.id,
                    &mut existing,
                    entry,
                    status,
                )
                {
                    Ok(action) => {
                        if action == "created" {
                            created += 1;
                        } else {
                            updated += 1;
                        }
                        outcomes.push(json!({ "studentId": entry.student_id, "action": action }));
                    }
                    Err(e) => {
                        failed += 1;
                        outcomes.push(json!({
                            "studentId": entry.student_id,
                            "action": "failed",
                            "error": { "code": e.code, "message": e.message }
                        }));
                    }
                }
            }
        }
    }

    Ok(json!({
        "created": created,
        "updated": updated,
        "skipped": skipped,
        "failed": failed,
        "outcomes": outcomes
    }))
}

fn history(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_i64(params, "classroomId")?;
    let date_from = optional_date(params, "dateFrom")?;
    let date_to = optional_date(params, "dateTo")?;

    // No classroom existence check: deleting a classroom leaves its records
    // behind, and history is the surface that can still show them.
    let mut records = list_classroom_attendance(
        conn,
        classroom_id,
        date_from.as_deref(),
        date_to.as_deref(),
    )?;
    records.sort_by(|a, b| {
        b.attendance_date
            .cmp(&a.attendance_date)
            .then(b.id.cmp(&a.id))
    });

    let rows: Vec<serde_json::Value> = records.iter().map(attendance_json).collect();
    Ok(json!({ "records": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let teacher_id = state.teacher_id;
    let handler: Option<
        fn(&Connection, Option<i64>, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
    > = match req.method.as_str() {
        "attendance.rosterOpen" => Some(roster_open),
        "attendance.save" => Some(save),
        "attendance.history" => Some(|c, _, p| history(c, p)),
        _ => None,
    };
    let f = handler?;

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match f(conn, teacher_id, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
