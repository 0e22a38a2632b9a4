use super::shared::{
    self, active_teacher, optional_i64, optional_str, required_i64, required_str,
};
use crate::db;
use crate::ipc::error::{db_query, err, not_found, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn list_lookup(conn: &Connection, table: &str) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!("SELECT id, name FROM {} ORDER BY id", table);
    let mut stmt = conn.prepare(&sql).map_err(db_query)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({ "id": r.get::<_, i64>(0)?, "name": r.get::<_, String>(1)? }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(json!({ table: rows }))
}

fn teachers_register(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(i64, serde_json::Value), HandlerErr> {
    let school_id = required_i64(params, "schoolId")?;
    let firstname = required_str(params, "firstname")?;
    let lastname = required_str(params, "lastname")?;
    if firstname.trim().is_empty() || lastname.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }

    let school_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query)?;
    if school_exists.is_none() {
        return Err(not_found("school not found"));
    }

    let now = db::now_ts();
    conn.execute(
        "INSERT INTO teachers(school_id, firstname, lastname, email, phone, gender_id,
                              prefix_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            school_id,
            firstname.trim(),
            lastname.trim(),
            optional_str(params, "email"),
            optional_str(params, "phone"),
            optional_i64(params, "genderId"),
            optional_i64(params, "prefixId"),
            now,
            now
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "teachers" })),
    })?;
    let teacher_id = conn.last_insert_rowid();
    Ok((teacher_id, json!({ "teacherId": teacher_id })))
}

fn teachers_select(conn: &Connection, params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let teacher_id = required_i64(params, "teacherId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_query)?;
    if exists.is_none() {
        return Err(not_found("teacher not found"));
    }
    Ok(teacher_id)
}

/// Dashboard payload: profile, owned classrooms with member counts, and
/// today's totals. The rate comes from the stats calculator over today's
/// records rather than a placeholder value.
fn teacher_info(conn: &Connection, teacher_id: Option<i64>) -> Result<serde_json::Value, HandlerErr> {
    let teacher = active_teacher(conn, teacher_id)?;

    let profile = conn
        .query_row(
            "SELECT t.id, t.school_id, t.firstname, t.lastname, t.email, t.phone,
                    t.gender_id, t.prefix_id, s.name
             FROM teachers t JOIN schools s ON s.id = t.school_id
             WHERE t.id = ?",
            [teacher.id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, i64>(0)?,
                    "schoolId": r.get::<_, i64>(1)?,
                    "firstname": r.get::<_, String>(2)?,
                    "lastname": r.get::<_, String>(3)?,
                    "email": r.get::<_, Option<String>>(4)?,
                    "phone": r.get::<_, Option<String>>(5)?,
                    "genderId": r.get::<_, Option<i64>>(6)?,
                    "prefixId": r.get::<_, Option<i64>>(7)?,
                    "schoolName": r.get::<_, String>(8)?
                }))
            },
        )
        .optional()
        .map_err(db_query)?
        .ok_or_else(|| not_found("teacher not found"))?;

    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.grade_level, c.class_section, c.subject,
               (SELECT COUNT(*) FROM students s
                WHERE s.school_id = c.school_id
                  AND s.grade_level IS c.grade_level
                  AND s.class_section IS c.class_section) AS member_count
             FROM classrooms c
             WHERE c.teacher_id = ?
             ORDER BY c.name",
        )
        .map_err(db_query)?;
    let classrooms = stmt
        .query_map([teacher.id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "gradeLevel": r.get::<_, Option<String>>(2)?,
                "classSection": r.get::<_, Option<String>>(3)?,
                "subject": r.get::<_, Option<String>>(4)?,
                "memberCount": r.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    let total_students: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE school_id = ?",
            [teacher.school_id],
            |r| r.get(0),
        )
        .map_err(db_query)?;
    let total_classrooms: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM classrooms WHERE teacher_id = ?",
            [teacher.id],
            |r| r.get(0),
        )
        .map_err(db_query)?;

    let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
    let today_records = shared::teacher_attendance_in_range(conn, teacher.id, &today, &today)?;
    let today_stats = stats::attendance_stats(shared::status_pairs(&today_records));

    Ok(json!({
        "teacher": profile,
        "classrooms": classrooms,
        "totalStats": {
            "totalStudents": total_students,
            "totalClassrooms": total_classrooms,
            "totalAttendanceToday": today_records.len(),
            "attendanceRateToday": today_stats.attendance_rate
        }
    }))
}

fn with_conn<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "genders.list" => Some(with_conn(state, req, |conn| list_lookup(conn, "genders"))),
        "prefixes.list" => Some(with_conn(state, req, |conn| list_lookup(conn, "prefixes"))),
        "teachers.register" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match teachers_register(conn, &req.params) {
                Ok((teacher_id, result)) => {
                    state.teacher_id = Some(teacher_id);
                    ok(&req.id, result)
                }
                Err(error) => error.response(&req.id),
            })
        }
        "teachers.select" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match teachers_select(conn, &req.params) {
                Ok(teacher_id) => {
                    state.teacher_id = Some(teacher_id);
                    ok(&req.id, json!({ "teacherId": teacher_id }))
                }
                Err(error) => error.response(&req.id),
            })
        }
        "teacher.info" => {
            let teacher_id = state.teacher_id;
            Some(with_conn(state, req, |conn| teacher_info(conn, teacher_id)))
        }
        _ => None,
    }
}
