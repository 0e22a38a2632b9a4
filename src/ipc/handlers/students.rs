use super::shared::{
    active_teacher, get_student, optional_i64, optional_str, patch_text, required_i64,
    required_str, student_json,
};
use crate::db;
use crate::ipc::error::{bad_params, db_query, err, not_found, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn students_list(conn: &Connection, teacher_id: Option<i64>) -> Result<serde_json::Value, HandlerErr> {
    let teacher = active_teacher(conn, teacher_id)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, school_id, student_no, firstname, lastname, phone, gender_id,
                    prefix_id, grade_level, class_section, created_at, updated_at
             FROM students WHERE school_id = ? ORDER BY student_no",
        )
        .map_err(db_query)?;
    let students = stmt
        .query_map([teacher.school_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "schoolId": r.get::<_, i64>(1)?,
                "studentNo": r.get::<_, String>(2)?,
                "firstname": r.get::<_, String>(3)?,
                "lastname": r.get::<_, String>(4)?,
                "phone": r.get::<_, Option<String>>(5)?,
                "genderId": r.get::<_, Option<i64>>(6)?,
                "prefixId": r.get::<_, Option<i64>>(7)?,
                "gradeLevel": r.get::<_, Option<String>>(8)?,
                "classSection": r.get::<_, Option<String>>(9)?,
                "createdAt": r.get::<_, String>(10)?,
                "updatedAt": r.get::<_, String>(11)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(json!({ "students": students }))
}

/// Next free STD### number for the school. Starts at count+1 and probes
/// upward so re-used or imported numbers never collide with the UNIQUE
/// constraint.
fn next_student_no(conn: &Connection, school_id: i64) -> Result<String, HandlerErr> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE school_id = ?",
            [school_id],
            |r| r.get(0),
        )
        .map_err(db_query)?;
    let mut n = count + 1;
    loop {
        let candidate = format!("STD{:03}", n);
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM students WHERE school_id = ? AND student_no = ?",
                rusqlite::params![school_id, candidate],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_query)?;
        if taken.is_none() {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = required_i64(params, "schoolId")?;
    let firstname = required_str(params, "firstname")?;
    let lastname = required_str(params, "lastname")?;
    if firstname.trim().is_empty() || lastname.trim().is_empty() {
        return Err(bad_params("name must not be empty"));
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

    let student_no = match optional_str(params, "studentNo") {
        Some(no) if !no.trim().is_empty() => no.trim().to_string(),
        _ => next_student_no(conn, school_id)?,
    };

    let now = db::now_ts();
    conn.execute(
        "INSERT INTO students(school_id, student_no, firstname, lastname, phone, gender_id,
                              prefix_id, grade_level, class_section, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            school_id,
            student_no,
            firstname.trim(),
            lastname.trim(),
            optional_str(params, "phone"),
            optional_i64(params, "genderId"),
            optional_i64(params, "prefixId"),
            optional_str(params, "gradeLevel"),
            optional_str(params, "classSection"),
            now,
            now
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    let student = get_student(conn, conn.last_insert_rowid())?;
    Ok(json!({ "student": student_json(&student) }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_i64(params, "studentId")?;
    let existing = get_student(conn, student_id)?;

    let student_no = optional_str(params, "studentNo")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(existing.student_no);
    let firstname = optional_str(params, "firstname").unwrap_or(existing.firstname);
    let lastname = optional_str(params, "lastname").unwrap_or(existing.lastname);
    if firstname.trim().is_empty() || lastname.trim().is_empty() {
        return Err(bad_params("name must not be empty"));
    }
    let phone = patch_text(params, "phone", existing.phone);
    let gender_id = match params.get("genderId") {
        None => existing.gender_id,
        Some(v) if v.is_null() => None,
        Some(v) => v.as_i64().or(existing.gender_id),
    };
    let prefix_id = match params.get("prefixId") {
        None => existing.prefix_id,
        Some(v) if v.is_null() => None,
        Some(v) => v.as_i64().or(existing.prefix_id),
    };
    let grade_level = patch_text(params, "gradeLevel", existing.grade_level);
    let class_section = patch_text(params, "classSection", existing.class_section);

    conn.execute(
        "UPDATE students
         SET student_no = ?, firstname = ?, lastname = ?, phone = ?, gender_id = ?,
             prefix_id = ?, grade_level = ?, class_section = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            student_no,
            firstname.trim(),
            lastname.trim(),
            phone,
            gender_id,
            prefix_id,
            grade_level,
            class_section,
            db::now_ts(),
            student_id
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    let student = get_student(conn, student_id)?;
    Ok(json!({ "student": student_json(&student) }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_i64(params, "studentId")?;
    // Attendance history stays in place; only the roster entry goes away.
    let deleted = conn
        .execute("DELETE FROM students WHERE id = ?", [student_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "students" })),
        })?;
    if deleted == 0 {
        return Err(not_found("student not found"));
    }
    Ok(json!({ "ok": true }))
}

fn dispatch<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let teacher_id = state.teacher_id;
    match req.method.as_str() {
        "students.list" => Some(dispatch(state, req, |c, _| students_list(c, teacher_id))),
        "students.create" => Some(dispatch(state, req, students_create)),
        "students.update" => Some(dispatch(state, req, students_update)),
        "students.delete" => Some(dispatch(state, req, students_delete)),
        _ => None,
    }
}
