use super::shared::{
    active_teacher, classroom_json, classroom_member_students, get_classroom, get_student,
    optional_str, patch_text, required_i64, required_str, student_json,
};
use crate::db;
use crate::ipc::error::{bad_params, db_query, err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn classrooms_list(
    conn: &Connection,
    teacher_id: Option<i64>,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = active_teacher(conn, teacher_id)?;
    // Correlated subquery for member counts to avoid double-counting joins.
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.school_id, c.teacher_id, c.name, c.description, c.grade_level,
                    c.class_section, c.subject, c.created_at, c.updated_at,
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
                "schoolId": r.get::<_, i64>(1)?,
                "teacherId": r.get::<_, i64>(2)?,
                "name": r.get::<_, String>(3)?,
                "description": r.get::<_, Option<String>>(4)?,
                "gradeLevel": r.get::<_, Option<String>>(5)?,
                "classSection": r.get::<_, Option<String>>(6)?,
                "subject": r.get::<_, Option<String>>(7)?,
                "createdAt": r.get::<_, String>(8)?,
                "updatedAt": r.get::<_, String>(9)?,
                "memberCount": r.get::<_, i64>(10)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(json!({ "classrooms": classrooms }))
}

fn classrooms_create(
    conn: &Connection,
    teacher_id: Option<i64>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = active_teacher(conn, teacher_id)?;
    let school_id = required_i64(params, "schoolId")?;
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(bad_params("name must not be empty"));
    }

    let now = db::now_ts();
    conn.execute(
        "INSERT INTO classrooms(school_id, teacher_id, name, description, grade_level,
                                class_section, subject, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            school_id,
            teacher.id,
            name,
            optional_str(params, "description"),
            optional_str(params, "gradeLevel"),
            optional_str(params, "classSection"),
            optional_str(params, "subject"),
            now,
            now
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classrooms" })),
    })?;

    let classroom = get_classroom(conn, conn.last_insert_rowid())?;
    Ok(json!({ "classroom": classroom_json(&classroom) }))
}

fn classrooms_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_i64(params, "classroomId")?;
    let existing = get_classroom(conn, classroom_id)?;

    let name = optional_str(params, "name").unwrap_or(existing.name);
    if name.trim().is_empty() {
        return Err(bad_params("name must not be empty"));
    }
    let description = patch_text(params, "description", existing.description);
    let grade_level = patch_text(params, "gradeLevel", existing.grade_level);
    let class_section = patch_text(params, "classSection", existing.class_section);
    let subject = patch_text(params, "subject", existing.subject);

    conn.execute(
        "UPDATE classrooms
         SET name = ?, description = ?, grade_level = ?, class_section = ?, subject = ?,
             updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            name.trim(),
            description,
            grade_level,
            class_section,
            subject,
            db::now_ts(),
            classroom_id
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classrooms" })),
    })?;

    let classroom = get_classroom(conn, classroom_id)?;
    Ok(json!({ "classroom": classroom_json(&classroom) }))
}

fn classrooms_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_i64(params, "classroomId")?;
    get_classroom(conn, classroom_id)?;
    // No cascade: students keep their placement and attendance history keeps
    // its classroom_id even though the classroom row is gone.
    conn.execute("DELETE FROM classrooms WHERE id = ?", [classroom_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "classrooms" })),
        })?;
    Ok(json!({ "ok": true }))
}

fn classrooms_members(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_i64(params, "classroomId")?;
    let classroom = get_classroom(conn, classroom_id)?;
    let students = classroom_member_students(conn, &classroom)?;
    let members: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "classroomId": classroom.id,
                "studentId": s.id,
                "role": "student",
                "joinedAt": s.updated_at,
                "student": student_json(s)
            })
        })
        .collect();
    Ok(json!({ "members": members }))
}

/// Membership is placement equality, so adding a member means moving the
/// student into this classroom's grade/section. One classroom per student.
fn classrooms_add_member(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_i64(params, "classroomId")?;
    let student_id = required_i64(params, "studentId")?;
    let classroom = get_classroom(conn, classroom_id)?;
    get_student(conn, student_id)?;

    conn.execute(
        "UPDATE students SET grade_level = ?, class_section = ?, updated_at = ? WHERE id = ?",
        rusqlite::params![
            classroom.grade_level,
            classroom.class_section,
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
    Ok(json!({
        "member": {
            "classroomId": classroom_id,
            "studentId": student_id,
            "role": "student",
            "joinedAt": student.updated_at,
            "student": student_json(&student)
        }
    }))
}

fn classrooms_remove_member(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_i64(params, "classroomId")?;
    let student_id = required_i64(params, "studentId")?;
    get_classroom(conn, classroom_id)?;
    get_student(conn, student_id)?;

    // Clearing the pair unassigns the student from any classroom.
    conn.execute(
        "UPDATE students SET grade_level = NULL, class_section = NULL, updated_at = ?
         WHERE id = ?",
        rusqlite::params![db::now_ts(), student_id],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

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
        "classrooms.list" => Some(dispatch(state, req, |c, _| classrooms_list(c, teacher_id))),
        "classrooms.create" => Some(dispatch(state, req, |c, p| {
            classrooms_create(c, teacher_id, p)
        })),
        "classrooms.update" => Some(dispatch(state, req, classrooms_update)),
        "classrooms.delete" => Some(dispatch(state, req, classrooms_delete)),
        "classrooms.members" => Some(dispatch(state, req, classrooms_members)),
        "classrooms.addMember" => Some(dispatch(state, req, classrooms_add_member)),
        "classrooms.removeMember" => Some(dispatch(state, req, classrooms_remove_member)),
        _ => None,
    }
}
