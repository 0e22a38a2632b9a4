use super::shared::{optional_str, patch_text, required_i64, required_str};
use crate::db;
use crate::ipc::error::{bad_params, db_query, err, not_found, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn schools_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, address, phone, email, created_at, updated_at
             FROM schools ORDER BY name",
        )
        .map_err(db_query)?;
    let schools = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "address": r.get::<_, Option<String>>(2)?,
                "phone": r.get::<_, Option<String>>(3)?,
                "email": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, String>(5)?,
                "updatedAt": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(json!({ "schools": schools }))
}

fn schools_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(bad_params("name must not be empty"));
    }

    let now = db::now_ts();
    conn.execute(
        "INSERT INTO schools(name, address, phone, email, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            name,
            optional_str(params, "address"),
            optional_str(params, "phone"),
            optional_str(params, "email"),
            now,
            now
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "schools" })),
    })?;

    Ok(json!({ "schoolId": conn.last_insert_rowid(), "name": name }))
}

fn schools_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = required_i64(params, "schoolId")?;
    let existing = conn
        .query_row(
            "SELECT name, address, phone, email FROM schools WHERE id = ?",
            [school_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()
        .map_err(db_query)?
        .ok_or_else(|| not_found("school not found"))?;

    let name = optional_str(params, "name").unwrap_or(existing.0);
    if name.trim().is_empty() {
        return Err(bad_params("name must not be empty"));
    }
    let address = patch_text(params, "address", existing.1);
    let phone = patch_text(params, "phone", existing.2);
    let email = patch_text(params, "email", existing.3);

    conn.execute(
        "UPDATE schools SET name = ?, address = ?, phone = ?, email = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![name.trim(), address, phone, email, db::now_ts(), school_id],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "schools" })),
    })?;

    Ok(json!({ "ok": true }))
}

fn schools_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let school_id = required_i64(params, "schoolId")?;
    let deleted = conn
        .execute("DELETE FROM schools WHERE id = ?", [school_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "schools" })),
        })?;
    if deleted == 0 {
        return Err(not_found("school not found"));
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
    match req.method.as_str() {
        "schools.list" => Some(dispatch(state, req, |c, _| schools_list(c))),
        "schools.create" => Some(dispatch(state, req, schools_create)),
        "schools.update" => Some(dispatch(state, req, schools_update)),
        "schools.delete" => Some(dispatch(state, req, schools_delete)),
        _ => None,
    }
}
