use super::shared::{
    active_teacher, attendance_json, date_only, db_student_map, get_classroom,
    list_classroom_attendance, required_date, required_i64, status_pairs, student_json,
    teacher_attendance_in_range,
};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;
use std::collections::HashMap;

fn overview(
    conn: &Connection,
    teacher_id: Option<i64>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = active_teacher(conn, teacher_id)?;
    let date_from = required_date(params, "dateFrom")?;
    let date_to = required_date(params, "dateTo")?;

    let records = teacher_attendance_in_range(conn, teacher.id, &date_from, &date_to)?;
    let stats = stats::attendance_stats(status_pairs(&records));

    Ok(json!({
        "dateFrom": date_from,
        "dateTo": date_to,
        "totalRecords": records.len(),
        "stats": stats
    }))
}

#[derive(Default)]
struct DayCounts {
    present: usize,
    absent: usize,
    late: usize,
    excused: usize,
}

/// Per-day breakdown. The daily rate divides by every marked record that day,
/// unlike the overview's distinct-student denominator; both formulas are kept
/// as-is deliberately.
fn daily(
    conn: &Connection,
    teacher_id: Option<i64>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = active_teacher(conn, teacher_id)?;
    let date_from = required_date(params, "dateFrom")?;
    let date_to = required_date(params, "dateTo")?;

    let records = teacher_attendance_in_range(conn, teacher.id, &date_from, &date_to)?;

    // BTreeMap keeps days in ascending calendar order.
    let mut by_day: BTreeMap<String, DayCounts> = BTreeMap::new();
    for record in &records {
        let day = by_day
            .entry(date_only(&record.attendance_date).to_string())
            .or_default();
        match record.status.as_str() {
            "present" => day.present += 1,
            "absent" => day.absent += 1,
            "late" => day.late += 1,
            "excused" => day.excused += 1,
            _ => {}
        }
    }

    let days: Vec<serde_json::Value> = by_day
        .iter()
        .map(|(date, c)| {
            let total = c.present + c.absent + c.late + c.excused;
            json!({
                "date": date,
                "present": c.present,
                "absent": c.absent,
                "late": c.late,
                "excused": c.excused,
                "total": total,
                "rate": stats::daily_rate(c.present, total)
            })
        })
        .collect();

    Ok(json!({ "days": days }))
}

fn classroom(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let classroom_id = required_i64(params, "classroomId")?;
    let date_from = required_date(params, "dateFrom")?;
    let date_to = required_date(params, "dateTo")?;
    let classroom = get_classroom(conn, classroom_id)?;

    let mut records =
        list_classroom_attendance(conn, classroom_id, Some(&date_from), Some(&date_to))?;
    let stats = stats::attendance_stats(status_pairs(&records));

    // Detail listing, newest day first.
    records.sort_by(|a, b| {
        b.attendance_date
            .cmp(&a.attendance_date)
            .then(b.id.cmp(&a.id))
    });
    let rows: Vec<serde_json::Value> = records.iter().map(attendance_json).collect();

    Ok(json!({
        "classroom": { "id": classroom.id, "name": classroom.name },
        "dateFrom": date_from,
        "dateTo": date_to,
        "totalStudents": stats.total_students,
        "stats": stats,
        "records": rows
    }))
}

fn students(
    conn: &Connection,
    teacher_id: Option<i64>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher = active_teacher(conn, teacher_id)?;
    let date_from = required_date(params, "dateFrom")?;
    let date_to = required_date(params, "dateTo")?;

    let records = teacher_attendance_in_range(conn, teacher.id, &date_from, &date_to)?;
    let known = db_student_map(conn, teacher.school_id)?;

    let mut by_student: HashMap<i64, Vec<&super::shared::AttendanceRow>> = HashMap::new();
    for record in &records {
        // Records of students that no longer exist are dropped, matching the
        // roster's ownership filter.
        if known.contains_key(&record.student_id) {
            by_student.entry(record.student_id).or_default().push(record);
        }
    }

    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(by_student.len());
    for (student_id, student_records) in &by_student {
        let stats = stats::attendance_stats(
            student_records
                .iter()
                .filter_map(|a| {
                    stats::AttendanceStatus::parse(&a.status).map(|s| (a.student_id, s))
                }),
        );
        rows.push(json!({
            "student": student_json(&known[student_id]),
            "stats": stats,
            "totalDays": student_records.len()
        }));
    }

    // Descending by rate; studentNo as a stable tie-break for readable output.
    rows.sort_by(|a, b| {
        let ra = a["stats"]["attendance_rate"].as_f64().unwrap_or(0.0);
        let rb = b["stats"]["attendance_rate"].as_f64().unwrap_or(0.0);
        rb.partial_cmp(&ra)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a["student"]["studentNo"]
                    .as_str()
                    .unwrap_or("")
                    .cmp(b["student"]["studentNo"].as_str().unwrap_or(""))
            })
    });

    Ok(json!({ "students": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let teacher_id = state.teacher_id;
    let handler: Option<
        fn(&Connection, Option<i64>, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
    > = match req.method.as_str() {
        "reports.overview" => Some(overview),
        "reports.daily" => Some(daily),
        "reports.classroom" => Some(|c, _, p| classroom(c, p)),
        "reports.students" => Some(students),
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
