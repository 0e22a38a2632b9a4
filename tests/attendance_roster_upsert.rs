use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Fixture {
    classroom_id: i64,
    student_ids: Vec<i64>,
}

fn bootstrap(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    names: &[(&str, &str)],
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "b1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(stdin, reader, "b2", "schools.create", json!({ "name": "Hill Road" }));
    let school_id = school["schoolId"].as_i64().expect("schoolId");
    let _ = request_ok(
        stdin,
        reader,
        "b3",
        "teachers.register",
        json!({ "schoolId": school_id, "firstname": "Rosa", "lastname": "Kim" }),
    );
    let classroom = request_ok(
        stdin,
        reader,
        "b4",
        "classrooms.create",
        json!({
            "schoolId": school_id,
            "name": "G8/2",
            "gradeLevel": "G8",
            "classSection": "2"
        }),
    );
    let classroom_id = classroom["classroom"]["id"].as_i64().expect("classroom id");

    let mut student_ids = Vec::new();
    for (i, (first, last)) in names.iter().enumerate() {
        let student = request_ok(
            stdin,
            reader,
            &format!("bs{}", i),
            "students.create",
            json!({
                "schoolId": school_id,
                "firstname": first,
                "lastname": last,
                "gradeLevel": "G8",
                "classSection": "2"
            }),
        );
        student_ids.push(student["student"]["id"].as_i64().expect("student id"));
    }

    Fixture {
        classroom_id,
        student_ids,
    }
}

fn roster_row<'a>(roster: &'a serde_json::Value, student_id: i64) -> &'a serde_json::Value {
    roster["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .find(|r| r["studentId"].as_i64() == Some(student_id))
        .unwrap_or_else(|| panic!("no roster row for student {}", student_id))
}

#[test]
fn pending_is_skipped_and_saved_statuses_round_trip() {
    let workspace = temp_dir("rollcall-pending-skip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = bootstrap(
        &mut stdin,
        &mut reader,
        &workspace,
        &[("Ann", "Field"), ("Ben", "Hale"), ("Cy", "Omar")],
    );
    let (a, b, c) = (fx.student_ids[0], fx.student_ids[1], fx.student_ids[2]);

    // Fresh roster: everyone pending, nothing persisted yet.
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.rosterOpen",
        json!({ "classroomId": fx.classroom_id, "date": "2025-01-10" }),
    );
    assert_eq!(roster["rows"].as_array().expect("rows").len(), 3);
    for row in roster["rows"].as_array().expect("rows") {
        assert_eq!(row["status"], "pending");
        assert!(row["attendanceId"].is_null());
    }

    // A=present, B=absent, C untouched: exactly two rows are written.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.save",
        json!({
            "classroomId": fx.classroom_id,
            "date": "2025-01-10",
            "entries": [
                { "studentId": a, "status": "present" },
                { "studentId": b, "status": "absent", "notes": "sick" },
                { "studentId": c, "status": "pending" }
            ]
        }),
    );
    assert_eq!(saved["created"], 2);
    assert_eq!(saved["updated"], 0);
    assert_eq!(saved["skipped"], 1);
    assert_eq!(saved["failed"], 0);

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.history",
        json!({ "classroomId": fx.classroom_id }),
    );
    assert_eq!(history["records"].as_array().expect("records").len(), 2);

    // Reload reflects the persisted state exactly; C is still pending.
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.rosterOpen",
        json!({ "classroomId": fx.classroom_id, "date": "2025-01-10" }),
    );
    assert_eq!(roster_row(&roster, a)["status"], "present");
    assert_eq!(roster_row(&roster, b)["status"], "absent");
    assert_eq!(roster_row(&roster, b)["notes"], "sick");
    assert_eq!(roster_row(&roster, c)["status"], "pending");
    assert!(roster_row(&roster, a)["attendanceId"].is_i64());
    assert!(roster_row(&roster, c)["attendanceId"].is_null());
}

#[test]
fn duplicate_entries_in_one_batch_collapse_to_one_row() {
    let workspace = temp_dir("rollcall-batch-dup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = bootstrap(&mut stdin, &mut reader, &workspace, &[("Ann", "Field")]);
    let a = fx.student_ids[0];

    // Same student twice in one save: the second entry must hit the row the
    // first one just created, not insert a sibling.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.save",
        json!({
            "classroomId": fx.classroom_id,
            "date": "2025-01-10",
            "entries": [
                { "studentId": a, "status": "present" },
                { "studentId": a, "status": "late" }
            ]
        }),
    );
    assert_eq!(saved["created"], 1);
    assert_eq!(saved["updated"], 1);
    let outcomes = saved["outcomes"].as_array().expect("outcomes");
    assert_eq!(outcomes[0]["action"], "created");
    assert_eq!(outcomes[1]["action"], "updated");

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.history",
        json!({ "classroomId": fx.classroom_id }),
    );
    let records = history["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    // Last write wins.
    assert_eq!(records[0]["status"], "late");
}

#[test]
fn second_save_updates_in_place_instead_of_duplicating() {
    let workspace = temp_dir("rollcall-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = bootstrap(&mut stdin, &mut reader, &workspace, &[("Ann", "Field")]);
    let a = fx.student_ids[0];

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attendance.save",
        json!({
            "classroomId": fx.classroom_id,
            "date": "2025-01-10",
            "entries": [{ "studentId": a, "status": "present" }]
        }),
    );
    assert_eq!(saved["created"], 1);

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.rosterOpen",
        json!({ "classroomId": fx.classroom_id, "date": "2025-01-10" }),
    );
    let first_id = roster_row(&roster, a)["attendanceId"]
        .as_i64()
        .expect("attendanceId");

    // Same student, same date, new decision: the existing row is rewritten.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.save",
        json!({
            "classroomId": fx.classroom_id,
            "date": "2025-01-10",
            "entries": [{ "studentId": a, "status": "late", "notes": "bus delay" }]
        }),
    );
    assert_eq!(saved["created"], 0);
    assert_eq!(saved["updated"], 1);

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.history",
        json!({ "classroomId": fx.classroom_id }),
    );
    let records = history["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"].as_i64(), Some(first_id));
    assert_eq!(records[0]["status"], "late");
    assert_eq!(records[0]["notes"], "bus delay");

    // A different date is a different upsert key.
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.save",
        json!({
            "classroomId": fx.classroom_id,
            "date": "2025-01-11",
            "entries": [{ "studentId": a, "status": "present" }]
        }),
    );
    assert_eq!(saved["created"], 1);

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.history",
        json!({ "classroomId": fx.classroom_id }),
    );
    let records = history["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    // Newest date first.
    assert_eq!(records[0]["attendanceDate"], "2025-01-11");
    assert_eq!(records[1]["attendanceDate"], "2025-01-10");
}
