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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Fixture {
    classroom_id: i64,
    s1: i64,
    s2: i64,
    s3: i64,
}

/// Three students in one classroom:
///   Jan 5: s1 present, s2 absent, s3 late
///   Jan 6: s1 present
///   Feb 1: s1 present (outside the January range)
fn seed_january(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Fixture {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(stdin, reader, "s2", "schools.create", json!({ "name": "Oak Row" }));
    let school_id = school["schoolId"].as_i64().expect("schoolId");
    let _ = request_ok(
        stdin,
        reader,
        "s3",
        "teachers.register",
        json!({ "schoolId": school_id, "firstname": "June", "lastname": "Park" }),
    );
    let classroom = request_ok(
        stdin,
        reader,
        "s4",
        "classrooms.create",
        json!({
            "schoolId": school_id,
            "name": "G6/1",
            "gradeLevel": "G6",
            "classSection": "1"
        }),
    );
    let classroom_id = classroom["classroom"]["id"].as_i64().expect("classroom id");

    let mut ids = Vec::new();
    for (i, last) in ["Abbot", "Burke", "Choi"].iter().enumerate() {
        let student = request_ok(
            stdin,
            reader,
            &format!("st{}", i),
            "students.create",
            json!({
                "schoolId": school_id,
                "firstname": "Kid",
                "lastname": last,
                "gradeLevel": "G6",
                "classSection": "1"
            }),
        );
        ids.push(student["student"]["id"].as_i64().expect("student id"));
    }
    let (s1, s2, s3) = (ids[0], ids[1], ids[2]);

    let _ = request_ok(
        stdin,
        reader,
        "a1",
        "attendance.save",
        json!({
            "classroomId": classroom_id,
            "date": "2025-01-05",
            "entries": [
                { "studentId": s1, "status": "present" },
                { "studentId": s2, "status": "absent" },
                { "studentId": s3, "status": "late" }
            ]
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "a2",
        "attendance.save",
        json!({
            "classroomId": classroom_id,
            "date": "2025-01-06",
            "entries": [{ "studentId": s1, "status": "present" }]
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "a3",
        "attendance.save",
        json!({
            "classroomId": classroom_id,
            "date": "2025-02-01",
            "entries": [{ "studentId": s1, "status": "present" }]
        }),
    );

    Fixture {
        classroom_id,
        s1,
        s2,
        s3,
    }
}

const JAN: (&str, &str) = ("2025-01-01", "2025-01-31");

#[test]
fn overview_uses_distinct_students_and_honors_the_range() {
    let workspace = temp_dir("rollcall-overview");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _fx = seed_january(&mut stdin, &mut reader, &workspace);

    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.overview",
        json!({ "dateFrom": JAN.0, "dateTo": JAN.1 }),
    );
    // The February record is outside the window.
    assert_eq!(overview["totalRecords"], 4);
    let stats = &overview["stats"];
    assert_eq!(stats["total_students"], 3);
    assert_eq!(stats["present_count"], 2);
    assert_eq!(stats["absent_count"], 1);
    assert_eq!(stats["late_count"], 1);
    assert_eq!(stats["excused_count"], 0);
    // 2 present records over 3 distinct students.
    assert_eq!(stats["attendance_rate"], 66.67);
}

#[test]
fn daily_breakdown_is_ascending_with_per_day_rates() {
    let workspace = temp_dir("rollcall-daily");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _fx = seed_january(&mut stdin, &mut reader, &workspace);

    let daily = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.daily",
        json!({ "dateFrom": JAN.0, "dateTo": JAN.1 }),
    );
    let days = daily["days"].as_array().expect("days");
    assert_eq!(days.len(), 2);

    assert_eq!(days[0]["date"], "2025-01-05");
    assert_eq!(days[0]["present"], 1);
    assert_eq!(days[0]["absent"], 1);
    assert_eq!(days[0]["late"], 1);
    assert_eq!(days[0]["total"], 3);
    // 1 of 3 marked, integer-rounded.
    assert_eq!(days[0]["rate"], 33);

    assert_eq!(days[1]["date"], "2025-01-06");
    assert_eq!(days[1]["present"], 1);
    assert_eq!(days[1]["total"], 1);
    assert_eq!(days[1]["rate"], 100);
}

#[test]
fn classroom_report_lists_newest_day_first() {
    let workspace = temp_dir("rollcall-classroom-report");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_january(&mut stdin, &mut reader, &workspace);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.classroom",
        json!({ "classroomId": fx.classroom_id, "dateFrom": JAN.0, "dateTo": JAN.1 }),
    );
    assert_eq!(report["classroom"]["name"], "G6/1");
    assert_eq!(report["totalStudents"], 3);

    let records = report["records"].as_array().expect("records");
    assert_eq!(records.len(), 4);
    assert_eq!(records[0]["attendanceDate"], "2025-01-06");
    for pair in records.windows(2) {
        let a = pair[0]["attendanceDate"].as_str().expect("date");
        let b = pair[1]["attendanceDate"].as_str().expect("date");
        assert!(a >= b, "records out of order: {} before {}", a, b);
    }
}

#[test]
fn per_student_report_ranks_by_rate() {
    let workspace = temp_dir("rollcall-student-report");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let fx = seed_january(&mut stdin, &mut reader, &workspace);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "reports.students",
        json!({ "dateFrom": JAN.0, "dateTo": JAN.1 }),
    );
    let rows = report["students"].as_array().expect("students");
    assert_eq!(rows.len(), 3);

    // s1 is present on both January days.
    assert_eq!(rows[0]["student"]["id"].as_i64(), Some(fx.s1));
    assert_eq!(rows[0]["stats"]["attendance_rate"], 100.0);
    assert_eq!(rows[0]["totalDays"], 2);

    // The zero-rate students tie and fall back to studentNo order.
    assert_eq!(rows[1]["student"]["id"].as_i64(), Some(fx.s2));
    assert_eq!(rows[2]["student"]["id"].as_i64(), Some(fx.s3));
    assert_eq!(rows[1]["stats"]["attendance_rate"], 0.0);
    assert_eq!(rows[2]["stats"]["attendance_rate"], 0.0);
}
