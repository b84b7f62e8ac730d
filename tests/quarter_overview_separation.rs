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
    let exe = env!("CARGO_BIN_EXE_scoretrackd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn scoretrackd");
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn find_student<'a>(students: &'a [serde_json::Value], full_name: &str) -> &'a serde_json::Value {
    students
        .iter()
        .find(|s| s.get("fullName").and_then(|v| v.as_str()) == Some(full_name))
        .unwrap_or_else(|| panic!("student {full_name} in overview"))
}

#[test]
fn quarter_overview_separates_buckets_and_treats_zeros_as_no_data() {
    let workspace = temp_dir("scoretrack-overview-separation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "6A" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut student_ids = Vec::new();
    for (i, name) in ["Aya Scored", "Basim Zeroed"].iter().enumerate() {
        let student = request_ok(
            &mut stdin,
            &mut reader,
            &format!("st{i}"),
            "students.create",
            json!({ "classId": class_id, "fullName": name }),
        );
        student_ids.push(
            student
                .get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }

    let week = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "weeks.create",
        json!({ "semester": 1, "quarter": 1 }),
    );
    let week_id = week
        .get("week")
        .and_then(|w| w.get("id"))
        .and_then(|v| v.as_str())
        .expect("week id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scores.bulkUpdate",
        json!({
            "weekId": week_id,
            "updates": [
                {
                    "studentId": student_ids[0],
                    "attendance": 2.5,
                    "participation": 2.5,
                    "behavior": 5.0,
                    "homework": 5.0
                },
                {
                    "studentId": student_ids[1],
                    "attendance": 0,
                    "participation": 0,
                    "behavior": 0,
                    "homework": 0,
                    "quiz1": 0
                }
            ]
        }),
    );

    let q1 = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.quarterOverview",
        json!({ "classId": class_id, "semester": 1, "quarter": 1 }),
    );
    let students = q1
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("students");

    let scored = find_student(&students, "Aya Scored");
    // 15 over one of nine weeks, cumulative.
    assert_eq!(
        scored.get("quarter1Total").and_then(|v| v.as_f64()),
        Some(1.67)
    );
    assert_eq!(
        scored.get("performanceLevelQ1").and_then(|v| v.as_str()),
        Some("below")
    );
    assert!(scored
        .get("quarter2Total")
        .map(|v| v.is_null())
        .unwrap_or(false));

    // An all-zero student is indistinguishable from an unentered one.
    let zeroed = find_student(&students, "Basim Zeroed");
    assert_eq!(
        zeroed.get("performanceLevel").and_then(|v| v.as_str()),
        Some("no_data")
    );
    assert!(zeroed
        .get("quarter1Total")
        .map(|v| v.is_null())
        .unwrap_or(false));
    assert!(zeroed
        .get("totalScoreNormalized")
        .map(|v| v.is_null())
        .unwrap_or(false));

    // Quarter 2 has no weeks, so nothing from quarter 1 may leak in.
    let q2 = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.quarterOverview",
        json!({ "classId": class_id, "semester": 1, "quarter": 2 }),
    );
    let students_q2 = q2
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("students");
    for student in &students_q2 {
        assert_eq!(
            student.get("performanceLevel").and_then(|v| v.as_str()),
            Some("no_data"),
            "quarter 2 must be no_data for {}",
            student.get("fullName").and_then(|v| v.as_str()).unwrap_or("?")
        );
    }
}
