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

fn distribution_count(summary: &serde_json::Value, level: &str) -> u64 {
    summary
        .get("distribution")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|d| d.get("level").and_then(|v| v.as_str()) == Some(level))
        })
        .and_then(|d| d.get("count"))
        .and_then(|v| v.as_u64())
        .expect("distribution count")
}

#[test]
fn overview_buckets_students_by_level_with_insights() {
    let workspace = temp_dir("scoretrack-analytics-overview");
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
    for (i, name) in ["Amal Top", "Badr Low", "Chirine Empty"]
        .iter()
        .enumerate()
    {
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

    let mut week_ids = Vec::new();
    for i in 0..9 {
        let week = request_ok(
            &mut stdin,
            &mut reader,
            &format!("w{i}"),
            "weeks.create",
            json!({ "semester": 1, "quarter": 1 }),
        );
        week_ids.push(
            week.get("week")
                .and_then(|w| w.get("id"))
                .and_then(|v| v.as_str())
                .expect("week id")
                .to_string(),
        );
    }

    // Amal carries full marks in every field every week; Badr has a single
    // thin attendance entry; Chirine has nothing.
    for (i, week_id) in week_ids.iter().enumerate() {
        let mut updates = vec![json!({
            "studentId": student_ids[0],
            "attendance": 2.5,
            "participation": 2.5,
            "behavior": 5.0,
            "homework": 5.0,
            "quiz1": 5.0,
            "quiz2": 5.0,
            "chapterTest1Practical": 10.0,
            "quarter1Practical": 10.0,
            "quarter1Theory": 10.0
        })];
        if i == 0 {
            updates.push(json!({
                "studentId": student_ids[1],
                "attendance": 1.0
            }));
        }
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("u{i}"),
            "scores.bulkUpdate",
            json!({ "weekId": week_id, "updates": updates }),
        );
    }

    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "ov",
        "analytics.overview",
        json!({ "classId": class_id, "semester": 1, "quarter": 1 }),
    );

    assert_eq!(
        overview.get("totalStudents").and_then(|v| v.as_u64()),
        Some(3)
    );
    let quarter1 = overview.get("quarter1").expect("quarter1 summary");
    assert_eq!(distribution_count(quarter1, "on_level"), 1);
    assert_eq!(distribution_count(quarter1, "below"), 1);
    assert_eq!(distribution_count(quarter1, "no_data"), 1);
    assert_eq!(
        quarter1.get("totalWithData").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert_eq!(
        quarter1.get("onLevelRate").and_then(|v| v.as_f64()),
        Some(50.0)
    );
    // No quarter-2 weeks exist, so its distribution is all no_data.
    let quarter2 = overview.get("quarter2").expect("quarter2 summary");
    assert_eq!(distribution_count(quarter2, "no_data"), 3);

    let excelling = overview
        .get("excellingStudents")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("excelling");
    assert_eq!(excelling.len(), 1);
    let top = &excelling[0];
    assert_eq!(top.get("fullName").and_then(|v| v.as_str()), Some("Amal Top"));
    assert_eq!(top.get("total").and_then(|v| v.as_f64()), Some(50.0));
    let strengths: Vec<&str> = top
        .get("strengths")
        .and_then(|v| v.as_array())
        .expect("strengths")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(strengths.contains(&"Quizzes"));
    assert!(strengths.contains(&"Quarter exams"));

    let struggling = overview
        .get("strugglingStudents")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("struggling");
    assert_eq!(struggling.len(), 1);
    let low = &struggling[0];
    assert_eq!(low.get("fullName").and_then(|v| v.as_str()), Some("Badr Low"));
    let weak_areas: Vec<&str> = low
        .get("weakAreas")
        .and_then(|v| v.as_array())
        .expect("weakAreas")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(weak_areas.contains(&"Quizzes"));
    assert!(weak_areas.contains(&"Quarter exams"));
    assert!(weak_areas.contains(&"Homework"));

    let per_class = overview
        .get("studentsPerClass")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("studentsPerClass");
    assert_eq!(per_class.len(), 1);
    assert_eq!(
        per_class[0].get("className").and_then(|v| v.as_str()),
        Some("6A")
    );
    assert_eq!(per_class[0].get("count").and_then(|v| v.as_u64()), Some(3));
}

#[test]
fn full_year_merges_semesters_without_collision() {
    let workspace = temp_dir("scoretrack-analytics-fullyear");
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
        json!({ "name": "9A" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "fullName": "Eman Khalid" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    // One week in each semester; the semester-2 week is number 1 in its own
    // bucket and lands on slot 10 in the merged numbering.
    let mut week_ids = Vec::new();
    for (i, semester) in [1, 2].iter().enumerate() {
        let week = request_ok(
            &mut stdin,
            &mut reader,
            &format!("w{i}"),
            "weeks.create",
            json!({ "semester": semester, "quarter": 1 }),
        );
        week_ids.push(
            week.get("week")
                .and_then(|w| w.get("id"))
                .and_then(|v| v.as_str())
                .expect("week id")
                .to_string(),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scores.bulkUpdate",
        json!({
            "weekId": week_ids[0],
            "updates": [{ "studentId": student_id, "attendance": 2.0 }]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.bulkUpdate",
        json!({
            "weekId": week_ids[1],
            "updates": [{ "studentId": student_id, "behavior": 4.0 }]
        }),
    );

    let full_year = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "analytics.fullYear",
        json!({ "classId": class_id }),
    );
    let row = full_year
        .get("students")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .cloned()
        .expect("one student");
    let totals = row.get("quarterTotals").expect("quarterTotals");
    assert_eq!(
        totals.get("quarter1Total").and_then(|v| v.as_f64()),
        Some(2.0)
    );
    assert_eq!(
        totals.get("quarter2Total").and_then(|v| v.as_f64()),
        Some(4.0)
    );
    assert_eq!(
        totals.get("semesterTotal").and_then(|v| v.as_f64()),
        Some(6.0)
    );
}

#[test]
fn student_insights_follow_the_selected_bucket() {
    let workspace = temp_dir("scoretrack-analytics-insights");
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
        json!({ "name": "8C" }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "classId": class_id, "fullName": "Dina Farah" }),
    );
    let student_id = student
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    // Four quarter-1 weeks so the quiz week (4) exists.
    let mut week_ids = Vec::new();
    for i in 0..4 {
        let week = request_ok(
            &mut stdin,
            &mut reader,
            &format!("w{i}"),
            "weeks.create",
            json!({ "semester": 1, "quarter": 1 }),
        );
        week_ids.push(
            week.get("week")
                .and_then(|w| w.get("id"))
                .and_then(|v| v.as_str())
                .expect("week id")
                .to_string(),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scores.bulkUpdate",
        json!({
            "weekId": week_ids[3],
            "updates": [{ "studentId": student_id, "quiz1": 5.0, "quiz2": 3.0 }]
        }),
    );

    let insights = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "analytics.studentInsights",
        json!({ "studentId": student_id, "semester": 1, "quarter": 1 }),
    );
    let strengths: Vec<&str> = insights
        .get("strengths")
        .and_then(|v| v.as_array())
        .expect("strengths")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    // Best of the pair (5) clears the 85% bar even though the average would not.
    assert!(strengths.contains(&"Quizzes"));
    let weak_areas: Vec<&str> = insights
        .get("weakAreas")
        .and_then(|v| v.as_array())
        .expect("weakAreas")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(weak_areas.contains(&"Attendance"));
    assert!(weak_areas.contains(&"Chapter tests"));
    // Follow-up part is 0, best quiz is 5, no chapter test.
    assert_eq!(
        insights
            .get("assessmentCombinedTotal")
            .and_then(|v| v.as_f64()),
        Some(5.0)
    );
    assert_eq!(
        insights
            .get("assessmentPerformanceLevel")
            .and_then(|v| v.as_str()),
        Some("below")
    );

    // The same student inspected through the empty quarter-2 bucket.
    let q2 = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "analytics.studentInsights",
        json!({ "studentId": student_id, "semester": 1, "quarter": 2 }),
    );
    assert_eq!(
        q2.get("performanceLevel").and_then(|v| v.as_str()),
        Some("no_data")
    );
    assert!(q2.get("quarterTotal").map(|v| v.is_null()).unwrap_or(false));
    assert!(q2
        .get("finalExamsCombinedTotal")
        .map(|v| v.is_null())
        .unwrap_or(false));
}
