use crate::calc::{self, Quarter, ScoreRow, StudentScoreMap, SCORE_FIELDS};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_i64, opt_str, required_str, SCORE_FIELD_WIRE};
use crate::ipc::types::{AppState, Request};
use crate::weeks::{infer_quarter, quarter_score_map, Week};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StudentRow {
    id: String,
    class_id: String,
    full_name: String,
    sort_order: i64,
    active: bool,
}

fn load_students(
    conn: &Connection,
    class_id: Option<&str>,
) -> rusqlite::Result<Vec<StudentRow>> {
    let base = "SELECT id, class_id, full_name, sort_order, active FROM students";
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(StudentRow {
            id: r.get(0)?,
            class_id: r.get(1)?,
            full_name: r.get(2)?,
            sort_order: r.get(3)?,
            active: r.get::<_, i64>(4)? != 0,
        })
    };
    match class_id {
        Some(class_id) => {
            let sql = format!("{base} WHERE class_id = ? ORDER BY full_name");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map([class_id], map_row)
                .and_then(|it| it.collect())
        }
        None => {
            let sql = format!("{base} ORDER BY full_name");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map([], map_row).and_then(|it| it.collect())
        }
    }
}

fn load_week(conn: &Connection, week_id: &str) -> rusqlite::Result<Option<Week>> {
    conn.query_row(
        "SELECT id, semester, quarter, number, label, created_at FROM weeks WHERE id = ?",
        [week_id],
        |r| {
            Ok(Week {
                id: r.get(0)?,
                semester: r.get(1)?,
                quarter: r.get(2)?,
                number: r.get(3)?,
                label: r.get(4)?,
                created_at: r.get(5)?,
            })
        },
    )
    .optional()
}

fn load_focus_week_rows(
    conn: &Connection,
    week_id: &str,
    student_ids: &[String],
) -> rusqlite::Result<HashMap<String, ScoreRow>> {
    if student_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = std::iter::repeat_n("?", student_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT student_id, {} FROM student_scores
         WHERE week_id = ? AND student_id IN ({placeholders})",
        SCORE_FIELDS.join(", ")
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(student_ids.len() + 1);
    bind_values.push(Value::Text(week_id.to_string()));
    for id in student_ids {
        bind_values.push(Value::Text(id.clone()));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(bind_values), |r| {
        let student_id: String = r.get(0)?;
        let mut row = ScoreRow::default();
        for (i, field) in SCORE_FIELDS.iter().enumerate() {
            row.set(field, r.get(1 + i)?);
        }
        Ok((student_id, row))
    })?;
    rows.collect()
}

fn score_fields_json(target: &mut serde_json::Map<String, serde_json::Value>, row: &ScoreRow) {
    for (wire, column) in SCORE_FIELD_WIRE {
        target.insert(wire.to_string(), json!(row.get(column)));
    }
}

fn student_base_json(student: &StudentRow) -> serde_json::Map<String, serde_json::Value> {
    let mut obj = serde_json::Map::new();
    obj.insert("id".into(), json!(student.id));
    obj.insert("classId".into(), json!(student.class_id));
    obj.insert("fullName".into(), json!(student.full_name));
    obj.insert("sortOrder".into(), json!(student.sort_order));
    obj.insert("active".into(), json!(student.active));
    obj
}

/// Focus-week enrichment: the raw week fields plus every composite for the
/// week's own quarter. The other quarter's composite slots stay null so the
/// four buckets never mix.
fn enrich_for_focus_week(
    obj: &mut serde_json::Map<String, serde_json::Value>,
    focus: &ScoreRow,
    map: &StudentScoreMap,
    quarter: Quarter,
) {
    score_fields_json(obj, focus);

    let totals = calc::compute_quarter_totals(map);
    obj.insert("quarterTotals".into(), json!(totals));
    obj.insert(
        "avgFollowUpQ1".into(),
        json!(calc::avg_follow_up_sparse(map, Quarter::First)),
    );
    obj.insert(
        "avgFollowUpQ2".into(),
        json!(calc::avg_follow_up_sparse(map, Quarter::Second)),
    );

    let students_part = calc::students_total(map, quarter);
    obj.insert("studentsTotal".into(), json!(students_part));

    let assessment = calc::compute_assessment_combined(map, quarter);

    // The week-edit view reads the exam marks from the focus week only (no
    // fallback), so freshly cleared exams collapse the Final to the
    // follow-up component.
    let mut effective = calc::effective_scores(map, quarter);
    match quarter {
        Quarter::First => {
            effective.exam_practical = focus.quarter1_practical;
            effective.exam_theory = focus.quarter1_theory;
        }
        Quarter::Second => {
            effective.exam_practical = focus.quarter2_practical;
            effective.exam_theory = focus.quarter2_theory;
        }
    }
    let final_exams = calc::final_from_parts(
        &effective,
        students_part,
        calc::has_meaningful_scores(map, quarter),
    );

    let (assessment_keys, final_keys, other_assessment_keys, other_final_keys) = match quarter {
        Quarter::First => (
            ("assessmentCombinedTotal", "assessmentPerformanceLevel", "assessmentPerformanceLabel"),
            ("finalExamsCombinedTotal", "finalExamsPerformanceLevel", "finalExamsPerformanceLabel"),
            ("assessmentQ2CombinedTotal", "assessmentQ2PerformanceLevel", "assessmentQ2PerformanceLabel"),
            ("finalExamsQ2CombinedTotal", "finalExamsQ2PerformanceLevel", "finalExamsQ2PerformanceLabel"),
        ),
        Quarter::Second => (
            ("assessmentQ2CombinedTotal", "assessmentQ2PerformanceLevel", "assessmentQ2PerformanceLabel"),
            ("finalExamsQ2CombinedTotal", "finalExamsQ2PerformanceLevel", "finalExamsQ2PerformanceLabel"),
            ("assessmentCombinedTotal", "assessmentPerformanceLevel", "assessmentPerformanceLabel"),
            ("finalExamsCombinedTotal", "finalExamsPerformanceLevel", "finalExamsPerformanceLabel"),
        ),
    };
    obj.insert(assessment_keys.0.into(), json!(assessment.total));
    obj.insert(
        assessment_keys.1.into(),
        json!(assessment.level.as_str()),
    );
    obj.insert(
        assessment_keys.2.into(),
        json!(assessment.level.label()),
    );
    obj.insert(final_keys.0.into(), json!(final_exams.total));
    obj.insert(final_keys.1.into(), json!(final_exams.level.as_str()));
    obj.insert(final_keys.2.into(), json!(final_exams.level.label()));
    for key in [
        other_assessment_keys.0,
        other_assessment_keys.1,
        other_assessment_keys.2,
        other_final_keys.0,
        other_final_keys.1,
        other_final_keys.2,
    ] {
        obj.insert(key.into(), serde_json::Value::Null);
    }

    let performance = calc::compute_performance(focus);
    obj.insert("totalScoreNormalized".into(), json!(performance.total));
    obj.insert(
        "performanceLevel".into(),
        json!(performance.level.as_str()),
    );
    obj.insert(
        "performanceLabel".into(),
        json!(performance.level.label()),
    );
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = opt_str(req, "classId");
    let students = match load_students(conn, class_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some(week_id) = opt_str(req, "weekId") else {
        let out: Vec<serde_json::Value> = students
            .iter()
            .map(|s| serde_json::Value::Object(student_base_json(s)))
            .collect();
        return ok(&req.id, json!({ "students": out }));
    };

    let week = match load_week(conn, &week_id) {
        Ok(Some(w)) => w,
        Ok(None) => return err(&req.id, "not_found", "week not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let quarter = Quarter::from_number(infer_quarter(&week));
    let student_ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();

    let focus_rows = match load_focus_week_rows(conn, &week_id, &student_ids) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let maps = match quarter_score_map(conn, &student_ids, week.semester, quarter.number()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let empty_map = StudentScoreMap::new();
    let out: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let mut obj = student_base_json(s);
            let focus = focus_rows.get(&s.id).copied().unwrap_or_default();
            let map = maps.get(&s.id).unwrap_or(&empty_map);
            enrich_for_focus_week(&mut obj, &focus, map, quarter);
            serde_json::Value::Object(obj)
        })
        .collect();
    ok(
        &req.id,
        json!({
            "students": out,
            "week": {
                "id": week.id,
                "semester": week.semester,
                "quarter": quarter.number(),
                "number": week.number
            }
        }),
    )
}

/// One quarter's cumulative standing per student, with effective quiz and
/// chapter values. A student with no meaningful marks anywhere in the bucket
/// comes back all-null and no_data.
fn handle_students_quarter_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let semester = opt_i64(req, "semester").unwrap_or(1);
    let quarter_number = match opt_i64(req, "quarter") {
        Some(q) if q == 1 || q == 2 => q,
        _ => 1,
    };
    let quarter = Quarter::from_number(quarter_number);

    let students = match load_students(conn, Some(&class_id)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();
    let maps = match quarter_score_map(conn, &student_ids, semester, quarter_number) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let empty_map = StudentScoreMap::new();
    let out: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let mut obj = student_base_json(s);
            let map = maps.get(&s.id).unwrap_or(&empty_map);
            enrich_single_quarter(&mut obj, map, quarter);
            serde_json::Value::Object(obj)
        })
        .collect();
    ok(
        &req.id,
        json!({
            "students": out,
            "semester": semester,
            "quarter": quarter_number
        }),
    )
}

fn enrich_single_quarter(
    obj: &mut serde_json::Map<String, serde_json::Value>,
    map: &StudentScoreMap,
    quarter: Quarter,
) {
    let no_data = calc::PerformanceLevel::NoData;
    if !calc::has_any_meaningful(map) {
        for key in [
            "quarter1Total",
            "quarter2Total",
            "semesterTotal",
            "totalScoreNormalized",
            "quiz1",
            "quiz2",
            "quiz3",
            "quiz4",
            "chapterTest1",
            "chapterTest2",
        ] {
            obj.insert(key.into(), serde_json::Value::Null);
        }
        obj.insert("performanceLevelQ1".into(), json!(no_data.as_str()));
        obj.insert("performanceLevelQ2".into(), json!(no_data.as_str()));
        obj.insert("performanceLevel".into(), json!(no_data.as_str()));
        obj.insert("performanceLabel".into(), json!(no_data.label()));
        return;
    }

    let cumulative = calc::compute_cumulative_quarter(map, quarter);
    let effective = calc::effective_scores(map, quarter);
    match quarter {
        Quarter::First => {
            obj.insert("quarter1Total".into(), json!(cumulative.total));
            obj.insert("quarter2Total".into(), serde_json::Value::Null);
            obj.insert(
                "performanceLevelQ1".into(),
                json!(cumulative.level.as_str()),
            );
            obj.insert("performanceLevelQ2".into(), json!(no_data.as_str()));
            obj.insert("quiz1".into(), json!(effective.quiz_first));
            obj.insert("quiz2".into(), json!(effective.quiz_second));
            obj.insert("chapterTest1".into(), json!(effective.chapter_test));
            for key in ["quiz3", "quiz4", "chapterTest2"] {
                obj.insert(key.into(), serde_json::Value::Null);
            }
        }
        Quarter::Second => {
            obj.insert("quarter1Total".into(), serde_json::Value::Null);
            obj.insert("quarter2Total".into(), json!(cumulative.total));
            obj.insert("performanceLevelQ1".into(), json!(no_data.as_str()));
            obj.insert(
                "performanceLevelQ2".into(),
                json!(cumulative.level.as_str()),
            );
            obj.insert("quiz3".into(), json!(effective.quiz_first));
            obj.insert("quiz4".into(), json!(effective.quiz_second));
            obj.insert("chapterTest2".into(), json!(effective.chapter_test));
            for key in ["quiz1", "quiz2", "chapterTest1"] {
                obj.insert(key.into(), serde_json::Value::Null);
            }
        }
    }
    obj.insert("performanceLevel".into(), json!(cumulative.level.as_str()));
    obj.insert("performanceLabel".into(), json!(cumulative.level.label()));
    obj.insert("semesterTotal".into(), json!(cumulative.total));
    obj.insert("totalScoreNormalized".into(), json!(cumulative.total));
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if full_name.is_empty() {
        return err(&req.id, "bad_params", "fullName must not be empty", None);
    }

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let sort_order = opt_i64(req, "sortOrder").unwrap_or(0);
    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, full_name, sort_order, active, updated_at)
         VALUES(?, ?, ?, ?, 1, ?)",
        (&student_id, &class_id, &full_name, sort_order, db::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(
        &req.id,
        json!({ "studentId": student_id, "classId": class_id, "fullName": full_name }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut assignments: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();
    if let Some(full_name) = opt_str(req, "fullName") {
        let trimmed = full_name.trim().to_string();
        if trimmed.is_empty() {
            return err(&req.id, "bad_params", "fullName must not be empty", None);
        }
        assignments.push("full_name = ?".into());
        bind_values.push(Value::Text(trimmed));
    }
    if let Some(sort_order) = opt_i64(req, "sortOrder") {
        assignments.push("sort_order = ?".into());
        bind_values.push(Value::Integer(sort_order));
    }
    if let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) {
        assignments.push("active = ?".into());
        bind_values.push(Value::Integer(active as i64));
    }
    if assignments.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }
    assignments.push("updated_at = ?".into());
    bind_values.push(Value::Text(db::now_iso()));
    bind_values.push(Value::Text(student_id));

    let sql = format!(
        "UPDATE students SET {} WHERE id = ?",
        assignments.join(", ")
    );
    match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "status": "updated" })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "DELETE FROM student_scores WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_scores" })),
        );
    }
    let deleted = match tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    };
    if deleted == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "student not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "status": "deleted" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "students.quarterOverview" => Some(handle_students_quarter_overview(state, req)),
        _ => None,
    }
}
