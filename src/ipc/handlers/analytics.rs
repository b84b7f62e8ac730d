use crate::calc::{self, PerformanceLevel, Quarter, StudentScoreMap};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{class_sort_key, db_conn, opt_i64, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::weeks::{full_year_score_map, quarter_score_map};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct OverviewStudent {
    id: String,
    full_name: String,
    class_name: String,
}

#[derive(Debug, Clone, Copy)]
struct QuarterStanding {
    total: Option<f64>,
    level: PerformanceLevel,
}

fn load_overview_students(
    conn: &Connection,
    class_id: Option<&str>,
) -> rusqlite::Result<Vec<OverviewStudent>> {
    let base = "SELECT s.id, s.full_name, COALESCE(c.name, '')
                FROM students s
                LEFT JOIN classes c ON c.id = s.class_id";
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(OverviewStudent {
            id: r.get(0)?,
            full_name: r.get(1)?,
            class_name: r.get(2)?,
        })
    };
    match class_id {
        Some(class_id) => {
            let sql = format!("{base} WHERE s.class_id = ? ORDER BY s.full_name");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map([class_id], map_row)
                .and_then(|it| it.collect())
        }
        None => {
            let sql = format!("{base} ORDER BY s.full_name");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map([], map_row).and_then(|it| it.collect())
        }
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn quarter_summary(standings: &[QuarterStanding]) -> serde_json::Value {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let mut totals: Vec<f64> = Vec::new();
    for standing in standings {
        *counts.entry(standing.level.as_str()).or_insert(0) += 1;
        if let Some(total) = standing.total {
            totals.push(total);
        }
    }
    let count_of = |level: &str| counts.get(level).copied().unwrap_or(0);
    let with_data = standings.len() - count_of("no_data");
    let avg_total = if totals.is_empty() {
        None
    } else {
        Some(calc::round2(totals.iter().sum::<f64>() / totals.len() as f64))
    };
    let on_level_rate = if with_data > 0 {
        round1(count_of("on_level") as f64 / with_data as f64 * 100.0)
    } else {
        0.0
    };
    json!({
        "distribution": [
            { "level": "on_level", "count": count_of("on_level") },
            { "level": "approach", "count": count_of("approach") },
            { "level": "below", "count": count_of("below") },
            { "level": "no_data", "count": count_of("no_data") },
        ],
        "avgTotal": avg_total,
        "onLevelRate": on_level_rate,
        "totalWithData": with_data,
    })
}

/// Both quarters computed independently per student so the dashboard can
/// compare Q1 and Q2 side by side; the struggling/excelling lists follow the
/// selected quarter.
fn handle_analytics_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = opt_str(req, "classId");
    let semester = opt_i64(req, "semester").unwrap_or(1);
    let quarter_number = match opt_i64(req, "quarter") {
        Some(q) if q == 1 || q == 2 => q,
        _ => 1,
    };

    let students = match load_overview_students(conn, class_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();

    let maps_q1 = match quarter_score_map(conn, &student_ids, semester, 1) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let maps_q2 = match quarter_score_map(conn, &student_ids, semester, 2) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let empty_map = StudentScoreMap::new();
    let mut standings_q1: Vec<QuarterStanding> = Vec::with_capacity(students.len());
    let mut standings_q2: Vec<QuarterStanding> = Vec::with_capacity(students.len());
    let mut struggling: Vec<serde_json::Value> = Vec::new();
    let mut excelling: Vec<serde_json::Value> = Vec::new();
    let mut sortable_struggling: Vec<(f64, serde_json::Value)> = Vec::new();
    let mut sortable_excelling: Vec<(f64, serde_json::Value)> = Vec::new();

    for student in &students {
        let map_q1 = maps_q1.get(&student.id).unwrap_or(&empty_map);
        let map_q2 = maps_q2.get(&student.id).unwrap_or(&empty_map);
        let cumulative_q1 = calc::compute_cumulative_quarter(map_q1, Quarter::First);
        let cumulative_q2 = calc::compute_cumulative_quarter(map_q2, Quarter::Second);
        standings_q1.push(QuarterStanding {
            total: cumulative_q1.total,
            level: cumulative_q1.level,
        });
        standings_q2.push(QuarterStanding {
            total: cumulative_q2.total,
            level: cumulative_q2.level,
        });

        let (selected_map, selected) = if quarter_number == 2 {
            (map_q2, cumulative_q2)
        } else {
            (map_q1, cumulative_q1)
        };
        let insights = calc::compute_student_insights(selected_map);
        let entry = json!({
            "id": student.id,
            "fullName": student.full_name,
            "className": student.class_name,
            "total": selected.total,
            "performanceLevel": selected.level.as_str(),
            "weakAreas": insights.weak_areas,
            "strengths": insights.strengths,
        });
        match selected.level {
            PerformanceLevel::Below | PerformanceLevel::Approach => {
                sortable_struggling.push((selected.total.unwrap_or(0.0), entry));
            }
            PerformanceLevel::OnLevel => {
                sortable_excelling.push((selected.total.unwrap_or(0.0), entry));
            }
            PerformanceLevel::NoData => {}
        }
    }

    sortable_struggling.sort_by(|a, b| a.0.total_cmp(&b.0));
    struggling.extend(sortable_struggling.into_iter().map(|(_, v)| v));
    sortable_excelling.sort_by(|a, b| b.0.total_cmp(&a.0));
    excelling.extend(sortable_excelling.into_iter().map(|(_, v)| v));

    let mut class_counts: HashMap<String, usize> = HashMap::new();
    for student in &students {
        *class_counts.entry(student.class_name.clone()).or_insert(0) += 1;
    }
    let mut students_per_class: Vec<(String, usize)> = class_counts.into_iter().collect();
    students_per_class.sort_by_key(|(name, _)| class_sort_key(name));
    let students_per_class: Vec<serde_json::Value> = students_per_class
        .into_iter()
        .map(|(name, count)| json!({ "className": name, "count": count }))
        .collect();

    ok(
        &req.id,
        json!({
            "totalStudents": students.len(),
            "semester": semester,
            "quarter": quarter_number,
            "quarter1": quarter_summary(&standings_q1),
            "quarter2": quarter_summary(&standings_q2),
            "strugglingStudents": struggling,
            "excellingStudents": excelling,
            "studentsPerClass": students_per_class,
        }),
    )
}

/// Legacy dashboard view over the merged 1-18 numbering: both semesters in
/// one map, quarter totals and insights per student.
fn handle_analytics_full_year(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = opt_str(req, "classId");
    let students = match load_overview_students(conn, class_id.as_deref()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_ids: Vec<String> = students.iter().map(|s| s.id.clone()).collect();
    let maps = match full_year_score_map(conn, &student_ids) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let empty_map = StudentScoreMap::new();
    let out: Vec<serde_json::Value> = students
        .iter()
        .map(|student| {
            let map = maps.get(&student.id).unwrap_or(&empty_map);
            let totals = calc::compute_quarter_totals(map);
            let insights = calc::compute_student_insights(map);
            json!({
                "id": student.id,
                "fullName": student.full_name,
                "className": student.class_name,
                "quarterTotals": totals,
                "weakAreas": insights.weak_areas,
                "strengths": insights.strengths,
            })
        })
        .collect();
    ok(&req.id, json!({ "students": out }))
}

/// Weak areas and strengths for one student within one (semester, quarter)
/// bucket, alongside the bucket's cumulative standing.
fn handle_analytics_student_insights(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let semester = opt_i64(req, "semester").unwrap_or(1);
    let quarter_number = match opt_i64(req, "quarter") {
        Some(q) if q == 1 || q == 2 => q,
        _ => 1,
    };
    let quarter = Quarter::from_number(quarter_number);

    let full_name: Option<String> = match conn
        .query_row(
            "SELECT full_name FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(full_name) = full_name else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let maps = match quarter_score_map(
        conn,
        std::slice::from_ref(&student_id),
        semester,
        quarter_number,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let empty_map = StudentScoreMap::new();
    let map = maps.get(&student_id).unwrap_or(&empty_map);

    let insights = calc::compute_student_insights(map);
    let cumulative = calc::compute_cumulative_quarter(map, quarter);
    let assessment = calc::compute_assessment_combined(map, quarter);
    let final_exams = calc::compute_final_exams_combined(map, quarter);
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "fullName": full_name,
            "semester": semester,
            "quarter": quarter_number,
            "weakAreas": insights.weak_areas,
            "strengths": insights.strengths,
            "quarterTotal": cumulative.total,
            "performanceLevel": cumulative.level.as_str(),
            "performanceLabel": cumulative.level.label(),
            "assessmentCombinedTotal": assessment.total,
            "assessmentPerformanceLevel": assessment.level.as_str(),
            "finalExamsCombinedTotal": final_exams.total,
            "finalExamsPerformanceLevel": final_exams.level.as_str(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.overview" => Some(handle_analytics_overview(state, req)),
        "analytics.fullYear" => Some(handle_analytics_full_year(state, req)),
        "analytics.studentInsights" => Some(handle_analytics_student_insights(state, req)),
        _ => None,
    }
}
