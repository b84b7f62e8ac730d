use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_i64, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::weeks::{bucket_weeks, infer_quarter, load_weeks, Week};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn week_json(week: &Week) -> serde_json::Value {
    json!({
        "id": week.id,
        "semester": week.semester,
        "quarter": infer_quarter(week),
        "number": week.number,
        "label": week.label,
        "createdAt": week.created_at,
    })
}

fn requested_quarter(req: &Request) -> i64 {
    match opt_i64(req, "quarter") {
        Some(q) if q == 1 || q == 2 => q,
        _ => 1,
    }
}

/// List weeks for one (semester, quarter) bucket, or every week when no
/// semester is given. A semester is never answered with "all its weeks":
/// the quarter filter always applies so buckets stay separate.
fn handle_weeks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let all_weeks = match load_weeks(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let weeks: Vec<serde_json::Value> = match opt_i64(req, "semester") {
        Some(semester) => {
            let quarter = requested_quarter(req);
            let mut bucket = bucket_weeks(&all_weeks, semester, quarter);
            bucket.sort_by_key(|w| w.number);
            bucket.iter().map(|w| week_json(w)).collect()
        }
        None => all_weeks.iter().map(week_json).collect(),
    };
    ok(&req.id, json!({ "weeks": weeks }))
}

/// Create the next week slot in its (semester, quarter) bucket. Quarter 1
/// numbers 1-9, quarter 2 numbers 10-18; creation is refused once the
/// bucket's range is full so sequence numbers stay unique.
fn handle_weeks_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let semester = opt_i64(req, "semester").unwrap_or(1);
    if semester != 1 && semester != 2 {
        return err(
            &req.id,
            "bad_params",
            "semester must be 1 or 2",
            Some(json!({ "semester": semester })),
        );
    }
    let quarter = requested_quarter(req);

    let all_weeks = match load_weeks(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let bucket = bucket_weeks(&all_weeks, semester, quarter);
    let max_number = bucket.iter().map(|w| w.number).max();

    let (lower, upper) = if quarter == 1 { (1, 9) } else { (10, 18) };
    let next_number = match max_number {
        Some(n) if n >= lower => n + 1,
        _ => lower,
    };
    if next_number > upper {
        return err(
            &req.id,
            "quarter_full",
            format!("quarter {} already has its full week range", quarter),
            Some(json!({ "semester": semester, "quarter": quarter })),
        );
    }

    let label = opt_str(req, "label")
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| format!("Week {next_number}"));
    let week = Week {
        id: Uuid::new_v4().to_string(),
        semester,
        quarter: Some(quarter),
        number: next_number,
        label,
        created_at: Some(db::now_iso()),
    };
    if let Err(e) = conn.execute(
        "INSERT INTO weeks(id, semester, quarter, number, label, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &week.id,
            week.semester,
            week.quarter,
            week.number,
            &week.label,
            &week.created_at,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "weeks" })),
        );
    }
    ok(&req.id, json!({ "week": week_json(&week) }))
}

/// Delete a week and its score rows. When the caller names a (semester,
/// quarter), a week from any other bucket is refused rather than deleted.
fn handle_weeks_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let week_id = match required_str(req, "weekId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let week: Option<Week> = match conn
        .query_row(
            "SELECT id, semester, quarter, number, label, created_at FROM weeks WHERE id = ?",
            [&week_id],
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
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(week) = week else {
        return err(&req.id, "not_found", "week not found", None);
    };

    if let (Some(semester), Some(quarter)) = (opt_i64(req, "semester"), opt_i64(req, "quarter")) {
        if week.semester != semester || infer_quarter(&week) != quarter {
            return err(
                &req.id,
                "quarter_mismatch",
                "week does not belong to the selected semester/quarter",
                Some(json!({
                    "weekSemester": week.semester,
                    "weekQuarter": infer_quarter(&week)
                })),
            );
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let deleted_scores = match tx.execute("DELETE FROM student_scores WHERE week_id = ?", [&week_id])
    {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "student_scores" })),
            );
        }
    };
    if let Err(e) = tx.execute("DELETE FROM weeks WHERE id = ?", [&week_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "weeks" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "status": "deleted", "deletedScores": deleted_scores }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "weeks.list" => Some(handle_weeks_list(state, req)),
        "weeks.create" => Some(handle_weeks_create(state, req)),
        "weeks.delete" => Some(handle_weeks_delete(state, req)),
        _ => None,
    }
}
