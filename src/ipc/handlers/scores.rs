use crate::calc::{normalize_score, ScoreRow, SCORE_FIELDS};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str, SCORE_FIELD_WIRE};
use crate::ipc::types::{AppState, Request};
use crate::weeks::{bucket_weeks, load_weeks};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const BULK_UPDATE_MAX_EDITS: usize = 5000;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn db(message: impl Into<String>) -> HandlerErr {
        HandlerErr {
            code: "db_query_failed",
            message: message.into(),
            details: None,
        }
    }
}

fn load_existing_row(
    conn: &Connection,
    student_id: &str,
    week_id: &str,
) -> Result<Option<ScoreRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM student_scores WHERE student_id = ? AND week_id = ?",
        SCORE_FIELDS.join(", ")
    );
    conn.query_row(&sql, (student_id, week_id), |r| {
        let mut row = ScoreRow::default();
        for (i, field) in SCORE_FIELDS.iter().enumerate() {
            row.set(field, r.get(i)?);
        }
        Ok(row)
    })
    .optional()
    .map_err(|e| HandlerErr::db(e.to_string()))
}

fn upsert_score_row(
    conn: &Connection,
    student_id: &str,
    week_id: &str,
    row: &ScoreRow,
) -> Result<(), HandlerErr> {
    let score_id = Uuid::new_v4().to_string();
    let assignments = SCORE_FIELDS
        .iter()
        .map(|f| format!("{f} = excluded.{f}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO student_scores(id, student_id, week_id, {}, updated_at)
         VALUES(?, ?, ?, {}, ?)
         ON CONFLICT(student_id, week_id) DO UPDATE SET
           {assignments},
           updated_at = excluded.updated_at",
        SCORE_FIELDS.join(", "),
        std::iter::repeat_n("?", SCORE_FIELDS.len())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(SCORE_FIELDS.len() + 4);
    bind_values.push(Value::Text(score_id));
    bind_values.push(Value::Text(student_id.to_string()));
    bind_values.push(Value::Text(week_id.to_string()));
    for field in SCORE_FIELDS {
        bind_values.push(match row.get(field) {
            Some(v) => Value::Real(v),
            None => Value::Null,
        });
    }
    bind_values.push(Value::Text(db::now_iso()));
    conn.execute(&sql, params_from_iter(bind_values))
        .map_err(|e| HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "student_scores" })),
        })?;
    Ok(())
}

/// Upsert many (student, week) rows in one transaction. Only fields present
/// in each update object are touched; every value passes numeric
/// normalization, so blanks, NaN and non-numeric text land as "not entered"
/// rather than failing the batch.
fn handle_scores_bulk_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let week_id = match required_str(req, "weekId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(updates) = req.params.get("updates").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing updates", None);
    };
    if updates.len() > BULK_UPDATE_MAX_EDITS {
        return err(
            &req.id,
            "bad_params",
            "too many updates in one batch",
            Some(json!({ "max": BULK_UPDATE_MAX_EDITS, "got": updates.len() })),
        );
    }

    let week_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM weeks WHERE id = ?", [&week_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if week_exists.is_none() {
        return err(&req.id, "not_found", "week not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut updated = 0usize;
    for (index, update) in updates.iter().enumerate() {
        let Some(obj) = update.as_object() else {
            let _ = tx.rollback();
            return err(
                &req.id,
                "bad_params",
                "updates must contain objects",
                Some(json!({ "index": index })),
            );
        };
        let Some(student_id) = obj.get("studentId").and_then(|v| v.as_str()) else {
            let _ = tx.rollback();
            return err(
                &req.id,
                "bad_params",
                "update is missing studentId",
                Some(json!({ "index": index })),
            );
        };

        // Wire names are camelCase; storage names are accepted too so
        // imports can post column names directly.
        let touched: Vec<(&str, Option<f64>)> = SCORE_FIELD_WIRE
            .iter()
            .filter_map(|(wire, column)| {
                obj.get(*wire)
                    .or_else(|| obj.get(*column))
                    .map(|v| (*column, normalize_score(v)))
            })
            .collect();
        if touched.is_empty() {
            continue;
        }

        let mut row = match load_existing_row(&tx, student_id, &week_id) {
            Ok(existing) => existing.unwrap_or_default(),
            Err(e) => {
                let _ = tx.rollback();
                return e.response(&req.id);
            }
        };
        for (field, value) in touched {
            row.set(field, value);
        }
        if let Err(e) = upsert_score_row(&tx, student_id, &week_id, &row) {
            let _ = tx.rollback();
            return e.response(&req.id);
        }
        updated += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "status": "updated", "updated": updated }))
}

/// Delete one class's score rows for a single (semester, quarter) bucket.
/// Used when a class has stale data and should read "No Data" for that
/// quarter; the other three buckets are untouched.
fn handle_scores_clear_quarter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let semester = match req.params.get("semester").and_then(|v| v.as_i64()) {
        Some(s) if s == 1 || s == 2 => s,
        _ => return err(&req.id, "bad_params", "semester must be 1 or 2", None),
    };
    let quarter = match req.params.get("quarter").and_then(|v| v.as_i64()) {
        Some(q) if q == 1 || q == 2 => q,
        _ => return err(&req.id, "bad_params", "quarter must be 1 or 2", None),
    };

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

    let all_weeks = match load_weeks(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let week_ids: Vec<String> = bucket_weeks(&all_weeks, semester, quarter)
        .iter()
        .map(|w| w.id.clone())
        .collect();
    if week_ids.is_empty() {
        return ok(&req.id, json!({ "status": "cleared", "deleted": 0 }));
    }

    let placeholders = std::iter::repeat_n("?", week_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "DELETE FROM student_scores
         WHERE week_id IN ({placeholders})
           AND student_id IN (SELECT id FROM students WHERE class_id = ?)"
    );
    let mut bind_values: Vec<Value> = week_ids.into_iter().map(Value::Text).collect();
    bind_values.push(Value::Text(class_id));
    match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(deleted) => ok(&req.id, json!({ "status": "cleared", "deleted": deleted })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_scores" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.bulkUpdate" => Some(handle_scores_bulk_update(state, req)),
        "scores.clearQuarter" => Some(handle_scores_clear_quarter(state, req)),
        _ => None,
    }
}
