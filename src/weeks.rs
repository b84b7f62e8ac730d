use crate::calc::{ScoreRow, StudentScoreMap, SCORE_FIELDS};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::collections::HashMap;

/// A persisted academic week. `quarter` is nullable because workspaces
/// predating the quarter split only stored (semester, number).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Week {
    pub id: String,
    pub semester: i64,
    pub quarter: Option<i64>,
    pub number: i64,
    pub label: String,
    pub created_at: Option<String>,
}

/// Quarter for a week row, inferring from the sequence number when the
/// stored quarter is missing or out of range: numbers 1-9 are quarter 1,
/// everything above is quarter 2.
pub fn infer_quarter(week: &Week) -> i64 {
    match week.quarter {
        Some(q) if q == 1 || q == 2 => q,
        _ => {
            if week.number <= 9 {
                1
            } else {
                2
            }
        }
    }
}

/// The weeks of one (semester, quarter) bucket. Prefers rows whose stored
/// quarter matches; when that yields nothing (legacy rows without the
/// column) falls back to the semester's weeks filtered by inferred quarter.
/// Never returns another bucket's weeks.
pub fn bucket_weeks<'a>(all: &'a [Week], semester: i64, quarter: i64) -> Vec<&'a Week> {
    let stored: Vec<&Week> = all
        .iter()
        .filter(|w| w.semester == semester && w.quarter == Some(quarter))
        .collect();
    if !stored.is_empty() {
        return stored;
    }
    all.iter()
        .filter(|w| w.semester == semester && infer_quarter(w) == quarter)
        .collect()
}

/// Slot in the merged full-year numbering: semester 1 keeps 1-9, a
/// semester-2 week N maps to 9+N, so the two semesters' quarters never
/// collide in one map.
pub fn normalized_week_number(week: &Week) -> u8 {
    let number = week.number.clamp(1, 18);
    if week.semester == 2 && number <= 9 {
        (9 + number) as u8
    } else {
        number as u8
    }
}

/// One persisted (student, week) score row.
#[derive(Debug, Clone)]
pub struct ScoreRecord {
    pub student_id: String,
    pub week_id: String,
    pub row: ScoreRow,
}

/// Group score records per student, keyed by each record's normalized week
/// number. Records whose week is not in `week_numbers` are dropped; that is
/// what keeps the four (semester, quarter) buckets separated.
pub fn build_score_map(
    records: &[ScoreRecord],
    week_numbers: &HashMap<String, u8>,
) -> HashMap<String, StudentScoreMap> {
    let mut by_student: HashMap<String, StudentScoreMap> = HashMap::new();
    for record in records {
        let Some(&number) = week_numbers.get(&record.week_id) else {
            continue;
        };
        by_student
            .entry(record.student_id.clone())
            .or_default()
            .insert(number, record.row);
    }
    by_student
}

pub fn load_weeks(conn: &Connection) -> rusqlite::Result<Vec<Week>> {
    let mut stmt = conn.prepare(
        "SELECT id, semester, quarter, number, label, created_at
         FROM weeks
         ORDER BY semester, number",
    )?;
    stmt.query_map([], |r| {
        Ok(Week {
            id: r.get(0)?,
            semester: r.get(1)?,
            quarter: r.get(2)?,
            number: r.get(3)?,
            label: r.get(4)?,
            created_at: r.get(5)?,
        })
    })
    .and_then(|it| it.collect())
}

fn score_row_from_sql(r: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<ScoreRow> {
    let mut row = ScoreRow::default();
    for (i, field) in SCORE_FIELDS.iter().enumerate() {
        row.set(field, r.get(offset + i)?);
    }
    Ok(row)
}

fn fetch_scores(
    conn: &Connection,
    week_ids: &[String],
    student_ids: &[String],
) -> rusqlite::Result<Vec<ScoreRecord>> {
    if week_ids.is_empty() || student_ids.is_empty() {
        return Ok(Vec::new());
    }
    let week_placeholders = std::iter::repeat_n("?", week_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let student_placeholders = std::iter::repeat_n("?", student_ids.len())
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT student_id, week_id, {}
         FROM student_scores
         WHERE week_id IN ({}) AND student_id IN ({})",
        SCORE_FIELDS.join(", "),
        week_placeholders,
        student_placeholders
    );
    let mut bind_values: Vec<Value> = Vec::with_capacity(week_ids.len() + student_ids.len());
    for id in week_ids {
        bind_values.push(Value::Text(id.clone()));
    }
    for id in student_ids {
        bind_values.push(Value::Text(id.clone()));
    }
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map(params_from_iter(bind_values), |r| {
        Ok(ScoreRecord {
            student_id: r.get(0)?,
            week_id: r.get(1)?,
            row: score_row_from_sql(r, 2)?,
        })
    })
    .and_then(|it| it.collect())
}

/// Score maps for one (semester, quarter) bucket only. Weeks keep their raw
/// sequence numbers (1-9 or 10-18), so quarter-range aggregation applies
/// directly.
pub fn quarter_score_map(
    conn: &Connection,
    student_ids: &[String],
    semester: i64,
    quarter: i64,
) -> rusqlite::Result<HashMap<String, StudentScoreMap>> {
    if student_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let all_weeks = load_weeks(conn)?;
    let bucket = bucket_weeks(&all_weeks, semester, quarter);
    let week_numbers: HashMap<String, u8> = bucket
        .iter()
        .map(|w| (w.id.clone(), w.number.clamp(1, 18) as u8))
        .collect();
    let week_ids: Vec<String> = bucket.iter().map(|w| w.id.clone()).collect();
    let records = fetch_scores(conn, &week_ids, student_ids)?;
    Ok(build_score_map(&records, &week_numbers))
}

/// Score maps over both semesters merged into the normalized 1-18 numbering,
/// for full-year consumers.
pub fn full_year_score_map(
    conn: &Connection,
    student_ids: &[String],
) -> rusqlite::Result<HashMap<String, StudentScoreMap>> {
    if student_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let all_weeks = load_weeks(conn)?;
    let week_numbers: HashMap<String, u8> = all_weeks
        .iter()
        .map(|w| (w.id.clone(), normalized_week_number(w)))
        .collect();
    let week_ids: Vec<String> = all_weeks.iter().map(|w| w.id.clone()).collect();
    let records = fetch_scores(conn, &week_ids, student_ids)?;
    Ok(build_score_map(&records, &week_numbers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week(id: &str, semester: i64, quarter: Option<i64>, number: i64) -> Week {
        Week {
            id: id.to_string(),
            semester,
            quarter,
            number,
            label: format!("Week {number}"),
            created_at: None,
        }
    }

    #[test]
    fn infer_quarter_prefers_stored_value() {
        assert_eq!(infer_quarter(&week("a", 1, Some(2), 3)), 2);
        assert_eq!(infer_quarter(&week("a", 1, None, 3)), 1);
        assert_eq!(infer_quarter(&week("a", 1, None, 12)), 2);
        assert_eq!(infer_quarter(&week("a", 1, Some(7), 12)), 2);
    }

    #[test]
    fn bucket_weeks_never_leak_between_quarters() {
        let all = vec![
            week("a", 1, Some(1), 1),
            week("b", 1, Some(1), 2),
            week("c", 1, Some(2), 10),
            week("d", 2, Some(1), 1),
        ];
        let s1q1 = bucket_weeks(&all, 1, 1);
        assert_eq!(
            s1q1.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(),
            ["a", "b"]
        );
        let s1q2 = bucket_weeks(&all, 1, 2);
        assert_eq!(
            s1q2.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(),
            ["c"]
        );
        assert_eq!(bucket_weeks(&all, 2, 2).len(), 0);
    }

    #[test]
    fn bucket_weeks_fall_back_to_inferred_quarter() {
        let legacy = vec![
            week("a", 1, None, 3),
            week("b", 1, None, 11),
            week("c", 2, None, 4),
        ];
        let s1q1 = bucket_weeks(&legacy, 1, 1);
        assert_eq!(
            s1q1.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(),
            ["a"]
        );
        let s1q2 = bucket_weeks(&legacy, 1, 2);
        assert_eq!(
            s1q2.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(),
            ["b"]
        );
    }

    #[test]
    fn normalized_numbers_shift_second_semester() {
        assert_eq!(normalized_week_number(&week("a", 1, Some(1), 4)), 4);
        assert_eq!(normalized_week_number(&week("a", 2, Some(1), 1)), 10);
        assert_eq!(normalized_week_number(&week("a", 2, Some(1), 9)), 18);
        // Already-normalized second-semester numbering passes through.
        assert_eq!(normalized_week_number(&week("a", 2, Some(2), 12)), 12);
    }

    #[test]
    fn build_score_map_drops_records_outside_the_bucket() {
        let mut row = ScoreRow::default();
        row.quiz1 = Some(4.0);
        let records = vec![
            ScoreRecord {
                student_id: "s1".into(),
                week_id: "w4".into(),
                row,
            },
            ScoreRecord {
                student_id: "s1".into(),
                week_id: "other-bucket".into(),
                row,
            },
        ];
        let week_numbers: HashMap<String, u8> = [("w4".to_string(), 4u8)].into_iter().collect();
        let maps = build_score_map(&records, &week_numbers);
        let map = maps.get("s1").expect("student map");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&4).and_then(|r| r.quiz1), Some(4.0));
    }
}
