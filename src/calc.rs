use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

// Follow-up total: attendance (2.5) + participation (2.5) + behavior (5) + homework (5) = 15 max.
// Assessment: follow-up (15) + best quiz (5) + chapter test (10) = 30 max.
// Final: assessment (30) + quarter practical (10) + quarter theory (10) = 50 max.
pub const ATTENDANCE_MAX: f64 = 2.5;
pub const PARTICIPATION_MAX: f64 = 2.5;
pub const BEHAVIOR_MAX: f64 = 5.0;
pub const HOMEWORK_MAX: f64 = 5.0;
pub const QUIZ_MAX: f64 = 5.0;
pub const CHAPTER_TEST_MAX: f64 = 10.0;
pub const EXAM_PART_MAX: f64 = 10.0;

pub const FOLLOW_UP_MAX: f64 = 15.0;
pub const ASSESSMENT_PART_MAX: f64 = 15.0;
pub const ASSESSMENT_MAX: f64 = 30.0;
pub const EXAM_PAIR_MAX: f64 = 20.0;
pub const FINAL_MAX: f64 = 50.0;

pub const WEEKS_PER_QUARTER: u8 = 9;

/// One student's score fields for a single week. `None` means "not yet
/// entered", which is distinct from an entered 0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreRow {
    pub attendance: Option<f64>,
    pub participation: Option<f64>,
    pub behavior: Option<f64>,
    pub homework: Option<f64>,
    pub quiz1: Option<f64>,
    pub quiz2: Option<f64>,
    pub quiz3: Option<f64>,
    pub quiz4: Option<f64>,
    pub chapter_test1_practical: Option<f64>,
    pub chapter_test2_practical: Option<f64>,
    pub quarter1_practical: Option<f64>,
    pub quarter1_theory: Option<f64>,
    pub quarter2_practical: Option<f64>,
    pub quarter2_theory: Option<f64>,
}

/// Wire/storage names of the fourteen score fields, in column order.
pub const SCORE_FIELDS: [&str; 14] = [
    "attendance",
    "participation",
    "behavior",
    "homework",
    "quiz1",
    "quiz2",
    "quiz3",
    "quiz4",
    "chapter_test1_practical",
    "chapter_test2_practical",
    "quarter1_practical",
    "quarter1_theory",
    "quarter2_practical",
    "quarter2_theory",
];

impl ScoreRow {
    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "attendance" => self.attendance,
            "participation" => self.participation,
            "behavior" => self.behavior,
            "homework" => self.homework,
            "quiz1" => self.quiz1,
            "quiz2" => self.quiz2,
            "quiz3" => self.quiz3,
            "quiz4" => self.quiz4,
            "chapter_test1_practical" => self.chapter_test1_practical,
            "chapter_test2_practical" => self.chapter_test2_practical,
            "quarter1_practical" => self.quarter1_practical,
            "quarter1_theory" => self.quarter1_theory,
            "quarter2_practical" => self.quarter2_practical,
            "quarter2_theory" => self.quarter2_theory,
            _ => None,
        }
    }

    pub fn set(&mut self, field: &str, value: Option<f64>) {
        match field {
            "attendance" => self.attendance = value,
            "participation" => self.participation = value,
            "behavior" => self.behavior = value,
            "homework" => self.homework = value,
            "quiz1" => self.quiz1 = value,
            "quiz2" => self.quiz2 = value,
            "quiz3" => self.quiz3 = value,
            "quiz4" => self.quiz4 = value,
            "chapter_test1_practical" => self.chapter_test1_practical = value,
            "chapter_test2_practical" => self.chapter_test2_practical = value,
            "quarter1_practical" => self.quarter1_practical = value,
            "quarter1_theory" => self.quarter1_theory = value,
            "quarter2_practical" => self.quarter2_practical = value,
            "quarter2_theory" => self.quarter2_theory = value,
            _ => {}
        }
    }

    fn follow_up_fields(&self) -> [(Option<f64>, f64); 4] {
        [
            (self.attendance, ATTENDANCE_MAX),
            (self.participation, PARTICIPATION_MAX),
            (self.behavior, BEHAVIOR_MAX),
            (self.homework, HOMEWORK_MAX),
        ]
    }

    /// Capped attendance + participation + behavior + homework for one week,
    /// or `None` when all four are unentered.
    pub fn follow_up_total(&self) -> Option<f64> {
        let fields = self.follow_up_fields();
        if fields.iter().all(|(v, _)| v.is_none()) {
            return None;
        }
        let total: f64 = fields
            .iter()
            .map(|(v, max)| capped(*v, *max).unwrap_or(0.0))
            .sum();
        Some(total.min(FOLLOW_UP_MAX))
    }

    fn quarter_assessment_fields(&self, quarter: Quarter) -> [Option<f64>; 5] {
        match quarter {
            Quarter::First => [
                self.quiz1,
                self.quiz2,
                self.chapter_test1_practical,
                self.quarter1_practical,
                self.quarter1_theory,
            ],
            Quarter::Second => [
                self.quiz3,
                self.quiz4,
                self.chapter_test2_practical,
                self.quarter2_practical,
                self.quarter2_theory,
            ],
        }
    }

    fn has_meaningful_value(&self) -> bool {
        SCORE_FIELDS
            .iter()
            .any(|field| is_meaningful(self.get(field)))
    }
}

/// Per-student mapping from normalized week number (1-18) to that week's
/// scores. Built fresh per request; aggregation never mutates it.
pub type StudentScoreMap = BTreeMap<u8, ScoreRow>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quarter {
    First,
    Second,
}

impl Quarter {
    pub fn from_number(n: i64) -> Quarter {
        if n == 2 {
            Quarter::Second
        } else {
            Quarter::First
        }
    }

    pub fn number(self) -> i64 {
        match self {
            Quarter::First => 1,
            Quarter::Second => 2,
        }
    }

    pub fn week_range(self) -> RangeInclusive<u8> {
        match self {
            Quarter::First => 1..=9,
            Quarter::Second => 10..=18,
        }
    }

    /// Week carrying the quarter's quiz pair and chapter test.
    pub fn assessment_week(self) -> u8 {
        match self {
            Quarter::First => 4,
            Quarter::Second => 16,
        }
    }

    pub fn practical_exam_week(self) -> u8 {
        match self {
            Quarter::First => 9,
            Quarter::Second => 17,
        }
    }

    /// Ordered source weeks for the theory mark, highest priority first.
    /// Quarter 1 structurally ends at week 9, so a theory mark entered one
    /// week late lands on week 10; read that slot first, then week 9.
    pub fn theory_exam_weeks(self) -> &'static [u8] {
        match self {
            Quarter::First => &[10, 9],
            Quarter::Second => &[18],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    OnLevel,
    Approach,
    Below,
    NoData,
}

impl PerformanceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceLevel::OnLevel => "on_level",
            PerformanceLevel::Approach => "approach",
            PerformanceLevel::Below => "below",
            PerformanceLevel::NoData => "no_data",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PerformanceLevel::OnLevel => "On Level",
            PerformanceLevel::Approach => "Approach",
            PerformanceLevel::Below => "Below",
            PerformanceLevel::NoData => "No Data",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub on_level: f64,
    pub approach: f64,
}

pub const FOLLOW_UP_THRESHOLDS: Thresholds = Thresholds {
    on_level: 13.0,
    approach: 10.0,
};
pub const ASSESSMENT_THRESHOLDS: Thresholds = Thresholds {
    on_level: 25.0,
    approach: 20.0,
};
pub const FINAL_THRESHOLDS: Thresholds = Thresholds {
    on_level: 42.0,
    approach: 35.0,
};

pub fn classify(total: f64, thresholds: Thresholds) -> PerformanceLevel {
    if total >= thresholds.on_level {
        PerformanceLevel::OnLevel
    } else if total >= thresholds.approach {
        PerformanceLevel::Approach
    } else {
        PerformanceLevel::Below
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeResult {
    pub total: Option<f64>,
    pub level: PerformanceLevel,
}

impl CompositeResult {
    pub fn no_data() -> CompositeResult {
        CompositeResult {
            total: None,
            level: PerformanceLevel::NoData,
        }
    }

    pub fn scored(total: f64, thresholds: Thresholds) -> CompositeResult {
        CompositeResult {
            total: Some(total),
            level: classify(total, thresholds),
        }
    }
}

/// Assessment composite plus the follow-up component it was built on; the
/// Final composite collapses to that component when both exam marks are 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssessmentCombined {
    pub total: Option<f64>,
    pub students_total: Option<f64>,
    pub level: PerformanceLevel,
}

/// One quarter's assessment/exam field snapshot. Built from the quarter's
/// own disjoint field set (quiz1/quiz2/chapter_test1/quarter1_* vs
/// quiz3/quiz4/chapter_test2/quarter2_*), so the other quarter's marks can
/// never feed a composite.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuarterScores {
    pub quiz_first: Option<f64>,
    pub quiz_second: Option<f64>,
    pub chapter_test: Option<f64>,
    pub exam_practical: Option<f64>,
    pub exam_theory: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterTotals {
    pub quarter1_total: f64,
    pub quarter2_total: f64,
    pub semester_total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub weak_areas: Vec<&'static str>,
    pub strengths: Vec<&'static str>,
}

/// Coerce an arbitrary JSON value to an entered score. Null, NaN, blanks and
/// non-numeric text all normalize to "not entered" rather than erroring.
pub fn normalize_score(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

fn capped(value: Option<f64>, max: f64) -> Option<f64> {
    value.filter(|v| v.is_finite()).map(|v| v.clamp(0.0, max))
}

/// A value counts as "entered" only when it is non-null, non-NaN and
/// non-zero. An all-zero row is indistinguishable from an unentered one and
/// must classify as no_data, not below.
pub fn is_meaningful(value: Option<f64>) -> bool {
    matches!(value, Some(v) if v.is_finite() && v != 0.0)
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// True when any week in the quarter's range carries a meaningful mark in
/// the quarter's field set. Quarter 1 additionally consults the week-10
/// theory slot so a late-entered theory mark keeps the quarter classified.
pub fn has_meaningful_scores(map: &StudentScoreMap, quarter: Quarter) -> bool {
    for week in quarter.week_range() {
        let Some(row) = map.get(&week) else { continue };
        if row
            .follow_up_fields()
            .iter()
            .any(|(v, _)| is_meaningful(*v))
        {
            return true;
        }
        if row
            .quarter_assessment_fields(quarter)
            .iter()
            .any(|v| is_meaningful(*v))
        {
            return true;
        }
    }
    for &week in quarter.theory_exam_weeks() {
        let theory = map.get(&week).and_then(|row| match quarter {
            Quarter::First => row.quarter1_theory,
            Quarter::Second => row.quarter2_theory,
        });
        if is_meaningful(theory) {
            return true;
        }
    }
    false
}

/// True when any week carries a meaningful mark in any of the fourteen
/// fields.
pub fn has_any_meaningful(map: &StudentScoreMap) -> bool {
    map.values().any(|row| row.has_meaningful_value())
}

/// Sparse follow-up average over the quarter: weeks whose four follow-up
/// fields are all unentered are skipped entirely. `None` when no week in the
/// range carries follow-up data.
pub fn avg_follow_up_sparse(map: &StudentScoreMap, quarter: Quarter) -> Option<f64> {
    let mut totals: Vec<f64> = Vec::new();
    for week in quarter.week_range() {
        if let Some(total) = map.get(&week).and_then(|row| row.follow_up_total()) {
            totals.push(total);
        }
    }
    if totals.is_empty() {
        return None;
    }
    Some(round2(totals.iter().sum::<f64>() / totals.len() as f64))
}

/// Inclusive follow-up average: always divides by the full 9-week range, so
/// unentered weeks count as 0 and visibly drag the average down.
pub fn avg_follow_up_inclusive(map: &StudentScoreMap, quarter: Quarter) -> f64 {
    let sum: f64 = quarter
        .week_range()
        .map(|week| {
            map.get(&week)
                .and_then(|row| row.follow_up_total())
                .unwrap_or(0.0)
        })
        .sum();
    round2(sum / WEEKS_PER_QUARTER as f64)
}

/// Follow-up component of the Assessment/Final composites (max 15),
/// cumulative over the quarter's full week range.
pub fn students_total(map: &StudentScoreMap, quarter: Quarter) -> f64 {
    round2(avg_follow_up_inclusive(map, quarter).clamp(0.0, FOLLOW_UP_MAX))
}

/// Best of the quarter's quiz pair as entered on the designated assessment
/// week (4 or 16). `None` only when both slots are unentered there.
pub fn quiz_best_at_week(map: &StudentScoreMap, quarter: Quarter) -> Option<f64> {
    let row = map.get(&quarter.assessment_week())?;
    let (first, second) = match quarter {
        Quarter::First => (row.quiz1, row.quiz2),
        Quarter::Second => (row.quiz3, row.quiz4),
    };
    max_opt(capped(first, QUIZ_MAX), capped(second, QUIZ_MAX))
}

/// Chapter test mark on the designated assessment week.
pub fn chapter_test_at_week(map: &StudentScoreMap, quarter: Quarter) -> Option<f64> {
    let row = map.get(&quarter.assessment_week())?;
    let value = match quarter {
        Quarter::First => row.chapter_test1_practical,
        Quarter::Second => row.chapter_test2_practical,
    };
    capped(value, CHAPTER_TEST_MAX)
}

/// (practical, theory) read from the designated exam weeks, honoring the
/// quarter-1 theory fallback chain.
pub fn exam_reads(map: &StudentScoreMap, quarter: Quarter) -> (Option<f64>, Option<f64>) {
    let practical = map
        .get(&quarter.practical_exam_week())
        .and_then(|row| match quarter {
            Quarter::First => row.quarter1_practical,
            Quarter::Second => row.quarter2_practical,
        });
    let mut theory = None;
    for &week in quarter.theory_exam_weeks() {
        theory = map.get(&week).and_then(|row| match quarter {
            Quarter::First => row.quarter1_theory,
            Quarter::Second => row.quarter2_theory,
        });
        if theory.is_some() {
            break;
        }
    }
    (
        capped(practical, EXAM_PART_MAX),
        capped(theory, EXAM_PART_MAX),
    )
}

/// Effective quarter snapshot: quizzes and chapter test take the best value
/// recorded on any week of the quarter (marks sometimes get entered on the
/// wrong week), exams come from their designated weeks.
pub fn effective_scores(map: &StudentScoreMap, quarter: Quarter) -> QuarterScores {
    let mut quiz_first: Option<f64> = None;
    let mut quiz_second: Option<f64> = None;
    let mut chapter_test: Option<f64> = None;
    for week in quarter.week_range() {
        let Some(row) = map.get(&week) else { continue };
        let (first, second, chapter) = match quarter {
            Quarter::First => (row.quiz1, row.quiz2, row.chapter_test1_practical),
            Quarter::Second => (row.quiz3, row.quiz4, row.chapter_test2_practical),
        };
        quiz_first = max_opt(quiz_first, capped(first, QUIZ_MAX));
        quiz_second = max_opt(quiz_second, capped(second, QUIZ_MAX));
        chapter_test = max_opt(chapter_test, capped(chapter, CHAPTER_TEST_MAX));
    }
    let (exam_practical, exam_theory) = exam_reads(map, quarter);
    QuarterScores {
        quiz_first,
        quiz_second,
        chapter_test,
        exam_practical,
        exam_theory,
    }
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

/// Inclusive (avg quiz, avg chapter) over the quarter's full 9 weeks;
/// unentered weeks count as 0.
pub fn inclusive_quiz_chapter(map: &StudentScoreMap, quarter: Quarter) -> (f64, f64) {
    let mut quiz_sum = 0.0;
    let mut chapter_sum = 0.0;
    for week in quarter.week_range() {
        let row = map.get(&week).copied().unwrap_or_default();
        let (first, second, chapter) = match quarter {
            Quarter::First => (row.quiz1, row.quiz2, row.chapter_test1_practical),
            Quarter::Second => (row.quiz3, row.quiz4, row.chapter_test2_practical),
        };
        let best = capped(first, QUIZ_MAX)
            .unwrap_or(0.0)
            .max(capped(second, QUIZ_MAX).unwrap_or(0.0));
        quiz_sum += best;
        chapter_sum += capped(chapter, CHAPTER_TEST_MAX).unwrap_or(0.0);
    }
    let n = WEEKS_PER_QUARTER as f64;
    (round2(quiz_sum / n), round2(chapter_sum / n))
}

/// Inclusive (avg practical, avg theory) over the quarter's full 9 weeks.
pub fn inclusive_exams(map: &StudentScoreMap, quarter: Quarter) -> (f64, f64) {
    let mut practical_sum = 0.0;
    let mut theory_sum = 0.0;
    for week in quarter.week_range() {
        let row = map.get(&week).copied().unwrap_or_default();
        let (practical, theory) = match quarter {
            Quarter::First => (row.quarter1_practical, row.quarter1_theory),
            Quarter::Second => (row.quarter2_practical, row.quarter2_theory),
        };
        practical_sum += capped(practical, EXAM_PART_MAX).unwrap_or(0.0);
        theory_sum += capped(theory, EXAM_PART_MAX).unwrap_or(0.0);
    }
    let n = WEEKS_PER_QUARTER as f64;
    (round2(practical_sum / n), round2(theory_sum / n))
}

/// Legacy per-week view: the follow-up fields of a single week against the
/// 15-point scale.
pub fn compute_performance(row: &ScoreRow) -> CompositeResult {
    if !row
        .follow_up_fields()
        .iter()
        .any(|(v, _)| is_meaningful(*v))
    {
        return CompositeResult::no_data();
    }
    let total = row.follow_up_total().unwrap_or(0.0);
    CompositeResult::scored(
        round2(total.clamp(0.0, FOLLOW_UP_MAX)),
        FOLLOW_UP_THRESHOLDS,
    )
}

/// Assessment composite from pre-resolved parts. `has_any` is the
/// meaningful-score gate computed over the quarter's whole range.
pub fn assessment_from_parts(
    scores: &QuarterScores,
    students_part: f64,
    has_any: bool,
) -> AssessmentCombined {
    if !has_any {
        return AssessmentCombined {
            total: None,
            students_total: None,
            level: PerformanceLevel::NoData,
        };
    }
    let quiz = capped(scores.quiz_first, QUIZ_MAX)
        .unwrap_or(0.0)
        .max(capped(scores.quiz_second, QUIZ_MAX).unwrap_or(0.0));
    let chapter = capped(scores.chapter_test, CHAPTER_TEST_MAX).unwrap_or(0.0);
    let assessment_part = round2((quiz + chapter).clamp(0.0, ASSESSMENT_PART_MAX));
    let students_part = round2(students_part.clamp(0.0, FOLLOW_UP_MAX));
    let combined = round2((students_part + assessment_part).min(ASSESSMENT_MAX));
    AssessmentCombined {
        total: Some(combined),
        students_total: Some(students_part),
        level: classify(combined, ASSESSMENT_THRESHOLDS),
    }
}

/// Assessment composite (max 30) for one quarter of the map.
pub fn compute_assessment_combined(map: &StudentScoreMap, quarter: Quarter) -> AssessmentCombined {
    assessment_from_parts(
        &effective_scores(map, quarter),
        students_total(map, quarter),
        has_meaningful_scores(map, quarter),
    )
}

/// Final composite from pre-resolved parts. When both exam marks sum to
/// exactly 0 the composite collapses to the follow-up component alone, so a
/// quarter whose exams are not yet entered reads as 15-scale progress rather
/// than a near-zero mark on the 50-point scale.
pub fn final_from_parts(
    scores: &QuarterScores,
    students_part: f64,
    has_any: bool,
) -> CompositeResult {
    if !has_any {
        return CompositeResult::no_data();
    }
    let assessment = assessment_from_parts(scores, students_part, true);
    let practical = capped(scores.exam_practical, EXAM_PART_MAX).unwrap_or(0.0);
    let theory = capped(scores.exam_theory, EXAM_PART_MAX).unwrap_or(0.0);
    let exam_sum = round2((practical + theory).clamp(0.0, EXAM_PAIR_MAX));
    let combined = if exam_sum == 0.0 {
        round2(assessment.students_total.unwrap_or(0.0).min(FINAL_MAX))
    } else {
        round2((assessment.total.unwrap_or(0.0) + exam_sum).min(FINAL_MAX))
    };
    CompositeResult::scored(combined, FINAL_THRESHOLDS)
}

/// Final-exam composite (max 50) for one quarter of the map.
pub fn compute_final_exams_combined(map: &StudentScoreMap, quarter: Quarter) -> CompositeResult {
    final_from_parts(
        &effective_scores(map, quarter),
        students_total(map, quarter),
        has_meaningful_scores(map, quarter),
    )
}

/// Cumulative quarter total (max 50) for dashboards: every component is an
/// inclusive average over the full week range, so a mostly-empty quarter
/// drags the total down instead of being excluded.
pub fn compute_cumulative_quarter(map: &StudentScoreMap, quarter: Quarter) -> CompositeResult {
    if !has_meaningful_scores(map, quarter) {
        return CompositeResult::no_data();
    }
    let students_part = students_total(map, quarter);
    let (quiz, chapter) = inclusive_quiz_chapter(map, quarter);
    let (practical, theory) = inclusive_exams(map, quarter);
    let combined = round2((students_part + quiz + chapter + practical + theory).min(FINAL_MAX));
    CompositeResult::scored(combined, FINAL_THRESHOLDS)
}

fn avg_field_sparse<F>(map: &StudentScoreMap, quarter: Quarter, read: F) -> f64
where
    F: Fn(&ScoreRow) -> Option<f64>,
{
    let values: Vec<f64> = quarter
        .week_range()
        .filter_map(|week| map.get(&week).and_then(&read))
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn quarter_total(map: &StudentScoreMap, quarter: Quarter) -> f64 {
    let quiz = quiz_best_at_week(map, quarter).unwrap_or(0.0);
    let chapter = chapter_test_at_week(map, quarter).unwrap_or(0.0);
    let (practical, theory) = exam_reads(map, quarter);
    let total: f64 = quiz
        + chapter
        + practical.unwrap_or(0.0)
        + theory.unwrap_or(0.0)
        + avg_field_sparse(map, quarter, |row| capped(row.attendance, ATTENDANCE_MAX))
        + avg_field_sparse(map, quarter, |row| {
            capped(row.participation, PARTICIPATION_MAX)
        })
        + avg_field_sparse(map, quarter, |row| capped(row.behavior, BEHAVIOR_MAX))
        + avg_field_sparse(map, quarter, |row| capped(row.homework, HOMEWORK_MAX));
    round2(total)
}

/// Legacy dashboard totals over a full-year map. `semester_total` is the sum
/// of the two already-rounded quarter totals, so the identity
/// `semester == q1 + q2` holds exactly at 2 decimals.
pub fn compute_quarter_totals(map: &StudentScoreMap) -> QuarterTotals {
    let quarter1_total = quarter_total(map, Quarter::First);
    let quarter2_total = quarter_total(map, Quarter::Second);
    QuarterTotals {
        quarter1_total,
        quarter2_total,
        semester_total: round2(quarter1_total + quarter2_total),
    }
}

const INSIGHT_FOLLOW_UP_DIMENSIONS: [(&str, f64); 4] = [
    ("Attendance", ATTENDANCE_MAX),
    ("Participation", PARTICIPATION_MAX),
    ("Behavior", BEHAVIOR_MAX),
    ("Homework", HOMEWORK_MAX),
];

fn insight_follow_up_value(map: &StudentScoreMap, field: &str, weeks_q2: bool) -> Option<f64> {
    // Keys split at <=10 / >=11 so a quarter-1 theory week (10) stays with
    // quarter 1.
    let values: Vec<f64> = map
        .iter()
        .filter(|(week, _)| if weeks_q2 { **week >= 11 } else { **week <= 10 })
        .filter_map(|(_, row)| row.get(field).filter(|v| v.is_finite()))
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn push_insight(insights: &mut Insights, label: &'static str, value: Option<f64>, max: f64) {
    match value {
        None => insights.weak_areas.push(label),
        Some(v) if v < 0.60 * max => insights.weak_areas.push(label),
        Some(v) if v >= 0.85 * max => insights.strengths.push(label),
        Some(_) => {}
    }
}

/// Weak areas / strengths across seven dimensions. Each dimension compares
/// the most recent quarter with data (quarter 2 takes precedence) against
/// fixed fractions of its maximum: < 60% or absent is weak, >= 85% is a
/// strength, anything between appears in neither list.
pub fn compute_student_insights(map: &StudentScoreMap) -> Insights {
    let mut insights = Insights::default();

    for (label, max) in INSIGHT_FOLLOW_UP_DIMENSIONS {
        let field = label.to_ascii_lowercase();
        let q2 = insight_follow_up_value(map, &field, true);
        let q1 = insight_follow_up_value(map, &field, false);
        push_insight(&mut insights, label, q2.or(q1), max);
    }

    let quiz =
        quiz_best_at_week(map, Quarter::Second).or_else(|| quiz_best_at_week(map, Quarter::First));
    push_insight(&mut insights, "Quizzes", quiz, QUIZ_MAX);

    let chapter = chapter_test_at_week(map, Quarter::Second)
        .or_else(|| chapter_test_at_week(map, Quarter::First));
    push_insight(&mut insights, "Chapter tests", chapter, CHAPTER_TEST_MAX);

    let (q1_practical, q1_theory) = exam_reads(map, Quarter::First);
    let (q2_practical, q2_theory) = exam_reads(map, Quarter::Second);
    let exam = if q2_practical.is_some() || q2_theory.is_some() {
        Some(q2_practical.unwrap_or(0.0) + q2_theory.unwrap_or(0.0))
    } else if q1_practical.is_some() || q1_theory.is_some() {
        Some(q1_practical.unwrap_or(0.0) + q1_theory.unwrap_or(0.0))
    } else {
        None
    };
    push_insight(&mut insights, "Quarter exams", exam, EXAM_PAIR_MAX);

    insights
}
