use super::error::err;
use super::types::{AppState, Request};
use rusqlite::Connection;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn opt_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Wire (camelCase) name per score column, in column order.
pub const SCORE_FIELD_WIRE: [(&str, &str); 14] = [
    ("attendance", "attendance"),
    ("participation", "participation"),
    ("behavior", "behavior"),
    ("homework", "homework"),
    ("quiz1", "quiz1"),
    ("quiz2", "quiz2"),
    ("quiz3", "quiz3"),
    ("quiz4", "quiz4"),
    ("chapterTest1Practical", "chapter_test1_practical"),
    ("chapterTest2Practical", "chapter_test2_practical"),
    ("quarter1Practical", "quarter1_practical"),
    ("quarter1Theory", "quarter1_theory"),
    ("quarter2Practical", "quarter2_practical"),
    ("quarter2Theory", "quarter2_theory"),
];

/// Grade and section from a class name like "6A" or "Grade 7 B".
pub fn parse_class_name(name: &str) -> (Option<i64>, Option<char>) {
    let chars: Vec<char> = name.trim().chars().collect();
    let mut i = 0;
    while i < chars.len() && !chars[i].is_ascii_digit() {
        i += 1;
    }
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if start == i {
        return (None, None);
    }
    let grade = chars[start..i].iter().collect::<String>().parse::<i64>().ok();
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    let section = chars
        .get(i)
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase());
    (grade, section)
}

/// Sort key so 6A comes before 6B and 7A; unparseable names sort last.
pub fn class_sort_key(name: &str) -> (i64, char) {
    let (grade, section) = parse_class_name(name);
    (grade.unwrap_or(999), section.unwrap_or('Z'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_parse_grade_and_section() {
        assert_eq!(parse_class_name("6A"), (Some(6), Some('A')));
        assert_eq!(parse_class_name("Grade 7 b"), (Some(7), Some('B')));
        assert_eq!(parse_class_name("12C"), (Some(12), Some('C')));
        assert_eq!(parse_class_name("Art Club"), (None, None));
    }

    #[test]
    fn sort_key_orders_by_grade_then_section() {
        let mut names = vec!["7A", "6B", "Art Club", "6A"];
        names.sort_by_key(|n| class_sort_key(n));
        assert_eq!(names, vec!["6A", "6B", "7A", "Art Club"]);
    }
}
