use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("scoretrack.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            full_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weeks(
            id TEXT PRIMARY KEY,
            semester INTEGER NOT NULL,
            quarter INTEGER,
            number INTEGER NOT NULL,
            label TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weeks_semester ON weeks(semester, number)",
        [],
    )?;

    // Workspaces created before the quarter split stored only (semester,
    // number). Add and backfill so bucket filtering can rely on the column.
    ensure_weeks_quarter(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            week_id TEXT NOT NULL,
            attendance REAL,
            participation REAL,
            behavior REAL,
            homework REAL,
            quiz1 REAL,
            quiz2 REAL,
            quiz3 REAL,
            quiz4 REAL,
            chapter_test1_practical REAL,
            chapter_test2_practical REAL,
            quarter1_practical REAL,
            quarter1_theory REAL,
            quarter2_practical REAL,
            quarter2_theory REAL,
            updated_at TEXT,
            UNIQUE(student_id, week_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(week_id) REFERENCES weeks(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_scores_week ON student_scores(week_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_scores_student ON student_scores(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_weeks_quarter(conn: &Connection) -> anyhow::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(weeks)")?;
    let has_quarter = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .any(|name| name == "quarter");
    if !has_quarter {
        conn.execute("ALTER TABLE weeks ADD COLUMN quarter INTEGER", [])?;
    }
    conn.execute(
        "UPDATE weeks
         SET quarter = CASE WHEN number <= 9 THEN 1 ELSE 2 END
         WHERE quarter IS NULL OR quarter NOT IN (1, 2)",
        [],
    )?;
    Ok(())
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
