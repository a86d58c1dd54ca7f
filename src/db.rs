use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            semester_label TEXT NOT NULL DEFAULT '',
            target_grade INTEGER NOT NULL DEFAULT 4,
            collapsed INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            UNIQUE(code, semester_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_sort ON courses(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_items(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            idx INTEGER NOT NULL,
            label TEXT NOT NULL,
            weight TEXT NOT NULL,
            score TEXT NOT NULL DEFAULT '',
            enabled INTEGER NOT NULL DEFAULT 1,
            collapsed INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, idx)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_items_course ON assessment_items(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_items_course_idx
         ON assessment_items(course_id, idx)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots(
            course_id TEXT PRIMARY KEY,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before target grades and card collapse state were
    // persisted may lack these columns. Add them in place.
    ensure_courses_target_grade(&conn)?;
    ensure_courses_collapsed(&conn)?;
    ensure_items_collapsed(&conn)?;

    Ok(conn)
}

fn ensure_courses_target_grade(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "courses", "target_grade")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE courses ADD COLUMN target_grade INTEGER NOT NULL DEFAULT 4",
        [],
    )?;
    Ok(())
}

fn ensure_courses_collapsed(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "courses", "collapsed")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE courses ADD COLUMN collapsed INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn ensure_items_collapsed(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "assessment_items", "collapsed")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE assessment_items ADD COLUMN collapsed INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
