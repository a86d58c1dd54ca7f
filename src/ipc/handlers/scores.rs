use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::calc;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::load_course_items;
use crate::ipc::types::{AppState, Request};
use crate::snapshot::{CourseSnapshot, ItemSnapshot};

fn build_snapshot(conn: &Connection, course_id: &str) -> Result<CourseSnapshot, HandlerErr> {
    let header: Option<(String, String, String, i64, bool)> = conn
        .query_row(
            "SELECT code, semester_id, semester_label, target_grade, collapsed
             FROM courses WHERE id = ?",
            [course_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get::<_, i64>(4)? != 0,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((code, semester_id, semester_label, target_grade, collapsed)) = header else {
        return Err(HandlerErr::with_details(
            "not_found",
            "course not found",
            json!({ "courseId": course_id }),
        ));
    };

    let mut stmt = conn
        .prepare(
            "SELECT idx, score, enabled, collapsed
             FROM assessment_items
             WHERE course_id = ?
             ORDER BY idx",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let mut results: BTreeMap<String, ItemSnapshot> = BTreeMap::new();
    let rows = stmt
        .query_map([course_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? != 0,
                row.get::<_, i64>(3)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    for (idx, score, enabled, item_collapsed) in rows {
        results.insert(
            idx.to_string(),
            ItemSnapshot {
                score,
                disabled: !enabled,
                collapsed: item_collapsed,
            },
        );
    }

    let updated_at: Option<String> = conn
        .query_row(
            "SELECT updated_at FROM snapshots WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(CourseSnapshot {
        course_code: code,
        semester_id,
        semester_label,
        results,
        target_grade,
        collapsed,
        updated_at,
    })
}

fn handle_scores_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    let exists: Option<String> = match conn
        .query_row("SELECT id FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(
            &req.id,
            "not_found",
            "course not found",
            Some(json!({ "courseId": course_id })),
        );
    }

    let Some(raw_scores) = req.params.get("scores") else {
        return err(&req.id, "bad_params", "missing scores map", None);
    };
    let entries: BTreeMap<String, ItemSnapshot> =
        match serde_json::from_value(raw_scores.clone()) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    "malformed scores map",
                    Some(json!({ "parse": e.to_string() })),
                )
            }
        };

    state.save.begin_save();

    let mut applied = 0_usize;
    for (idx_key, entry) in &entries {
        let Ok(idx) = idx_key.parse::<i64>() else {
            continue;
        };
        // Stale indexes (items removed since the snapshot was taken) are
        // dropped, same as on restore.
        let updated = conn.execute(
            "UPDATE assessment_items SET score = ?, enabled = ?, collapsed = ?
             WHERE course_id = ? AND idx = ?",
            (
                &entry.score,
                !entry.disabled as i64,
                entry.collapsed as i64,
                course_id,
                idx,
            ),
        );
        match updated {
            Ok(n) => applied += n,
            Err(e) => {
                state.save.mark_dirty();
                return err(&req.id, "db_insert_failed", e.to_string(), None);
            }
        }
    }

    if let Some(target_grade) = req.params.get("targetGrade").and_then(|v| v.as_i64()) {
        if let Err(e) = conn.execute(
            "UPDATE courses SET target_grade = ? WHERE id = ?",
            (target_grade, course_id),
        ) {
            state.save.mark_dirty();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }
    if let Some(collapsed) = req.params.get("collapsed").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE courses SET collapsed = ? WHERE id = ?",
            (collapsed as i64, course_id),
        ) {
            state.save.mark_dirty();
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    let updated_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO snapshots(course_id, updated_at) VALUES(?, ?)
         ON CONFLICT(course_id) DO UPDATE SET updated_at = excluded.updated_at",
        (course_id, &updated_at),
    ) {
        state.save.mark_dirty();
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    state.save.mark_clean();
    log::debug!("snapshot saved for course {} ({} items)", course_id, applied);
    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "applied": applied,
            "updatedAt": updated_at,
            "saveState": state.save.state().as_str()
        }),
    )
}

fn handle_scores_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    if let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_str()) {
        let snapshot = match build_snapshot(conn, course_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        return ok(&req.id, json!({ "snapshot": snapshot }));
    }

    let mut stmt = match conn.prepare("SELECT id FROM courses ORDER BY sort_order") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let course_ids: Vec<String> = match stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut scores = serde_json::Map::new();
    for course_id in course_ids {
        let snapshot = match build_snapshot(conn, &course_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        scores.insert(snapshot.course_code.clone(), json!(snapshot));
    }

    ok(&req.id, json!({ "scores": scores }))
}

// Restore path: overlay a previously exported snapshot onto the stored item
// list. The workspace is dirty afterwards until the next scores.save stamps
// a fresh snapshot.
fn handle_scores_apply(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    let Some(raw) = req.params.get("snapshot") else {
        return err(&req.id, "bad_params", "missing snapshot", None);
    };
    let snapshot: CourseSnapshot = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                "malformed snapshot",
                Some(json!({ "parse": e.to_string() })),
            )
        }
    };

    let exists: Option<String> = match conn
        .query_row("SELECT id FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(
            &req.id,
            "not_found",
            "course not found",
            Some(json!({ "courseId": course_id })),
        );
    }

    let mut items = match load_course_items(conn, course_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    snapshot.apply_to_items(&mut items);

    for item in &items {
        if let Err(e) = conn.execute(
            "UPDATE assessment_items SET score = ?, enabled = ?
             WHERE course_id = ? AND idx = ?",
            (&item.score, item.enabled as i64, course_id, item.idx),
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }
    for (idx_key, entry) in &snapshot.results {
        let Ok(idx) = idx_key.parse::<i64>() else {
            continue;
        };
        if let Err(e) = conn.execute(
            "UPDATE assessment_items SET collapsed = ? WHERE course_id = ? AND idx = ?",
            (entry.collapsed as i64, course_id, idx),
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }
    if let Err(e) = conn.execute(
        "UPDATE courses SET target_grade = ?, collapsed = ? WHERE id = ?",
        (snapshot.target_grade, snapshot.collapsed as i64, course_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    state.save.mark_dirty();
    let totals = calc::calculate_total_score(&items);
    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "applied": snapshot.results.len(),
            "totalScore": totals.score,
            "saveState": state.save.state().as_str()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.save" => Some(handle_scores_save(state, req)),
        "scores.get" => Some(handle_scores_get(state, req)),
        "scores.apply" => Some(handle_scores_apply(state, req)),
        _ => None,
    }
}
