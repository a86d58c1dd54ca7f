use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::calc;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::str_param;
use crate::ipc::types::{AppState, Request};

const COURSE_MAX_ITEMS: usize = 64;

fn resolve_course_id(conn: &Connection, req: &Request) -> Result<String, HandlerErr> {
    let course_id = req
        .params
        .get("courseId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing courseId"))?;
    let found: Option<String> = conn
        .query_row("SELECT id FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    found.ok_or_else(|| {
        HandlerErr::with_details("not_found", "course not found", json!({ "courseId": course_id }))
    })
}

fn course_item_rows(conn: &Connection, course_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT idx, label, weight, score, enabled, collapsed
             FROM assessment_items
             WHERE course_id = ?
             ORDER BY idx",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([course_id], |row| {
            let weight: String = row.get(2)?;
            Ok(json!({
                "idx": row.get::<_, i64>(0)?,
                "label": row.get::<_, String>(1)?,
                "weight": weight.clone(),
                "score": row.get::<_, String>(3)?,
                "enabled": row.get::<_, i64>(4)? != 0,
                "collapsed": row.get::<_, i64>(5)? != 0,
                "validWeight": calc::parse_weight(weight.trim()).is_some(),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(rows)
}

fn handle_courses_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match str_param(req, "code") {
        Ok(v) if !v.trim().is_empty() => v.trim().to_uppercase(),
        _ => return err(&req.id, "bad_params", "missing code", None),
    };
    let semester_id = match str_param(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let semester_label = req
        .params
        .get("semesterLabel")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let target_grade = req
        .params
        .get("targetGrade")
        .and_then(|v| v.as_i64())
        .unwrap_or(4);
    let Some(items) = req.params.get("items").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing items[]", None);
    };
    if items.len() > COURSE_MAX_ITEMS {
        return err(
            &req.id,
            "bad_params",
            "too many assessment items",
            Some(json!({ "count": items.len(), "max": COURSE_MAX_ITEMS })),
        );
    }

    let duplicate: Option<String> = match conn
        .query_row(
            "SELECT id FROM courses WHERE code = ? AND semester_id = ?",
            (&code, &semester_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if duplicate.is_some() {
        return err(
            &req.id,
            "already_exists",
            "course already tracked for this semester",
            Some(json!({ "code": code, "semesterId": semester_id })),
        );
    }

    let sort_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM courses",
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(id, code, semester_id, semester_label, target_grade, collapsed, sort_order)
         VALUES(?, ?, ?, ?, ?, 0, ?)",
        (&course_id, &code, &semester_id, &semester_label, target_grade, sort_order),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    for (i, raw) in items.iter().enumerate() {
        let label = raw
            .get("label")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .unwrap_or_else(|| format!("Assessment {}", i + 1));
        let weight = raw
            .get("weight")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        // Rows with no usable weight start disabled, matching the historical
        // onStart behavior for unweighted or zero-weight components.
        let enabled = calc::parse_weight(weight.trim())
            .map(|w| w > 0.0)
            .unwrap_or(false);
        let item_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO assessment_items(id, course_id, idx, label, weight, score, enabled, collapsed)
             VALUES(?, ?, ?, ?, ?, '', ?, 0)",
            (&item_id, &course_id, i as i64, &label, &weight, enabled as i64),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "assessment_items", "idx": i })),
            );
        }
    }

    state.save.mark_dirty();
    let item_rows = match course_item_rows(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "code": code,
            "semesterId": semester_id,
            "items": item_rows
        }),
    )
}

fn handle_courses_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match resolve_course_id(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    for sql in [
        "DELETE FROM snapshots WHERE course_id = ?",
        "DELETE FROM assessment_items WHERE course_id = ?",
        "DELETE FROM courses WHERE id = ?",
    ] {
        if let Err(e) = conn.execute(sql, [&course_id]) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
    }

    state.save.mark_dirty();
    ok(&req.id, json!({ "removed": course_id }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, code, semester_id, semester_label, target_grade, collapsed
         FROM courses
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let courses: Vec<(String, String, String, String, i64, bool)> = match stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get::<_, i64>(5)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut out = Vec::with_capacity(courses.len());
    for (course_id, code, semester_id, semester_label, target_grade, collapsed) in courses {
        let engine_items = match crate::ipc::helpers::load_course_items(conn, &course_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        let totals = calc::calculate_total_score(&engine_items);
        let item_rows = match course_item_rows(conn, &course_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        out.push(json!({
            "courseId": course_id,
            "code": code,
            "semesterId": semester_id,
            "semesterLabel": semester_label,
            "targetGrade": target_grade,
            "collapsed": collapsed,
            "totalScore": totals.score,
            "weightValid": calc::is_weight_valid(&engine_items),
            "items": item_rows
        }));
    }

    ok(&req.id, json!({ "courses": out }))
}

fn handle_courses_update_item(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match resolve_course_id(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let idx = match req.params.get("idx").and_then(|v| v.as_i64()) {
        Some(v) if v >= 0 => v,
        _ => return err(&req.id, "bad_params", "missing/invalid idx", None),
    };

    let item_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM assessment_items WHERE course_id = ? AND idx = ?",
            (&course_id, idx),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(item_id) = item_id else {
        return err(
            &req.id,
            "not_found",
            "assessment item not found",
            Some(json!({ "idx": idx })),
        );
    };

    let mut touched = false;
    if let Some(score) = req.params.get("score").and_then(|v| v.as_str()) {
        if let Err(e) = conn.execute(
            "UPDATE assessment_items SET score = ? WHERE id = ?",
            (score, &item_id),
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
        touched = true;
    }
    if let Some(enabled) = req.params.get("enabled").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE assessment_items SET enabled = ? WHERE id = ?",
            (enabled as i64, &item_id),
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
        touched = true;
    }
    if let Some(label) = req.params.get("label").and_then(|v| v.as_str()) {
        if let Err(e) = conn.execute(
            "UPDATE assessment_items SET label = ? WHERE id = ?",
            (label, &item_id),
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
        touched = true;
    }
    if let Some(weight) = req.params.get("weight").and_then(|v| v.as_str()) {
        if let Err(e) = conn.execute(
            "UPDATE assessment_items SET weight = ? WHERE id = ?",
            (weight, &item_id),
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
        touched = true;
    }
    if let Some(collapsed) = req.params.get("collapsed").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE assessment_items SET collapsed = ? WHERE id = ?",
            (collapsed as i64, &item_id),
        ) {
            return err(&req.id, "db_insert_failed", e.to_string(), None);
        }
        touched = true;
    }

    if !touched {
        return err(
            &req.id,
            "bad_params",
            "nothing to update: provide score, enabled, label, weight or collapsed",
            None,
        );
    }

    state.save.mark_dirty();

    let items = match crate::ipc::helpers::load_course_items(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let totals = calc::calculate_total_score(&items);
    ok(
        &req.id,
        json!({
            "courseId": course_id,
            "idx": idx,
            "totalScore": totals.score,
            "weightValid": calc::is_weight_valid(&items)
        }),
    )
}

fn handle_courses_set_target_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match resolve_course_id(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(target_grade) = req.params.get("targetGrade").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing targetGrade", None);
    };

    if let Err(e) = conn.execute(
        "UPDATE courses SET target_grade = ? WHERE id = ?",
        (target_grade, &course_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    state.save.mark_dirty();
    ok(
        &req.id,
        json!({ "courseId": course_id, "targetGrade": target_grade }),
    )
}

fn handle_courses_set_collapsed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = match resolve_course_id(conn, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(collapsed) = req.params.get("collapsed").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing collapsed", None);
    };

    if let Err(e) = conn.execute(
        "UPDATE courses SET collapsed = ? WHERE id = ?",
        (collapsed as i64, &course_id),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    state.save.mark_dirty();
    ok(
        &req.id,
        json!({ "courseId": course_id, "collapsed": collapsed }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.add" => Some(handle_courses_add(state, req)),
        "courses.remove" => Some(handle_courses_remove(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.updateItem" => Some(handle_courses_update_item(state, req)),
        "courses.setTargetGrade" => Some(handle_courses_set_target_grade(state, req)),
        "courses.setCollapsed" => Some(handle_courses_set_collapsed(state, req)),
        _ => None,
    }
}
