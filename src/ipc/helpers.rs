use rusqlite::Connection;
use serde_json::json;

use crate::calc::{AssessmentItem, GradeCutoff, DEFAULT_GRADE_CUTOFFS};
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};

pub const CUTOFFS_SETTINGS_KEY: &str = "cutoffs";

pub fn str_param(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn load_course_items(
    conn: &Connection,
    course_id: &str,
) -> Result<Vec<AssessmentItem>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT idx, label, weight, score, enabled
             FROM assessment_items
             WHERE course_id = ?
             ORDER BY idx",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let items = stmt
        .query_map([course_id], |row| {
            Ok(AssessmentItem {
                idx: row.get(0)?,
                label: row.get(1)?,
                weight: row.get(2)?,
                score: row.get(3)?,
                enabled: row.get::<_, i64>(4)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(items)
}

/// Item source for calc methods: an inline `items` array wins, else
/// `courseId` names stored items (workspace required).
pub fn resolve_items(state: &AppState, req: &Request) -> Result<Vec<AssessmentItem>, HandlerErr> {
    if let Some(raw) = req.params.get("items") {
        return serde_json::from_value::<Vec<AssessmentItem>>(raw.clone()).map_err(|e| {
            HandlerErr::with_details("bad_params", "malformed items[]", json!({ "parse": e.to_string() }))
        });
    }
    let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new(
            "bad_params",
            "provide items[] or courseId",
        ));
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM courses WHERE id = ?",
            [course_id],
            |r| r.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if !exists {
        return Err(HandlerErr::with_details(
            "not_found",
            "course not found",
            json!({ "courseId": course_id }),
        ));
    }
    load_course_items(conn, course_id)
}

/// Cutoff source for calc methods: inline `cutoffs` wins, then the workspace
/// override, then the built-in default table.
pub fn resolve_cutoffs(state: &AppState, req: &Request) -> Result<Vec<GradeCutoff>, HandlerErr> {
    if let Some(raw) = req.params.get("cutoffs") {
        return parse_cutoffs(raw);
    }
    if let Some(conn) = state.db.as_ref() {
        let stored = db::settings_get_json(conn, CUTOFFS_SETTINGS_KEY)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        if let Some(raw) = stored {
            return parse_cutoffs(&raw);
        }
    }
    Ok(DEFAULT_GRADE_CUTOFFS.to_vec())
}

pub fn parse_cutoffs(raw: &serde_json::Value) -> Result<Vec<GradeCutoff>, HandlerErr> {
    let cutoffs: Vec<GradeCutoff> = serde_json::from_value(raw.clone()).map_err(|e| {
        HandlerErr::with_details("bad_params", "malformed cutoffs[]", json!({ "parse": e.to_string() }))
    })?;
    if cutoffs.iter().any(|c| !c.cutoff.is_finite()) {
        return Err(HandlerErr::new(
            "bad_params",
            "cutoffs must be finite percentages",
        ));
    }
    Ok(cutoffs)
}
