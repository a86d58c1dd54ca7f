use serde_json::json;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::load_course_items;
use crate::ipc::types::{AppState, Request};

// Each course is reduced to its own summary first; only those finals are
// combined, so one course's bad input can never leak into another's total.
fn handle_wam_overall(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, code, semester_id FROM courses ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let courses: Vec<(String, String, String)> = match stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut finals = Vec::with_capacity(courses.len());
    let mut rows = Vec::with_capacity(courses.len());
    for (course_id, code, semester_id) in courses {
        let items = match load_course_items(conn, &course_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        let totals = calc::calculate_total_score(&items);
        finals.push(totals.score);
        rows.push(json!({
            "courseId": course_id,
            "code": code,
            "semesterId": semester_id,
            "score": totals.score,
            "totalWeight": totals.total_weight,
            "weightValid": calc::is_weight_valid(&items)
        }));
    }

    ok(
        &req.id,
        json!({
            "courses": rows,
            "overall": calc::overall_average(&finals)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "wam.overall" => Some(handle_wam_overall(state, req)),
        _ => None,
    }
}
