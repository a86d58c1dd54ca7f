use serde_json::json;

use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{resolve_cutoffs, resolve_items};
use crate::ipc::types::{AppState, Request};

fn handle_total_score(state: &mut AppState, req: &Request) -> serde_json::Value {
    let items = match resolve_items(state, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let totals = calc::calculate_total_score(&items);
    ok(
        &req.id,
        json!({
            "score": totals.score,
            "totalWeight": totals.total_weight,
            "remainingWeight": calc::remaining_weight(totals.total_weight)
        }),
    )
}

fn handle_weight_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let items = match resolve_items(state, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let per_item: Vec<serde_json::Value> = items
        .iter()
        .map(|item| json!({ "idx": item.idx, "validWeight": item.valid_weight() }))
        .collect();
    ok(
        &req.id,
        json!({
            "weightValid": calc::is_weight_valid(&items),
            "enabledWeight": calc::enabled_weight(&items),
            "items": per_item
        }),
    )
}

fn handle_grade_details(state: &mut AppState, req: &Request) -> serde_json::Value {
    let items = match resolve_items(state, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let cutoffs = match resolve_cutoffs(state, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let totals = calc::calculate_total_score(&items);
    let rows = calc::get_grade_details_rows(&items, &cutoffs);
    ok(
        &req.id,
        json!({
            "score": totals.score,
            "totalWeight": totals.total_weight,
            "remainingWeight": calc::remaining_weight(totals.total_weight),
            "weightValid": calc::is_weight_valid(&items),
            "rows": rows
        }),
    )
}

fn handle_target_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let items = match resolve_items(state, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let cutoffs = match resolve_cutoffs(state, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(target_grade) = req.params.get("targetGrade").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing targetGrade", None);
    };

    match calc::get_target_summary(&items, target_grade, &cutoffs) {
        Ok(summary) => {
            let totals = calc::calculate_total_score(&items);
            ok(
                &req.id,
                json!({
                    "score": totals.score,
                    "targetGrade": target_grade,
                    "requiredPercent": summary.required_percent,
                    "requiredScore": summary.required_score,
                    "remainingWeight": summary.remaining_weight
                }),
            )
        }
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_best_possible(state: &mut AppState, req: &Request) -> serde_json::Value {
    let items = match resolve_items(state, req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let totals = calc::calculate_total_score(&items);
    ok(
        &req.id,
        json!({
            "score": totals.score,
            "bestPossible": calc::calculate_best_possible(&items)
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.totalScore" => Some(handle_total_score(state, req)),
        "calc.weightCheck" => Some(handle_weight_check(state, req)),
        "calc.gradeDetails" => Some(handle_grade_details(state, req)),
        "calc.targetSummary" => Some(handle_target_summary(state, req)),
        "calc.bestPossible" => Some(handle_best_possible(state, req)),
        _ => None,
    }
}
