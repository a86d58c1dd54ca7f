use serde_json::json;

use crate::calc::{self, QuizAttempt};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

const QUIZ_MAX_SLOTS: usize = 50;

fn handle_quiz_best_of(req: &Request) -> serde_json::Value {
    let Some(raw_attempts) = req.params.get("attempts") else {
        return err(&req.id, "bad_params", "missing attempts[]", None);
    };
    let attempts: Vec<QuizAttempt> = match serde_json::from_value(raw_attempts.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                "malformed attempts[]",
                Some(json!({ "parse": e.to_string() })),
            )
        }
    };

    let total_slots = req
        .params
        .get("totalSlots")
        .and_then(|v| v.as_u64())
        .unwrap_or(attempts.len() as u64) as usize;
    let Some(keep_count) = req.params.get("keepCount").and_then(|v| v.as_u64()) else {
        return err(&req.id, "bad_params", "missing keepCount", None);
    };
    let keep_count = keep_count as usize;

    if total_slots > QUIZ_MAX_SLOTS {
        return err(
            &req.id,
            "bad_params",
            "too many quiz slots",
            Some(json!({ "totalSlots": total_slots, "max": QUIZ_MAX_SLOTS })),
        );
    }

    let per_attempt: Vec<serde_json::Value> = attempts
        .iter()
        .map(|a| match calc::quiz_attempt_fraction(a) {
            Some(fraction) => json!(calc::clamp_percent(fraction * 100.0)),
            None => serde_json::Value::Null,
        })
        .collect();

    let total = calc::quiz_best_of(&attempts, total_slots, keep_count);
    ok(
        &req.id,
        json!({
            "perAttemptPercent": per_attempt,
            "totalPercent": total,
            "available": total.is_some(),
            "kept": keep_count.min(total_slots)
        }),
    )
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quiz.bestOf" => Some(handle_quiz_best_of(req)),
        _ => None,
    }
}
