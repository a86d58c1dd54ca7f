use serde_json::json;

use crate::calc::DEFAULT_GRADE_CUTOFFS;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{parse_cutoffs, CUTOFFS_SETTINGS_KEY};
use crate::ipc::types::{AppState, Request};

fn handle_cutoffs_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(conn) = state.db.as_ref() {
        match db::settings_get_json(conn, CUTOFFS_SETTINGS_KEY) {
            Ok(Some(stored)) => {
                return ok(&req.id, json!({ "cutoffs": stored, "source": "workspace" }))
            }
            Ok(None) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(
        &req.id,
        json!({ "cutoffs": DEFAULT_GRADE_CUTOFFS.to_vec(), "source": "default" }),
    )
}

fn handle_cutoffs_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = req.params.get("cutoffs") else {
        return err(&req.id, "bad_params", "missing cutoffs[]", None);
    };
    let cutoffs = match parse_cutoffs(raw) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    // An empty table would leave target lookups with no sane fallback.
    if cutoffs.is_empty() {
        return err(&req.id, "empty_cutoffs", "cutoff table must not be empty", None);
    }

    let value = json!(cutoffs);
    if let Err(e) = db::settings_set_json(conn, CUTOFFS_SETTINGS_KEY, &value) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "cutoffs": value, "source": "workspace" }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cutoffs.get" => Some(handle_cutoffs_get(state, req)),
        "cutoffs.set" => Some(handle_cutoffs_set(state, req)),
        _ => None,
    }
}
