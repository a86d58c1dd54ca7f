use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        id,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn half_decided_items() -> serde_json::Value {
    json!([
        { "weight": "50%", "score": "80%", "enabled": true },
        { "weight": "50%", "score": "", "enabled": true }
    ])
}

#[test]
fn total_score_excludes_undecided_from_both_sides() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.totalScore",
        json!({ "items": half_decided_items() }),
    );
    assert_eq!(result["score"], 40.0);
    assert_eq!(result["totalWeight"], 0.5);
    assert_eq!(result["remainingWeight"], 0.5);
    let _ = child.kill();
}

#[test]
fn grade_details_projects_each_tier() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.gradeDetails",
        json!({
            "items": half_decided_items(),
            "cutoffs": [
                { "grade": 4, "cutoff": 50.0 },
                { "grade": 7, "cutoff": 80.0 }
            ]
        }),
    );
    let rows = result["rows"].as_array().expect("rows array");
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0]["grade"], 4);
    assert_eq!(rows[0]["requiredPercent"], 20.0);
    assert_eq!(rows[0]["requiredScore"], "10/50");
    assert_eq!(rows[0]["achieved"], false);
    assert_eq!(rows[0]["obtainable"], true);

    assert_eq!(rows[1]["grade"], 7);
    assert_eq!(rows[1]["requiredPercent"], 80.0);
    assert_eq!(rows[1]["requiredScore"], "40/50");
    assert_eq!(rows[1]["achieved"], false);
    // A 40-point gap with 50 points still on the table is reachable.
    assert_eq!(rows[1]["obtainable"], true);
    let _ = child.kill();
}

#[test]
fn grade_details_row_order_follows_the_cutoff_table() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.gradeDetails",
        json!({
            "items": half_decided_items(),
            "cutoffs": [
                { "grade": 7, "cutoff": 85.0 },
                { "grade": 4, "cutoff": 50.0 },
                { "grade": 5, "cutoff": 65.0 }
            ]
        }),
    );
    let grades: Vec<i64> = result["rows"]
        .as_array()
        .expect("rows array")
        .iter()
        .map(|r| r["grade"].as_i64().expect("grade"))
        .collect();
    assert_eq!(grades, vec![7, 4, 5]);
    let _ = child.kill();
}

#[test]
fn weight_check_flags_overweight_configurations() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.weightCheck",
        json!({
            "items": [
                { "weight": "60%", "score": "", "enabled": true },
                { "weight": "50%", "score": "", "enabled": true }
            ]
        }),
    );
    assert_eq!(result["weightValid"], false);
    assert_eq!(result["enabledWeight"], 110.0);
    let _ = child.kill();
}

#[test]
fn disabling_an_item_removes_its_weight_from_the_check() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.weightCheck",
        json!({
            "items": [
                { "weight": "60%", "score": "", "enabled": true },
                { "weight": "40%", "score": "", "enabled": true },
                { "weight": "10%", "score": "", "enabled": false }
            ]
        }),
    );
    assert_eq!(result["weightValid"], true);
    assert_eq!(result["enabledWeight"], 100.0);
    let _ = child.kill();
}

#[test]
fn target_summary_falls_back_to_the_first_cutoff() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.targetSummary",
        json!({
            "items": half_decided_items(),
            "targetGrade": 99,
            "cutoffs": [
                { "grade": 4, "cutoff": 50.0 },
                { "grade": 7, "cutoff": 80.0 }
            ]
        }),
    );
    assert_eq!(result["requiredPercent"], 20.0);
    assert_eq!(result["requiredScore"], "10/50");
    assert_eq!(result["remainingWeight"], 50);
    let _ = child.kill();
}

#[test]
fn target_summary_rejects_an_empty_cutoff_table() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "calc.targetSummary",
        json!({
            "items": half_decided_items(),
            "targetGrade": 4,
            "cutoffs": []
        }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "empty_cutoffs");
    let _ = child.kill();
}

#[test]
fn best_possible_is_current_plus_perfect_remaining() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.bestPossible",
        json!({ "items": half_decided_items() }),
    );
    assert_eq!(result["bestPossible"], 90.0);
    let _ = child.kill();
}

#[test]
fn default_cutoff_table_is_used_when_none_is_supplied() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "calc.gradeDetails",
        json!({ "items": half_decided_items() }),
    );
    let rows = result["rows"].as_array().expect("rows array");
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0]["grade"], 2);
    assert_eq!(rows[5]["grade"], 7);
    assert_eq!(rows[5]["cutoff"], 85.0);
    let _ = child.kill();
}
