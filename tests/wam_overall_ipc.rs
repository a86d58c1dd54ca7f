use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

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

fn add_scored_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    code: &str,
    score: &str,
) -> String {
    let added = request_ok(
        stdin,
        reader,
        &format!("add-{}", code),
        "courses.add",
        json!({
            "code": code,
            "semesterId": "S1-2025",
            "items": [{ "label": "Final", "weight": "100%" }]
        }),
    );
    let course_id = added["courseId"].as_str().expect("courseId").to_string();
    let _ = request_ok(
        stdin,
        reader,
        &format!("score-{}", code),
        "courses.updateItem",
        json!({ "courseId": course_id, "idx": 0, "score": score }),
    );
    course_id
}

#[test]
fn overall_mark_is_the_mean_of_course_finals() {
    let workspace = temp_dir("gradebookd-wam-overall");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = add_scored_course(&mut stdin, &mut reader, "MATH1051", "80%");
    let _ = add_scored_course(&mut stdin, &mut reader, "CSSE2310", "60%");

    let result = request_ok(&mut stdin, &mut reader, "2", "wam.overall", json!({}));
    assert_eq!(result["overall"], 70.0);

    let courses = result["courses"].as_array().expect("courses array");
    assert_eq!(courses.len(), 2);
    assert_eq!(courses[0]["code"], "MATH1051");
    assert_eq!(courses[0]["score"], 80.0);
    assert_eq!(courses[0]["weightValid"], true);
    assert_eq!(courses[1]["score"], 60.0);

    let _ = child.kill();
}

#[test]
fn undecided_courses_contribute_their_zero_totals() {
    let workspace = temp_dir("gradebookd-wam-undecided");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = add_scored_course(&mut stdin, &mut reader, "MATH1051", "90%");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "courses.add",
        json!({
            "code": "PHYS1002",
            "semesterId": "S1-2025",
            "items": [{ "label": "Final", "weight": "100%" }]
        }),
    );

    let result = request_ok(&mut stdin, &mut reader, "3", "wam.overall", json!({}));
    assert_eq!(result["overall"], 45.0);

    let _ = child.kill();
}

#[test]
fn workspace_cutoff_override_feeds_stored_course_projections() {
    let workspace = temp_dir("gradebookd-wam-cutoffs");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course_id = add_scored_course(&mut stdin, &mut reader, "MATH1051", "80%");

    let default_table = request_ok(&mut stdin, &mut reader, "2", "cutoffs.get", json!({}));
    assert_eq!(default_table["source"], "default");
    assert_eq!(
        default_table["cutoffs"].as_array().expect("cutoffs").len(),
        6
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "cutoffs.set",
        json!({
            "cutoffs": [
                { "grade": 1, "cutoff": 50.0 },
                { "grade": 2, "cutoff": 90.0 }
            ]
        }),
    );
    let stored = request_ok(&mut stdin, &mut reader, "4", "cutoffs.get", json!({}));
    assert_eq!(stored["source"], "workspace");

    let details = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "calc.gradeDetails",
        json!({ "courseId": course_id }),
    );
    let rows = details["rows"].as_array().expect("rows array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["grade"], 1);
    assert_eq!(rows[0]["achieved"], true);
    assert_eq!(rows[1]["grade"], 2);
    assert_eq!(rows[1]["achieved"], false);
    // Everything is decided, so a missed tier is out of reach.
    assert_eq!(rows[1]["obtainable"], false);

    let _ = child.kill();
}

#[test]
fn empty_cutoff_table_cannot_be_stored() {
    let workspace = temp_dir("gradebookd-wam-cutoffs-empty");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "cutoffs.set",
        json!({ "cutoffs": [] }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "empty_cutoffs");

    let _ = child.kill();
}
