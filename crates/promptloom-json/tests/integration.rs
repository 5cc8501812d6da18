use promptloom_core::DiffSlice;
use promptloom_core::reply::apply_slices;
use std::process::Command;

// === helpers ===

/// run promptloom-json with JSON input on stdin
fn run_promptloom_json(input: &str) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_promptloom-json"))
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .and_then(|mut child| {
            use std::io::Write;
            child.stdin.take().unwrap().write_all(input.as_bytes())?;
            child.wait_with_output()
        })
        .expect("Failed to run promptloom-json");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

/// minimal request for alice replying to the user, with the given replies
fn base_input(replies: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "char_id": "alice",
        "charname": "Alice",
        "user_charname": "User",
        "replies": replies,
    })
}

/// validate that every non-empty line of stdout parses as JSON with a "type" field
fn assert_valid_jsonl(stdout: &str) {
    for (i, line) in stdout.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: serde_json::Value = serde_json::from_str(line)
            .unwrap_or_else(|e| panic!("line {} is not valid JSON: {}\nline: {}", i, e, line));
        assert!(
            parsed.get("type").is_some(),
            "line {} missing 'type' field: {}",
            i,
            line
        );
    }
}

fn records(stdout: &str, kind: &str) -> Vec<serde_json::Value> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|v| v["type"] == kind)
        .collect()
}

/// replay every preview record the way a client renders them
fn rendered_text(stdout: &str) -> String {
    let mut text = String::new();
    let mut files = Vec::new();
    for preview in records(stdout, "preview") {
        let slices: Vec<DiffSlice> = serde_json::from_value(preview["slices"].clone())
            .unwrap_or_else(|e| panic!("malformed slices: {}\n{}", e, preview));
        apply_slices(&mut text, &mut files, &slices);
    }
    text
}

// === flags ===

#[test]
fn test_json_schema_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_promptloom-json"))
        .arg("--json-schema")
        .output()
        .expect("Failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("JsonInput"));
    assert!(stdout.contains("replies"));
}

#[test]
fn test_version_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_promptloom-json"))
        .arg("--version")
        .output()
        .expect("Failed to run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("promptloom-json "));
}

// === replies ===

#[test]
fn test_single_reply_emits_preview_then_reply() {
    let (stdout, stderr, success) = run_promptloom_json(&base_input(&["hello"]).to_string());
    assert!(success, "stderr: {}", stderr);
    assert_valid_jsonl(&stdout);

    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.last().unwrap()["type"], "reply");
    assert_eq!(lines.last().unwrap()["reply"]["content"], "hello");
    assert!(!records(&stdout, "preview").is_empty());
    assert_eq!(rendered_text(&stdout), "hello");
}

#[test]
fn test_streamed_reply_emits_one_preview_per_chunk() {
    let mut input = base_input(&["one two three"]);
    input["stream"] = serde_json::json!(true);
    let (stdout, stderr, success) = run_promptloom_json(&input.to_string());
    assert!(success, "stderr: {}", stderr);
    assert_valid_jsonl(&stdout);

    assert_eq!(records(&stdout, "preview").len(), 3);
    assert_eq!(rendered_text(&stdout), "one two three");
    assert_eq!(records(&stdout, "reply")[0]["reply"]["content"], "one two three");
}

#[test]
fn test_tool_info_request_regenerates() {
    let mut input = base_input(&["```get-tool-info\ndice\n```", "rolled a 4"]);
    input["tool_info"] = serde_json::json!({"dice": "Roll with ```roll\n1d6\n```"});
    let (stdout, stderr, success) = run_promptloom_json(&input.to_string());
    assert!(success, "stderr: {}", stderr);
    assert_valid_jsonl(&stdout);

    let reply = &records(&stdout, "reply")[0]["reply"];
    assert_eq!(reply["content"], "rolled a 4");
    // the second pass rewrote the first from the start
    assert_eq!(rendered_text(&stdout), "rolled a 4");
    let logged = reply["logContextBefore"].as_array().unwrap();
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[0]["role"], "tool");
    assert_eq!(logged[1]["role"], "system");
    assert!(logged[1]["content"].as_str().unwrap().contains("1d6"));
    assert_eq!(logged[1]["charVisibility"], serde_json::json!(["alice"]));
}

#[test]
fn test_tool_blocks_hidden_from_previews() {
    let mut input = base_input(&["Sure. <calc>2+2</calc> Done."]);
    input["config"] = serde_json::json!({
        "tool_blocks": [{"id": "calc", "start": "<calc>", "end": "</calc>"}]
    });
    let (stdout, stderr, success) = run_promptloom_json(&input.to_string());
    assert!(success, "stderr: {}", stderr);

    let shown = rendered_text(&stdout);
    assert!(!shown.contains("2+2"), "previews leaked the block: {}", shown);
    assert!(shown.contains("Tool calling..."));
    let reply = &records(&stdout, "reply")[0]["reply"];
    assert_eq!(reply["content"], "Sure. <calc>2+2</calc> Done.");
}

#[test]
fn test_generator_creates_directory() {
    let home = tempfile::tempdir().unwrap();
    let mut input = base_input(&[
        "```generate-char bob\nexport default {}\n```",
        "Bob is ready.",
    ]);
    input["generator_root"] = serde_json::json!(home.path());
    let (stdout, stderr, success) = run_promptloom_json(&input.to_string());
    assert!(success, "stderr: {}", stderr);

    let entry = home.path().join("bob").join("main.mjs");
    assert!(entry.exists());
    let manifest: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(home.path().join("bob").join("manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(manifest["type"], "chars");
    assert_eq!(manifest["dirname"], "bob");

    let reply = &records(&stdout, "reply")[0]["reply"];
    assert_eq!(reply["content"], "Bob is ready.");
    let logged = reply["logContextBefore"].as_array().unwrap();
    assert!(
        logged[1]["content"]
            .as_str()
            .unwrap()
            .contains("Generated chars 'bob'")
    );
}

#[test]
fn test_max_passes_bounds_regeneration() {
    let mut input = base_input(&["```get-tool-info\ndice\n```"]);
    input["config"] = serde_json::json!({"max_passes": 2});
    let (stdout, stderr, success) = run_promptloom_json(&input.to_string());
    assert!(success, "stderr: {}", stderr);

    let reply = &records(&stdout, "reply")[0]["reply"];
    // two passes, each logging the request and its answer
    assert_eq!(reply["logContextBefore"].as_array().unwrap().len(), 4);
}

// === failures ===

#[test]
fn test_invalid_json_fails() {
    let (_, stderr, success) = run_promptloom_json("{not json");
    assert!(!success);
    assert!(stderr.contains("Invalid JSON input"));
}

#[test]
fn test_invalid_config_reports_error_record() {
    let mut input = base_input(&["x"]);
    input["config"] = serde_json::json!({"max_passes": 0});
    let (stdout, _, success) = run_promptloom_json(&input.to_string());
    assert!(!success);
    assert_valid_jsonl(&stdout);
    let errors = records(&stdout, "error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["code"], "invalid_config");
    assert!(records(&stdout, "reply").is_empty());
}

#[test]
fn test_backend_failure_keeps_partial_reply() {
    let (stdout, _, success) = run_promptloom_json(&base_input(&[]).to_string());
    assert!(!success);
    let errors = records(&stdout, "error");
    assert_eq!(errors[0]["code"], "backend_error");
    assert!(errors[0]["partial"].is_object());
}
