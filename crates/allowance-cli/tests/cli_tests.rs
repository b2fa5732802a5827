//! Integration tests for the `allowance` CLI binary.
//!
//! Each test runs the real binary inside its own temp directory, so the
//! default `allowance.json` state file and `allowance.toml` config are isolated.

// `Command::cargo_bin` was deprecated in assert_cmd 2.1.2 in favor of
// `cargo::cargo_bin_cmd!`. Allow it until we migrate.
#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

fn allowance(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("allowance").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

/// Run a command that must succeed and parse its JSON output.
fn run_json(dir: &TempDir, args: &[&str]) -> Value {
    let output = allowance(dir).args(args).output().unwrap();
    assert!(
        output.status.success(),
        "allowance {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

fn add_child(dir: &TempDir, name: &str) -> String {
    let child = run_json(dir, &["--now", "2025-01-15T12:00:00Z", "add-child", name]);
    child["id"].as_str().unwrap().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Manual actions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn deposit_and_balance() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");

    let tx = run_json(&dir, &["deposit", &child, "12.50", "-d", "Birthday"]);
    assert_eq!(tx["amount"], 1250);
    assert_eq!(tx["description"], "Birthday");

    let balance = run_json(&dir, &["balance", &child]);
    assert_eq!(balance["balance"], 1250);
    assert_eq!(balance["display"], "\u{20ac}12.50");
    assert!(dir.path().join("allowance.json").exists());
}

#[test]
fn currency_comes_from_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("allowance.toml"), "currency = \"USD\"\n").unwrap();
    let child = add_child(&dir, "Ada");
    run_json(&dir, &["deposit", &child, "3"]);

    let balance = run_json(&dir, &["balance", &child]);
    assert_eq!(balance["display"], "$3.00");
}

#[test]
fn overdraft_is_refused() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");
    run_json(&dir, &["deposit", &child, "1"]);

    allowance(&dir)
        .args(["withdraw", &child, "1.01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Insufficient balance"));

    let balance = run_json(&dir, &["balance", &child]);
    assert_eq!(balance["balance"], 100);
}

#[test]
fn malformed_amount_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");

    allowance(&dir)
        .args(["deposit", &child, "1.234"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid amount"));
}

#[test]
fn unknown_child_fails() {
    let dir = TempDir::new().unwrap();
    allowance(&dir)
        .args(["balance", "00000000-0000-0000-0000-000000000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("child not found"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Rules and tick
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn advance_then_tick_pays_the_reduced_amount() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");

    let rule = run_json(
        &dir,
        &[
            "--now",
            "2025-01-15T12:00:00Z",
            "add-rule",
            &child,
            "5",
            "--kind",
            "weekly",
            "--day-of-week",
            "5",
            "--hour",
            "9",
            "--timezone",
            "UTC",
        ],
    );
    assert_eq!(rule["next_run_at"], "2025-01-17T09:00:00Z");

    run_json(&dir, &["--now", "2025-01-15T13:00:00Z", "advance", &child, "2"]);

    // Not due yet.
    let early = run_json(&dir, &["--now", "2025-01-16T09:00:00Z", "tick"]);
    assert_eq!(early["total"], 0);

    let report = run_json(&dir, &["--now", "2025-01-17T09:00:00Z", "tick"]);
    assert_eq!(report["processed"], 1);
    assert_eq!(report["reduced"], 1);

    // Same instant again: nothing left to pay.
    let again = run_json(&dir, &["--now", "2025-01-17T09:00:00Z", "tick"]);
    assert_eq!(again["total"], 0);

    let balance = run_json(&dir, &["balance", &child]);
    assert_eq!(balance["balance"], 500);

    let rules = run_json(&dir, &["rules", &child]);
    assert_eq!(rules[0]["next_run_at"], "2025-01-24T09:00:00Z");
    assert!(run_json(&dir, &["deductions", &child])
        .as_array()
        .unwrap()
        .is_empty());
}

#[test]
fn edit_pause_resume_delete() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");
    let rule = run_json(
        &dir,
        &["--now", "2025-01-15T12:00:00Z", "add-rule", &child, "5", "--kind", "daily", "--hour", "7"],
    );
    let rule_id = rule["id"].as_str().unwrap().to_string();

    let edited = run_json(
        &dir,
        &["--now", "2025-01-15T12:00:00Z", "edit-rule", &rule_id, "--amount", "6", "--hour", "18"],
    );
    assert_eq!(edited["amount"], 600);
    assert_eq!(edited["schedule"]["interval"]["kind"], "daily");
    assert_eq!(edited["next_run_at"], "2025-01-16T18:00:00Z");

    let paused = run_json(&dir, &["pause", &rule_id]);
    assert_eq!(paused["active"], false);
    let report = run_json(&dir, &["--now", "2025-01-20T00:00:00Z", "tick"]);
    assert_eq!(report["total"], 0);

    let resumed = run_json(&dir, &["--now", "2025-01-20T00:00:00Z", "resume", &rule_id]);
    assert_eq!(resumed["next_run_at"], "2025-01-21T18:00:00Z");

    run_json(&dir, &["delete-rule", &rule_id]);
    assert!(run_json(&dir, &["rules", &child]).as_array().unwrap().is_empty());
}

#[test]
fn skip_waives_the_next_payment_only() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");
    let rule = run_json(
        &dir,
        &[
            "--now", "2025-01-15T12:00:00Z", "add-rule", &child, "5", "--kind", "daily", "--hour",
            "9", "--timezone", "UTC",
        ],
    );
    let rule_id = rule["id"].as_str().unwrap().to_string();

    let flagged = run_json(&dir, &["skip", &rule_id]);
    assert_eq!(flagged["skip_next"], true);

    let report = run_json(&dir, &["--now", "2025-01-16T09:00:00Z", "tick"]);
    assert_eq!((report["skipped"].as_u64(), report["processed"].as_u64()), (Some(1), Some(0)));
    let report = run_json(&dir, &["--now", "2025-01-17T09:00:00Z", "tick"]);
    assert_eq!(report["processed"], 1);

    let balance = run_json(&dir, &["balance", &child]);
    assert_eq!(balance["balance"], 500);

    run_json(&dir, &["skip", &rule_id]);
    let cancelled = run_json(&dir, &["skip", &rule_id, "--cancel"]);
    assert_eq!(cancelled["skip_next"], false);
}

#[test]
fn saving_targets_and_child_edits() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");
    run_json(&dir, &["deposit", &child, "20"]);

    let target = run_json(&dir, &["add-target", &child, "Bike", "80", "--link", "https://example.com"]);
    let target_id = target["id"].as_str().unwrap().to_string();
    let listed = run_json(&dir, &["targets", &child]);
    assert_eq!(listed[0]["name"], "Bike");
    assert_eq!(listed[0]["percent"], 25);
    assert_eq!(listed[0]["remaining"], 6000);

    let edited = run_json(&dir, &["edit-target", &target_id, "--amount", "40"]);
    assert_eq!(edited["name"], "Bike");
    assert_eq!(edited["link"], "https://example.com");
    assert_eq!(run_json(&dir, &["targets", &child])[0]["percent"], 50);

    run_json(&dir, &["delete-target", &target_id]);
    assert!(run_json(&dir, &["targets", &child]).as_array().unwrap().is_empty());

    let renamed = run_json(&dir, &["rename-child", &child, "Ada L."]);
    assert_eq!(renamed["name"], "Ada L.");

    run_json(&dir, &["delete-child", &child]);
    assert!(run_json(&dir, &["children"]).as_array().unwrap().is_empty());
    allowance(&dir)
        .args(["balance", &child])
        .assert()
        .failure()
        .stderr(predicate::str::contains("child not found"));
}

#[test]
fn unknown_schedule_kind_fails() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");
    allowance(&dir)
        .args(["add-rule", &child, "5", "--kind", "fortnightly"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid schedule kind"));
}

#[test]
fn tick_on_an_empty_ledger() {
    let dir = TempDir::new().unwrap();
    let report = run_json(&dir, &["tick"]);
    assert_eq!(report["total"], 0);
    assert_eq!(report["failed"], 0);
}

#[test]
fn corrupt_state_file_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("allowance.json"), "{ nope").unwrap();
    allowance(&dir)
        .arg("tick")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse state file"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Read views
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn history_events_and_transactions() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");
    run_json(&dir, &["--now", "2025-01-15T12:00:00Z", "deposit", &child, "10"]);
    run_json(&dir, &["--now", "2025-01-17T12:00:00Z", "withdraw", &child, "4"]);

    let history = run_json(
        &dir,
        &["--now", "2025-01-17T12:00:00Z", "history", &child, "--days", "2"],
    );
    let closing: Vec<i64> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["balance"].as_i64().unwrap())
        .collect();
    assert_eq!(closing, vec![1000, 1000, 600]);

    let events = run_json(&dir, &["events", &child, "--count", "1"]);
    assert_eq!(events[0]["balance"], 1000);
    assert_eq!(events[1]["balance"], 600);

    let recent = run_json(&dir, &["transactions", &child, "--limit", "1"]);
    assert_eq!(recent.as_array().unwrap().len(), 1);
    assert_eq!(recent[0]["amount"], -400);
}

// ─────────────────────────────────────────────────────────────────────────────
// Stateless helpers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn resolve_reports_dst_gap() {
    let dir = TempDir::new().unwrap();
    let out = run_json(&dir, &["resolve", "2025-03-09", "2", "America/New_York"]);
    assert_eq!(out["utc"], "2025-03-09T07:00:00Z");
    assert_eq!(out["resolution"], "gap_shifted");
    assert!(!dir.path().join("allowance.json").exists());
}

#[test]
fn next_run_previews_a_schedule() {
    let dir = TempDir::new().unwrap();
    let out = run_json(
        &dir,
        &[
            "--now",
            "2025-01-15T12:00:00Z",
            "next-run",
            "--kind",
            "weekly",
            "--day-of-week",
            "5",
            "--hour",
            "9",
            "--timezone",
            "UTC",
            "--count",
            "2",
        ],
    );
    assert_eq!(out["schedule"], "Weekly on Friday at 09:00 (UTC)");
    assert_eq!(out["runs"][0], "2025-01-17T09:00:00Z");
    assert_eq!(out["runs"][1], "2025-01-24T09:00:00Z");
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbox
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn outbox_receives_signed_events() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("allowance.toml"), "webhook_secret = \"s3cret\"\n").unwrap();
    let child = add_child(&dir, "Ada");

    allowance(&dir)
        .args(["--outbox", "outbox.jsonl", "deposit", &child, "2"])
        .assert()
        .success();

    let raw = std::fs::read_to_string(dir.path().join("outbox.jsonl")).unwrap();
    let lines: Vec<Value> = raw
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["event"], "transaction.created");
    let signature = lines[0]["headers"]["X-Webhook-Signature"].as_str().unwrap();
    assert!(signature.starts_with("sha256="), "{signature}");

    let body: Value = serde_json::from_str(lines[0]["body"].as_str().unwrap()).unwrap();
    assert_eq!(body["data"]["type"], "deposit");
    assert_eq!(body["data"]["amount"], 200);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrent invocations
// ─────────────────────────────────────────────────────────────────────────────

/// Start `n` copies of the binary at once and wait for all of them.
fn spawn_concurrently(dir: &TempDir, n: usize, args: &[&str]) -> Vec<std::process::Output> {
    let bin = assert_cmd::cargo::cargo_bin("allowance");
    let children: Vec<_> = (0..n)
        .map(|_| {
            std::process::Command::new(&bin)
                .current_dir(dir.path())
                .args(args)
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .unwrap()
        })
        .collect();
    children
        .into_iter()
        .map(|child| child.wait_with_output().unwrap())
        .collect()
}

#[test]
fn concurrent_ticks_pay_a_due_rule_once() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");
    run_json(
        &dir,
        &[
            "--now", "2025-01-15T12:00:00Z", "add-rule", &child, "5", "--kind", "daily", "--hour",
            "9", "--timezone", "UTC",
        ],
    );

    let outputs = spawn_concurrently(
        &dir,
        6,
        &["--now", "2025-01-16T09:30:00Z", "--outbox", "outbox.jsonl", "tick"],
    );
    let mut processed = 0;
    for output in &outputs {
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let report: Value = serde_json::from_slice(&output.stdout).unwrap();
        processed += report["processed"].as_u64().unwrap();
    }
    assert_eq!(processed, 1);

    let balance = run_json(&dir, &["balance", &child]);
    assert_eq!(balance["balance"], 500);
    let recent = run_json(&dir, &["transactions", &child]);
    assert_eq!(recent.as_array().unwrap().len(), 1);

    let raw = std::fs::read_to_string(dir.path().join("outbox.jsonl")).unwrap();
    let paid = raw
        .lines()
        .filter(|l| l.contains("recurring_payment.processed"))
        .count();
    assert_eq!(paid, 1);
}

#[test]
fn concurrent_deposits_are_all_kept() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");

    let outputs = spawn_concurrently(&dir, 8, &["deposit", &child, "1"]);
    assert!(outputs.iter().all(|o| o.status.success()));

    let balance = run_json(&dir, &["balance", &child]);
    assert_eq!(balance["balance"], 800);
    // No temp files are left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != "allowance.json" && name != "allowance.json.lock")
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn failed_command_leaves_outbox_empty() {
    let dir = TempDir::new().unwrap();
    let child = add_child(&dir, "Ada");

    allowance(&dir)
        .args(["--outbox", "outbox.jsonl", "withdraw", &child, "1"])
        .assert()
        .failure();
    assert!(!dir.path().join("outbox.jsonl").exists());
}

#[test]
fn help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    allowance(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tick"))
        .stdout(predicate::str::contains("add-rule"));
}
